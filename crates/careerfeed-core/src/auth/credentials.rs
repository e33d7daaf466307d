//! Credential store: the single owner of persisted tokens.
//!
//! Everything lives in one serialized document (access token, refresh token
//! and the session snapshot, each with its own expiry) so that replacing the
//! token pair is a single write on the underlying medium. Storage failures
//! never escape this module: they are logged and the credentials are treated
//! as absent.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use keyring::Entry;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::StorageError;
use super::session::Session;

const SERVICE_NAME: &str = "careerfeed";

/// Keychain account holding the credential document
const KEYRING_ACCOUNT: &str = "credentials";

/// Credential file name in cache directory
const CREDENTIALS_FILE: &str = "credentials.json";

/// How long each credential stays valid on this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetimes {
    pub access: Duration,
    pub refresh: Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access: Duration::minutes(60),
            refresh: Duration::days(7),
        }
    }
}

/// A freshly issued access/refresh pair with the lifetimes they are stored under.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access: String,
    pub access_expiry: Duration,
    pub refresh: String,
    pub refresh_expiry: Duration,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>, lifetimes: TokenLifetimes) -> Self {
        Self {
            access: access.into(),
            access_expiry: lifetimes.access,
            refresh: refresh.into(),
            refresh_expiry: lifetimes.refresh,
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"<redacted>")
            .field("access_expiry", &self.access_expiry)
            .field("refresh", &"<redacted>")
            .field("refresh_expiry", &self.refresh_expiry)
            .finish()
    }
}

// ============================================================================
// Persistence media
// ============================================================================

/// A place to keep one serialized credential document.
pub trait CredentialBackend: Send + Sync {
    fn load(&self) -> Result<Option<String>, StorageError>;
    fn save(&self, contents: &str) -> Result<(), StorageError>;
    fn delete(&self) -> Result<(), StorageError>;
}

/// Owner-only JSON file, replaced atomically via rename.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CREDENTIALS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()
    }

    #[cfg(not(unix))]
    fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
        std::fs::write(path, contents)
    }
}

impl CredentialBackend for FileBackend {
    fn load(&self) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, contents: &str) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        Self::write_private(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn delete(&self) -> Result<(), StorageError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// One entry in the OS keychain holding the whole document.
pub struct KeyringBackend {
    account: String,
}

impl KeyringBackend {
    pub fn new() -> Self {
        Self::for_account(KEYRING_ACCOUNT)
    }

    pub fn for_account(account: &str) -> Self {
        Self {
            account: account.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry, StorageError> {
        Ok(Entry::new(SERVICE_NAME, &self.account)?)
    }
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialBackend for KeyringBackend {
    fn load(&self) -> Result<Option<String>, StorageError> {
        match self.entry()?.get_password() {
            Ok(contents) => Ok(Some(contents)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, contents: &str) -> Result<(), StorageError> {
        self.entry()?.set_password(contents)?;
        Ok(())
    }

    fn delete(&self) -> Result<(), StorageError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process medium. Clones share the same document.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    contents: Arc<Mutex<Option<String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored document, if any.
    pub fn contents(&self) -> Option<String> {
        self.contents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CredentialBackend for MemoryBackend {
    fn load(&self) -> Result<Option<String>, StorageError> {
        Ok(self.contents())
    }

    fn save(&self, contents: &str) -> Result<(), StorageError> {
        *self.contents.lock().unwrap_or_else(PoisonError::into_inner) = Some(contents.to_string());
        Ok(())
    }

    fn delete(&self) -> Result<(), StorageError> {
        *self.contents.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

// ============================================================================
// Stored document
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Expiring<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

impl<T> Expiring<T> {
    fn new(value: T, lifetime: Duration, now: DateTime<Utc>) -> Self {
        Self {
            value,
            expires_at: now + lifetime,
        }
    }

    fn live(&self, now: DateTime<Utc>) -> Option<&T> {
        (now < self.expires_at).then_some(&self.value)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CredentialDocument {
    #[serde(default)]
    access: Option<Expiring<String>>,
    #[serde(default)]
    refresh: Option<Expiring<String>>,
    #[serde(default)]
    session: Option<Expiring<Session>>,
}

impl CredentialDocument {
    fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none() && self.session.is_none()
    }
}

// ============================================================================
// Store
// ============================================================================

pub struct CredentialStore {
    backend: Box<dyn CredentialBackend>,
    lifetimes: TokenLifetimes,
    /// Serializes read-modify-write cycles so readers never see half an update.
    lock: Mutex<()>,
    /// Set when the medium rejected a write; reads report nothing until it recovers.
    unavailable: AtomicBool,
}

impl CredentialStore {
    pub fn new(backend: impl CredentialBackend + 'static, lifetimes: TokenLifetimes) -> Self {
        Self {
            backend: Box::new(backend),
            lifetimes,
            lock: Mutex::new(()),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new(), TokenLifetimes::default())
    }

    pub fn lifetimes(&self) -> TokenLifetimes {
        self.lifetimes
    }

    /// Replace both tokens in one write. Returns false if the medium refused it.
    pub fn set_tokens(&self, tokens: &TokenPair) -> bool {
        let now = Utc::now();
        self.update(|doc| {
            doc.access = Some(Expiring::new(tokens.access.clone(), tokens.access_expiry, now));
            doc.refresh = Some(Expiring::new(tokens.refresh.clone(), tokens.refresh_expiry, now));
        })
    }

    /// Rotate the access token, keeping the current refresh token.
    pub fn set_access_token(&self, access: &str) -> bool {
        let now = Utc::now();
        let lifetime = self.lifetimes.access;
        self.update(|doc| {
            doc.access = Some(Expiring::new(access.to_string(), lifetime, now));
        })
    }

    /// Mirror the session snapshot; it lives as long as the refresh token.
    pub fn set_session(&self, session: &Session) -> bool {
        let now = Utc::now();
        let lifetime = self.lifetimes.refresh;
        self.update(|doc| {
            doc.session = Some(Expiring::new(session.clone(), lifetime, now));
        })
    }

    /// Tokens and session snapshot of a new login, written together.
    pub fn store_login(&self, tokens: &TokenPair, session: &Session) -> bool {
        let now = Utc::now();
        let session_lifetime = self.lifetimes.refresh;
        self.update(|doc| {
            doc.access = Some(Expiring::new(tokens.access.clone(), tokens.access_expiry, now));
            doc.refresh = Some(Expiring::new(tokens.refresh.clone(), tokens.refresh_expiry, now));
            doc.session = Some(Expiring::new(session.clone(), session_lifetime, now));
        })
    }

    pub fn access_token(&self) -> Option<String> {
        self.read(|doc, now| doc.access.as_ref()?.live(now).cloned())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read(|doc, now| doc.refresh.as_ref()?.live(now).cloned())
    }

    pub fn session(&self) -> Option<Session> {
        self.read(|doc, now| doc.session.as_ref()?.live(now).cloned())
    }

    /// Remove tokens and session snapshot. Idempotent.
    pub fn clear(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.backend.delete() {
            Ok(()) => {
                self.unavailable.store(false, Ordering::SeqCst);
                debug!("Credentials cleared");
            }
            Err(e) => {
                warn!(error = %e, "Failed to clear credentials");
                self.unavailable.store(true, Ordering::SeqCst);
            }
        }
    }

    fn read<T>(&self, pick: impl FnOnce(&CredentialDocument, DateTime<Utc>) -> Option<T>) -> Option<T> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.unavailable.load(Ordering::SeqCst) {
            return None;
        }
        let doc = self.load_document()?;
        pick(&doc, Utc::now())
    }

    fn update(&self, apply: impl FnOnce(&mut CredentialDocument)) -> bool {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut doc = if self.unavailable.load(Ordering::SeqCst) {
            CredentialDocument::default()
        } else {
            self.load_document().unwrap_or_default()
        };
        apply(&mut doc);

        let result = Self::encode(&doc).and_then(|contents| self.backend.save(&contents));
        match result {
            Ok(()) => {
                self.unavailable.store(false, Ordering::SeqCst);
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to persist credentials, treating them as absent");
                self.unavailable.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    fn load_document(&self) -> Option<CredentialDocument> {
        let contents = match self.backend.load() {
            Ok(Some(contents)) => contents,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read credentials");
                return None;
            }
        };

        match Self::decode::<CredentialDocument>(&contents) {
            Ok(doc) if doc.is_empty() => None,
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable credential document");
                if let Err(e) = self.backend.delete() {
                    warn!(error = %e, "Failed to remove unreadable credential document");
                }
                None
            }
        }
    }

    fn encode(doc: &CredentialDocument) -> Result<String, StorageError> {
        Ok(serde_json::to_string(doc)?)
    }

    fn decode<T: DeserializeOwned>(contents: &str) -> Result<T, StorageError> {
        Ok(serde_json::from_str(contents)?)
    }
}
