//! Session state and the session manager.
//!
//! The manager owns the in-memory session, mediates between the credential
//! store and the remote auth endpoints, and publishes [`AuthState`] to
//! observers through a `watch` channel.
//!
//! Mutations of the credential store are ordered by a generation counter
//! that moves whenever the stored credentials are replaced or cleared (a
//! committed login, a logout, an expiry). Requests and refreshes remember
//! the generation they started under and only commit, or reuse a rotated
//! token, if it still holds. A login that fails leaves the generation
//! alone, so the session it would have replaced keeps working. The check
//! and the writes happen under one lock, so a logout that lands mid-refresh
//! can never be followed by a token write from that refresh.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::client::{self, ApiRequest};
use crate::api::transport::{HttpRequest, HttpResponse, RequestBody, Transport};
use crate::api::ApiError;
use crate::models::User;

use super::credentials::{CredentialStore, TokenPair};
use super::error::AuthError;

const LOGIN_PATH: &str = "/auth/login/";
const REGISTER_PATH: &str = "/auth/register/";
const REFRESH_PATH: &str = "/auth/refresh/";
pub(crate) const PROFILE_PATH: &str = "/auth/profile/";

/// A persisted snapshot older than this is discarded during hydration.
pub const DEFAULT_FRESHNESS_HOURS: i64 = 24;

// ============================================================================
// Session data
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub username: String,
    pub is_authenticated: bool,
    pub last_login_at: DateTime<Utc>,
}

impl Session {
    pub fn new(username: &str) -> Self {
        Self::logged_in_at(username, Utc::now())
    }

    pub fn logged_in_at(username: &str, last_login_at: DateTime<Utc>) -> Self {
        Self {
            username: username.trim().to_string(),
            is_authenticated: true,
            last_login_at,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_login_at
    }

    /// Whether the snapshot is still inside the freshness window.
    pub fn is_fresh(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.is_authenticated && self.age(now) <= window
    }
}

// ============================================================================
// State machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPhase {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
    /// Transient: always torn down to `Unauthenticated` before anyone observes it.
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    Begin,
    Succeeded,
    Failed,
    Refreshed,
    RefreshFailed,
    LoggedOut,
    TornDown,
}

impl AuthPhase {
    pub fn next(self, event: AuthEvent) -> Self {
        use AuthEvent::*;
        use AuthPhase::*;

        match (self, event) {
            (_, LoggedOut) => Unauthenticated,
            (Unauthenticated, Begin) => Authenticating,
            (Authenticating, Succeeded) => Authenticated,
            (Authenticating, Failed) => Unauthenticated,
            (Authenticated, Refreshed) => Authenticated,
            (Authenticated, RefreshFailed) => Expired,
            (Expired | Authenticating, TornDown) => Unauthenticated,
            (phase, _) => phase,
        }
    }

    /// Phases that may be published to observers.
    pub fn is_settled(self) -> bool {
        self != AuthPhase::Expired
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    Logout,
    Expired,
}

/// What observers see.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthState {
    pub phase: AuthPhase,
    pub session: Option<Session>,
    /// False until persisted state has been loaded and checked.
    pub hydrated: bool,
    /// Why the last session ended, if it did.
    pub signed_out: Option<SignOutReason>,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        self.phase == AuthPhase::Authenticated && self.session.is_some()
    }

    pub fn username(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.username.as_str())
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<AuthData>,
}

#[derive(Debug, Deserialize)]
struct AuthData {
    user: User,
    tokens: IssuedTokens,
}

#[derive(Debug, Deserialize)]
struct IssuedTokens {
    access: String,
    refresh: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    success: bool,
    data: Option<RefreshData>,
}

#[derive(Debug, Deserialize)]
struct RefreshData {
    access: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

impl ErrorBody {
    /// First field error if the server sent any, else its message.
    fn describe(&self) -> Option<String> {
        let field_error = self.errors.as_ref().and_then(|errors| {
            errors
                .as_object()?
                .values()
                .find_map(|v| v.as_array()?.first()?.as_str().map(str::to_string))
        });
        field_error.or_else(|| self.message.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthKind {
    Login,
    Register,
}

impl AuthKind {
    fn path(self) -> &'static str {
        match self {
            AuthKind::Login => LOGIN_PATH,
            AuthKind::Register => REGISTER_PATH,
        }
    }

    fn label(self) -> &'static str {
        match self {
            AuthKind::Login => "Login",
            AuthKind::Register => "Registration",
        }
    }
}

// ============================================================================
// Session manager
// ============================================================================

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub base_url: String,
    pub freshness: Duration,
}

impl SessionSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            freshness: Duration::hours(DEFAULT_FRESHNESS_HOURS),
        }
    }
}

/// Ordering state for credential writes.
#[derive(Debug, Default)]
struct Epoch {
    /// Moves whenever the stored credentials are replaced or cleared.
    generation: u64,
    /// Moves when a login starts; only the newest login may commit.
    login: u64,
}

/// What an in-flight login must still match to commit.
#[derive(Debug, Clone, Copy)]
struct LoginTicket {
    generation: u64,
    login: u64,
}

/// What a refresh does when the auth server cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnUnreachable {
    TearDown,
    /// Keep the stored credentials for a later attempt.
    Keep,
}

pub struct SessionManager {
    store: Arc<CredentialStore>,
    transport: Arc<dyn Transport>,
    settings: SessionSettings,
    state: watch::Sender<AuthState>,
    epoch: Mutex<Epoch>,
    /// Only one refresh is in flight at a time; waiters reuse its result.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl SessionManager {
    /// Starts unhydrated with no session, whatever the store holds.
    pub fn new(
        store: Arc<CredentialStore>,
        transport: Arc<dyn Transport>,
        settings: SessionSettings,
    ) -> Self {
        let (state, _) = watch::channel(AuthState::default());
        Self {
            store,
            transport,
            settings,
            state,
            epoch: Mutex::new(Epoch::default()),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn current_username(&self) -> Option<String> {
        self.state.borrow().username().map(str::to_string)
    }

    /// Resolves once hydration has completed.
    pub async fn wait_for_hydration(&self) -> AuthState {
        let mut rx = self.subscribe();
        let state = match rx.wait_for(|state| state.hydrated).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        state
    }

    // ===== Hydration =====

    /// Load the persisted session snapshot and decide whether it can be trusted.
    ///
    /// Snapshots older than the freshness window, or with no tokens left
    /// behind them, are discarded along with the stored credentials. If the
    /// access token lapsed but the refresh token did not, one refresh is
    /// attempted before the result is published. When the auth server is
    /// unreachable the credentials are kept for the next start.
    pub async fn hydrate(&self) -> AuthState {
        if self.state.borrow().hydrated {
            return self.state();
        }

        let now = Utc::now();
        let candidate = match self.store.session() {
            None => None,
            Some(session) if !session.is_fresh(self.settings.freshness, now) => {
                info!(
                    username = %session.username,
                    age_hours = session.age(now).num_hours(),
                    "Persisted session is stale, discarding"
                );
                None
            }
            Some(session) if self.store.refresh_token().is_none() => {
                info!(username = %session.username, "Persisted session has no refresh token, discarding");
                None
            }
            Some(session) => Some(session),
        };

        let Some(session) = candidate else {
            self.store.clear();
            self.state.send_modify(|state| {
                state.phase = AuthPhase::Unauthenticated;
                state.session = None;
                state.hydrated = true;
            });
            return self.state();
        };

        if self.store.access_token().is_none() {
            debug!("Access token lapsed, refreshing before hydration completes");
            let generation = self.generation();
            if let Err(e) = self.rotate(generation, None, OnUnreachable::Keep).await {
                debug!(error = %e, "Refresh during hydration failed");
            }
        }

        let restored = self.store.access_token().is_some();
        self.state.send_modify(|state| {
            if restored {
                state.phase = AuthPhase::Authenticated;
                state.session = Some(session.clone());
            } else {
                state.phase = AuthPhase::Unauthenticated;
                state.session = None;
            }
            state.hydrated = true;
        });

        if restored {
            info!(username = %session.username, "Session restored");
        }
        self.state()
    }

    // ===== Login / register / logout =====

    pub async fn login(&self, username: &str) -> Result<Session, AuthError> {
        self.authenticate(AuthKind::Login, username).await
    }

    /// Same contract as `login`; uniqueness of the username is enforced by the server.
    pub async fn register(&self, username: &str) -> Result<Session, AuthError> {
        self.authenticate(AuthKind::Register, username).await
    }

    /// While a re-login is in flight the current session stays published;
    /// it is replaced only when the new tokens commit.
    async fn authenticate(&self, kind: AuthKind, username: &str) -> Result<Session, AuthError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AuthError::Validation("Username is required".to_string()));
        }

        let ticket = self.begin_login();
        debug!(username = %username, kind = kind.label(), "Authenticating");

        let tokens = match self.request_tokens(kind, username).await {
            Ok(tokens) => tokens,
            Err(e) => {
                self.fail_authentication(ticket);
                warn!(username = %username, error = %e, "{} failed", kind.label());
                return Err(e);
            }
        };

        let session = Session::new(username);
        let pair = TokenPair::new(tokens.access, tokens.refresh, self.store.lifetimes());
        self.complete_authentication(ticket, pair, session.clone())?;

        info!(username = %session.username, "{} succeeded", kind.label());
        Ok(session)
    }

    async fn request_tokens(&self, kind: AuthKind, username: &str) -> Result<IssuedTokens, AuthError> {
        let request = ApiRequest::new(Method::POST, kind.path())
            .with_body(RequestBody::Json(json!({ "username": username })));
        let response = self.dispatch(&request, None).await?;

        if !response.is_success() {
            let body: ErrorBody = serde_json::from_str(&response.body).unwrap_or_default();
            let message = body
                .describe()
                .unwrap_or_else(|| format!("{} failed with status {}", kind.label(), response.status));
            return Err(AuthError::Rejected(message));
        }

        let parsed: AuthResponse = response.json()?;
        match parsed.data {
            Some(data) if parsed.success => {
                debug!(user_id = data.user.id, "Tokens issued");
                Ok(data.tokens)
            }
            _ => Err(AuthError::Rejected(
                parsed
                    .message
                    .unwrap_or_else(|| format!("{} failed", kind.label())),
            )),
        }
    }

    fn fail_authentication(&self, ticket: LoginTicket) {
        let Some(_epoch) = self.claim_login(ticket) else {
            return;
        };
        // Credentials were never touched; an earlier session still stands.
        self.state.send_modify(|state| {
            if state.phase == AuthPhase::Authenticating {
                state.phase = state.phase.next(AuthEvent::Failed);
                state.session = None;
            }
        });
    }

    fn complete_authentication(
        &self,
        ticket: LoginTicket,
        tokens: TokenPair,
        session: Session,
    ) -> Result<(), AuthError> {
        let Some(mut epoch) = self.claim_login(ticket) else {
            debug!("Authentication superseded, discarding tokens");
            return Err(AuthError::Superseded);
        };

        epoch.generation += 1;
        if !self.store.store_login(&tokens, &session) {
            // Whatever was stored before is unreadable now
            self.store.clear();
            self.state.send_modify(|state| {
                state.phase = AuthPhase::Unauthenticated;
                state.session = None;
            });
            return Err(AuthError::StorageUnavailable);
        }

        self.state.send_modify(|state| {
            state.phase = state.phase.next(AuthEvent::Succeeded);
            state.session = Some(session);
            state.hydrated = true;
            state.signed_out = None;
        });
        Ok(())
    }

    /// Local teardown. Never touches the network and always succeeds.
    pub fn logout(&self) {
        let mut epoch = self.lock_epoch();
        self.teardown_locked(&mut epoch, SignOutReason::Logout);
        info!("Logged out");
    }

    /// Clear credentials and publish the signed-out state. Caller holds the epoch lock.
    fn teardown_locked(&self, epoch: &mut Epoch, reason: SignOutReason) {
        epoch.generation += 1;
        self.store.clear();
        self.state.send_modify(|state| {
            state.phase = match reason {
                SignOutReason::Logout => state.phase.next(AuthEvent::LoggedOut),
                SignOutReason::Expired => state
                    .phase
                    .next(AuthEvent::RefreshFailed)
                    .next(AuthEvent::TornDown),
            };
            state.session = None;
            state.signed_out = Some(reason);
        });
    }

    /// Probe the profile endpoint through the pipeline (which refreshes once on 401).
    ///
    /// Returns false and logs out when credentials are gone for good. Other
    /// failures, such as the network being down, return false but keep the session.
    pub async fn check_auth(&self) -> bool {
        match client::send_authenticated(self, &ApiRequest::get(PROFILE_PATH)).await {
            Ok(_) => true,
            // Already torn down by the pipeline
            Err(ApiError::SessionExpired) => false,
            Err(ApiError::Unauthenticated) => {
                let has_session = self.state.borrow().session.is_some();
                if has_session {
                    let mut epoch = self.lock_epoch();
                    self.teardown_locked(&mut epoch, SignOutReason::Expired);
                }
                false
            }
            Err(e) => {
                warn!(error = %e, "Auth probe failed");
                false
            }
        }
    }

    // ===== Refresh =====

    /// Mint a new access token from the stored refresh token, for a request
    /// that started under `generation` and saw `stale` rejected.
    ///
    /// If another caller has rotated the token while this one waited for the
    /// gate, the newer token is returned without a second refresh. If the
    /// session itself was replaced or cleared in the meantime nothing is
    /// reused. On failure all credentials are torn down and
    /// `SessionExpired` is returned.
    pub(crate) async fn refresh_access_token(
        &self,
        generation: u64,
        stale: Option<&str>,
    ) -> Result<String, ApiError> {
        self.rotate(generation, stale, OnUnreachable::TearDown).await
    }

    async fn rotate(
        &self,
        generation: u64,
        stale: Option<&str>,
        on_unreachable: OnUnreachable,
    ) -> Result<String, ApiError> {
        let _gate = self.refresh_gate.lock().await;

        if self.claim(generation).is_none() {
            debug!("Session changed while waiting to refresh");
            return Err(self.session_lost());
        }

        if let Some(token) = self.store.access_token() {
            if stale != Some(token.as_str()) {
                debug!("Access token already rotated by a concurrent refresh");
                return Ok(token);
            }
        }

        let Some(refresh) = self.store.refresh_token() else {
            debug!("No refresh token available");
            return Err(self.expire(generation));
        };

        match self.request_refresh(&refresh).await {
            Ok(access) => self.commit_refresh(generation, access),
            Err(e) if on_unreachable == OnUnreachable::Keep && e.is_network() => {
                info!(error = %e, "Auth server unreachable, keeping credentials");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                Err(self.expire(generation))
            }
        }
    }

    async fn request_refresh(&self, refresh: &str) -> Result<String, ApiError> {
        let request = ApiRequest::new(Method::POST, REFRESH_PATH)
            .with_body(RequestBody::Json(json!({ "refresh": refresh })));
        let response = self.dispatch(&request, None).await?;
        if !response.is_success() {
            return Err(ApiError::from_status(response.status, &response.body));
        }

        let parsed: RefreshResponse = response.json()?;
        match parsed.data {
            Some(data) if parsed.success => Ok(data.access),
            _ => Err(ApiError::InvalidResponse(
                "Refresh response did not contain an access token".to_string(),
            )),
        }
    }

    fn commit_refresh(&self, generation: u64, access: String) -> Result<String, ApiError> {
        let Some(mut epoch) = self.claim(generation) else {
            debug!("Refresh superseded, discarding token");
            return Err(self.session_lost());
        };
        if !self.store.set_access_token(&access) {
            warn!("Refreshed token could not be stored, signing out");
            self.teardown_locked(&mut epoch, SignOutReason::Expired);
            return Err(ApiError::SessionExpired);
        }
        self.state.send_modify(|state| {
            state.phase = state.phase.next(AuthEvent::Refreshed);
        });
        debug!("Access token refreshed");
        Ok(access)
    }

    /// Tear down after an unrecoverable 401 and return the error the request
    /// should report. A session that a newer login or logout has already
    /// replaced is left alone.
    pub(crate) fn expire(&self, generation: u64) -> ApiError {
        let Some(mut epoch) = self.claim(generation) else {
            debug!("Session already replaced, skipping teardown");
            return self.session_lost();
        };
        self.teardown_locked(&mut epoch, SignOutReason::Expired);
        warn!("Session expired, credentials cleared");
        ApiError::SessionExpired
    }

    /// Error for a request whose session is gone: expired if nobody is
    /// signed in now, superseded if another session has taken its place.
    fn session_lost(&self) -> ApiError {
        if self.state.borrow().is_authenticated() {
            ApiError::Superseded
        } else {
            ApiError::SessionExpired
        }
    }

    // ===== Ordering =====

    fn lock_epoch(&self) -> MutexGuard<'_, Epoch> {
        self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_login(&self) -> LoginTicket {
        let mut epoch = self.lock_epoch();
        epoch.login += 1;
        let ticket = LoginTicket {
            generation: epoch.generation,
            login: epoch.login,
        };
        drop(epoch);

        self.state.send_modify(|state| {
            state.phase = state.phase.next(AuthEvent::Begin);
        });
        ticket
    }

    /// Generation of the credentials currently stored.
    pub(crate) fn generation(&self) -> u64 {
        self.lock_epoch().generation
    }

    /// Holds the ordering lock if the credentials are still those of `generation`.
    fn claim(&self, generation: u64) -> Option<MutexGuard<'_, Epoch>> {
        let epoch = self.lock_epoch();
        (epoch.generation == generation).then_some(epoch)
    }

    /// Holds the ordering lock if `ticket` is the newest login and nothing
    /// replaced the credentials since it started.
    fn claim_login(&self, ticket: LoginTicket) -> Option<MutexGuard<'_, Epoch>> {
        let epoch = self.lock_epoch();
        (epoch.generation == ticket.generation && epoch.login == ticket.login).then_some(epoch)
    }

    // ===== Transport =====

    pub(crate) async fn dispatch(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<HttpResponse, ApiError> {
        let http = HttpRequest {
            method: request.method.clone(),
            url: format!(
                "{}{}",
                self.settings.base_url.trim_end_matches('/'),
                request.path
            ),
            bearer: bearer.map(str::to_string),
            body: request.body.clone(),
        };
        self.transport.execute(http).await
    }
}
