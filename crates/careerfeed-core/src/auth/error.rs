use thiserror::Error;

use crate::api::ApiError;

/// Failures of a credential persistence medium. Never leaves the credential store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Corrupt credential document: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Credential storage unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the session manager to the UI layer.
/// `Display` is the message meant for the user.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Rejected(String),

    #[error("Sign-in was interrupted by another session change")]
    Superseded,

    #[error("Could not save credentials on this device")]
    StorageUnavailable,

    #[error(transparent)]
    Api(#[from] ApiError),
}
