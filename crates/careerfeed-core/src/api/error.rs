use reqwest::StatusCode;
use thiserror::Error;

use crate::utils::truncate_bytes;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not logged in")]
    Unauthenticated,

    #[error("Session expired. Please log in again.")]
    SessionExpired,

    /// A different account signed in while the request was in flight.
    #[error("Signed-in account changed while the request was in flight")]
    Superseded,

    #[error("Request failed with status {status}: {body}")]
    RequestFailed { status: StatusCode, body: String },

    #[error("{0}")]
    Validation(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        ApiError::RequestFailed {
            status,
            body: truncate_bytes(body, MAX_ERROR_BODY_LENGTH),
        }
    }

    /// Map a transport failure, keeping timeouts distinguishable from other network errors.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::NetworkError(err)
        }
    }

    /// Status code of a failed request, if the server answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::RequestFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// The server could not be reached at all.
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Timeout | ApiError::NetworkError(_))
    }

    /// Errors that mean the user has to log in again.
    pub fn requires_login(&self) -> bool {
        matches!(self, ApiError::Unauthenticated | ApiError::SessionExpired)
    }
}
