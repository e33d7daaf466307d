//! Authentication: sessions, credential persistence and route guarding.
//!
//! - `SessionManager`: login, register, logout, hydration and token refresh
//! - `CredentialStore`: expiring token persistence on disk or in the OS keychain
//! - `RouteGuard`: redirect decisions for protected and public surfaces
//!
//! Access tokens live for an hour by default and refresh tokens for a week.
//! A persisted session older than 24 hours is not restored.

pub mod credentials;
pub mod error;
pub mod guard;
pub mod session;

pub use credentials::{
    CredentialBackend, CredentialStore, FileBackend, KeyringBackend, MemoryBackend, TokenLifetimes,
    TokenPair,
};
pub use error::{AuthError, StorageError};
pub use guard::{required_redirect, GuardDecision, RouteGuard, Surface};
pub use session::{
    AuthEvent, AuthPhase, AuthState, Session, SessionManager, SessionSettings, SignOutReason,
};
