//! careerfeed core library.
//!
//! Session and token lifecycle for the careers feed API, plus the
//! authenticated request pipeline every API call goes through:
//!
//! - `auth`: credential store, session manager, route guard
//! - `api`: transport seam, authenticated pipeline, domain endpoints
//! - `models`: posts, comments, mentions and users as the API returns them
//! - `config`: on-disk configuration with environment overrides
//! - `utils`: display formatting helpers

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod utils;

pub use api::{ApiClient, ApiError, ApiRequest};
pub use auth::{AuthError, AuthState, CredentialStore, RouteGuard, Session, SessionManager};
pub use config::Config;
