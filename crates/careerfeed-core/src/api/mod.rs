//! REST API layer for the careers feed.
//!
//! - `transport`: the HTTP seam (`Transport`) and its `reqwest` implementation
//! - `client`: the authenticated request pipeline and `ApiClient` endpoints
//! - `error`: `ApiError`, the error every request resolves to
//!
//! Requests carry a JWT bearer token. An expired access token is renewed
//! through `/auth/refresh/` at most once per request.

pub mod client;
pub mod error;
pub mod transport;

pub use client::{ApiClient, ApiRequest};
pub use error::ApiError;
pub use transport::{FormField, FormValue, HttpRequest, HttpResponse, RequestBody, ReqwestTransport, Transport};
