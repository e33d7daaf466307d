//! Authenticated API client for the careers feed.
//!
//! Every call goes through [`send_authenticated`], which attaches the
//! current access token and recovers from exactly one expired token per
//! request: on a 401 it refreshes once (shared with any concurrent caller
//! that hit the same 401) and resends once. Dropping a request future
//! cancels it; a retry that has not been sent yet is simply never sent.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::auth::credentials::{CredentialStore, FileBackend, KeyringBackend};
use crate::auth::session::PROFILE_PATH;
use crate::auth::{SessionManager, SessionSettings};
use crate::config::{Config, CredentialBackendKind};
use crate::models::{comment_text, Comment, LikeToggle, Mention, Post, PostDraft, User};

use super::transport::{HttpResponse, RequestBody, ReqwestTransport, Transport};
use super::ApiError;

const POSTS_PATH: &str = "/careers/";
const VERIFY_PATH: &str = "/auth/verify/";

/// A request against the API, relative to the configured base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }
}

/// Send `request` with the stored access token, refreshing and retrying once on 401.
///
/// - No access token: `Unauthenticated`, nothing is sent.
/// - 401, refresh fails: credentials are cleared, `SessionExpired`.
/// - 401 again after the retry: credentials are cleared, `SessionExpired`,
///   no second refresh.
/// - Session replaced by another login while waiting: `Superseded`, no retry.
/// - Any other non-2xx: `RequestFailed`, no retry.
pub(crate) async fn send_authenticated(
    session: &SessionManager,
    request: &ApiRequest,
) -> Result<HttpResponse, ApiError> {
    let generation = session.generation();
    let Some(token) = session.store().access_token() else {
        debug!(path = %request.path, "No access token, not sending");
        return Err(ApiError::Unauthenticated);
    };

    let response = session.dispatch(request, Some(&token)).await?;
    if response.status != StatusCode::UNAUTHORIZED {
        return into_result(response);
    }

    debug!(method = %request.method, path = %request.path, "Access token rejected, refreshing");
    let fresh = session.refresh_access_token(generation, Some(&token)).await?;

    let retried = session.dispatch(request, Some(&fresh)).await?;
    if retried.status == StatusCode::UNAUTHORIZED {
        warn!(path = %request.path, "Rejected again after refresh, giving up");
        return Err(session.expire(generation));
    }
    into_result(retried)
}

fn into_result(response: HttpResponse) -> Result<HttpResponse, ApiError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ApiError::from_status(response.status, &response.body))
    }
}

/// API client for the careers feed.
/// Clone is cheap - the session manager is shared behind an Arc.
#[derive(Clone)]
pub struct ApiClient {
    session: Arc<SessionManager>,
}

impl ApiClient {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    /// Wire up the credential medium, HTTP transport and session manager from config.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let lifetimes = config.token_lifetimes();
        let store = match config.credential_backend {
            CredentialBackendKind::File => {
                let dir = config.cache_dir()?;
                CredentialStore::new(FileBackend::in_dir(&dir), lifetimes)
            }
            CredentialBackendKind::Keyring => CredentialStore::new(KeyringBackend::new(), lifetimes),
        };
        let store = Arc::new(store);

        let transport: Arc<dyn Transport> = Arc::new(
            ReqwestTransport::new(config.request_timeout())
                .context("Failed to build HTTP client")?,
        );

        let settings = SessionSettings {
            base_url: config.base_url().to_string(),
            freshness: config.freshness_window(),
        };
        let session = Arc::new(SessionManager::new(store, transport, settings));
        Ok(Self::new(session))
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Send an arbitrary request through the authenticated pipeline.
    pub async fn send(&self, request: &ApiRequest) -> Result<HttpResponse, ApiError> {
        send_authenticated(&self.session, request).await
    }

    async fn send_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        response.json()
    }

    /// Unwrap the `data` member of a response envelope.
    async fn fetch_data<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        let envelope: DataEnvelope<T> = self.send_json(request).await?;
        envelope.data.ok_or_else(|| {
            ApiError::InvalidResponse(format!("Missing data in response from {}", request.path))
        })
    }

    /// Like `fetch_data`, but an absent `data` member reads as an empty list.
    async fn fetch_list<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<Vec<T>, ApiError> {
        let envelope: DataEnvelope<Vec<T>> = self.send_json(request).await?;
        Ok(envelope.data.unwrap_or_default())
    }

    // ===== Account =====

    pub async fn profile(&self) -> Result<User, ApiError> {
        self.fetch_data(&ApiRequest::get(PROFILE_PATH)).await
    }

    /// Whether the server still accepts our credentials (after at most one refresh).
    pub async fn verify(&self) -> Result<bool, ApiError> {
        match self.send(&ApiRequest::get(VERIFY_PATH)).await {
            Ok(_) => Ok(true),
            Err(ApiError::SessionExpired) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ===== Posts =====

    pub async fn list_posts(&self) -> Result<Vec<Post>, ApiError> {
        let posts = self.fetch_list(&ApiRequest::get(POSTS_PATH)).await?;
        debug!(count = posts.len(), "Fetched posts");
        Ok(posts)
    }

    /// Fetch one post; `None` if it does not exist.
    pub async fn get_post(&self, id: i64) -> Result<Option<Post>, ApiError> {
        match self.fetch_data(&ApiRequest::get(post_path(id))).await {
            Ok(post) => Ok(Some(post)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn create_post(&self, draft: &PostDraft) -> Result<Post, ApiError> {
        draft.validate()?;
        let request = ApiRequest::post(POSTS_PATH).with_body(draft.to_body());
        self.fetch_data(&request).await
    }

    pub async fn update_post(&self, id: i64, draft: &PostDraft) -> Result<Post, ApiError> {
        draft.validate()?;
        let request = ApiRequest::patch(post_path(id)).with_body(draft.to_body());
        self.fetch_data(&request).await
    }

    pub async fn delete_post(&self, id: i64) -> Result<(), ApiError> {
        self.send(&ApiRequest::delete(post_path(id))).await?;
        Ok(())
    }

    pub async fn toggle_like(&self, id: i64) -> Result<LikeToggle, ApiError> {
        let request = ApiRequest::post(format!("{}like/", post_path(id)));
        self.fetch_data(&request).await
    }

    // ===== Comments =====

    pub async fn list_comments(&self, post_id: i64) -> Result<Vec<Comment>, ApiError> {
        self.fetch_list(&ApiRequest::get(comments_path(post_id))).await
    }

    pub async fn create_comment(&self, post_id: i64, content: &str) -> Result<Comment, ApiError> {
        let content = comment_text(content)?;
        let request = ApiRequest::post(comments_path(post_id))
            .with_body(RequestBody::Json(json!({ "content": content })));
        self.fetch_data(&request).await
    }

    pub async fn update_comment(
        &self,
        post_id: i64,
        comment_id: i64,
        content: &str,
    ) -> Result<Comment, ApiError> {
        let content = comment_text(content)?;
        let request = ApiRequest::patch(comment_path(post_id, comment_id))
            .with_body(RequestBody::Json(json!({ "content": content })));
        self.fetch_data(&request).await
    }

    pub async fn delete_comment(&self, post_id: i64, comment_id: i64) -> Result<(), ApiError> {
        self.send(&ApiRequest::delete(comment_path(post_id, comment_id)))
            .await?;
        Ok(())
    }

    // ===== Mentions =====

    pub async fn list_mentions(&self, post_id: i64) -> Result<Vec<Mention>, ApiError> {
        let request = ApiRequest::get(format!("{}mentions/", post_path(post_id)));
        self.fetch_list(&request).await
    }
}

fn post_path(id: i64) -> String {
    format!("{}{}/", POSTS_PATH, id)
}

fn comments_path(post_id: i64) -> String {
    format!("{}comments/", post_path(post_id))
}

fn comment_path(post_id: i64, comment_id: i64) -> String {
    format!("{}{}/", comments_path(post_id), comment_id)
}

// Internal API response types for parsing

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: Option<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(post_path(12), "/careers/12/");
        assert_eq!(comments_path(12), "/careers/12/comments/");
        assert_eq!(comment_path(12, 3), "/careers/12/comments/3/");
    }

    #[test]
    fn test_parse_envelopes() {
        let json = r#"{"success": true, "data": {"action": "liked", "likes_count": 3, "user_liked": true}}"#;
        let envelope: DataEnvelope<LikeToggle> = serde_json::from_str(json).expect("Failed to parse like");
        let like = envelope.data.expect("data");
        assert_eq!(like.action, "liked");
        assert_eq!(like.likes_count, 3);
        assert!(like.user_liked);

        let envelope: DataEnvelope<Vec<Post>> = serde_json::from_str(r#"{"message": "empty"}"#)
            .expect("Failed to parse empty envelope");
        assert!(envelope.data.is_none());
    }

    #[test]
    fn test_into_result_maps_failures() {
        let ok = into_result(HttpResponse::new(StatusCode::NO_CONTENT, ""));
        assert!(ok.is_ok());

        let err = into_result(HttpResponse::new(StatusCode::BAD_REQUEST, "nope")).unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    }
}
