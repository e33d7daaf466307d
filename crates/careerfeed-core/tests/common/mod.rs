//! Scripted transport and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tokio::sync::Notify;

use careerfeed_core::api::{ApiError, HttpRequest, HttpResponse, RequestBody, Transport};
use careerfeed_core::auth::{
    CredentialStore, MemoryBackend, SessionManager, SessionSettings, TokenLifetimes,
};
use careerfeed_core::ApiClient;

pub const BASE_URL: &str = "http://api.test";

/// What the transport saw, with the base URL stripped.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: RequestBody,
}

impl Recorded {
    pub fn json(&self) -> Option<&Value> {
        match self.body {
            RequestBody::Json(ref value) => Some(value),
            _ => None,
        }
    }
}

enum Reply {
    Respond(HttpResponse),
    /// Answered only once the paired `Notify` fires.
    Held(HttpResponse, Arc<Notify>),
    Unreachable,
}

/// Replays queued responses per (method, path) and records every request.
///
/// Requests are recorded and answered when `execute` is called; the
/// returned future yields once before resolving so concurrent callers
/// interleave the way they would over a real network.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, method: Method, path: &str, status: StatusCode, body: Value) {
        self.push(method, path, Reply::Respond(HttpResponse::new(status, body.to_string())));
    }

    /// Like `respond`, but the answer is withheld until the returned handle is notified.
    pub fn hold(&self, method: Method, path: &str, status: StatusCode, body: Value) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        let response = HttpResponse::new(status, body.to_string());
        self.push(method, path, Reply::Held(response, release.clone()));
        release
    }

    /// The next request to this route fails without an answer.
    pub fn unreachable(&self, method: Method, path: &str) {
        self.push(method, path, Reply::Unreachable);
    }

    fn push(&self, method: Method, path: &str, reply: Reply) {
        self.routes
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: &Method, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| &r.method == method && r.path == path)
            .count()
    }

    pub fn clear_log(&self) {
        self.requests.lock().unwrap().clear();
    }

    // ===== Canned API responses =====

    pub fn login_ok(&self, username: &str, access: &str, refresh: &str) {
        self.respond(Method::POST, "/auth/login/", StatusCode::OK, auth_body(username, access, refresh));
    }

    pub fn register_ok(&self, username: &str, access: &str, refresh: &str) {
        self.respond(Method::POST, "/auth/register/", StatusCode::CREATED, auth_body(username, access, refresh));
    }

    pub fn refresh_ok(&self, access: &str) {
        self.respond(
            Method::POST,
            "/auth/refresh/",
            StatusCode::OK,
            json!({ "success": true, "data": { "access": access } }),
        );
    }

    pub fn refresh_rejected(&self) {
        self.respond(
            Method::POST,
            "/auth/refresh/",
            StatusCode::UNAUTHORIZED,
            json!({ "detail": "Token is invalid or expired", "code": "token_not_valid" }),
        );
    }

    pub fn unauthorized(&self, method: Method, path: &str) {
        self.respond(
            method,
            path,
            StatusCode::UNAUTHORIZED,
            json!({ "detail": "Given token not valid for any token type" }),
        );
    }

    pub fn ok(&self, method: Method, path: &str, data: Value) {
        self.respond(method, path, StatusCode::OK, json!({ "success": true, "data": data }));
    }
}

impl Transport for ScriptedTransport {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, ApiError>> {
        let path = request
            .url
            .strip_prefix(BASE_URL)
            .unwrap_or(&request.url)
            .to_string();

        self.requests.lock().unwrap().push(Recorded {
            method: request.method.clone(),
            path: path.clone(),
            bearer: request.bearer.clone(),
            body: request.body.clone(),
        });

        let reply = self
            .routes
            .lock()
            .unwrap()
            .get_mut(&(request.method.clone(), path.clone()))
            .and_then(VecDeque::pop_front);

        let (result, release) = match reply {
            Some(Reply::Respond(response)) => (Ok(response), None),
            Some(Reply::Held(response, release)) => (Ok(response), Some(release)),
            Some(Reply::Unreachable) => (Err(ApiError::Timeout), None),
            None => (
                Ok(HttpResponse::new(
                    StatusCode::NOT_FOUND,
                    format!("no scripted response for {} {}", request.method, path),
                )),
                None,
            ),
        };

        Box::pin(async move {
            match release {
                Some(release) => release.notified().await,
                None => tokio::task::yield_now().await,
            }
            result
        })
    }
}

pub fn auth_body(username: &str, access: &str, refresh: &str) -> Value {
    json!({
        "success": true,
        "message": "Login successful",
        "data": {
            "user": { "id": 1, "username": username, "date_joined": "2025-01-01T00:00:00Z" },
            "tokens": { "access": access, "refresh": refresh }
        }
    })
}

pub fn post_json(id: i64, title: &str, content: &str) -> Value {
    json!({
        "id": id,
        "username": "alice",
        "created_datetime": "2025-06-01T12:00:00Z",
        "title": title,
        "content": content,
        "image": null,
        "likes_count": 0,
        "comments_count": 0,
        "user_liked": false
    })
}

pub struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub backend: MemoryBackend,
    pub store: Arc<CredentialStore>,
    pub session: Arc<SessionManager>,
    pub client: ApiClient,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_lifetimes(TokenLifetimes::default())
    }

    pub fn with_lifetimes(lifetimes: TokenLifetimes) -> Self {
        let backend = MemoryBackend::new();
        Self::on_backend(backend, lifetimes)
    }

    /// A fresh manager over an existing medium, as after a process restart.
    pub fn on_backend(backend: MemoryBackend, lifetimes: TokenLifetimes) -> Self {
        let transport = ScriptedTransport::new();
        let store = Arc::new(CredentialStore::new(backend.clone(), lifetimes));
        let session = Arc::new(SessionManager::new(
            store.clone(),
            transport.clone(),
            SessionSettings::new(BASE_URL),
        ));
        let client = ApiClient::new(session.clone());
        Self {
            transport,
            backend,
            store,
            session,
            client,
        }
    }

    /// Log in as `username` with the given tokens and forget the login request.
    pub async fn signed_in(username: &str, access: &str, refresh: &str) -> Self {
        let harness = Self::new();
        harness.transport.login_ok(username, access, refresh);
        harness
            .session
            .login(username)
            .await
            .expect("scripted login should succeed");
        harness.transport.clear_log();
        harness
    }
}
