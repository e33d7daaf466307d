mod common;

use reqwest::{Method, StatusCode};
use serde_json::json;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use careerfeed_core::api::{ApiError, FormValue, RequestBody};
use careerfeed_core::auth::{
    AuthPhase, CredentialBackend, CredentialStore, MemoryBackend, SessionManager,
    SessionSettings, SignOutReason, StorageError, TokenLifetimes,
};
use careerfeed_core::models::{ImageAttachment, PostDraft};
use careerfeed_core::ApiClient;

use common::{post_json, Harness, ScriptedTransport, BASE_URL};

const POSTS: &str = "/careers/";
const REFRESH: &str = "/auth/refresh/";

#[tokio::test]
async fn test_no_token_fails_without_network() {
    let h = Harness::new();

    let err = h.client.list_posts().await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthenticated));
    assert!(h.transport.requests().is_empty());
}

#[tokio::test]
async fn test_bearer_is_attached() {
    let h = Harness::signed_in("alice", "A1", "R1").await;
    h.transport.ok(Method::GET, POSTS, json!([post_json(1, "hi", "world")]));

    let posts = h.client.list_posts().await.unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].title, "hi");

    let requests = h.transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].bearer.as_deref(), Some("A1"));
}

#[tokio::test]
async fn test_create_post_after_token_rotation() {
    let h = Harness::signed_in("alice", "A1", "R1").await;
    h.transport.unauthorized(Method::POST, POSTS);
    h.transport.refresh_ok("A2");
    h.transport.respond(
        Method::POST,
        POSTS,
        StatusCode::CREATED,
        json!({ "success": true, "data": post_json(7, "hi", "world") }),
    );

    let post = h.client.create_post(&PostDraft::new("hi", "world")).await.unwrap();
    assert_eq!(post.id, 7);

    let requests = h.transport.requests();
    assert_eq!(requests.len(), 3);

    assert_eq!(requests[0].method, Method::POST);
    assert_eq!(requests[0].path, POSTS);
    assert_eq!(requests[0].bearer.as_deref(), Some("A1"));
    assert_eq!(requests[0].json(), Some(&json!({ "title": "hi", "content": "world" })));

    assert_eq!(requests[1].path, REFRESH);
    assert_eq!(requests[1].bearer, None);
    assert_eq!(requests[1].json(), Some(&json!({ "refresh": "R1" })));

    assert_eq!(requests[2].path, POSTS);
    assert_eq!(requests[2].bearer.as_deref(), Some("A2"));
    assert_eq!(requests[2].json(), requests[0].json());

    assert_eq!(h.store.access_token().as_deref(), Some("A2"));
    assert_eq!(h.store.refresh_token().as_deref(), Some("R1"));
    assert!(h.session.state().is_authenticated());
}

#[tokio::test]
async fn test_failed_refresh_expires_session() {
    let h = Harness::signed_in("alice", "A1", "R1").await;
    h.transport.unauthorized(Method::GET, POSTS);
    h.transport.refresh_rejected();

    let err = h.client.list_posts().await.unwrap_err();
    assert!(matches!(err, ApiError::SessionExpired));
    assert_eq!(err.to_string(), "Session expired. Please log in again.");

    assert_eq!(h.store.access_token(), None);
    assert_eq!(h.store.refresh_token(), None);
    assert_eq!(h.transport.count(&Method::GET, POSTS), 1);

    // Torn down before the error reached us
    let state = h.session.state();
    assert_eq!(state.phase, AuthPhase::Unauthenticated);
    assert_eq!(state.session, None);
    assert_eq!(state.signed_out, Some(SignOutReason::Expired));
}

#[tokio::test]
async fn test_unreachable_refresh_expires_session() {
    let h = Harness::signed_in("alice", "A1", "R1").await;
    h.transport.unauthorized(Method::GET, POSTS);
    h.transport.unreachable(Method::POST, REFRESH);

    let err = h.client.list_posts().await.unwrap_err();
    assert!(matches!(err, ApiError::SessionExpired));
    assert_eq!(h.store.refresh_token(), None);
}

#[tokio::test]
async fn test_second_401_gives_up_after_one_refresh() {
    let h = Harness::signed_in("alice", "A1", "R1").await;
    h.transport.unauthorized(Method::GET, POSTS);
    h.transport.refresh_ok("A2");
    h.transport.unauthorized(Method::GET, POSTS);
    // Would succeed if the pipeline ever tried a third time
    h.transport.refresh_ok("A3");
    h.transport.ok(Method::GET, POSTS, json!([]));

    let err = h.client.list_posts().await.unwrap_err();
    assert!(matches!(err, ApiError::SessionExpired));
    assert_eq!(h.transport.count(&Method::POST, REFRESH), 1);
    assert_eq!(h.transport.count(&Method::GET, POSTS), 2);
    assert_eq!(h.store.access_token(), None);
    assert_eq!(h.store.refresh_token(), None);
    assert!(!h.session.state().is_authenticated());
}

#[tokio::test]
async fn test_other_failures_are_not_retried() {
    let h = Harness::signed_in("alice", "A1", "R1").await;
    h.transport.respond(
        Method::GET,
        POSTS,
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "detail": "boom" }),
    );

    let err = h.client.list_posts().await.unwrap_err();
    match err {
        ApiError::RequestFailed { status, ref body } => {
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert!(body.contains("boom"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.transport.requests().len(), 1);
    assert!(h.session.state().is_authenticated());
}

#[tokio::test]
async fn test_timeout_is_surfaced_as_is() {
    let h = Harness::signed_in("alice", "A1", "R1").await;
    h.transport.unreachable(Method::GET, POSTS);

    let err = h.client.list_posts().await.unwrap_err();
    assert!(matches!(err, ApiError::Timeout));
    assert_eq!(h.store.access_token().as_deref(), Some("A1"));
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let h = Harness::signed_in("alice", "A1", "R1").await;
    h.transport.unauthorized(Method::GET, POSTS);
    h.transport.unauthorized(Method::GET, POSTS);
    h.transport.refresh_ok("A2");
    h.transport.ok(Method::GET, POSTS, json!([post_json(1, "a", "b")]));
    h.transport.ok(Method::GET, POSTS, json!([post_json(1, "a", "b")]));

    let (first, second) = tokio::join!(h.client.list_posts(), h.client.list_posts());
    assert_eq!(first.unwrap().len(), 1);
    assert_eq!(second.unwrap().len(), 1);

    assert_eq!(h.transport.count(&Method::POST, REFRESH), 1);
    let retries: Vec<_> = h
        .transport
        .requests()
        .into_iter()
        .filter(|r| r.path == POSTS)
        .map(|r| r.bearer)
        .collect();
    assert_eq!(
        retries,
        vec![
            Some("A1".to_string()),
            Some("A1".to_string()),
            Some("A2".to_string()),
            Some("A2".to_string())
        ]
    );
}

#[tokio::test]
async fn test_concurrent_401s_with_failed_refresh() {
    let h = Harness::signed_in("alice", "A1", "R1").await;
    h.transport.unauthorized(Method::GET, POSTS);
    h.transport.unauthorized(Method::GET, POSTS);
    h.transport.refresh_rejected();

    let (first, second) = tokio::join!(h.client.list_posts(), h.client.list_posts());
    assert!(matches!(first, Err(ApiError::SessionExpired)));
    assert!(matches!(second, Err(ApiError::SessionExpired)));
    assert_eq!(h.transport.count(&Method::POST, REFRESH), 1);
    assert_eq!(h.store.refresh_token(), None);
}

#[tokio::test]
async fn test_logout_during_refresh_wins() {
    let h = Harness::signed_in("alice", "A1", "R1").await;
    h.transport.unauthorized(Method::GET, POSTS);
    let release = h.transport.hold(
        Method::POST,
        REFRESH,
        StatusCode::OK,
        json!({ "success": true, "data": { "access": "A2" } }),
    );

    let request = h.client.list_posts();
    let logout = async {
        while h.transport.count(&Method::POST, REFRESH) == 0 {
            tokio::task::yield_now().await;
        }
        h.session.logout();
        release.notify_one();
    };
    let (result, ()) = tokio::join!(request, logout);

    assert!(matches!(result, Err(ApiError::SessionExpired)));
    // The refreshed token landed after the clear and was dropped
    assert_eq!(h.store.access_token(), None);
    assert_eq!(h.store.refresh_token(), None);
    assert_eq!(h.backend.contents(), None);
    // No retry was sent
    assert_eq!(h.transport.count(&Method::GET, POSTS), 1);
    assert_eq!(h.session.state().signed_out, Some(SignOutReason::Logout));
}

#[tokio::test]
async fn test_stale_401_does_not_end_a_newer_session() {
    let h = Harness::signed_in("alice", "A1", "R1").await;
    h.transport.unauthorized(Method::GET, POSTS);
    let release = h.transport.hold(
        Method::POST,
        REFRESH,
        StatusCode::UNAUTHORIZED,
        json!({ "detail": "Token is invalid or expired" }),
    );
    h.transport.login_ok("bob", "B1", "S1");

    let request = h.client.list_posts();
    let relogin = async {
        while h.transport.count(&Method::POST, REFRESH) == 0 {
            tokio::task::yield_now().await;
        }
        h.session.login("bob").await.unwrap();
        release.notify_one();
    };
    let (result, ()) = tokio::join!(request, relogin);

    assert!(matches!(result, Err(ApiError::Superseded)));
    assert_eq!(h.session.current_username().as_deref(), Some("bob"));
    assert_eq!(h.store.access_token().as_deref(), Some("B1"));
}

#[tokio::test]
async fn test_401_is_not_replayed_as_the_next_account() {
    let h = Harness::signed_in("alice", "A1", "R1").await;
    let release = h.transport.hold(
        Method::POST,
        POSTS,
        StatusCode::UNAUTHORIZED,
        json!({ "detail": "Given token not valid for any token type" }),
    );
    h.transport.login_ok("bob", "B1", "S1");

    let draft = PostDraft::new("alice's post", "text");
    let request = h.client.create_post(&draft);
    let switch = async {
        while h.transport.count(&Method::POST, POSTS) == 0 {
            tokio::task::yield_now().await;
        }
        h.session.logout();
        h.session.login("bob").await.unwrap();
        release.notify_one();
    };
    let (result, ()) = tokio::join!(request, switch);

    assert!(matches!(result, Err(ApiError::Superseded)));
    let posts: Vec<_> = h
        .transport
        .requests()
        .into_iter()
        .filter(|r| r.path == POSTS)
        .collect();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].bearer.as_deref(), Some("A1"));
    assert_eq!(h.transport.count(&Method::POST, REFRESH), 0);
    assert_eq!(h.session.current_username().as_deref(), Some("bob"));
    assert_eq!(h.store.access_token().as_deref(), Some("B1"));
}

#[tokio::test]
async fn test_failed_login_does_not_discard_a_refresh() {
    let h = Harness::signed_in("alice", "A1", "R1").await;
    h.transport.unauthorized(Method::GET, POSTS);
    let release = h.transport.hold(
        Method::POST,
        REFRESH,
        StatusCode::OK,
        json!({ "success": true, "data": { "access": "A2" } }),
    );
    h.transport.ok(Method::GET, POSTS, json!([]));
    h.transport.respond(
        Method::POST,
        "/auth/login/",
        StatusCode::NOT_FOUND,
        json!({ "success": false, "message": "User not found" }),
    );

    let request = h.client.list_posts();
    let bad_login = async {
        while h.transport.count(&Method::POST, REFRESH) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(h.session.login("bobb").await.is_err());
        release.notify_one();
    };
    let (result, ()) = tokio::join!(request, bad_login);

    assert!(result.unwrap().is_empty());
    assert_eq!(h.session.current_username().as_deref(), Some("alice"));
    assert_eq!(h.session.state().phase, AuthPhase::Authenticated);
    assert_eq!(h.store.access_token().as_deref(), Some("A2"));
    let retried = h.transport.requests().into_iter().last().unwrap();
    assert_eq!(retried.bearer.as_deref(), Some("A2"));
}

/// Memory storage whose writes can be switched off mid-session.
#[derive(Clone)]
struct FlakyBackend {
    inner: MemoryBackend,
    failing: Arc<AtomicBool>,
}

impl CredentialBackend for FlakyBackend {
    fn load(&self) -> Result<Option<String>, StorageError> {
        self.inner.load()
    }

    fn save(&self, contents: &str) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("disk full".to_string()));
        }
        self.inner.save(contents)
    }

    fn delete(&self) -> Result<(), StorageError> {
        self.inner.delete()
    }
}

#[tokio::test]
async fn test_unstorable_refresh_signs_out() {
    let failing = Arc::new(AtomicBool::new(false));
    let backend = FlakyBackend {
        inner: MemoryBackend::new(),
        failing: failing.clone(),
    };
    let transport = ScriptedTransport::new();
    let store = Arc::new(CredentialStore::new(backend, TokenLifetimes::default()));
    let session = Arc::new(SessionManager::new(
        store.clone(),
        transport.clone(),
        SessionSettings::new(BASE_URL),
    ));
    let client = ApiClient::new(session.clone());

    transport.login_ok("alice", "A1", "R1");
    session.login("alice").await.unwrap();

    failing.store(true, Ordering::SeqCst);
    transport.unauthorized(Method::GET, POSTS);
    transport.refresh_ok("A2");

    let err = client.list_posts().await.unwrap_err();
    assert!(matches!(err, ApiError::SessionExpired));
    let state = session.state();
    assert!(!state.is_authenticated());
    assert_eq!(state.signed_out, Some(SignOutReason::Expired));
    assert_eq!(store.access_token(), None);
    assert_eq!(transport.count(&Method::GET, POSTS), 1);
}

#[tokio::test]
async fn test_dropped_request_sends_no_retry() {
    let h = Harness::signed_in("alice", "A1", "R1").await;
    h.transport.unauthorized(Method::GET, POSTS);
    let _release = h.transport.hold(
        Method::POST,
        REFRESH,
        StatusCode::OK,
        json!({ "success": true, "data": { "access": "A2" } }),
    );

    {
        let request = h.client.list_posts();
        tokio::pin!(request);
        let poll = tokio::time::timeout(std::time::Duration::from_millis(50), &mut request).await;
        assert!(poll.is_err(), "request should still be waiting on the refresh");
    }

    assert_eq!(h.transport.count(&Method::POST, REFRESH), 1);
    assert_eq!(h.transport.count(&Method::GET, POSTS), 1);
    // The old token is still in place; nothing was committed
    assert_eq!(h.store.access_token().as_deref(), Some("A1"));
    assert!(h.session.state().is_authenticated());
}

#[tokio::test]
async fn test_invalid_draft_sends_nothing() {
    let h = Harness::signed_in("alice", "A1", "R1").await;

    let err = h.client.create_post(&PostDraft::new("  ", "world")).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(ref msg) if msg == "Title is required"));

    let err = h.client.update_post(3, &PostDraft::new("hi", "")).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(ref msg) if msg == "Content is required"));

    let err = h.client.create_comment(3, " \n ").await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(ref msg) if msg == "Comment cannot be empty"));

    let not_an_image = ImageAttachment::new("notes.txt", "text/plain", vec![1, 2, 3]);
    let draft = PostDraft::new("hi", "world").with_image(not_an_image);
    assert!(matches!(
        h.client.create_post(&draft).await,
        Err(ApiError::Validation(_))
    ));

    let huge = ImageAttachment::new(
        "big.png",
        "image/png",
        vec![0; careerfeed_core::models::MAX_IMAGE_BYTES + 1],
    );
    let draft = PostDraft::new("hi", "world").with_image(huge);
    assert!(matches!(
        h.client.create_post(&draft).await,
        Err(ApiError::Validation(_))
    ));

    assert!(h.transport.requests().is_empty());
}

#[tokio::test]
async fn test_multipart_body_survives_retry() {
    let h = Harness::signed_in("alice", "A1", "R1").await;
    h.transport.unauthorized(Method::POST, POSTS);
    h.transport.refresh_ok("A2");
    h.transport.respond(
        Method::POST,
        POSTS,
        StatusCode::CREATED,
        json!({ "success": true, "data": post_json(8, "pic", "look") }),
    );

    let image = ImageAttachment::new("cat.png", "image/png", vec![137, 80, 78, 71]);
    let draft = PostDraft::new("pic", "look").with_image(image);
    h.client.create_post(&draft).await.unwrap();

    let sends: Vec<_> = h
        .transport
        .requests()
        .into_iter()
        .filter(|r| r.path == POSTS)
        .collect();
    assert_eq!(sends.len(), 2);
    for send in &sends {
        let RequestBody::Multipart(ref fields) = send.body else {
            panic!("expected multipart body, got {:?}", send.body);
        };
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["title", "content", "image"]);
        match fields[2].value {
            FormValue::File {
                ref file_name,
                ref bytes,
                ..
            } => {
                assert_eq!(file_name, "cat.png");
                assert_eq!(bytes.len(), 4);
            }
            ref other => panic!("expected file part, got {other:?}"),
        }
    }
    assert_eq!(sends[1].bearer.as_deref(), Some("A2"));
}
