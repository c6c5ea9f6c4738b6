//! Tests of the credential cache and heal writer: handshake call counts,
//! failure propagation, and the no-invalidation-on-upload-failure contract.

use bytes::Bytes;
use fallback_proxy::config::PrimaryStoreConfig;
use fallback_proxy::heal_writer::{HealPayload, HealWriter};
use fallback_proxy::session::{MemoryKvStore, SessionCache};
use fallback_proxy::ProxyError;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use wiremock::matchers::{basic_auth, body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn primary_config(authorize_url: String) -> PrimaryStoreConfig {
    PrimaryStoreConfig {
        bucket_id: "test-bucket".to_string(),
        key_id: "test-key-id".to_string(),
        application_key: "test-app-key".to_string(),
        base_url: "http://primary.invalid".to_string(),
        authorize_url,
        session_ttl: Duration::from_secs(3600 * 12),
        session_cache_key: "session".to_string(),
    }
}

fn session_cache(authorize_url: String) -> SessionCache {
    SessionCache::new(
        Arc::new(MemoryKvStore::new()),
        reqwest::Client::new(),
        primary_config(authorize_url),
    )
}

async fn requests_to(server: &MockServer, request_path: &str) -> usize {
    server.received_requests().await.map_or(0, |reqs| {
        reqs.iter()
            .filter(|r| r.url.path() == request_path)
            .count()
    })
}

/// Mount a successful two-step handshake returning the given upload URL.
async fn mount_handshake(auth: &MockServer, upload_url: &str) {
    Mock::given(method("POST"))
        .and(path("/authorize"))
        .and(basic_auth("test-key-id", "test-app-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "authorizationToken": "auth-token-1",
            "apiUrl": auth.uri(),
        })))
        .mount(auth)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/get_upload_url"))
        .and(body_json(json!({"bucketId": "test-bucket"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "authorizationToken": "upload-token-1",
            "uploadUrl": upload_url,
        })))
        .mount(auth)
        .await;
}

#[tokio::test]
async fn cache_miss_runs_one_handshake_and_hit_runs_none() {
    let auth = MockServer::start().await;
    mount_handshake(&auth, "https://upload.example.com/pod-1").await;

    let sessions = session_cache(format!("{}/authorize", auth.uri()));

    let first = sessions.acquire().await.unwrap();
    assert_eq!(first.auth_token, "auth-token-1");
    assert_eq!(first.upload_token, "upload-token-1");
    assert_eq!(first.upload_url, "https://upload.example.com/pod-1");

    // Second acquire is served from the cache without any network calls
    let second = sessions.acquire().await.unwrap();
    assert_eq!(second.upload_url, first.upload_url);

    assert_eq!(requests_to(&auth, "/authorize").await, 1);
    assert_eq!(requests_to(&auth, "/api/v2/get_upload_url").await, 1);
}

#[tokio::test]
async fn auth_failure_aborts_and_caches_nothing() {
    let auth = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/authorize"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&auth)
        .await;

    let sessions = session_cache(format!("{}/authorize", auth.uri()));

    let err = sessions.acquire().await.unwrap_err();
    assert!(matches!(err, ProxyError::AuthFailure(500)));

    // The failure is not cached: a later acquire retries the handshake
    let err = sessions.acquire().await.unwrap_err();
    assert!(matches!(err, ProxyError::AuthFailure(500)));

    assert_eq!(requests_to(&auth, "/authorize").await, 2);
    assert_eq!(requests_to(&auth, "/api/v2/get_upload_url").await, 0);
}

#[tokio::test]
async fn upload_url_failure_aborts_and_caches_nothing() {
    let auth = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/authorize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "authorizationToken": "auth-token-1",
            "apiUrl": auth.uri(),
        })))
        .mount(&auth)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/get_upload_url"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&auth)
        .await;

    let sessions = session_cache(format!("{}/authorize", auth.uri()));

    let err = sessions.acquire().await.unwrap_err();
    assert!(matches!(err, ProxyError::UploadUrlFailure(403)));

    // No partial state survives the failed second step
    let err = sessions.acquire().await.unwrap_err();
    assert!(matches!(err, ProxyError::UploadUrlFailure(403)));
    assert_eq!(requests_to(&auth, "/authorize").await, 2);
}

#[tokio::test]
async fn empty_upload_url_is_an_issuance_failure() {
    let auth = MockServer::start().await;
    mount_handshake(&auth, "").await;

    let sessions = session_cache(format!("{}/authorize", auth.uri()));

    let err = sessions.acquire().await.unwrap_err();
    assert!(matches!(err, ProxyError::UploadUrlFailure(200)));
}

#[tokio::test]
async fn missing_handshake_field_is_a_protocol_error() {
    let auth = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/authorize"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"authorizationToken": "auth-token-1"})),
        )
        .mount(&auth)
        .await;

    let sessions = session_cache(format!("{}/authorize", auth.uri()));

    let err = sessions.acquire().await.unwrap_err();
    assert!(matches!(err, ProxyError::ProtocolError(_)));
}

#[tokio::test]
async fn failed_heal_upload_leaves_cached_session_intact() {
    let auth = MockServer::start().await;
    let upload = MockServer::start().await;
    mount_handshake(&auth, &format!("{}/upload/pod-1", upload.uri())).await;
    Mock::given(method("POST"))
        .and(path("/upload/pod-1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("pod busy"))
        .mount(&upload)
        .await;

    let sessions = Arc::new(session_cache(format!("{}/authorize", auth.uri())));
    let heal_writer = HealWriter::new(reqwest::Client::new(), Arc::clone(&sessions));

    let payload = HealPayload {
        bytes: Bytes::from_static(b"DATA"),
        content_type: Some("application/octet-stream".to_string()),
        content_length: Some("4".to_string()),
    };
    let err = heal_writer.heal(payload, "a/b.bin").await.unwrap_err();
    match err {
        ProxyError::UploadFailure(status, body) => {
            assert_eq!(status, 503);
            assert_eq!(body, "pod busy");
        }
        other => panic!("expected UploadFailure, got {:?}", other),
    }

    // The rejected upload does not invalidate the session: acquiring again
    // reuses the cached one with no further handshake calls
    sessions.acquire().await.unwrap();
    assert_eq!(requests_to(&auth, "/authorize").await, 1);
}

#[tokio::test]
async fn successful_heal_uploads_digest_and_declared_length() {
    let auth = MockServer::start().await;
    let upload = MockServer::start().await;
    mount_handshake(&auth, &format!("{}/upload/pod-1", upload.uri())).await;
    Mock::given(method("POST"))
        .and(path("/upload/pod-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"fileName": "a/b.bin"})))
        .expect(1)
        .mount(&upload)
        .await;

    let sessions = Arc::new(session_cache(format!("{}/authorize", auth.uri())));
    let heal_writer = HealWriter::new(reqwest::Client::new(), Arc::clone(&sessions));

    let payload = HealPayload {
        bytes: Bytes::from_static(b"DATA"),
        content_type: None,
        content_length: Some("4".to_string()),
    };
    heal_writer.heal(payload, "a/b.bin").await.unwrap();

    let requests = upload.received_requests().await.unwrap();
    let request = &requests[0];
    assert_eq!(request.body, b"DATA".to_vec());
    assert_eq!(request.headers.get("x-file-name").unwrap(), "a/b.bin");
    // Missing source content type falls back to octet-stream
    assert_eq!(
        request.headers.get("content-type").unwrap(),
        "application/octet-stream"
    );
    assert_eq!(
        request.headers.get("x-content-sha1").unwrap(),
        fallback_proxy::digest::sha1_hex(b"DATA").as_str()
    );
}

#[tokio::test]
async fn expired_session_ttl_forces_a_fresh_handshake() {
    let auth = MockServer::start().await;
    mount_handshake(&auth, "https://upload.example.com/pod-1").await;

    let mut config = primary_config(format!("{}/authorize", auth.uri()));
    config.session_ttl = Duration::from_millis(200);
    let sessions = SessionCache::new(
        Arc::new(MemoryKvStore::new()),
        reqwest::Client::new(),
        config,
    );

    sessions.acquire().await.unwrap();
    sleep(Duration::from_millis(250)).await;
    sessions.acquire().await.unwrap();

    assert_eq!(requests_to(&auth, "/authorize").await, 2);
}
