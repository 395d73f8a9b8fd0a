use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::Router;
use http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use crate::config::{Config, Database as DatabaseConfig};
use crate::consumer::ConsumerRegistry;
use crate::db::service::clients::ClientsService;
use crate::db::service::streams::StreamsService;
use crate::db::DatabaseService;
use crate::extract::ExtractionPool;
use crate::hls::{RecordingStore, SegmentPins};
use crate::route::AppState;
use crate::sfu::SfuClient;
use crate::stream::manager::StreamManager;

struct Harness {
    app: Router,
    db: DatabaseService,
    _dirs: TempDir,
}

async fn harness() -> Harness {
    let dirs = TempDir::new().unwrap();
    let mut config = Config::default();
    config.database = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        connect_timeout: 5,
    };
    config.auth.jwt_secret = "route-test-secret".to_string();
    config.recording.root = dirs.path().join("recordings");
    config.extraction.snapshots_root = dirs.path().join("snapshots");
    config.extraction.bookmarks_root = dirs.path().join("bookmarks");
    // An unroutable SFU endpoint: connection-dependent paths are not exercised here.
    config.sfu.url = "ws://127.0.0.1:1".to_string();
    let config = Arc::new(config);

    let db = DatabaseService::new(&config.database).await.unwrap();
    ClientsService::create(
        db.conn(),
        "full-access",
        "full-secret",
        &auth::scope::ALL.map(String::from),
    )
    .await
    .unwrap();
    ClientsService::create(
        db.conn(),
        "read-only",
        "read-secret",
        &["snapshots:read".to_string()],
    )
    .await
    .unwrap();

    let sfu = SfuClient::new(config.sfu.clone());
    let consumers = Arc::new(ConsumerRegistry::new(
        db.clone(),
        sfu.clone(),
        config.stream.clone(),
    ));
    let streams =
        StreamManager::new(config.clone(), db.clone(), sfu.clone(), consumers.clone()).await;
    let recordings = RecordingStore::new(config.recording.root.clone());
    let pins = SegmentPins::default();
    let extractor = ExtractionPool::new(
        config.extraction.clone(),
        db.clone(),
        recordings.clone(),
        pins,
    );

    let app = crate::router(AppState {
        config,
        db: db.clone(),
        sfu,
        streams,
        consumers,
        extractor,
        recordings,
    });

    Harness {
        app,
        db,
        _dirs: dirs,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn token_for(app: &Router, client_id: &str, secret: &str) -> (String, String) {
    let (status, body) = send(
        app,
        request(
            Method::POST,
            api::path::TOKEN,
            None,
            Some(json!({ "client_id": client_id, "client_secret": secret })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    (
        body["access_token"].as_str().unwrap().to_string(),
        body["refresh_token"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn health_probes_are_unauthenticated() {
    let h = harness().await;
    let (status, body) = send(&h.app, request(Method::GET, api::path::HEALTH_LIVE, None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn token_flow_grants_scopes_and_rejects_bad_secret() {
    let h = harness().await;

    let (status, body) = send(
        &h.app,
        request(
            Method::POST,
            api::path::TOKEN,
            None,
            Some(json!({ "client_id": "full-access", "client_secret": "full-secret" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    assert!(body["scopes"]
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s == "streams:consume"));

    let (status, body) = send(
        &h.app,
        request(
            Method::POST,
            api::path::TOKEN,
            None,
            Some(json!({ "client_id": "full-access", "client_secret": "nope" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "INVALID_CREDENTIALS");
    assert!(body["request_id"].is_string());
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn refresh_issues_access_without_rotation_and_revoke_ends_it() {
    let h = harness().await;
    let (_, refresh_token) = token_for(&h.app, "full-access", "full-secret").await;

    let (status, body) = send(
        &h.app,
        request(
            Method::POST,
            api::path::TOKEN_REFRESH,
            None,
            Some(json!({ "refresh_token": refresh_token })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access_token"].is_string());
    // Not rotated: no replacement refresh token in the grant.
    assert!(body.get("refresh_token").is_none() || body["refresh_token"].is_null());

    let (status, _) = send(
        &h.app,
        request(
            Method::POST,
            api::path::TOKEN_REVOKE,
            None,
            Some(json!({ "refresh_token": refresh_token })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(
        &h.app,
        request(
            Method::POST,
            api::path::TOKEN_REFRESH,
            None,
            Some(json!({ "refresh_token": refresh_token })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "INVALID_REFRESH_TOKEN");
}

#[tokio::test]
async fn protected_surface_rejects_missing_and_refresh_tokens() {
    let h = harness().await;
    let (status, _) = send(&h.app, request(Method::GET, "/v2/streams", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A refresh token is not an access token.
    let (_, refresh_token) = token_for(&h.app, "full-access", "full-secret").await;
    let (status, _) = send(
        &h.app,
        request(Method::GET, "/v2/streams", Some(&refresh_token), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn scope_enforcement_returns_403() {
    let h = harness().await;
    let (access, _) = token_for(&h.app, "read-only", "read-secret").await;

    let (status, body) = send(
        &h.app,
        request(
            Method::POST,
            "/v1/devices",
            Some(&access),
            Some(json!({ "name": "door", "rtsp_url": "rtsp://cam.local/door" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "INSUFFICIENT_SCOPE");
    assert_eq!(body["details"]["required_scope"], "streams:write");
}

#[tokio::test]
async fn device_crud_round_trip() {
    let h = harness().await;
    let (access, _) = token_for(&h.app, "full-access", "full-secret").await;

    let (status, created) = send(
        &h.app,
        request(
            Method::POST,
            "/v1/devices",
            Some(&access),
            Some(json!({ "name": "door", "rtsp_url": "rtsp://cam.local/door" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["is_active"], false);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &h.app,
        request(
            Method::PUT,
            &api::path::devices(&id),
            Some(&access),
            Some(json!({ "location": "loading dock" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["location"], "loading dock");

    let (status, body) = send(
        &h.app,
        request(Method::GET, "/v1/devices", Some(&access), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = send(
        &h.app,
        request(Method::DELETE, &api::path::devices(&id), Some(&access), None),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(
        &h.app,
        request(Method::GET, &api::path::devices(&id), Some(&access), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "RESOURCE_NOT_FOUND");
}

#[tokio::test]
async fn rtsp_url_is_validated() {
    let h = harness().await;
    let (access, _) = token_for(&h.app, "full-access", "full-secret").await;
    let (status, body) = send(
        &h.app,
        request(
            Method::POST,
            "/v1/devices",
            Some(&access),
            Some(json!({ "name": "door", "rtsp_url": "http://not-rtsp" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

async fn seed_initializing_stream(h: &Harness) -> (Uuid, Uuid) {
    let device = crate::db::service::devices::DevicesService::create(
        h.db.conn(),
        "dock",
        "rtsp://cam.local/dock",
        None,
    )
    .await
    .unwrap();
    let stream = StreamsService::create(h.db.conn(), device.id, json!({}))
        .await
        .unwrap();
    (device.id, stream.id)
}

#[tokio::test]
async fn attach_during_initializing_is_409_without_transport() {
    let h = harness().await;
    let (access, _) = token_for(&h.app, "full-access", "full-secret").await;
    let (_, stream_id) = seed_initializing_stream(&h).await;

    let (status, body) = send(
        &h.app,
        request(
            Method::POST,
            &api::path::consume(&stream_id.to_string()),
            Some(&access),
            Some(json!({ "client_id": "viewer-1", "rtp_capabilities": {} })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "STREAM_NOT_LIVE");
    assert_eq!(body["details"]["current_state"], "INITIALIZING");
    assert_eq!(body["details"]["required_state"], "LIVE");
}

#[tokio::test]
async fn stream_listing_filters_and_validates_state() {
    let h = harness().await;
    let (access, _) = token_for(&h.app, "full-access", "full-secret").await;
    let (_, stream_id) = seed_initializing_stream(&h).await;

    let (status, body) = send(
        &h.app,
        request(
            Method::GET,
            "/v2/streams?state=INITIALIZING",
            Some(&access),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["items"][0]["id"], stream_id.to_string());
    assert_eq!(body["items"][0]["consumer_count"], 0);

    let (status, body) = send(
        &h.app,
        request(Method::GET, "/v2/streams?state=bogus", Some(&access), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn bookmark_with_zero_window_is_rejected() {
    let h = harness().await;
    let (access, _) = token_for(&h.app, "full-access", "full-secret").await;
    let (_, stream_id) = seed_initializing_stream(&h).await;

    let (status, body) = send(
        &h.app,
        request(
            Method::POST,
            &api::path::stream_bookmarks(&stream_id.to_string()),
            Some(&access),
            Some(json!({ "source": "live", "before_seconds": 0, "after_seconds": 0 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn historical_snapshot_without_archive_eventually_fails_with_no_data() {
    let h = harness().await;
    let (access, _) = token_for(&h.app, "full-access", "full-secret").await;
    let (_, stream_id) = seed_initializing_stream(&h).await;

    let (status, created) = send(
        &h.app,
        request(
            Method::POST,
            &api::path::stream_snapshots(&stream_id.to_string()),
            Some(&access),
            Some(json!({ "source": "historical", "timestamp": "2026-07-01T12:00:00Z" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "processing");
    let snapshot_id = created["id"].as_str().unwrap().to_string();

    // The worker pool resolves the job asynchronously.
    let mut last = Value::Null;
    for _ in 0..50 {
        let (_, body) = send(
            &h.app,
            request(
                Method::GET,
                &api::path::snapshots(&snapshot_id),
                Some(&access),
                None,
            ),
        )
        .await;
        if body["status"] == "failed" {
            last = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(last["status"], "failed");
    assert!(last["error"]
        .as_str()
        .unwrap()
        .starts_with("NO_RECORDING_DATA"));
}

#[tokio::test]
async fn historical_snapshot_requires_timestamp() {
    let h = harness().await;
    let (access, _) = token_for(&h.app, "full-access", "full-secret").await;
    let (_, stream_id) = seed_initializing_stream(&h).await;

    let (status, body) = send(
        &h.app,
        request(
            Method::POST,
            &api::path::stream_snapshots(&stream_id.to_string()),
            Some(&access),
            Some(json!({ "source": "historical" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn detach_unknown_consumer_is_a_no_op_204() {
    let h = harness().await;
    let (access, _) = token_for(&h.app, "full-access", "full-secret").await;
    let (_, stream_id) = seed_initializing_stream(&h).await;

    let (status, _) = send(
        &h.app,
        request(
            Method::DELETE,
            &api::path::consumer(&stream_id.to_string(), &Uuid::new_v4().to_string()),
            Some(&access),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn hls_playlist_of_unrecorded_stream_is_404_and_segment_names_are_validated() {
    let h = harness().await;
    let (access, _) = token_for(&h.app, "full-access", "full-secret").await;
    let (_, stream_id) = seed_initializing_stream(&h).await;
    let stream = stream_id.to_string();

    let (status, body) = send(
        &h.app,
        request(Method::GET, &api::path::hls_playlist(&stream), Some(&access), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NO_RECORDING_DATA");

    let (status, body) = send(
        &h.app,
        request(
            Method::GET,
            &api::path::hls_segment(&stream, "passwd"),
            Some(&access),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn stop_stream_is_idempotent() {
    let h = harness().await;
    let (access, _) = token_for(&h.app, "full-access", "full-secret").await;
    let (device_id, _) = seed_initializing_stream(&h).await;
    let device = device_id.to_string();

    for _ in 0..2 {
        let (status, body) = send(
            &h.app,
            request(Method::POST, &api::path::stop_stream(&device), Some(&access), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stopped"], true);
    }

    // The row left behind by the orphan-stop is terminal for the device.
    let row = StreamsService::find_non_terminal_for_device(h.db.conn(), device_id)
        .await
        .unwrap();
    assert!(row.is_none());
}
