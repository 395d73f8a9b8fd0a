use api::Source;
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::config::Database as DatabaseConfig;
use crate::db::service::bookmarks::{BookmarksService, NewBookmark};
use crate::db::service::clients::ClientsService;
use crate::db::service::consumers::{ConsumersService, STATE_CLOSED};
use crate::db::service::devices::DevicesService;
use crate::db::service::snapshots::SnapshotsService;
use crate::db::service::streams::{StreamQuery, StreamsService};
use crate::db::DatabaseService;
use crate::stream::state::StreamState;

async fn test_db() -> DatabaseService {
    // One pooled connection: a second one would see its own empty :memory: db.
    DatabaseService::new(&DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        connect_timeout: 5,
    })
    .await
    .expect("in-memory database")
}

async fn seed_stream(db: &DatabaseService) -> (Uuid, Uuid) {
    let device = DevicesService::create(db.conn(), "door", "rtsp://cam.local/door", None)
        .await
        .unwrap();
    let stream = StreamsService::create(db.conn(), device.id, json!({"codec": "h264"}))
        .await
        .unwrap();
    (device.id, stream.id)
}

#[tokio::test]
async fn one_non_terminal_stream_per_device() {
    let db = test_db().await;
    let (device_id, stream_id) = seed_stream(&db).await;

    let found = StreamsService::find_non_terminal_for_device(db.conn(), device_id)
        .await
        .unwrap()
        .expect("initializing stream is non-terminal");
    assert_eq!(found.id, stream_id);

    StreamsService::set_state(db.conn(), stream_id, StreamState::Stopped, None)
        .await
        .unwrap();
    assert!(StreamsService::find_non_terminal_for_device(db.conn(), device_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn live_state_records_started_at_and_uptime_fields() {
    let db = test_db().await;
    let (_, stream_id) = seed_stream(&db).await;

    StreamsService::record_setup(db.conn(), stream_id, Some(20104), Some(0xdeadbeef), None)
        .await
        .unwrap();
    StreamsService::set_state(db.conn(), stream_id, StreamState::Ready, None)
        .await
        .unwrap();
    StreamsService::set_state(db.conn(), stream_id, StreamState::Live, None)
        .await
        .unwrap();

    let row = StreamsService::get(db.conn(), stream_id).await.unwrap().unwrap();
    assert_eq!(row.state, "LIVE");
    assert_eq!(row.assigned_port, Some(20104));
    assert_eq!(row.captured_ssrc, Some(0xdeadbeef_u32 as i64));
    assert!(row.started_at.is_some());
}

#[tokio::test]
async fn stopped_streams_age_out_to_closed() {
    let db = test_db().await;
    let (_, stream_id) = seed_stream(&db).await;
    StreamsService::set_state(db.conn(), stream_id, StreamState::Stopped, None)
        .await
        .unwrap();

    // Cutoff in the future closes everything already stopped.
    let closed = StreamsService::close_stopped_older_than(db.conn(), Utc::now() + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(closed, 1);
    let row = StreamsService::get(db.conn(), stream_id).await.unwrap().unwrap();
    assert_eq!(row.state, "CLOSED");
}

#[tokio::test]
async fn stream_list_filters_by_state() {
    let db = test_db().await;
    let (device_id, stream_id) = seed_stream(&db).await;

    let (rows, total) = StreamsService::list(
        db.conn(),
        StreamQuery {
            state: Some(StreamState::Initializing),
            camera_id: Some(device_id),
            limit: 10,
            offset: 0,
        },
    )
    .await
    .unwrap();
    assert_eq!(total, 1);
    assert_eq!(rows[0].id, stream_id);

    let (rows, total) = StreamsService::list(
        db.conn(),
        StreamQuery {
            state: Some(StreamState::Live),
            camera_id: None,
            limit: 10,
            offset: 0,
        },
    )
    .await
    .unwrap();
    assert_eq!(total, 0);
    assert!(rows.is_empty());
}

#[tokio::test]
async fn consumer_lifecycle_and_mass_close() {
    let db = test_db().await;
    let (_, stream_id) = seed_stream(&db).await;

    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    ConsumersService::create(db.conn(), first, stream_id, "viewer-1", "t1", "c1")
        .await
        .unwrap();
    ConsumersService::create(db.conn(), second, stream_id, "viewer-2", "t2", "c2")
        .await
        .unwrap();
    ConsumersService::mark_connected(db.conn(), first).await.unwrap();

    assert_eq!(ConsumersService::count_active(db.conn(), stream_id).await.unwrap(), 1);

    let closed = ConsumersService::close_all_for_stream(db.conn(), stream_id, "stream stopped")
        .await
        .unwrap();
    assert_eq!(closed, 2);

    for id in [first, second] {
        let row = ConsumersService::get(db.conn(), id).await.unwrap().unwrap();
        assert_eq!(row.state, STATE_CLOSED);
        assert!(row.closed_at.is_some());
        assert_eq!(row.close_reason.as_deref(), Some("stream stopped"));
    }
}

#[tokio::test]
async fn snapshot_status_is_monotone() {
    let db = test_db().await;
    let (_, stream_id) = seed_stream(&db).await;

    let record = SnapshotsService::create_processing(
        db.conn(),
        stream_id,
        Utc::now(),
        Source::Live,
        json!({}),
    )
    .await
    .unwrap();

    assert!(SnapshotsService::mark_ready(db.conn(), record.id, "/snapshots/x.jpg")
        .await
        .unwrap());
    // A finished record never transitions again.
    assert!(!SnapshotsService::mark_failed(db.conn(), record.id, "late failure")
        .await
        .unwrap());
    let row = SnapshotsService::get(db.conn(), record.id).await.unwrap().unwrap();
    assert_eq!(row.status, "ready");
    assert!(row.error.is_none());
}

#[tokio::test]
async fn bookmark_status_is_monotone() {
    let db = test_db().await;
    let (_, stream_id) = seed_stream(&db).await;

    let center = Utc::now();
    let record = BookmarksService::create_processing(
        db.conn(),
        NewBookmark {
            stream_id,
            center_timestamp: center,
            start_time: center - Duration::seconds(5),
            end_time: center + Duration::seconds(5),
            duration_seconds: 10,
            source: Source::Historical,
            label: Some("forklift".to_string()),
            event_type: None,
            confidence: Some(0.8),
            tags: vec!["dock".to_string()],
            metadata: json!({}),
        },
    )
    .await
    .unwrap();
    assert_eq!(record.duration_seconds, 10);

    assert!(BookmarksService::mark_failed(db.conn(), record.id, "NO_RECORDING_DATA: gap")
        .await
        .unwrap());
    assert!(!BookmarksService::mark_ready(db.conn(), record.id, "/bookmarks/x.mp4", None)
        .await
        .unwrap());
    let row = BookmarksService::get(db.conn(), record.id).await.unwrap().unwrap();
    assert_eq!(row.status, "failed");
    assert!(row.video_path.is_none());
}

#[tokio::test]
async fn client_verify_and_refresh_revocation() {
    let db = test_db().await;
    ClientsService::create(
        db.conn(),
        "ruth-ai",
        "super-secret",
        &["streams:read".to_string(), "streams:consume".to_string()],
    )
    .await
    .unwrap();

    assert!(ClientsService::verify(db.conn(), "ruth-ai", "super-secret")
        .await
        .unwrap()
        .is_some());
    assert!(ClientsService::verify(db.conn(), "ruth-ai", "wrong")
        .await
        .unwrap()
        .is_none());
    assert!(ClientsService::verify(db.conn(), "ghost", "super-secret")
        .await
        .unwrap()
        .is_none());

    let jti = Uuid::new_v4();
    ClientsService::record_refresh_token(db.conn(), jti, "ruth-ai", Utc::now() + Duration::days(7))
        .await
        .unwrap();
    assert!(ClientsService::refresh_token_usable(db.conn(), jti).await.unwrap());

    assert!(ClientsService::revoke_refresh_token(db.conn(), jti).await.unwrap());
    assert!(!ClientsService::refresh_token_usable(db.conn(), jti).await.unwrap());
    // Unknown tokens are unusable, not an error.
    assert!(!ClientsService::refresh_token_usable(db.conn(), Uuid::new_v4())
        .await
        .unwrap());
}

#[tokio::test]
async fn device_cascade_view() {
    let db = test_db().await;
    let (device_id, stream_id) = seed_stream(&db).await;

    assert!(!DevicesService::is_active(db.conn(), device_id).await.unwrap());
    StreamsService::set_state(db.conn(), stream_id, StreamState::Ready, None)
        .await
        .unwrap();
    StreamsService::set_state(db.conn(), stream_id, StreamState::Live, None)
        .await
        .unwrap();
    assert!(DevicesService::is_active(db.conn(), device_id).await.unwrap());
}
