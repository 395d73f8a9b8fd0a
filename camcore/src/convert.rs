use std::str::FromStr;

use api::{JobStatus, Source};
use chrono::Utc;

use crate::db::entity::{bookmarks, consumers, devices, producers, snapshots, streams};
use crate::stream::state::StreamState;

pub fn device(model: devices::Model, is_active: bool) -> api::response::Device {
    api::response::Device {
        id: model.id,
        name: model.name,
        rtsp_url: model.rtsp_url,
        location: model.location,
        is_active,
        created_at: model.created_at.into(),
    }
}

pub fn producer(model: producers::Model) -> api::response::Producer {
    api::response::Producer {
        id: model.id,
        sfu_id: model.sfu_id,
        ssrc: model.ssrc as u32,
        state: model.state,
        created_at: model.created_at.into(),
    }
}

pub fn stream(
    model: streams::Model,
    active_producer: Option<producers::Model>,
    consumer_count: u64,
) -> api::response::Stream {
    let uptime_seconds = match (StreamState::from_str(&model.state), model.started_at) {
        (Ok(StreamState::Live), Some(started_at)) => {
            Some((Utc::now() - started_at.with_timezone(&Utc)).num_seconds())
        }
        _ => None,
    };
    api::response::Stream {
        id: model.id,
        camera_id: model.camera_id,
        state: model.state,
        producer: active_producer.map(producer),
        consumer_count,
        uptime_seconds,
        last_error: model.last_error,
        created_at: model.created_at.into(),
    }
}

pub fn consumer(model: consumers::Model) -> api::response::Consumer {
    api::response::Consumer {
        id: model.id,
        stream_id: model.stream_id,
        client_id: model.client_id,
        state: model.state,
        created_at: model.created_at.into(),
        closed_at: model.closed_at.map(|t| t.into()),
        close_reason: model.close_reason,
    }
}

pub fn snapshot(model: snapshots::Model) -> api::response::Snapshot {
    let status = JobStatus::from_str(&model.status).unwrap_or(JobStatus::Failed);
    let image_url = (status == JobStatus::Ready && model.image_path.is_some())
        .then(|| api::path::snapshot_image(&model.id.to_string()));
    api::response::Snapshot {
        id: model.id,
        stream_id: model.stream_id,
        timestamp: model.timestamp.into(),
        source: Source::from_str(&model.source).unwrap_or(Source::Live),
        status,
        image_url,
        error: model.error,
        metadata: model.metadata,
        created_at: model.created_at.into(),
    }
}

pub fn bookmark(model: bookmarks::Model) -> api::response::Bookmark {
    let status = JobStatus::from_str(&model.status).unwrap_or(JobStatus::Failed);
    let id_text = model.id.to_string();
    let video_url = (status == JobStatus::Ready && model.video_path.is_some())
        .then(|| api::path::bookmark_video(&id_text));
    let thumbnail_url = (status == JobStatus::Ready && model.thumbnail_path.is_some())
        .then(|| api::path::bookmark_thumbnail(&id_text));
    api::response::Bookmark {
        id: model.id,
        stream_id: model.stream_id,
        center_timestamp: model.center_timestamp.into(),
        start_time: model.start_time.into(),
        end_time: model.end_time.into(),
        duration_seconds: model.duration_seconds as u32,
        source: Source::from_str(&model.source).unwrap_or(Source::Historical),
        label: model.label,
        event_type: model.event_type,
        confidence: model.confidence,
        tags: serde_json::from_value(model.tags).unwrap_or_default(),
        status,
        video_url,
        thumbnail_url,
        error: model.error,
        created_at: model.created_at.into(),
    }
}
