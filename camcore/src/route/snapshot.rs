use std::str::FromStr;

use api::{JobStatus, Source};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use axum_extra::extract::Query;
use chrono::Utc;
use http::{header, StatusCode};
use uuid::Uuid;

use auth::claims::Claims;
use auth::scope;

use crate::convert;
use crate::db::service::snapshots::SnapshotsService;
use crate::db::service::streams::StreamsService;
use crate::error::AppError;
use crate::extract::job::{ExtractionJob, SnapshotJob};
use crate::result::Result;
use crate::route::{page_limits, require_scope, AppState};

pub fn route() -> Router<AppState> {
    Router::new()
        .route(&api::path::stream_snapshots("{stream}"), post(create))
        .route(&api::path::snapshots(""), get(index))
        .route(&api::path::snapshots("{snapshot}"), get(show).delete(destroy))
        .route(&api::path::snapshot_image("{snapshot}"), get(image))
}

async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(stream): Path<Uuid>,
    Json(req): Json<api::request::CreateSnapshot>,
) -> Result<(StatusCode, Json<api::response::Snapshot>)> {
    require_scope(&claims, scope::SNAPSHOTS_WRITE)?;

    let stream_row = StreamsService::get(state.db.conn(), stream)
        .await?
        .ok_or_else(|| AppError::not_found(format!("stream {} not found", stream)))?;

    let timestamp = match req.source {
        Source::Live => Utc::now(),
        Source::Historical => req.timestamp.ok_or_else(|| {
            AppError::validation("historical snapshots require a timestamp")
        })?,
    };

    let device = crate::db::service::devices::DevicesService::get(
        state.db.conn(),
        stream_row.camera_id,
    )
    .await?
    .ok_or_else(|| AppError::not_found("device of stream no longer exists"))?;

    let record = SnapshotsService::create_processing(
        state.db.conn(),
        stream,
        timestamp,
        req.source,
        req.metadata.unwrap_or_else(|| serde_json::json!({})),
    )
    .await?;

    state.extractor.enqueue(ExtractionJob::Snapshot(SnapshotJob {
        id: record.id,
        stream_id: stream,
        source: req.source,
        timestamp: (req.source == Source::Historical).then_some(timestamp),
        rtsp_url: device.rtsp_url,
    }))?;

    Ok((StatusCode::CREATED, Json(convert::snapshot(record))))
}

async fn index(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(req): Query<api::request::MediaQuery>,
) -> Result<Json<api::response::Page<api::response::Snapshot>>> {
    require_scope(&claims, scope::SNAPSHOTS_READ)?;
    if let Some(status) = &req.status {
        JobStatus::from_str(status).map_err(AppError::Validation)?;
    }
    let (limit, offset) = page_limits(req.limit, req.offset);
    let (rows, total) =
        SnapshotsService::list(state.db.conn(), req.stream_id, req.status, limit, offset).await?;
    Ok(Json(api::response::Page {
        items: rows.into_iter().map(convert::snapshot).collect(),
        pagination: api::response::Pagination { total, limit, offset },
    }))
}

async fn show(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(snapshot): Path<Uuid>,
) -> Result<Json<api::response::Snapshot>> {
    require_scope(&claims, scope::SNAPSHOTS_READ)?;
    let row = SnapshotsService::get(state.db.conn(), snapshot)
        .await?
        .ok_or_else(|| AppError::not_found(format!("snapshot {} not found", snapshot)))?;
    Ok(Json(convert::snapshot(row)))
}

async fn image(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(snapshot): Path<Uuid>,
) -> Result<Response> {
    require_scope(&claims, scope::SNAPSHOTS_READ)?;
    let row = SnapshotsService::get(state.db.conn(), snapshot)
        .await?
        .ok_or_else(|| AppError::not_found(format!("snapshot {} not found", snapshot)))?;

    match JobStatus::from_str(&row.status).unwrap_or(JobStatus::Failed) {
        JobStatus::Processing => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "processing" })),
        )
            .into_response()),
        JobStatus::Failed => Err(AppError::not_found(
            row.error.unwrap_or_else(|| "snapshot failed".to_string()),
        )),
        JobStatus::Ready => {
            let path = row
                .image_path
                .ok_or_else(|| AppError::not_found("snapshot artifact is missing"))?;
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|_| AppError::not_found("snapshot artifact is missing"))?;
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, "image/jpeg")],
                bytes,
            )
                .into_response())
        }
    }
}

/// Delete cascades into a running job via the tombstone.
async fn destroy(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(snapshot): Path<Uuid>,
) -> Result<StatusCode> {
    require_scope(&claims, scope::SNAPSHOTS_WRITE)?;
    let Some(row) = SnapshotsService::get(state.db.conn(), snapshot).await? else {
        return Ok(StatusCode::NO_CONTENT);
    };
    if row.status == JobStatus::Processing.to_string() {
        state.extractor.cancel(snapshot);
    }
    if let Some(path) = &row.image_path {
        let _ = tokio::fs::remove_file(path).await;
    }
    SnapshotsService::delete(state.db.conn(), snapshot).await?;
    Ok(StatusCode::NO_CONTENT)
}
