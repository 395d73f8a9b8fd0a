use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Router};
use http::{header, StatusCode};
use uuid::Uuid;

use auth::claims::Claims;
use auth::scope;

use crate::db::service::streams::StreamsService;
use crate::error::AppError;
use crate::hls::segment_epoch;
use crate::result::Result;
use crate::route::{require_scope, AppState};

pub fn route() -> Router<AppState> {
    Router::new()
        .route(&api::path::hls_playlist("{stream}"), get(playlist))
        .route(&api::path::hls_segment("{stream}", "{segment}"), get(segment))
}

async fn playlist(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(stream): Path<Uuid>,
) -> Result<Response> {
    require_scope(&claims, scope::STREAMS_READ)?;
    StreamsService::get(state.db.conn(), stream)
        .await?
        .ok_or_else(|| AppError::not_found(format!("stream {} not found", stream)))?;

    let text = tokio::fs::read_to_string(state.recordings.playlist_path(stream))
        .await
        .map_err(|_| AppError::NoRecordingData(format!("stream {} has no recording", stream)))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
        text,
    )
        .into_response())
}

async fn segment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((stream, segment)): Path<(Uuid, String)>,
) -> Result<Response> {
    require_scope(&claims, scope::STREAMS_READ)?;
    // Only archive-shaped names resolve; anything else is a traversal attempt.
    if segment_epoch(&segment).is_none() {
        return Err(AppError::validation(format!(
            "not a segment name: {}",
            segment
        )));
    }

    let bytes = tokio::fs::read(state.recordings.segment_path(stream, &segment))
        .await
        .map_err(|_| AppError::NoRecordingData(format!("segment {} not found", segment)))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "video/mp2t")],
        bytes,
    )
        .into_response())
}
