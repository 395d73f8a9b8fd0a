use std::str::FromStr;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Extension, Json, Router};
use axum_extra::extract::Query;
use uuid::Uuid;

use auth::claims::Claims;
use auth::scope;

use crate::convert;
use crate::db::service::consumers::ConsumersService;
use crate::db::service::streams::{StreamQuery, StreamsService};
use crate::error::AppError;
use crate::result::Result;
use crate::route::{page_limits, require_scope, AppState};
use crate::stream::state::StreamState;

pub fn route() -> Router<AppState> {
    Router::new()
        .route(&api::path::streams(""), get(index))
        .route(&api::path::streams("{stream}"), get(show))
        .route(&api::path::stream_health("{stream}"), get(health))
        .route(
            &api::path::router_capabilities("{stream}"),
            get(router_capabilities),
        )
        .route(&api::path::consumers("{stream}"), get(consumers))
}

async fn index(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(req): Query<api::request::StreamQuery>,
) -> Result<Json<api::response::Page<api::response::Stream>>> {
    require_scope(&claims, scope::STREAMS_READ)?;

    let state_filter = match req.state.as_deref() {
        Some(text) => Some(
            StreamState::from_str(text).map_err(AppError::Validation)?,
        ),
        None => None,
    };
    let (limit, offset) = page_limits(req.limit, req.offset);

    let (rows, total) = StreamsService::list(
        state.db.conn(),
        StreamQuery {
            state: state_filter,
            camera_id: req.camera_id,
            limit,
            offset,
        },
    )
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let producer = StreamsService::active_producer(state.db.conn(), row.id).await?;
        let consumer_count = ConsumersService::count_active(state.db.conn(), row.id).await?;
        items.push(convert::stream(row, producer, consumer_count));
    }

    Ok(Json(api::response::Page {
        items,
        pagination: api::response::Pagination { total, limit, offset },
    }))
}

async fn show(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(stream): Path<Uuid>,
) -> Result<Json<api::response::Stream>> {
    require_scope(&claims, scope::STREAMS_READ)?;
    let row = StreamsService::get(state.db.conn(), stream)
        .await?
        .ok_or_else(|| AppError::not_found(format!("stream {} not found", stream)))?;
    let producer = StreamsService::active_producer(state.db.conn(), stream).await?;
    let consumer_count = ConsumersService::count_active(state.db.conn(), stream).await?;
    Ok(Json(convert::stream(row, producer, consumer_count)))
}

async fn health(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(stream): Path<Uuid>,
) -> Result<Json<api::response::StreamHealth>> {
    require_scope(&claims, scope::STREAMS_READ)?;
    let row = StreamsService::get(state.db.conn(), stream)
        .await?
        .ok_or_else(|| AppError::not_found(format!("stream {} not found", stream)))?;

    let handle = state.streams.handle_for_stream(stream).await;
    let (is_live, snapshot) = match &handle {
        Some(handle) => {
            let status = handle.status.read().await;
            (status.state == StreamState::Live, status.health.clone())
        }
        None => (false, None),
    };

    let snapshot = snapshot.unwrap_or_default();
    Ok(Json(api::response::StreamHealth {
        is_healthy: is_live && snapshot.packets_received > 0,
        bitrate_kbps: snapshot.bitrate_kbps,
        fps: snapshot.fps,
        packet_loss: snapshot.packet_loss,
        jitter_ms: snapshot.jitter_ms,
        last_error: row.last_error,
    }))
}

/// Opaque router capabilities blob the client feeds to its SFU library.
async fn router_capabilities(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(stream): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    require_scope(&claims, scope::STREAMS_READ)?;
    let row = StreamsService::get(state.db.conn(), stream)
        .await?
        .ok_or_else(|| AppError::not_found(format!("stream {} not found", stream)))?;
    let capabilities = state
        .sfu
        .router_rtp_capabilities(&row.camera_id.to_string())
        .await
        .map_err(|e| AppError::SfuUnavailable(e.to_string()))?;
    Ok(Json(capabilities))
}

async fn consumers(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(stream): Path<Uuid>,
) -> Result<Json<api::response::ConsumerList>> {
    require_scope(&claims, scope::STREAMS_READ)?;
    StreamsService::get(state.db.conn(), stream)
        .await?
        .ok_or_else(|| AppError::not_found(format!("stream {} not found", stream)))?;
    let rows = ConsumersService::list_for_stream(state.db.conn(), stream).await?;
    let active_consumers = ConsumersService::count_active(state.db.conn(), stream).await?;
    Ok(Json(api::response::ConsumerList {
        consumers: rows.into_iter().map(convert::consumer).collect(),
        active_consumers,
    }))
}
