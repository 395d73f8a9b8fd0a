use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use http::StatusCode;
use tracing::info;
use uuid::Uuid;

use auth::claims::Claims;
use auth::scope;

use crate::convert;
use crate::db::service::devices::DevicesService;
use crate::error::AppError;
use crate::result::Result;
use crate::route::{require_scope, AppState};

pub fn route() -> Router<AppState> {
    Router::new()
        .route(&api::path::devices(""), get(index).post(create))
        .route(
            &api::path::devices("{device}"),
            get(show).put(update).delete(destroy),
        )
        .route(&api::path::start_stream("{device}"), post(start_stream))
        .route(&api::path::stop_stream("{device}"), post(stop_stream))
}

async fn index(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<api::response::Device>>> {
    require_scope(&claims, scope::STREAMS_READ)?;
    let rows = DevicesService::list(state.db.conn()).await?;
    let mut devices = Vec::with_capacity(rows.len());
    for row in rows {
        let is_active = DevicesService::is_active(state.db.conn(), row.id).await?;
        devices.push(convert::device(row, is_active));
    }
    Ok(Json(devices))
}

async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<api::request::CreateDevice>,
) -> Result<(StatusCode, Json<api::response::Device>)> {
    require_scope(&claims, scope::STREAMS_WRITE)?;
    if req.name.trim().is_empty() {
        return Err(AppError::validation("device name must not be empty"));
    }
    if !req.rtsp_url.starts_with("rtsp://") && !req.rtsp_url.starts_with("rtsps://") {
        return Err(AppError::validation("rtsp_url must be an rtsp:// url"));
    }
    let row = DevicesService::create(state.db.conn(), &req.name, &req.rtsp_url, req.location)
        .await?;
    info!("device {} created ({})", row.id, row.name);
    Ok((StatusCode::CREATED, Json(convert::device(row, false))))
}

async fn show(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(device): Path<Uuid>,
) -> Result<Json<api::response::Device>> {
    require_scope(&claims, scope::STREAMS_READ)?;
    let row = DevicesService::get(state.db.conn(), device)
        .await?
        .ok_or_else(|| AppError::not_found(format!("device {} not found", device)))?;
    let is_active = DevicesService::is_active(state.db.conn(), device).await?;
    Ok(Json(convert::device(row, is_active)))
}

async fn update(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(device): Path<Uuid>,
    Json(req): Json<api::request::UpdateDevice>,
) -> Result<Json<api::response::Device>> {
    require_scope(&claims, scope::STREAMS_WRITE)?;
    if let Some(url) = &req.rtsp_url {
        if !url.starts_with("rtsp://") && !url.starts_with("rtsps://") {
            return Err(AppError::validation("rtsp_url must be an rtsp:// url"));
        }
    }
    let row = DevicesService::update(state.db.conn(), device, req.name, req.rtsp_url, req.location)
        .await?
        .ok_or_else(|| AppError::not_found(format!("device {} not found", device)))?;
    let is_active = DevicesService::is_active(state.db.conn(), device).await?;
    Ok(Json(convert::device(row, is_active)))
}

/// Deleting a device cascades: its streams are stopped first.
async fn destroy(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(device): Path<Uuid>,
) -> Result<StatusCode> {
    require_scope(&claims, scope::STREAMS_WRITE)?;
    state.streams.stop_stream(device).await?;
    if DevicesService::delete(state.db.conn(), device).await? {
        info!("device {} deleted", device);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("device {} not found", device)))
    }
}

async fn start_stream(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(device): Path<Uuid>,
) -> Result<Json<api::response::StartStream>> {
    require_scope(&claims, scope::STREAMS_WRITE)?;
    Ok(Json(state.streams.start_stream(device).await?))
}

async fn stop_stream(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(device): Path<Uuid>,
) -> Result<Json<api::response::StopStream>> {
    require_scope(&claims, scope::STREAMS_WRITE)?;
    state.streams.stop_stream(device).await?;
    Ok(Json(api::response::StopStream { stopped: true }))
}
