use axum::extract::{Path, State};
use axum::routing::{delete, post};
use axum::{Extension, Json, Router};
use http::StatusCode;
use uuid::Uuid;

use auth::claims::Claims;
use auth::scope;

use crate::error::AppError;
use crate::result::Result;
use crate::route::{require_scope, AppState};

pub fn route() -> Router<AppState> {
    Router::new()
        .route(&api::path::consume("{stream}"), post(attach))
        .route(
            &api::path::consumer_connect("{stream}", "{consumer}"),
            post(connect),
        )
        .route(
            &api::path::consumer("{stream}", "{consumer}"),
            delete(detach),
        )
}

async fn attach(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(stream): Path<Uuid>,
    Json(req): Json<api::request::AttachConsumer>,
) -> Result<(StatusCode, Json<api::response::ConsumerAttach>)> {
    require_scope(&claims, scope::STREAMS_CONSUME)?;
    if req.client_id.trim().is_empty() {
        return Err(AppError::validation("client_id must not be empty"));
    }
    let attach = state
        .consumers
        .attach(stream, &req.client_id, req.rtp_capabilities)
        .await?;
    Ok((StatusCode::CREATED, Json(attach)))
}

async fn connect(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((_stream, consumer)): Path<(Uuid, Uuid)>,
    Json(req): Json<api::request::ConnectConsumer>,
) -> Result<Json<serde_json::Value>> {
    require_scope(&claims, scope::STREAMS_CONSUME)?;
    state.consumers.connect(consumer, req.dtls_parameters).await?;
    Ok(Json(serde_json::json!({ "connected": true })))
}

async fn detach(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((_stream, consumer)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode> {
    require_scope(&claims, scope::STREAMS_CONSUME)?;
    state.consumers.detach(consumer).await?;
    Ok(StatusCode::NO_CONTENT)
}
