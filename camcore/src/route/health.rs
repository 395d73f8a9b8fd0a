use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use http::StatusCode;
use sea_orm::ConnectionTrait;

use crate::route::AppState;

pub fn route() -> Router<AppState> {
    Router::new()
        .route(api::path::HEALTH_LIVE, get(live))
        .route(api::path::HEALTH_READY, get(ready))
}

async fn live() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn ready(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let db_ok = state
        .db
        .conn()
        .execute_unprepared("SELECT 1")
        .await
        .is_ok();
    let sfu_ok = state.sfu.is_connected();
    let status = if db_ok && sfu_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "database": db_ok,
            "sfu": sfu_ok,
        })),
    )
}
