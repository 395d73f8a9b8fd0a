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
use crate::db::service::bookmarks::{BookmarksService, NewBookmark};
use crate::db::service::streams::StreamsService;
use crate::error::AppError;
use crate::extract::job::{BookmarkJob, ExtractionJob};
use crate::result::Result;
use crate::route::{page_limits, require_scope, AppState};

pub fn route() -> Router<AppState> {
    Router::new()
        .route(&api::path::stream_bookmarks("{stream}"), post(create))
        .route(&api::path::bookmarks(""), get(index))
        .route(
            &api::path::bookmarks("{bookmark}"),
            get(show).put(update).delete(destroy),
        )
        .route(&api::path::bookmark_video("{bookmark}"), get(video))
        .route(&api::path::bookmark_thumbnail("{bookmark}"), get(thumbnail))
}

async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(stream): Path<Uuid>,
    Json(req): Json<api::request::CreateBookmark>,
) -> Result<(StatusCode, Json<api::response::Bookmark>)> {
    require_scope(&claims, scope::BOOKMARKS_WRITE)?;

    let duration = req.before_seconds + req.after_seconds;
    if duration == 0 {
        return Err(AppError::validation(
            "before_seconds + after_seconds must be positive",
        ));
    }
    if let Some(confidence) = req.confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(AppError::validation("confidence must be within [0, 1]"));
        }
    }

    StreamsService::get(state.db.conn(), stream)
        .await?
        .ok_or_else(|| AppError::not_found(format!("stream {} not found", stream)))?;

    let center = match req.source {
        Source::Live => Utc::now(),
        Source::Historical => req.center_timestamp.ok_or_else(|| {
            AppError::validation("historical bookmarks require center_timestamp")
        })?,
    };
    let start_time = center - chrono::Duration::seconds(req.before_seconds as i64);
    let end_time = center + chrono::Duration::seconds(req.after_seconds as i64);

    let record = BookmarksService::create_processing(
        state.db.conn(),
        NewBookmark {
            stream_id: stream,
            center_timestamp: center,
            start_time,
            end_time,
            duration_seconds: duration,
            source: req.source,
            label: req.label,
            event_type: req.event_type,
            confidence: req.confidence,
            tags: req.tags,
            metadata: req.metadata.unwrap_or_else(|| serde_json::json!({})),
        },
    )
    .await?;

    state.extractor.enqueue(ExtractionJob::Bookmark(BookmarkJob {
        id: record.id,
        stream_id: stream,
        source: req.source,
        center,
        before_seconds: req.before_seconds,
        after_seconds: req.after_seconds,
    }))?;

    Ok((StatusCode::CREATED, Json(convert::bookmark(record))))
}

async fn index(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(req): Query<api::request::MediaQuery>,
) -> Result<Json<api::response::Page<api::response::Bookmark>>> {
    require_scope(&claims, scope::BOOKMARKS_READ)?;
    if let Some(status) = &req.status {
        JobStatus::from_str(status).map_err(AppError::Validation)?;
    }
    let (limit, offset) = page_limits(req.limit, req.offset);
    let (rows, total) =
        BookmarksService::list(state.db.conn(), req.stream_id, req.status, limit, offset).await?;
    Ok(Json(api::response::Page {
        items: rows.into_iter().map(convert::bookmark).collect(),
        pagination: api::response::Pagination { total, limit, offset },
    }))
}

async fn show(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(bookmark): Path<Uuid>,
) -> Result<Json<api::response::Bookmark>> {
    require_scope(&claims, scope::BOOKMARKS_READ)?;
    let row = BookmarksService::get(state.db.conn(), bookmark)
        .await?
        .ok_or_else(|| AppError::not_found(format!("bookmark {} not found", bookmark)))?;
    Ok(Json(convert::bookmark(row)))
}

async fn update(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(bookmark): Path<Uuid>,
    Json(req): Json<api::request::UpdateBookmark>,
) -> Result<Json<api::response::Bookmark>> {
    require_scope(&claims, scope::BOOKMARKS_WRITE)?;
    let row = BookmarksService::update_fields(
        state.db.conn(),
        bookmark,
        req.label,
        req.tags,
        req.event_type,
    )
    .await?
    .ok_or_else(|| AppError::not_found(format!("bookmark {} not found", bookmark)))?;
    Ok(Json(convert::bookmark(row)))
}

async fn binary_artifact(
    row: &crate::db::entity::bookmarks::Model,
    path: Option<&String>,
    content_type: &'static str,
) -> Result<Response> {
    match JobStatus::from_str(&row.status).unwrap_or(JobStatus::Failed) {
        JobStatus::Processing => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "processing" })),
        )
            .into_response()),
        JobStatus::Failed => Err(AppError::not_found(
            row.error.clone().unwrap_or_else(|| "bookmark failed".to_string()),
        )),
        JobStatus::Ready => {
            let path = path.ok_or_else(|| AppError::not_found("bookmark artifact is missing"))?;
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|_| AppError::not_found("bookmark artifact is missing"))?;
            Ok((StatusCode::OK, [(header::CONTENT_TYPE, content_type)], bytes).into_response())
        }
    }
}

async fn video(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(bookmark): Path<Uuid>,
) -> Result<Response> {
    require_scope(&claims, scope::BOOKMARKS_READ)?;
    let row = BookmarksService::get(state.db.conn(), bookmark)
        .await?
        .ok_or_else(|| AppError::not_found(format!("bookmark {} not found", bookmark)))?;
    binary_artifact(&row, row.video_path.as_ref(), "video/mp4").await
}

async fn thumbnail(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(bookmark): Path<Uuid>,
) -> Result<Response> {
    require_scope(&claims, scope::BOOKMARKS_READ)?;
    let row = BookmarksService::get(state.db.conn(), bookmark)
        .await?
        .ok_or_else(|| AppError::not_found(format!("bookmark {} not found", bookmark)))?;
    binary_artifact(&row, row.thumbnail_path.as_ref(), "image/jpeg").await
}

async fn destroy(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(bookmark): Path<Uuid>,
) -> Result<StatusCode> {
    require_scope(&claims, scope::BOOKMARKS_WRITE)?;
    let Some(row) = BookmarksService::get(state.db.conn(), bookmark).await? else {
        return Ok(StatusCode::NO_CONTENT);
    };
    if row.status == JobStatus::Processing.to_string() {
        state.extractor.cancel(bookmark);
    }
    for path in [row.video_path.as_ref(), row.thumbnail_path.as_ref()].into_iter().flatten() {
        let _ = tokio::fs::remove_file(path).await;
    }
    BookmarksService::delete(state.db.conn(), bookmark).await?;
    Ok(StatusCode::NO_CONTENT)
}
