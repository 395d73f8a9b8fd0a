use anyhow::Result;
use api::{JobStatus, Source};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use uuid::Uuid;

use crate::db::entity::bookmarks::{self, Entity as Bookmarks};

pub struct NewBookmark {
    pub stream_id: Uuid,
    pub center_timestamp: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: u32,
    pub source: Source,
    pub label: Option<String>,
    pub event_type: Option<String>,
    pub confidence: Option<f64>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
}

pub struct BookmarksService;

impl BookmarksService {
    pub async fn create_processing(
        db: &DatabaseConnection,
        new: NewBookmark,
    ) -> Result<bookmarks::Model> {
        let model = bookmarks::ActiveModel {
            id: Set(Uuid::new_v4()),
            stream_id: Set(new.stream_id),
            center_timestamp: Set(new.center_timestamp.into()),
            start_time: Set(new.start_time.into()),
            end_time: Set(new.end_time.into()),
            duration_seconds: Set(new.duration_seconds as i32),
            source: Set(new.source.to_string()),
            label: Set(new.label),
            event_type: Set(new.event_type),
            confidence: Set(new.confidence),
            tags: Set(serde_json::json!(new.tags)),
            status: Set(JobStatus::Processing.to_string()),
            video_path: Set(None),
            thumbnail_path: Set(None),
            error: Set(None),
            metadata: Set(new.metadata),
            created_at: Set(Utc::now().into()),
        };
        Ok(model.insert(db).await?)
    }

    pub async fn get(db: &DatabaseConnection, id: Uuid) -> Result<Option<bookmarks::Model>> {
        Ok(Bookmarks::find_by_id(id).one(db).await?)
    }

    pub async fn list(
        db: &DatabaseConnection,
        stream_id: Option<Uuid>,
        status: Option<String>,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<bookmarks::Model>, u64)> {
        let mut find = Bookmarks::find();
        if let Some(stream_id) = stream_id {
            find = find.filter(bookmarks::Column::StreamId.eq(stream_id));
        }
        if let Some(status) = status {
            find = find.filter(bookmarks::Column::Status.eq(status));
        }
        let total = find.clone().count(db).await?;
        let rows = find
            .order_by_desc(bookmarks::Column::CreatedAt)
            .limit(limit)
            .offset(offset)
            .all(db)
            .await?;
        Ok((rows, total))
    }

    pub async fn update_fields(
        db: &DatabaseConnection,
        id: Uuid,
        label: Option<String>,
        tags: Option<Vec<String>>,
        event_type: Option<String>,
    ) -> Result<Option<bookmarks::Model>> {
        let Some(existing) = Bookmarks::find_by_id(id).one(db).await? else {
            return Ok(None);
        };
        let mut model: bookmarks::ActiveModel = existing.into();
        if label.is_some() {
            model.label = Set(label);
        }
        if let Some(tags) = tags {
            model.tags = Set(serde_json::json!(tags));
        }
        if event_type.is_some() {
            model.event_type = Set(event_type);
        }
        Ok(Some(model.update(db).await?))
    }

    pub async fn mark_ready(
        db: &DatabaseConnection,
        id: Uuid,
        video_path: &str,
        thumbnail_path: Option<&str>,
    ) -> Result<bool> {
        let mut update = Bookmarks::update_many()
            .col_expr(
                bookmarks::Column::Status,
                sea_orm::sea_query::Expr::value(JobStatus::Ready.to_string()),
            )
            .col_expr(
                bookmarks::Column::VideoPath,
                sea_orm::sea_query::Expr::value(video_path),
            );
        if let Some(thumb) = thumbnail_path {
            update = update.col_expr(
                bookmarks::Column::ThumbnailPath,
                sea_orm::sea_query::Expr::value(thumb),
            );
        }
        let rows = update
            .filter(bookmarks::Column::Id.eq(id))
            .filter(bookmarks::Column::Status.eq(JobStatus::Processing.to_string()))
            .exec(db)
            .await?;
        Ok(rows.rows_affected > 0)
    }

    pub async fn mark_failed(db: &DatabaseConnection, id: Uuid, error: &str) -> Result<bool> {
        let rows = Bookmarks::update_many()
            .col_expr(
                bookmarks::Column::Status,
                sea_orm::sea_query::Expr::value(JobStatus::Failed.to_string()),
            )
            .col_expr(
                bookmarks::Column::Error,
                sea_orm::sea_query::Expr::value(error),
            )
            .filter(bookmarks::Column::Id.eq(id))
            .filter(bookmarks::Column::Status.eq(JobStatus::Processing.to_string()))
            .exec(db)
            .await?;
        Ok(rows.rows_affected > 0)
    }

    pub async fn delete(db: &DatabaseConnection, id: Uuid) -> Result<bool> {
        let res = Bookmarks::delete_by_id(id).exec(db).await?;
        Ok(res.rows_affected > 0)
    }
}
