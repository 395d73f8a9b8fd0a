use anyhow::Result;
use api::{JobStatus, Source};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use uuid::Uuid;

use crate::db::entity::snapshots::{self, Entity as Snapshots};

pub struct SnapshotsService;

impl SnapshotsService {
    pub async fn create_processing(
        db: &DatabaseConnection,
        stream_id: Uuid,
        timestamp: DateTime<Utc>,
        source: Source,
        metadata: serde_json::Value,
    ) -> Result<snapshots::Model> {
        let model = snapshots::ActiveModel {
            id: Set(Uuid::new_v4()),
            stream_id: Set(stream_id),
            timestamp: Set(timestamp.into()),
            source: Set(source.to_string()),
            status: Set(JobStatus::Processing.to_string()),
            image_path: Set(None),
            error: Set(None),
            metadata: Set(metadata),
            created_at: Set(Utc::now().into()),
        };
        Ok(model.insert(db).await?)
    }

    pub async fn get(db: &DatabaseConnection, id: Uuid) -> Result<Option<snapshots::Model>> {
        Ok(Snapshots::find_by_id(id).one(db).await?)
    }

    pub async fn list(
        db: &DatabaseConnection,
        stream_id: Option<Uuid>,
        status: Option<String>,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<snapshots::Model>, u64)> {
        let mut find = Snapshots::find();
        if let Some(stream_id) = stream_id {
            find = find.filter(snapshots::Column::StreamId.eq(stream_id));
        }
        if let Some(status) = status {
            find = find.filter(snapshots::Column::Status.eq(status));
        }
        let total = find.clone().count(db).await?;
        let rows = find
            .order_by_desc(snapshots::Column::CreatedAt)
            .limit(limit)
            .offset(offset)
            .all(db)
            .await?;
        Ok((rows, total))
    }

    /// PROCESSING -> READY; never overwrites a finished record.
    pub async fn mark_ready(db: &DatabaseConnection, id: Uuid, image_path: &str) -> Result<bool> {
        let rows = Snapshots::update_many()
            .col_expr(
                snapshots::Column::Status,
                sea_orm::sea_query::Expr::value(JobStatus::Ready.to_string()),
            )
            .col_expr(
                snapshots::Column::ImagePath,
                sea_orm::sea_query::Expr::value(image_path),
            )
            .filter(snapshots::Column::Id.eq(id))
            .filter(snapshots::Column::Status.eq(JobStatus::Processing.to_string()))
            .exec(db)
            .await?;
        Ok(rows.rows_affected > 0)
    }

    /// PROCESSING -> FAILED; never overwrites a finished record.
    pub async fn mark_failed(db: &DatabaseConnection, id: Uuid, error: &str) -> Result<bool> {
        let rows = Snapshots::update_many()
            .col_expr(
                snapshots::Column::Status,
                sea_orm::sea_query::Expr::value(JobStatus::Failed.to_string()),
            )
            .col_expr(
                snapshots::Column::Error,
                sea_orm::sea_query::Expr::value(error),
            )
            .filter(snapshots::Column::Id.eq(id))
            .filter(snapshots::Column::Status.eq(JobStatus::Processing.to_string()))
            .exec(db)
            .await?;
        Ok(rows.rows_affected > 0)
    }

    pub async fn delete(db: &DatabaseConnection, id: Uuid) -> Result<bool> {
        let res = Snapshots::delete_by_id(id).exec(db).await?;
        Ok(res.rows_affected > 0)
    }
}
