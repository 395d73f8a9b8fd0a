use anyhow::Result;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::db::entity::consumers::{self, Entity as Consumers};

pub const STATE_PENDING: &str = "PENDING";
pub const STATE_CONNECTED: &str = "CONNECTED";
pub const STATE_CLOSED: &str = "CLOSED";

pub struct ConsumersService;

impl ConsumersService {
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        db: &DatabaseConnection,
        id: Uuid,
        stream_id: Uuid,
        client_id: &str,
        transport_ref: &str,
        sfu_consumer_id: &str,
    ) -> Result<consumers::Model> {
        let now = Utc::now();
        let model = consumers::ActiveModel {
            id: Set(id),
            stream_id: Set(stream_id),
            client_id: Set(client_id.to_string()),
            state: Set(STATE_PENDING.to_string()),
            transport_ref: Set(transport_ref.to_string()),
            sfu_consumer_id: Set(sfu_consumer_id.to_string()),
            created_at: Set(now.into()),
            last_seen_at: Set(now.into()),
            closed_at: Set(None),
            close_reason: Set(None),
        };
        Ok(model.insert(db).await?)
    }

    pub async fn get(db: &DatabaseConnection, id: Uuid) -> Result<Option<consumers::Model>> {
        Ok(Consumers::find_by_id(id).one(db).await?)
    }

    pub async fn list_for_stream(
        db: &DatabaseConnection,
        stream_id: Uuid,
    ) -> Result<Vec<consumers::Model>> {
        Ok(Consumers::find()
            .filter(consumers::Column::StreamId.eq(stream_id))
            .order_by_asc(consumers::Column::CreatedAt)
            .all(db)
            .await?)
    }

    pub async fn count_active(db: &DatabaseConnection, stream_id: Uuid) -> Result<u64> {
        Ok(Consumers::find()
            .filter(consumers::Column::StreamId.eq(stream_id))
            .filter(consumers::Column::State.eq(STATE_CONNECTED))
            .count(db)
            .await?)
    }

    pub async fn mark_connected(db: &DatabaseConnection, id: Uuid) -> Result<()> {
        let model = consumers::ActiveModel {
            id: Set(id),
            state: Set(STATE_CONNECTED.to_string()),
            last_seen_at: Set(Utc::now().into()),
            ..Default::default()
        };
        model.update(db).await?;
        Ok(())
    }

    pub async fn mark_closed(db: &DatabaseConnection, id: Uuid, reason: &str) -> Result<()> {
        let model = consumers::ActiveModel {
            id: Set(id),
            state: Set(STATE_CLOSED.to_string()),
            closed_at: Set(Some(Utc::now().into())),
            close_reason: Set(Some(reason.to_string())),
            ..Default::default()
        };
        model.update(db).await?;
        Ok(())
    }

    /// Open (non-closed) consumer of this client on this stream, if any.
    pub async fn find_open_for_client(
        db: &DatabaseConnection,
        stream_id: Uuid,
        client_id: &str,
    ) -> Result<Option<consumers::Model>> {
        Ok(Consumers::find()
            .filter(consumers::Column::StreamId.eq(stream_id))
            .filter(consumers::Column::ClientId.eq(client_id))
            .filter(consumers::Column::State.ne(STATE_CLOSED))
            .one(db)
            .await?)
    }

    pub async fn list_pending_older_than(
        db: &DatabaseConnection,
        cutoff: chrono::DateTime<Utc>,
    ) -> Result<Vec<consumers::Model>> {
        Ok(Consumers::find()
            .filter(consumers::Column::State.eq(STATE_PENDING))
            .filter(consumers::Column::CreatedAt.lt(cutoff))
            .all(db)
            .await?)
    }

    pub async fn close_all_for_stream(
        db: &DatabaseConnection,
        stream_id: Uuid,
        reason: &str,
    ) -> Result<u64> {
        let rows = Consumers::update_many()
            .col_expr(
                consumers::Column::State,
                sea_orm::sea_query::Expr::value(STATE_CLOSED),
            )
            .col_expr(
                consumers::Column::ClosedAt,
                sea_orm::sea_query::Expr::value(Utc::now()),
            )
            .col_expr(
                consumers::Column::CloseReason,
                sea_orm::sea_query::Expr::value(reason),
            )
            .filter(consumers::Column::StreamId.eq(stream_id))
            .filter(consumers::Column::State.ne(STATE_CLOSED))
            .exec(db)
            .await?;
        Ok(rows.rows_affected)
    }
}
