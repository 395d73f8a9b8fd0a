use anyhow::Result;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use uuid::Uuid;

use crate::db::entity::producers::{self, Entity as Producers};
use crate::db::entity::streams::{self, Entity as Streams};
use crate::stream::state::StreamState;

pub struct StreamQuery {
    pub state: Option<StreamState>,
    pub camera_id: Option<Uuid>,
    pub limit: u64,
    pub offset: u64,
}

pub struct StreamsService;

impl StreamsService {
    pub async fn create(
        db: &DatabaseConnection,
        camera_id: Uuid,
        codec_config: serde_json::Value,
    ) -> Result<streams::Model> {
        let now = Utc::now();
        let model = streams::ActiveModel {
            id: Set(Uuid::new_v4()),
            camera_id: Set(camera_id),
            state: Set(StreamState::Initializing.to_string()),
            codec_config: Set(codec_config),
            producer_ref: Set(None),
            assigned_port: Set(None),
            captured_ssrc: Set(None),
            last_error: Set(None),
            restart_attempts: Set(0),
            started_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        Ok(model.insert(db).await?)
    }

    pub async fn get(db: &DatabaseConnection, id: Uuid) -> Result<Option<streams::Model>> {
        Ok(Streams::find_by_id(id).one(db).await?)
    }

    pub async fn list(
        db: &DatabaseConnection,
        query: StreamQuery,
    ) -> Result<(Vec<streams::Model>, u64)> {
        let mut find = Streams::find();
        if let Some(state) = query.state {
            find = find.filter(streams::Column::State.eq(state.to_string()));
        }
        if let Some(camera_id) = query.camera_id {
            find = find.filter(streams::Column::CameraId.eq(camera_id));
        }

        let total = find.clone().count(db).await?;
        let rows = find
            .order_by_desc(streams::Column::CreatedAt)
            .limit(query.limit)
            .offset(query.offset)
            .all(db)
            .await?;
        Ok((rows, total))
    }

    /// The single activation of a device that currently blocks another start.
    pub async fn find_non_terminal_for_device(
        db: &DatabaseConnection,
        camera_id: Uuid,
    ) -> Result<Option<streams::Model>> {
        let candidates = Streams::find()
            .filter(streams::Column::CameraId.eq(camera_id))
            .filter(streams::Column::State.is_in([
                StreamState::Initializing.to_string(),
                StreamState::Ready.to_string(),
                StreamState::Live.to_string(),
                StreamState::Error.to_string(),
            ]))
            .order_by_desc(streams::Column::CreatedAt)
            .all(db)
            .await?;
        Ok(candidates.into_iter().next())
    }

    pub async fn set_state(
        db: &DatabaseConnection,
        id: Uuid,
        state: StreamState,
        last_error: Option<String>,
    ) -> Result<()> {
        let mut model = streams::ActiveModel {
            id: Set(id),
            state: Set(state.to_string()),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        if last_error.is_some() {
            model.last_error = Set(last_error);
        }
        if state == StreamState::Live {
            model.started_at = Set(Some(Utc::now().into()));
        }
        model.update(db).await?;
        Ok(())
    }

    pub async fn record_setup(
        db: &DatabaseConnection,
        id: Uuid,
        assigned_port: Option<u16>,
        captured_ssrc: Option<u32>,
        producer_ref: Option<String>,
    ) -> Result<()> {
        let model = streams::ActiveModel {
            id: Set(id),
            assigned_port: Set(assigned_port.map(|p| p as i32)),
            captured_ssrc: Set(captured_ssrc.map(|s| s as i64)),
            producer_ref: Set(producer_ref),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        model.update(db).await?;
        Ok(())
    }

    pub async fn set_restart_attempts(
        db: &DatabaseConnection,
        id: Uuid,
        attempts: u32,
    ) -> Result<()> {
        let model = streams::ActiveModel {
            id: Set(id),
            restart_attempts: Set(attempts as i32),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        model.update(db).await?;
        Ok(())
    }

    /// Crash recovery: rows left non-terminal by a previous process are dead.
    pub async fn stop_all_non_terminal(
        db: &DatabaseConnection,
        last_error: &str,
    ) -> Result<u64> {
        let rows = Streams::update_many()
            .col_expr(
                streams::Column::State,
                sea_orm::sea_query::Expr::value(StreamState::Stopped.to_string()),
            )
            .col_expr(
                streams::Column::LastError,
                sea_orm::sea_query::Expr::value(last_error),
            )
            .filter(streams::Column::State.is_in([
                StreamState::Initializing.to_string(),
                StreamState::Ready.to_string(),
                StreamState::Live.to_string(),
                StreamState::Error.to_string(),
            ]))
            .exec(db)
            .await?;
        Ok(rows.rows_affected)
    }

    pub async fn stop_non_terminal_for_device(
        db: &DatabaseConnection,
        camera_id: Uuid,
    ) -> Result<u64> {
        let rows = Streams::update_many()
            .col_expr(
                streams::Column::State,
                sea_orm::sea_query::Expr::value(StreamState::Stopped.to_string()),
            )
            .filter(streams::Column::CameraId.eq(camera_id))
            .filter(streams::Column::State.is_in([
                StreamState::Initializing.to_string(),
                StreamState::Ready.to_string(),
                StreamState::Live.to_string(),
                StreamState::Error.to_string(),
            ]))
            .exec(db)
            .await?;
        Ok(rows.rows_affected)
    }

    /// STOPPED streams older than the TTL age out to CLOSED.
    pub async fn close_stopped_older_than(
        db: &DatabaseConnection,
        cutoff: chrono::DateTime<Utc>,
    ) -> Result<u64> {
        let rows = Streams::update_many()
            .col_expr(
                streams::Column::State,
                sea_orm::sea_query::Expr::value(StreamState::Closed.to_string()),
            )
            .filter(streams::Column::State.eq(StreamState::Stopped.to_string()))
            .filter(streams::Column::UpdatedAt.lt(cutoff))
            .exec(db)
            .await?;
        Ok(rows.rows_affected)
    }

    pub async fn create_producer(
        db: &DatabaseConnection,
        stream_id: Uuid,
        sfu_id: &str,
        ssrc: u32,
    ) -> Result<producers::Model> {
        let model = producers::ActiveModel {
            id: Set(Uuid::new_v4()),
            stream_id: Set(stream_id),
            sfu_id: Set(sfu_id.to_string()),
            ssrc: Set(ssrc as i64),
            state: Set("ACTIVE".to_string()),
            created_at: Set(Utc::now().into()),
        };
        Ok(model.insert(db).await?)
    }

    pub async fn active_producer(
        db: &DatabaseConnection,
        stream_id: Uuid,
    ) -> Result<Option<producers::Model>> {
        Ok(Producers::find()
            .filter(producers::Column::StreamId.eq(stream_id))
            .filter(producers::Column::State.eq("ACTIVE"))
            .one(db)
            .await?)
    }

    pub async fn close_producers(db: &DatabaseConnection, stream_id: Uuid) -> Result<()> {
        Producers::update_many()
            .col_expr(
                producers::Column::State,
                sea_orm::sea_query::Expr::value("CLOSED"),
            )
            .filter(producers::Column::StreamId.eq(stream_id))
            .exec(db)
            .await?;
        Ok(())
    }
}
