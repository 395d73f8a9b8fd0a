use anyhow::Result;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::db::entity::devices::{self, Entity as Devices};
use crate::db::entity::streams::{self, Entity as Streams};
use crate::stream::state::StreamState;

pub struct DevicesService;

impl DevicesService {
    pub async fn create(
        db: &DatabaseConnection,
        name: &str,
        rtsp_url: &str,
        location: Option<String>,
    ) -> Result<devices::Model> {
        let model = devices::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            rtsp_url: Set(rtsp_url.to_string()),
            location: Set(location),
            created_at: Set(Utc::now().into()),
        };
        Ok(model.insert(db).await?)
    }

    pub async fn get(db: &DatabaseConnection, id: Uuid) -> Result<Option<devices::Model>> {
        Ok(Devices::find_by_id(id).one(db).await?)
    }

    pub async fn list(db: &DatabaseConnection) -> Result<Vec<devices::Model>> {
        Ok(Devices::find()
            .order_by_asc(devices::Column::CreatedAt)
            .all(db)
            .await?)
    }

    pub async fn update(
        db: &DatabaseConnection,
        id: Uuid,
        name: Option<String>,
        rtsp_url: Option<String>,
        location: Option<String>,
    ) -> Result<Option<devices::Model>> {
        let Some(existing) = Devices::find_by_id(id).one(db).await? else {
            return Ok(None);
        };
        let mut model: devices::ActiveModel = existing.into();
        if let Some(name) = name {
            model.name = Set(name);
        }
        if let Some(rtsp_url) = rtsp_url {
            model.rtsp_url = Set(rtsp_url);
        }
        if location.is_some() {
            model.location = Set(location);
        }
        Ok(Some(model.update(db).await?))
    }

    pub async fn delete(db: &DatabaseConnection, id: Uuid) -> Result<bool> {
        let res = Devices::delete_by_id(id).exec(db).await?;
        Ok(res.rows_affected > 0)
    }

    /// A device is active while any of its streams is LIVE.
    pub async fn is_active(db: &DatabaseConnection, id: Uuid) -> Result<bool> {
        let live = Streams::find()
            .filter(streams::Column::CameraId.eq(id))
            .filter(streams::Column::State.eq(StreamState::Live.to_string()))
            .one(db)
            .await?;
        Ok(live.is_some())
    }
}
