use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "streams")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub camera_id: Uuid,
    pub state: String,
    pub codec_config: Json,
    pub producer_ref: Option<String>,
    pub assigned_port: Option<i32>,
    /// SSRC is u32 on the wire; widened for storage.
    pub captured_ssrc: Option<i64>,
    pub last_error: Option<String>,
    pub restart_attempts: i32,
    pub started_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::devices::Entity",
        from = "Column::CameraId",
        to = "super::devices::Column::Id"
    )]
    Device,
    #[sea_orm(has_many = "super::consumers::Entity")]
    Consumers,
    #[sea_orm(has_many = "super::producers::Entity")]
    Producers,
}

impl Related<super::devices::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Device.def()
    }
}

impl Related<super::consumers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Consumers.def()
    }
}

impl Related<super::producers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Producers.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
