use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Devices::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Devices::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Devices::Name).string().not_null())
                    .col(ColumnDef::new(Devices::RtspUrl).string().not_null())
                    .col(ColumnDef::new(Devices::Location).string())
                    .col(
                        ColumnDef::new(Devices::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Streams::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Streams::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Streams::CameraId).uuid().not_null())
                    .col(ColumnDef::new(Streams::State).string().not_null())
                    .col(ColumnDef::new(Streams::CodecConfig).json().not_null())
                    .col(ColumnDef::new(Streams::ProducerRef).string())
                    .col(ColumnDef::new(Streams::AssignedPort).integer())
                    .col(ColumnDef::new(Streams::CapturedSsrc).big_integer())
                    .col(ColumnDef::new(Streams::LastError).string())
                    .col(
                        ColumnDef::new(Streams::RestartAttempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Streams::StartedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Streams::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Streams::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_streams_camera_state")
                    .table(Streams::Table)
                    .col(Streams::CameraId)
                    .col(Streams::State)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Producers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Producers::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Producers::StreamId).uuid().not_null())
                    .col(ColumnDef::new(Producers::SfuId).string().not_null())
                    .col(ColumnDef::new(Producers::Ssrc).big_integer().not_null())
                    .col(ColumnDef::new(Producers::State).string().not_null())
                    .col(
                        ColumnDef::new(Producers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_producers_stream")
                    .table(Producers::Table)
                    .col(Producers::StreamId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Consumers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Consumers::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Consumers::StreamId).uuid().not_null())
                    .col(ColumnDef::new(Consumers::ClientId).string().not_null())
                    .col(ColumnDef::new(Consumers::State).string().not_null())
                    .col(ColumnDef::new(Consumers::TransportRef).string().not_null())
                    .col(
                        ColumnDef::new(Consumers::SfuConsumerId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Consumers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Consumers::LastSeenAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Consumers::ClosedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Consumers::CloseReason).string())
                    .index(
                        Index::create()
                            .name("idx_consumers_stream_state")
                            .col(Consumers::StreamId)
                            .col(Consumers::State),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Consumers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Producers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Streams::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Devices::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Devices {
    Table,
    Id,
    Name,
    RtspUrl,
    Location,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Streams {
    Table,
    Id,
    CameraId,
    State,
    CodecConfig,
    ProducerRef,
    AssignedPort,
    CapturedSsrc,
    LastError,
    RestartAttempts,
    StartedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Producers {
    Table,
    Id,
    StreamId,
    SfuId,
    Ssrc,
    State,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Consumers {
    Table,
    Id,
    StreamId,
    ClientId,
    State,
    TransportRef,
    SfuConsumerId,
    CreatedAt,
    LastSeenAt,
    ClosedAt,
    CloseReason,
}
