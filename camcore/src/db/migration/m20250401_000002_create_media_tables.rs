use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Snapshots::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Snapshots::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Snapshots::StreamId).uuid().not_null())
                    .col(
                        ColumnDef::new(Snapshots::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Snapshots::Source).string().not_null())
                    .col(ColumnDef::new(Snapshots::Status).string().not_null())
                    .col(ColumnDef::new(Snapshots::ImagePath).string())
                    .col(ColumnDef::new(Snapshots::Error).string())
                    .col(ColumnDef::new(Snapshots::Metadata).json().not_null())
                    .col(
                        ColumnDef::new(Snapshots::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .index(
                        Index::create()
                            .name("idx_snapshots_stream_created")
                            .col(Snapshots::StreamId)
                            .col(Snapshots::CreatedAt),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Bookmarks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Bookmarks::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Bookmarks::StreamId).uuid().not_null())
                    .col(
                        ColumnDef::new(Bookmarks::CenterTimestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Bookmarks::StartTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Bookmarks::EndTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Bookmarks::DurationSeconds)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Bookmarks::Source).string().not_null())
                    .col(ColumnDef::new(Bookmarks::Label).string())
                    .col(ColumnDef::new(Bookmarks::EventType).string())
                    .col(ColumnDef::new(Bookmarks::Confidence).double())
                    .col(ColumnDef::new(Bookmarks::Tags).json().not_null())
                    .col(ColumnDef::new(Bookmarks::Status).string().not_null())
                    .col(ColumnDef::new(Bookmarks::VideoPath).string())
                    .col(ColumnDef::new(Bookmarks::ThumbnailPath).string())
                    .col(ColumnDef::new(Bookmarks::Error).string())
                    .col(ColumnDef::new(Bookmarks::Metadata).json().not_null())
                    .col(
                        ColumnDef::new(Bookmarks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .index(
                        Index::create()
                            .name("idx_bookmarks_stream_center")
                            .col(Bookmarks::StreamId)
                            .col(Bookmarks::CenterTimestamp),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Bookmarks::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Snapshots::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Snapshots {
    Table,
    Id,
    StreamId,
    Timestamp,
    Source,
    Status,
    ImagePath,
    Error,
    Metadata,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Bookmarks {
    Table,
    Id,
    StreamId,
    CenterTimestamp,
    StartTime,
    EndTime,
    DurationSeconds,
    Source,
    Label,
    EventType,
    Confidence,
    Tags,
    Status,
    VideoPath,
    ThumbnailPath,
    Error,
    Metadata,
    CreatedAt,
}
