use sea_orm_migration::prelude::*;

mod m20250401_000001_create_device_stream_tables;
mod m20250401_000002_create_media_tables;
mod m20250401_000003_create_auth_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250401_000001_create_device_stream_tables::Migration),
            Box::new(m20250401_000002_create_media_tables::Migration),
            Box::new(m20250401_000003_create_auth_tables::Migration),
        ]
    }
}
