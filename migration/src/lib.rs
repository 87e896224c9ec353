pub use sea_orm_migration::prelude::*;

mod m20250601_000001_create_users_table;
mod m20250601_000002_create_groups_table;
mod m20250601_000003_create_meetings_table;
mod m20250601_000004_create_photos_table;
mod m20250601_000005_create_jobs_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250601_000001_create_users_table::Migration),
            Box::new(m20250601_000002_create_groups_table::Migration),
            Box::new(m20250601_000003_create_meetings_table::Migration),
            Box::new(m20250601_000004_create_photos_table::Migration),
            Box::new(m20250601_000005_create_jobs_table::Migration),
        ]
    }
}
