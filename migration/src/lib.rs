pub use sea_orm_migration::prelude::*;

mod m20250601_000001_create_api_keys_table;
mod m20250601_000002_create_provider_accounts_table;
mod m20250601_000003_create_sessions_tables;
mod m20250601_000004_create_sticky_sessions_table;
mod m20250601_000005_create_concurrency_leases_table;
mod m20250601_000006_create_usage_stats_table;
mod m20250601_000007_create_cost_stats_table;
mod m20250601_000008_create_usage_records_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250601_000001_create_api_keys_table::Migration),
            Box::new(m20250601_000002_create_provider_accounts_table::Migration),
            Box::new(m20250601_000003_create_sessions_tables::Migration),
            Box::new(m20250601_000004_create_sticky_sessions_table::Migration),
            Box::new(m20250601_000005_create_concurrency_leases_table::Migration),
            Box::new(m20250601_000006_create_usage_stats_table::Migration),
            Box::new(m20250601_000007_create_cost_stats_table::Migration),
            Box::new(m20250601_000008_create_usage_records_table::Migration),
        ]
    }
}
