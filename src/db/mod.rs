use sqlx::migrate::MigrateError;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

pub mod events;
pub mod queries;
pub mod results;

/// A worker holds at most one job, plus the health check and event writes.
const MAX_CONNECTIONS: u32 = 5;

/// Connect the pool shared by the job store, event sink and result store.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect(database_url)
        .await
}

/// Apply the job table, event log and result table migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    let migrator = sqlx::migrate!("./migrations");
    tracing::info!(migrations = migrator.iter().count(), "Applying database migrations");
    migrator.run(pool).await
}
