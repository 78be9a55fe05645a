use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

pub mod queries;

/// Connect to PostgreSQL. Every in-flight image unit appends its own record,
/// so `max_connections` bounds concurrent appends across all running jobs.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await?;

    tracing::debug!(max_connections, "PostgreSQL pool ready");
    Ok(pool)
}

/// Apply the `batch_jobs` / `image_results` schema
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}
