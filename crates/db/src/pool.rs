//! Postgres connection pool and migrations.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::DbError;

/// The pool behind [`crate::PgStore`].
pub type DbPool = PgPool;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect with at most `max_connections` open connections. Fails fast
/// when the database is unreachable.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, DbError> {
    let max_connections = max_connections.max(1);
    info!(max_connections, "connecting to postgres");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1.min(max_connections))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Apply the embedded `migrations/` directory; already-applied versions
/// are skipped.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    let migrator = sqlx::migrate!("../../migrations");
    info!(available = migrator.iter().count(), "applying flowforge schema migrations");
    migrator.run(pool).await?;
    Ok(())
}
