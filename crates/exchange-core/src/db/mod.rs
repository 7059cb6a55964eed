//! Database access layer for PostgreSQL.

pub mod settlements;

pub use settlements::{InMemoryResultsSink, PersistOutcome, ResultsSink, SettlementRepository};

use crate::config::DatabaseConfig;
use crate::Result;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Schema migrations embedded at build time.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Create a PostgreSQL connection pool.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR.run(pool).await?;
    Ok(())
}
