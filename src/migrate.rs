use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the cache database and its schema. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::open_cache_pool(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // created_at is unix milliseconds
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classifications (
            fingerprint TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            confidence REAL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_classifications_created_at ON classifications(created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
