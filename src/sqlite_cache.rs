//! SQLite-backed [`ResultCache`].
//!
//! Durable variant of the result cache: entries survive restarts and can be
//! shared by several processes pointing at the same file. Atomicity of
//! [`store_if_absent`](ResultCache::store_if_absent) comes from the primary
//! key on `fingerprint` plus `INSERT ... ON CONFLICT DO NOTHING` inside a
//! transaction.
//!
//! Every `sqlx` failure is reported as [`CacheError::Unavailable`], which the
//! intake service treats as a forced miss.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use scan_intake_core::cache::{CacheError, CachePolicy, ResultCache};
use scan_intake_core::models::{ClassificationResult, Fingerprint};

use crate::config::Config;
use crate::{db, migrate};

/// SQLite implementation of the [`ResultCache`] trait.
pub struct SqliteResultCache {
    pool: SqlitePool,
    policy: CachePolicy,
}

impl SqliteResultCache {
    pub fn new(pool: SqlitePool, policy: CachePolicy) -> Self {
        Self { pool, policy }
    }

    /// Connect to `[cache].path`, creating the schema if needed.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::open_cache_pool(config).await?;
        migrate::create_schema(&pool).await?;
        Ok(Self::new(pool, config.cache.policy()))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Rows with `created_at <= cutoff` are expired.
    fn cutoff_ms(&self, now_ms: i64) -> Option<i64> {
        self.policy
            .ttl
            .map(|ttl| {
                let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
                now_ms.saturating_sub(ttl_ms)
            })
    }
}

fn unavailable(e: sqlx::Error) -> CacheError {
    CacheError::Unavailable(e.to_string())
}

fn row_to_result(row: &SqliteRow) -> Result<ClassificationResult, CacheError> {
    let label: String = row.try_get("label").map_err(unavailable)?;
    let confidence: Option<f64> = row.try_get("confidence").map_err(unavailable)?;
    Ok(ClassificationResult {
        label,
        confidence: confidence.map(|c| c as f32),
    })
}

#[async_trait]
impl ResultCache for SqliteResultCache {
    fn backend(&self) -> &str {
        "sqlite"
    }

    async fn lookup(&self, fp: &Fingerprint) -> Result<Option<ClassificationResult>, CacheError> {
        let row = sqlx::query(
            "SELECT label, confidence, created_at FROM classifications WHERE fingerprint = ?",
        )
        .bind(fp.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let created_at: i64 = row.try_get("created_at").map_err(unavailable)?;
        if let Some(cutoff) = self.cutoff_ms(Utc::now().timestamp_millis()) {
            if created_at <= cutoff {
                return Ok(None);
            }
        }

        row_to_result(&row).map(Some)
    }

    async fn store_if_absent(
        &self,
        fp: &Fingerprint,
        result: ClassificationResult,
    ) -> Result<ClassificationResult, CacheError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        // An expired row no longer blocks the insert.
        if let Some(cutoff) = self.cutoff_ms(now_ms) {
            sqlx::query("DELETE FROM classifications WHERE fingerprint = ? AND created_at <= ?")
                .bind(fp.as_str())
                .bind(cutoff)
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;
        }

        sqlx::query(
            r#"
            INSERT INTO classifications (fingerprint, label, confidence, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO NOTHING
            "#,
        )
        .bind(fp.as_str())
        .bind(&result.label)
        .bind(result.confidence.map(f64::from))
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;

        let row = sqlx::query("SELECT label, confidence FROM classifications WHERE fingerprint = ?")
            .bind(fp.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(unavailable)?;
        let canonical = row_to_result(&row)?;

        if let Some(max) = self.policy.max_entries {
            sqlx::query(
                r#"
                DELETE FROM classifications WHERE fingerprint IN (
                    SELECT fingerprint FROM classifications
                    ORDER BY created_at DESC, rowid DESC
                    LIMIT -1 OFFSET ?
                )
                "#,
            )
            .bind(max as i64)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }

        tx.commit().await.map_err(unavailable)?;
        Ok(canonical)
    }

    async fn entry_count(&self) -> Result<usize, CacheError> {
        let cutoff = self
            .cutoff_ms(Utc::now().timestamp_millis())
            .unwrap_or(i64::MIN);
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM classifications WHERE created_at > ?")
                .bind(cutoff)
                .fetch_one(&self.pool)
                .await
                .map_err(unavailable)?;
        Ok(count as usize)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM classifications")
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(tmp: &TempDir, extra: &str) -> Config {
        let content = format!(
            "[cache]\nbackend = \"sqlite\"\npath = \"{}\"\n{}",
            tmp.path().join("cache.sqlite").display(),
            extra
        );
        crate::config::parse_config(&content).unwrap()
    }

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::from_raw(s)
    }

    #[tokio::test]
    async fn test_miss_store_hit() {
        let tmp = TempDir::new().unwrap();
        let cache = SqliteResultCache::open(&test_config(&tmp, "")).await.unwrap();

        assert_eq!(cache.lookup(&fp("a")).await.unwrap(), None);
        let stored = cache
            .store_if_absent(&fp("a"), ClassificationResult::new("Pneumonia").with_confidence(0.5))
            .await
            .unwrap();
        assert_eq!(stored.label, "Pneumonia");

        let hit = cache.lookup(&fp("a")).await.unwrap().unwrap();
        assert_eq!(hit.label, "Pneumonia");
        assert_eq!(hit.confidence, Some(0.5));
        assert_eq!(cache.backend(), "sqlite");
    }

    #[tokio::test]
    async fn test_first_writer_wins_and_persists() {
        let tmp = TempDir::new().unwrap();
        let cfg = test_config(&tmp, "");
        {
            let cache = SqliteResultCache::open(&cfg).await.unwrap();
            cache
                .store_if_absent(&fp("a"), ClassificationResult::new("Pneumonia"))
                .await
                .unwrap();
            let second = cache
                .store_if_absent(&fp("a"), ClassificationResult::new("No Pneumonia"))
                .await
                .unwrap();
            assert_eq!(second.label, "Pneumonia");
            cache.pool().close().await;
        }

        let reopened = SqliteResultCache::open(&cfg).await.unwrap();
        assert_eq!(
            reopened.lookup(&fp("a")).await.unwrap().unwrap().label,
            "Pneumonia"
        );
        assert_eq!(reopened.entry_count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_store_single_entry() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(SqliteResultCache::open(&test_config(&tmp, "")).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .store_if_absent(&fp("same"), ClassificationResult::new(format!("label-{}", i)))
                    .await
                    .unwrap()
            }));
        }
        let mut observed = Vec::new();
        for h in handles {
            observed.push(h.await.unwrap());
        }

        assert_eq!(cache.entry_count().await.unwrap(), 1);
        let stored = cache.lookup(&fp("same")).await.unwrap().unwrap();
        assert!(observed.iter().all(|r| *r == stored));
    }

    #[tokio::test]
    async fn test_max_entries() {
        let tmp = TempDir::new().unwrap();
        let cache = SqliteResultCache::open(&test_config(&tmp, "max_entries = 2"))
            .await
            .unwrap();
        for key in ["a", "b", "c"] {
            cache
                .store_if_absent(&fp(key), ClassificationResult::new(key))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cache.entry_count().await.unwrap(), 2);
        assert_eq!(cache.lookup(&fp("a")).await.unwrap(), None);
        assert!(cache.lookup(&fp("c")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ttl() {
        let tmp = TempDir::new().unwrap();
        let pool = db::open_cache_pool(&test_config(&tmp, "")).await.unwrap();
        migrate::create_schema(&pool).await.unwrap();
        let cache = SqliteResultCache::new(
            pool,
            CachePolicy::unbounded().with_ttl(Duration::from_millis(50)),
        );

        cache
            .store_if_absent(&fp("a"), ClassificationResult::new("Pneumonia"))
            .await
            .unwrap();
        assert!(cache.lookup(&fp("a")).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.lookup(&fp("a")).await.unwrap(), None);
        assert_eq!(cache.entry_count().await.unwrap(), 0);

        let replaced = cache
            .store_if_absent(&fp("a"), ClassificationResult::new("No Pneumonia"))
            .await
            .unwrap();
        assert_eq!(replaced.label, "No Pneumonia");
    }

    #[tokio::test]
    async fn test_huge_ttl_never_expires() {
        let tmp = TempDir::new().unwrap();
        let cache = SqliteResultCache::open(&test_config(&tmp, "ttl_secs = 9300000000000000"))
            .await
            .unwrap();

        cache
            .store_if_absent(&fp("a"), ClassificationResult::new("Pneumonia"))
            .await
            .unwrap();
        assert_eq!(
            cache.lookup(&fp("a")).await.unwrap(),
            Some(ClassificationResult::new("Pneumonia"))
        );
        assert_eq!(cache.entry_count().await.unwrap(), 1);

        let second = cache
            .store_if_absent(&fp("a"), ClassificationResult::new("No Pneumonia"))
            .await
            .unwrap();
        assert_eq!(second.label, "Pneumonia");
    }

    #[tokio::test]
    async fn test_closed_pool_is_unavailable() {
        let tmp = TempDir::new().unwrap();
        let cache = SqliteResultCache::open(&test_config(&tmp, "")).await.unwrap();
        cache.pool().close().await;

        assert!(matches!(
            cache.lookup(&fp("a")).await,
            Err(CacheError::Unavailable(_))
        ));
        assert!(matches!(
            cache
                .store_if_absent(&fp("a"), ClassificationResult::new("x"))
                .await,
            Err(CacheError::Unavailable(_))
        ));
    }
}
