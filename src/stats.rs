//! Cache statistics.
//!
//! Summarizes what the durable cache holds: entry counts, per-label
//! breakdown, and the age of the newest and oldest results. Used by
//! `intake stats` to confirm that submissions are being deduplicated.

use anyhow::Result;
use sqlx::Row;

use scan_intake_core::cache::ResultCache;

use crate::config::Config;
use crate::sqlite_cache::SqliteResultCache;

/// Per-label breakdown of cached results.
struct LabelStats {
    label: String,
    count: i64,
    last_ts: i64,
}

/// Run the stats command: query the cache database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    if !config.cache.is_durable() {
        println!(
            "Cache backend is '{}': entries live only inside a running server (see GET /api/stats).",
            config.cache.backend
        );
        return Ok(());
    }

    let cache = SqliteResultCache::open(config).await?;
    let live = cache.entry_count().await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM classifications")
        .fetch_one(cache.pool())
        .await?;

    let bounds = sqlx::query("SELECT MIN(created_at) AS oldest, MAX(created_at) AS newest FROM classifications")
        .fetch_one(cache.pool())
        .await?;
    let oldest: Option<i64> = bounds.get("oldest");
    let newest: Option<i64> = bounds.get("newest");

    let now_ms = chrono::Utc::now().timestamp_millis();
    let db_size = std::fs::metadata(&config.cache.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Scan Intake — Cache Stats");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.cache.path.display());
    println!("  Size:        {}", format_size(db_size));
    println!();
    println!("  Entries:     {} live / {} stored", live, total);
    if let Some(max) = config.cache.max_entries {
        println!("  Capacity:    {}", max);
    }
    if let Some(ttl) = config.cache.ttl_secs {
        println!("  TTL:         {}s", ttl);
    }
    if let Some(ts) = newest {
        println!("  Newest:      {}", format_age(ts, now_ms));
    }
    if let Some(ts) = oldest {
        println!("  Oldest:      {}", format_age(ts, now_ms));
    }

    let label_rows = sqlx::query(
        r#"
        SELECT label, COUNT(*) AS count, MAX(created_at) AS last_ts
        FROM classifications
        GROUP BY label
        ORDER BY count DESC, label ASC
        "#,
    )
    .fetch_all(cache.pool())
    .await?;

    let label_stats: Vec<LabelStats> = label_rows
        .iter()
        .map(|row| LabelStats {
            label: row.get("label"),
            count: row.get("count"),
            last_ts: row.get("last_ts"),
        })
        .collect();

    if !label_stats.is_empty() {
        println!();
        println!("  By label:");
        println!("  {:<28} {:>8}   {}", "LABEL", "ENTRIES", "LAST SEEN");
        println!("  {}", "-".repeat(56));

        for s in &label_stats {
            println!(
                "  {:<28} {:>8}   {}",
                s.label,
                s.count,
                format_age(s.last_ts, now_ms)
            );
        }
    }

    println!();

    cache.pool().close().await;
    Ok(())
}

/// Binary size with one unit step per 1024, e.g. `"3.4 MB"`.
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Age of a `created_at` value (unix ms) relative to `now_ms`, e.g.
/// `"5 mins ago"`. Older than a month, or in the future, falls back to
/// the UTC date and time.
fn format_age(created_ms: i64, now_ms: i64) -> String {
    const MINUTE: i64 = 60_000;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;

    let age = now_ms - created_ms;
    let (n, unit) = match age {
        a if a < 0 || a >= 30 * DAY => return format_utc(created_ms),
        a if a < MINUTE => return "just now".to_string(),
        a if a < HOUR => (a / MINUTE, "min"),
        a if a < DAY => (a / HOUR, "hour"),
        a => (a / DAY, "day"),
    };
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

fn format_utc(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}
