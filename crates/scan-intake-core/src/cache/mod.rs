//! Result cache abstraction.
//!
//! The [`ResultCache`] trait maps a [`Fingerprint`] to the
//! [`ClassificationResult`] first produced for it. Backends are pluggable
//! (in-memory here, SQLite in the app crate).
//!
//! [`store_if_absent`](ResultCache::store_if_absent) is the only mutation and
//! must be atomic per fingerprint: when several callers race on the same key,
//! exactly one value is stored and every caller gets that value back.
//! Lookups need no coordination because entries are never modified once
//! stored (expiry removes them; it never rewrites them in place).
//!
//! Backends that can fail (disk, network) report
//! [`CacheError::Unavailable`]; callers treat that as a miss and keep going.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::models::{ClassificationResult, Fingerprint};

/// Failure of a cache backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("result cache unavailable: {0}")]
    Unavailable(String),
}

/// Retention policy applied by a cache backend.
///
/// The default is unbounded with no expiry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CachePolicy {
    /// Maximum number of live entries; the oldest is evicted first.
    pub max_entries: Option<usize>,
    /// Entries older than this are treated as absent.
    pub ttl: Option<Duration>,
}

impl CachePolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Fingerprint-keyed store of classification results.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`lookup`](ResultCache::lookup) | Read the stored result, if any |
/// | [`store_if_absent`](ResultCache::store_if_absent) | Insert, or return the result already stored |
/// | [`entry_count`](ResultCache::entry_count) | Number of live entries |
/// | [`clear`](ResultCache::clear) | Drop every entry |
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Short backend identifier (e.g. `"memory"`, `"sqlite"`).
    fn backend(&self) -> &str;

    /// Return the result stored for `fp`, or `None` on a miss.
    async fn lookup(&self, fp: &Fingerprint) -> Result<Option<ClassificationResult>, CacheError>;

    /// Store `result` for `fp` unless a live entry already exists.
    ///
    /// Returns the canonical result: `result` itself if it was inserted,
    /// otherwise the value some earlier caller stored.
    async fn store_if_absent(
        &self,
        fp: &Fingerprint,
        result: ClassificationResult,
    ) -> Result<ClassificationResult, CacheError>;

    /// Number of live (unexpired) entries.
    async fn entry_count(&self) -> Result<usize, CacheError>;

    /// Remove every entry.
    async fn clear(&self) -> Result<(), CacheError>;
}
