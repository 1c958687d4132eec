//! In-memory [`ResultCache`] backed by a sharded concurrent map.
//!
//! `DashMap` locks one shard per operation, so racing inserts for the same
//! fingerprint serialize on that shard while unrelated fingerprints proceed
//! in parallel. Expired entries are dropped lazily on access and eagerly
//! when capacity eviction runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::models::{CacheEntry, ClassificationResult, Fingerprint};

use super::{CacheError, CachePolicy, ResultCache};

/// Process-lifetime result cache.
pub struct InMemoryResultCache {
    entries: DashMap<Fingerprint, CacheEntry>,
    policy: CachePolicy,
}

impl InMemoryResultCache {
    pub fn new() -> Self {
        Self::with_policy(CachePolicy::unbounded())
    }

    pub fn with_policy(policy: CachePolicy) -> Self {
        Self {
            entries: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        self.policy
            .ttl
            .is_some_and(|ttl| entry.is_expired(ttl, now))
    }

    fn purge_expired(&self, now: DateTime<Utc>) {
        if self.policy.ttl.is_some() {
            self.entries.retain(|_, e| !self.is_expired(e, now));
        }
    }

    /// Evict oldest entries until at most `keep` remain, never evicting `spare`.
    fn evict_to(&self, keep: usize, spare: Option<&Fingerprint>, now: DateTime<Utc>) {
        self.purge_expired(now);
        while self.entries.len() > keep {
            // Collect the key first; removing while an iterator guard is
            // alive would deadlock on the shard.
            let oldest = self
                .entries
                .iter()
                .filter(|e| Some(e.key()) != spare)
                .min_by_key(|e| e.value().created_at)
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl Default for InMemoryResultCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultCache for InMemoryResultCache {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn lookup(&self, fp: &Fingerprint) -> Result<Option<ClassificationResult>, CacheError> {
        let now = Utc::now();
        let hit = self
            .entries
            .get(fp)
            .map(|e| (e.result.clone(), self.is_expired(&e, now)));

        match hit {
            Some((_, true)) => {
                self.entries.remove_if(fp, |_, e| self.is_expired(e, now));
                Ok(None)
            }
            Some((result, false)) => Ok(Some(result)),
            None => Ok(None),
        }
    }

    async fn store_if_absent(
        &self,
        fp: &Fingerprint,
        result: ClassificationResult,
    ) -> Result<ClassificationResult, CacheError> {
        let now = Utc::now();

        if let Some(max) = self.policy.max_entries {
            if !self.entries.contains_key(fp) && self.entries.len() >= max {
                self.evict_to(max.saturating_sub(1), None, now);
            }
        }

        let (stored, inserted) = match self.entries.entry(fp.clone()) {
            Entry::Occupied(mut occupied) => {
                if self.is_expired(occupied.get(), now) {
                    occupied.insert(CacheEntry::new(fp.clone(), result.clone()));
                    (result, false)
                } else {
                    (occupied.get().result.clone(), false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::new(fp.clone(), result.clone()));
                (result, true)
            }
        };

        // Racing inserts of different keys can all pass the check above.
        if let Some(max) = self.policy.max_entries {
            if inserted && self.entries.len() > max {
                self.evict_to(max, Some(fp), now);
            }
        }

        Ok(stored)
    }

    async fn entry_count(&self) -> Result<usize, CacheError> {
        self.purge_expired(Utc::now());
        Ok(self.entries.len())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }
}
