//! Intake orchestration: validate → fingerprint → cache → classify.
//!
//! [`IntakeService::submit`] drives one upload through the pipeline and
//! always ends in a [`SubmitOutcome`]:
//!
//! ```text
//! Received ─▶ Validating ─┬─▶ Rejected
//!                         └─▶ Fingerprinting ─▶ CacheLookup ─┬─▶ Done (from_cache = true)
//!                                                            └─▶ Classifying ─┬─▶ ClassifierFailed
//!                                                                             └─▶ CacheStore ─▶ Done
//! ```
//!
//! # Concurrency
//!
//! Misses on the same fingerprint are coalesced into a single *flight*: the
//! first request spawns a task that classifies and stores; later requests
//! subscribe to that task's outcome instead of invoking the classifier
//! again. The task is detached from the request that started it, so a
//! client that disconnects mid-classification does not prevent the result
//! from reaching the cache.
//!
//! A flight re-checks the cache before classifying. That closes the window
//! where a request misses the cache just before an earlier flight stores
//! and unregisters itself.
//!
//! # Degraded mode
//!
//! A cache backend reporting [`CacheError`](scan_intake_core::cache::CacheError)
//! never fails a submission: lookups degrade to misses and failed stores
//! return the freshly classified result uncached.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;

use scan_intake_core::cache::memory::InMemoryResultCache;
use scan_intake_core::cache::ResultCache;
use scan_intake_core::classifier::{Classifier, ClassifierError};
use scan_intake_core::fingerprint::Fingerprinter;
use scan_intake_core::models::{ClassificationResult, Fingerprint, SubmitOutcome, UploadedImage};
use scan_intake_core::validate::Validator;

use crate::classifier::create_classifier;
use crate::config::Config;
use crate::sqlite_cache::SqliteResultCache;

/// What a finished flight hands to every request waiting on it.
#[derive(Debug, Clone)]
struct Flight {
    result: ClassificationResult,
    /// The flight found the result already cached and did not classify.
    from_cache: bool,
}

type FlightOutcome = Result<Flight, ClassifierError>;
type FlightReceiver = watch::Receiver<Option<FlightOutcome>>;

#[derive(Default)]
struct Counters {
    submissions: AtomicU64,
    rejected: AtomicU64,
    cache_hits: AtomicU64,
    coalesced: AtomicU64,
    classifier_calls: AtomicU64,
    classifier_failures: AtomicU64,
    cache_errors: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Snapshot of service counters, served by `GET /api/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct IntakeStats {
    pub cache_backend: String,
    /// Live cache entries; `None` if the backend is unavailable.
    pub cache_entries: Option<usize>,
    pub classifier: String,
    pub submissions: u64,
    pub rejected: u64,
    pub cache_hits: u64,
    pub coalesced: u64,
    pub classifier_calls: u64,
    pub classifier_failures: u64,
    pub cache_errors: u64,
}

/// The intake pipeline with its shared cache and classifier.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct IntakeService {
    validator: Validator,
    fingerprinter: Fingerprinter,
    cache: Arc<dyn ResultCache>,
    classifier: Arc<dyn Classifier>,
    timeout: Option<Duration>,
    inflight: Arc<DashMap<Fingerprint, FlightReceiver>>,
    counters: Arc<Counters>,
}

impl IntakeService {
    pub fn new(
        validator: Validator,
        fingerprinter: Fingerprinter,
        cache: Arc<dyn ResultCache>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            validator,
            fingerprinter,
            cache,
            classifier,
            timeout: None,
            inflight: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Bound every classifier call; elapsed calls become
    /// [`ClassifierError::Timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the service described by `config`: validator and fingerprint
    /// basis from `[intake]`, backend from `[cache]`, provider from
    /// `[classifier]`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let cache: Arc<dyn ResultCache> = if config.cache.is_durable() {
            Arc::new(SqliteResultCache::open(config).await?)
        } else {
            Arc::new(InMemoryResultCache::with_policy(config.cache.policy()))
        };
        let classifier = create_classifier(&config.classifier)?;

        tracing::debug!(
            cache = cache.backend(),
            classifier = classifier.name(),
            fingerprint = %config.intake.fingerprint,
            "intake service configured"
        );

        Ok(Self::new(
            config.intake.validator(),
            Fingerprinter::new(config.intake.fingerprint),
            cache,
            classifier,
        )
        .with_timeout(config.classifier.timeout()))
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn cache(&self) -> &Arc<dyn ResultCache> {
        &self.cache
    }

    /// Fingerprint an upload without submitting it.
    pub fn fingerprint(&self, image: &UploadedImage) -> Fingerprint {
        self.fingerprinter.fingerprint(image)
    }

    /// Run one upload through the pipeline.
    pub async fn submit(&self, image: UploadedImage) -> SubmitOutcome {
        bump(&self.counters.submissions);

        if let Err(e) = self.validator.validate(
            &image.bytes,
            image.mime_type.as_deref(),
            image.filename.as_deref(),
        ) {
            bump(&self.counters.rejected);
            tracing::debug!(
                filename = ?image.filename,
                mime_type = ?image.mime_type,
                reason = %e,
                "upload rejected"
            );
            return SubmitOutcome::Rejected {
                reason: e.to_string(),
            };
        }

        let fp = self.fingerprinter.fingerprint(&image);

        match self.cache.lookup(&fp).await {
            Ok(Some(result)) => {
                bump(&self.counters.cache_hits);
                tracing::debug!(fingerprint = %fp, label = %result.label, "cache hit");
                return SubmitOutcome::classified(fp, result, true);
            }
            Ok(None) => {
                tracing::debug!(fingerprint = %fp, "cache miss");
            }
            Err(e) => {
                bump(&self.counters.cache_errors);
                tracing::warn!(
                    fingerprint = %fp,
                    error = %e,
                    "cache lookup failed, classifying without cache"
                );
            }
        }

        let (mut rx, joined) = self.join_or_start(&fp, image);
        if joined {
            bump(&self.counters.coalesced);
            tracing::debug!(fingerprint = %fp, "joined in-flight classification");
        }

        let outcome = match rx.wait_for(Option::is_some).await.map(|v| (*v).clone()) {
            Ok(Some(outcome)) => outcome,
            _ => Err(ClassifierError::Failed(
                "classification task ended without a result".to_string(),
            )),
        };

        match outcome {
            Ok(flight) => {
                let from_cache = joined || flight.from_cache;
                tracing::debug!(
                    fingerprint = %fp,
                    label = %flight.result.label,
                    from_cache,
                    "submission classified"
                );
                SubmitOutcome::classified(fp, flight.result, from_cache)
            }
            Err(e) => SubmitOutcome::ClassifierFailed {
                detail: e.to_string(),
            },
        }
    }

    /// Subscribe to the flight for `fp`, starting one if none is running.
    ///
    /// Returns the receiver and whether an existing flight was joined.
    fn join_or_start(&self, fp: &Fingerprint, image: UploadedImage) -> (FlightReceiver, bool) {
        let (rx, tx) = match self.inflight.entry(fp.clone()) {
            Entry::Occupied(existing) => (existing.get().clone(), None),
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(None);
                drop(slot.insert(rx.clone()));
                (rx, Some(tx))
            }
        };

        let Some(tx) = tx else {
            return (rx, true);
        };

        let task = FlightTask {
            fingerprint: fp.clone(),
            cache: self.cache.clone(),
            classifier: self.classifier.clone(),
            timeout: self.timeout,
            counters: self.counters.clone(),
            _registration: Registration {
                fingerprint: fp.clone(),
                inflight: self.inflight.clone(),
            },
        };
        tokio::spawn(task.run(image.bytes, tx));
        (rx, false)
    }

    /// Current counters plus the cache size.
    pub async fn stats(&self) -> IntakeStats {
        let cache_entries = match self.cache.entry_count().await {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(error = %e, "cache size unavailable");
                None
            }
        };
        let c = &self.counters;
        IntakeStats {
            cache_backend: self.cache.backend().to_string(),
            cache_entries,
            classifier: self.classifier.name().to_string(),
            submissions: c.submissions.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            classifier_calls: c.classifier_calls.load(Ordering::Relaxed),
            classifier_failures: c.classifier_failures.load(Ordering::Relaxed),
            cache_errors: c.cache_errors.load(Ordering::Relaxed),
        }
    }
}

/// Removes a flight from the in-flight table when dropped, including when
/// the flight task panics.
struct Registration {
    fingerprint: Fingerprint,
    inflight: Arc<DashMap<Fingerprint, FlightReceiver>>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.inflight.remove(&self.fingerprint);
    }
}

/// Detached classification for one fingerprint.
struct FlightTask {
    fingerprint: Fingerprint,
    cache: Arc<dyn ResultCache>,
    classifier: Arc<dyn Classifier>,
    timeout: Option<Duration>,
    counters: Arc<Counters>,
    _registration: Registration,
}

impl FlightTask {
    async fn run(self, bytes: Vec<u8>, tx: watch::Sender<Option<FlightOutcome>>) {
        let outcome = self.execute(&bytes).await;
        // Publish before `self` (and the registration) is dropped, so a
        // request arriving later finds either the flight or the cache entry.
        tx.send_replace(Some(outcome));
    }

    async fn execute(&self, bytes: &[u8]) -> FlightOutcome {
        let fp = &self.fingerprint;

        match self.cache.lookup(fp).await {
            Ok(Some(result)) => {
                return Ok(Flight {
                    result,
                    from_cache: true,
                });
            }
            Ok(None) => {}
            Err(e) => {
                bump(&self.counters.cache_errors);
                tracing::warn!(
                    fingerprint = %fp,
                    error = %e,
                    "cache recheck failed, classifying without cache"
                );
            }
        }

        bump(&self.counters.classifier_calls);
        tracing::debug!(fingerprint = %fp, classifier = self.classifier.name(), "classifying");

        let classified = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.classifier.classify(bytes))
                .await
                .unwrap_or(Err(ClassifierError::Timeout(limit))),
            None => self.classifier.classify(bytes).await,
        };

        let result = match classified {
            Ok(result) => result,
            Err(e) => {
                bump(&self.counters.classifier_failures);
                tracing::warn!(fingerprint = %fp, error = %e, "classifier failed");
                return Err(e);
            }
        };

        match self.cache.store_if_absent(fp, result.clone()).await {
            Ok(canonical) => {
                if canonical != result {
                    tracing::debug!(
                        fingerprint = %fp,
                        label = %canonical.label,
                        "lost store race, using stored result"
                    );
                }
                Ok(Flight {
                    result: canonical,
                    from_cache: false,
                })
            }
            Err(e) => {
                bump(&self.counters.cache_errors);
                tracing::warn!(
                    fingerprint = %fp,
                    error = %e,
                    "cache store failed, returning uncached result"
                );
                Ok(Flight {
                    result,
                    from_cache: false,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scan_intake_core::cache::CacheError;

    /// Cache whose every operation fails.
    struct BrokenCache;

    #[async_trait]
    impl ResultCache for BrokenCache {
        fn backend(&self) -> &str {
            "broken"
        }
        async fn lookup(&self, _fp: &Fingerprint) -> Result<Option<ClassificationResult>, CacheError> {
            Err(CacheError::Unavailable("disk gone".into()))
        }
        async fn store_if_absent(
            &self,
            _fp: &Fingerprint,
            _result: ClassificationResult,
        ) -> Result<ClassificationResult, CacheError> {
            Err(CacheError::Unavailable("disk gone".into()))
        }
        async fn entry_count(&self) -> Result<usize, CacheError> {
            Err(CacheError::Unavailable("disk gone".into()))
        }
        async fn clear(&self) -> Result<(), CacheError> {
            Ok(())
        }
    }

    fn jpeg(name: &str) -> UploadedImage {
        UploadedImage::new(b"\xFF\xD8\xFF\xE0".to_vec(), "image/jpeg", name)
    }

    #[tokio::test]
    async fn test_unavailable_cache_degrades_to_classify() {
        let service = IntakeService::new(
            Validator::default(),
            Fingerprinter::default(),
            Arc::new(BrokenCache),
            Arc::new(crate::classifier::FixedClassifier::new("Pneumonia")),
        );

        for _ in 0..2 {
            let outcome = service.submit(jpeg("scan1.jpg")).await;
            assert_eq!(outcome.label(), Some("Pneumonia"));
            assert!(!outcome.is_from_cache());
        }

        // Per submission: the lookup, the in-flight recheck, and the store.
        let stats = service.stats().await;
        assert_eq!(stats.classifier_calls, 2);
        assert_eq!(stats.cache_entries, None);
        assert_eq!(stats.cache_errors, 6);
    }

    #[tokio::test]
    async fn test_from_config_defaults() {
        let cfg = crate::config::parse_config("[classifier]\nprovider = \"fixed\"\nlabel = \"Pneumonia\"").unwrap();
        let service = IntakeService::from_config(&cfg).await.unwrap();
        assert_eq!(service.cache().backend(), "memory");
        assert_eq!(service.timeout, Some(Duration::from_secs(30)));

        let outcome = service.submit(jpeg("scan1.jpg")).await;
        assert_eq!(outcome.label(), Some("Pneumonia"));
        let stats = service.stats().await;
        assert_eq!(stats.classifier, "fixed");
        assert_eq!(stats.cache_entries, Some(1));
    }
}
