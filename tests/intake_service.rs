//! End-to-end behavior of the intake pipeline with scripted classifiers.
//!
//! These tests drive [`IntakeService::submit`] directly and count how often
//! the classifier is reached, which is the observable the cache exists to
//! minimize.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use scan_intake::config::Config;
use scan_intake::intake::IntakeService;
use scan_intake::sqlite_cache::SqliteResultCache;
use scan_intake_core::cache::memory::InMemoryResultCache;
use scan_intake_core::cache::ResultCache;
use scan_intake_core::classifier::{Classifier, ClassifierError};
use scan_intake_core::fingerprint::{FingerprintBasis, Fingerprinter};
use scan_intake_core::models::{ClassificationResult, SubmitOutcome, UploadedImage};
use scan_intake_core::validate::Validator;

// ─── Test Classifier ────────────────────────────────────────────────

/// Returns a fixed label after an optional delay, failing the first
/// `fail_first` calls.
struct ScriptedClassifier {
    label: String,
    delay: Duration,
    fail_first: usize,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            delay: Duration::ZERO,
            fail_first: 0,
            calls: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn classify(&self, _image: &[u8]) -> Result<ClassificationResult, ClassifierError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if n < self.fail_first {
            return Err(ClassifierError::Failed("model offline".to_string()));
        }
        Ok(ClassificationResult::new(self.label.clone()))
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn service_with(
    basis: FingerprintBasis,
    classifier: Arc<ScriptedClassifier>,
) -> (IntakeService, Arc<InMemoryResultCache>) {
    let cache = Arc::new(InMemoryResultCache::new());
    let service = IntakeService::new(
        Validator::default(),
        Fingerprinter::new(basis),
        cache.clone(),
        classifier,
    );
    (service, cache)
}

fn jpeg(name: &str, bytes: &[u8]) -> UploadedImage {
    UploadedImage::new(bytes.to_vec(), "image/jpeg", name)
}

const SCAN: &[u8] = b"\xFF\xD8\xFF\xE0scan-one";

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_resubmission_is_answered_from_cache() {
    let classifier = Arc::new(ScriptedClassifier::new("Pneumonia"));
    let (service, _cache) = service_with(FingerprintBasis::Filename, classifier.clone());

    let first = service.submit(jpeg("scan1.jpg", SCAN)).await;
    assert_eq!(first.label(), Some("Pneumonia"));
    assert!(!first.is_from_cache());

    let second = service.submit(jpeg("scan1.jpg", SCAN)).await;
    assert_eq!(second.label(), Some("Pneumonia"));
    assert!(second.is_from_cache());

    assert_eq!(classifier.calls(), 1);
}

#[tokio::test]
async fn test_rejected_uploads_never_reach_classifier_or_cache() {
    let classifier = Arc::new(ScriptedClassifier::new("Pneumonia"));
    let (service, cache) = service_with(FingerprintBasis::Filename, classifier.clone());

    let cases = [
        UploadedImage::new(b"\x89PNG".to_vec(), "image/png", "scan.png"),
        UploadedImage::new(SCAN.to_vec(), "image/jpeg", "x.gif"),
        UploadedImage::new(SCAN.to_vec(), "image/png", "scan.jpg"),
        UploadedImage::new(Vec::new(), "image/jpeg", "scan.jpg"),
        UploadedImage {
            bytes: SCAN.to_vec(),
            mime_type: None,
            filename: Some("scan.jpg".to_string()),
        },
    ];

    for upload in cases {
        let outcome = service.submit(upload).await;
        assert!(
            matches!(outcome, SubmitOutcome::Rejected { .. }),
            "expected rejection, got {:?}",
            outcome
        );
    }

    let outcome = service
        .submit(UploadedImage::new(Vec::new(), "image/jpeg", "scan.jpg"))
        .await;
    assert_eq!(
        outcome,
        SubmitOutcome::Rejected {
            reason: "No image file uploaded.".to_string()
        }
    );

    assert_eq!(classifier.calls(), 0);
    assert_eq!(cache.entry_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_uppercase_extension_is_accepted() {
    let classifier = Arc::new(ScriptedClassifier::new("No Pneumonia"));
    let (service, _cache) = service_with(FingerprintBasis::Filename, classifier);

    let outcome = service.submit(jpeg("SCAN.JPG", SCAN)).await;
    assert_eq!(outcome.label(), Some("No Pneumonia"));
}

#[tokio::test]
async fn test_classifier_failure_is_not_cached() {
    let classifier = Arc::new(ScriptedClassifier::new("Pneumonia").failing_first(1));
    let (service, cache) = service_with(FingerprintBasis::Filename, classifier.clone());

    let first = service.submit(jpeg("scan1.jpg", SCAN)).await;
    match first {
        SubmitOutcome::ClassifierFailed { detail } => assert!(detail.contains("model offline")),
        other => panic!("expected classifier failure, got {:?}", other),
    }
    assert_eq!(cache.entry_count().await.unwrap(), 0);

    let second = service.submit(jpeg("scan1.jpg", SCAN)).await;
    assert_eq!(second.label(), Some("Pneumonia"));
    assert!(!second.is_from_cache());
    assert_eq!(classifier.calls(), 2);
}

#[tokio::test]
async fn test_filename_basis_ignores_content() {
    let classifier = Arc::new(ScriptedClassifier::new("Pneumonia"));
    let (service, _cache) = service_with(FingerprintBasis::Filename, classifier.clone());

    service.submit(jpeg("scan1.jpg", SCAN)).await;
    let other_bytes = service.submit(jpeg("scan1.jpg", b"\xFF\xD8different")).await;

    assert!(other_bytes.is_from_cache());
    assert_eq!(classifier.calls(), 1);
}

#[tokio::test]
async fn test_content_basis_ignores_filename() {
    let classifier = Arc::new(ScriptedClassifier::new("Pneumonia"));
    let (service, _cache) = service_with(FingerprintBasis::Content, classifier.clone());

    service.submit(jpeg("scan1.jpg", SCAN)).await;

    let renamed = service.submit(jpeg("renamed.jpeg", SCAN)).await;
    assert!(renamed.is_from_cache());

    let changed = service.submit(jpeg("scan1.jpg", b"\xFF\xD8different")).await;
    assert!(!changed.is_from_cache());

    assert_eq!(classifier.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_classify_once() {
    let classifier =
        Arc::new(ScriptedClassifier::new("Pneumonia").with_delay(Duration::from_millis(200)));
    let (service, cache) = service_with(FingerprintBasis::Filename, classifier.clone());
    let service = Arc::new(service);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.submit(jpeg("scan1.jpg", SCAN)).await })
        })
        .collect();

    let mut fresh = 0;
    for handle in handles {
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.label(), Some("Pneumonia"));
        if !outcome.is_from_cache() {
            fresh += 1;
        }
    }

    assert_eq!(classifier.calls(), 1);
    assert_eq!(fresh, 1);
    assert_eq!(cache.entry_count().await.unwrap(), 1);

    let stats = service.stats().await;
    assert_eq!(stats.submissions, 16);
    assert_eq!(stats.classifier_calls, 1);
}

#[tokio::test]
async fn test_timeout_reports_classifier_failed() {
    let classifier =
        Arc::new(ScriptedClassifier::new("Pneumonia").with_delay(Duration::from_millis(500)));
    let (service, cache) = service_with(FingerprintBasis::Filename, classifier);
    let service = service.with_timeout(Duration::from_millis(50));

    let outcome = service.submit(jpeg("scan1.jpg", SCAN)).await;
    match outcome {
        SubmitOutcome::ClassifierFailed { detail } => assert!(detail.contains("timed out")),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(cache.entry_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_abandoned_request_still_populates_cache() {
    let classifier =
        Arc::new(ScriptedClassifier::new("Pneumonia").with_delay(Duration::from_millis(200)));
    let (service, cache) = service_with(FingerprintBasis::Filename, classifier.clone());
    let service = Arc::new(service);

    let request = {
        let service = service.clone();
        tokio::spawn(async move { service.submit(jpeg("scan1.jpg", SCAN)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    request.abort();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(cache.entry_count().await.unwrap(), 1);

    let outcome = service.submit(jpeg("scan1.jpg", SCAN)).await;
    assert!(outcome.is_from_cache());
    assert_eq!(classifier.calls(), 1);
}

#[tokio::test]
async fn test_stats_track_each_path() {
    let classifier = Arc::new(ScriptedClassifier::new("Pneumonia"));
    let (service, _cache) = service_with(FingerprintBasis::Filename, classifier);

    service.submit(jpeg("scan.gif", SCAN)).await;
    service.submit(jpeg("scan1.jpg", SCAN)).await;
    service.submit(jpeg("scan1.jpg", SCAN)).await;

    let stats = service.stats().await;
    assert_eq!(stats.cache_backend, "memory");
    assert_eq!(stats.classifier, "scripted");
    assert_eq!(stats.cache_entries, Some(1));
    assert_eq!(stats.submissions, 3);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.classifier_calls, 1);
    assert_eq!(stats.classifier_failures, 0);
    assert_eq!(stats.cache_errors, 0);
}

#[tokio::test]
async fn test_sqlite_cache_survives_service_restart() {
    let tmp = TempDir::new().unwrap();
    let config: Config = toml::from_str(&format!(
        r#"
[cache]
backend = "sqlite"
path = "{}"
"#,
        tmp.path().join("intake.sqlite").display()
    ))
    .unwrap();

    let first_classifier = Arc::new(ScriptedClassifier::new("Pneumonia"));
    let first = IntakeService::new(
        Validator::default(),
        Fingerprinter::default(),
        Arc::new(SqliteResultCache::open(&config).await.unwrap()),
        first_classifier.clone(),
    );
    let outcome = first.submit(jpeg("scan1.jpg", SCAN)).await;
    assert!(!outcome.is_from_cache());
    drop(first);

    let second_classifier = Arc::new(ScriptedClassifier::new("No Pneumonia"));
    let second = IntakeService::new(
        Validator::default(),
        Fingerprinter::default(),
        Arc::new(SqliteResultCache::open(&config).await.unwrap()),
        second_classifier.clone(),
    );
    let outcome = second.submit(jpeg("scan1.jpg", SCAN)).await;
    assert_eq!(outcome.label(), Some("Pneumonia"));
    assert!(outcome.is_from_cache());
    assert_eq!(second_classifier.calls(), 0);
}
