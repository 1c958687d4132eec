//! Classifier trait.
//!
//! A classifier turns validated image bytes into a [`ClassificationResult`].
//! The intake pipeline treats it as an opaque oracle: it may be a random
//! placeholder, a remote model, or anything else satisfying this trait.
//!
//! Concrete classifiers live in the `scan-intake` app crate.

use std::time::Duration;

use async_trait::async_trait;

use crate::models::ClassificationResult;

/// Failure of a classifier invocation.
///
/// `Clone` so a single failure can be reported to every request that was
/// waiting on the same invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("classifier failed: {0}")]
    Failed(String),
}

/// Pluggable classification oracle.
///
/// Implementations should be idempotent in label: classifying equivalent
/// input twice should give the same label, though confidence may differ.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Identifier used in logs and stats (e.g. `"random"`, `"http"`).
    fn name(&self) -> &str;

    /// Classify one validated image.
    async fn classify(&self, image: &[u8]) -> Result<ClassificationResult, ClassifierError>;
}
