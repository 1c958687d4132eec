//! Core data types that flow through the intake pipeline.
//!
//! An [`UploadedImage`] is produced by the transport layer, checked by the
//! validator, reduced to a [`Fingerprint`], and finally answered with a
//! [`ClassificationResult`] wrapped in a [`SubmitOutcome`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw upload as delivered by the transport layer.
///
/// Owned by the request that created it and dropped once intake completes.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Vec<u8>,
    /// Declared MIME type (e.g. the multipart `Content-Type`).
    pub mime_type: Option<String>,
    /// Declared original filename, including its extension.
    pub filename: Option<String>,
}

impl UploadedImage {
    pub fn new(
        bytes: impl Into<Vec<u8>>,
        mime_type: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: Some(mime_type.into()),
            filename: Some(filename.into()),
        }
    }
}

/// Opaque key derived from an upload, used to recognize resubmissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already-computed key, e.g. one read back from a durable store.
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Label produced by a classifier, with optional confidence.
///
/// Never mutated once produced; the cache hands out clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl ClassificationResult {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// A stored result together with the moment it was first produced.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub result: ClassificationResult,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(fingerprint: Fingerprint, result: ClassificationResult) -> Self {
        Self {
            fingerprint,
            result,
            created_at: Utc::now(),
        }
    }

    /// Whether the entry is older than `ttl` at `now`.
    pub fn is_expired(&self, ttl: std::time::Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(self.created_at) >= ttl,
            Err(_) => false,
        }
    }
}

/// Terminal result of a single submission.
///
/// Every path through the intake pipeline ends in exactly one of these
/// variants; there is no error channel beside it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// The upload failed validation. Nothing was cached or classified.
    Rejected { reason: String },
    /// The classifier failed or timed out. Nothing was cached.
    ClassifierFailed { detail: String },
    /// A label is available, either fresh or from the cache.
    Classified {
        label: String,
        from_cache: bool,
        fingerprint: Fingerprint,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
    },
}

impl SubmitOutcome {
    pub fn classified(fingerprint: Fingerprint, result: ClassificationResult, from_cache: bool) -> Self {
        SubmitOutcome::Classified {
            label: result.label,
            from_cache,
            fingerprint,
            confidence: result.confidence,
        }
    }

    /// The label, if the submission was classified.
    pub fn label(&self) -> Option<&str> {
        match self {
            SubmitOutcome::Classified { label, .. } => Some(label),
            _ => None,
        }
    }

    pub fn is_from_cache(&self) -> bool {
        matches!(
            self,
            SubmitOutcome::Classified {
                from_cache: true,
                ..
            }
        )
    }
}
