//! Classifier providers.
//!
//! Concrete implementations of the core [`Classifier`] trait:
//! - **[`RandomClassifier`]** — baseline placeholder; picks one of the
//!   configured labels uniformly at random.
//! - **[`FixedClassifier`]** — always returns the same label; for demos and
//!   tests.
//! - **[`HttpClassifier`]** — POSTs the image bytes to a model endpoint and
//!   reads `{"label": ..., "confidence": ...}` back.
//!
//! # Provider Selection
//!
//! Use [`create_classifier`] to instantiate the provider named in
//! `[classifier].provider`:
//!
//! ```rust
//! # use scan_intake::config::ClassifierConfig;
//! # use scan_intake::classifier::create_classifier;
//! let config = ClassifierConfig::default(); // provider = "random"
//! let classifier = create_classifier(&config).unwrap();
//! assert_eq!(classifier.name(), "random");
//! ```
//!
//! # Retry Strategy
//!
//! The HTTP provider retries transient errors with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! The overall deadline is enforced by the intake service, not here.

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use scan_intake_core::classifier::{Classifier, ClassifierError};
use scan_intake_core::models::ClassificationResult;

use crate::config::ClassifierConfig;

/// Build the classifier selected by configuration.
pub fn create_classifier(config: &ClassifierConfig) -> Result<Arc<dyn Classifier>> {
    match config.provider.as_str() {
        "random" => Ok(Arc::new(RandomClassifier::new(config.labels.clone())?)),
        "fixed" => {
            let label = config
                .label
                .as_deref()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .ok_or_else(|| anyhow::anyhow!("classifier.label required for fixed provider"))?;
            Ok(Arc::new(FixedClassifier::new(label)))
        }
        "http" => Ok(Arc::new(HttpClassifier::new(config)?)),
        other => bail!("Unknown classifier provider: {}", other),
    }
}

// ============ Random Provider ============

/// Placeholder classifier with no model behind it.
pub struct RandomClassifier {
    labels: Vec<String>,
}

impl RandomClassifier {
    pub fn new(labels: Vec<String>) -> Result<Self> {
        let labels: Vec<String> = labels
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        if labels.is_empty() {
            bail!("random classifier needs at least one label");
        }
        Ok(Self { labels })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

#[async_trait]
impl Classifier for RandomClassifier {
    fn name(&self) -> &str {
        "random"
    }

    async fn classify(&self, _image: &[u8]) -> Result<ClassificationResult, ClassifierError> {
        let idx = rand::rng().random_range(0..self.labels.len());
        Ok(ClassificationResult::new(self.labels[idx].clone()))
    }
}

// ============ Fixed Provider ============

/// Classifier that answers every image with the same label.
pub struct FixedClassifier {
    label: String,
}

impl FixedClassifier {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

#[async_trait]
impl Classifier for FixedClassifier {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn classify(&self, _image: &[u8]) -> Result<ClassificationResult, ClassifierError> {
        Ok(ClassificationResult::new(self.label.clone()).with_confidence(1.0))
    }
}

// ============ HTTP Provider ============

/// Classifier backed by a remote model endpoint.
///
/// Sends `POST <url>` with the raw image as the body
/// (`Content-Type: image/jpeg`) and expects a JSON response:
///
/// ```json
/// { "label": "Pneumonia", "confidence": 0.93 }
/// ```
pub struct HttpClassifier {
    client: reqwest::Client,
    url: String,
    max_retries: u32,
}

/// Response body expected from the model endpoint.
#[derive(Debug, Deserialize)]
struct ModelResponse {
    label: String,
    #[serde(default)]
    confidence: Option<f32>,
}

impl HttpClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("classifier.url required for http provider"))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            url,
            max_retries: config.max_retries,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    fn name(&self) -> &str {
        "http"
    }

    async fn classify(&self, image: &[u8]) -> Result<ClassificationResult, ClassifierError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.url)
                .header("Content-Type", "image/jpeg")
                .body(image.to_vec())
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return parse_model_response(response).await;
                    }

                    // Rate limited or server error — retry
                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::debug!(attempt, %status, "model endpoint returned retryable error");
                        last_err = Some(format!("model endpoint error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    return Err(ClassifierError::Failed(format!(
                        "model endpoint error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "model endpoint request failed");
                    last_err = Some(format!("model endpoint request failed: {}", e));
                    continue;
                }
            }
        }

        Err(ClassifierError::Failed(last_err.unwrap_or_else(|| {
            "classification failed after retries".to_string()
        })))
    }
}

async fn parse_model_response(
    response: reqwest::Response,
) -> Result<ClassificationResult, ClassifierError> {
    let body: ModelResponse = response
        .json()
        .await
        .map_err(|e| ClassifierError::Failed(format!("invalid model response: {}", e)))?;

    if body.label.trim().is_empty() {
        return Err(ClassifierError::Failed(
            "invalid model response: empty label".to_string(),
        ));
    }

    let mut result = ClassificationResult::new(body.label);
    if let Some(confidence) = body.confidence {
        result = result.with_confidence(confidence);
    }
    Ok(result)
}
