//! TOML configuration.
//!
//! Every section is optional; an empty file yields a service that accepts
//! JPEG uploads, fingerprints by filename, caches in memory without bounds,
//! and classifies with the random placeholder.
//!
//! ```toml
//! [intake]
//! allowed_mime_types = ["image/jpeg"]
//! allowed_extensions = [".jpg", ".jpeg"]
//! fingerprint = "filename"
//!
//! [cache]
//! backend = "sqlite"
//! path = "./data/intake.sqlite"
//! max_entries = 10000
//!
//! [classifier]
//! provider = "random"
//! timeout_secs = 30
//!
//! [server]
//! bind = "127.0.0.1:8080"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use scan_intake_core::cache::CachePolicy;
use scan_intake_core::fingerprint::FingerprintBasis;
use scan_intake_core::validate::{AllowList, Validator, DEFAULT_EXTENSIONS, DEFAULT_MIME_TYPES};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IntakeConfig {
    #[serde(default = "default_mime_types")]
    pub allowed_mime_types: Vec<String>,
    #[serde(default = "default_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default)]
    pub fingerprint: FingerprintBasis,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            allowed_mime_types: default_mime_types(),
            allowed_extensions: default_extensions(),
            fingerprint: FingerprintBasis::default(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_mime_types() -> Vec<String> {
    DEFAULT_MIME_TYPES.iter().map(|s| s.to_string()).collect()
}
fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}
fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl IntakeConfig {
    pub fn allow_list(&self) -> AllowList {
        AllowList::new(&self.allowed_mime_types, &self.allowed_extensions)
    }

    pub fn validator(&self) -> Validator {
        Validator::new(self.allow_list()).with_max_bytes(self.max_upload_bytes)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub max_entries: Option<usize>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_cache_path(),
            max_entries: None,
            ttl_secs: None,
        }
    }
}

fn default_backend() -> String {
    "memory".to_string()
}
fn default_cache_path() -> PathBuf {
    PathBuf::from("./data/intake.sqlite")
}

impl CacheConfig {
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            max_entries: self.max_entries,
            ttl: self.ttl_secs.map(Duration::from_secs),
        }
    }

    pub fn is_durable(&self) -> bool {
        self.backend == "sqlite"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            labels: default_labels(),
            label: None,
            url: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_provider() -> String {
    "random".to_string()
}
fn default_labels() -> Vec<String> {
    vec!["Pneumonia".to_string(), "No Pneumonia".to_string()]
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    // Validate intake
    let allow = config.intake.allow_list();
    if allow.mime_types().next().is_none() {
        anyhow::bail!("intake.allowed_mime_types must not be empty");
    }
    if allow.extensions().next().is_none() {
        anyhow::bail!("intake.allowed_extensions must not be empty");
    }
    if config.intake.max_upload_bytes == 0 {
        anyhow::bail!("intake.max_upload_bytes must be > 0");
    }

    // Validate cache
    match config.cache.backend.as_str() {
        "memory" | "sqlite" => {}
        other => anyhow::bail!(
            "Unknown cache backend: '{}'. Must be memory or sqlite.",
            other
        ),
    }
    if config.cache.max_entries == Some(0) {
        anyhow::bail!("cache.max_entries must be > 0 when set");
    }
    if config.cache.ttl_secs == Some(0) {
        anyhow::bail!("cache.ttl_secs must be > 0 when set");
    }

    // Validate classifier
    if config.classifier.timeout_secs == 0 {
        anyhow::bail!("classifier.timeout_secs must be > 0");
    }
    match config.classifier.provider.as_str() {
        "random" => {
            if config.classifier.labels.iter().all(|l| l.trim().is_empty()) {
                anyhow::bail!("classifier.labels must not be empty when provider is 'random'");
            }
        }
        "fixed" => {
            if config
                .classifier
                .label
                .as_deref()
                .is_none_or(|l| l.trim().is_empty())
            {
                anyhow::bail!("classifier.label must be specified when provider is 'fixed'");
            }
        }
        "http" => {
            if config.classifier.url.is_none() {
                anyhow::bail!("classifier.url must be specified when provider is 'http'");
            }
        }
        other => anyhow::bail!(
            "Unknown classifier provider: '{}'. Must be random, fixed, or http.",
            other
        ),
    }

    Ok(())
}
