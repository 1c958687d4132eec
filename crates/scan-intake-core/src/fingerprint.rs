//! Deterministic upload fingerprints.
//!
//! Two bases are supported:
//!
//! - [`FingerprintBasis::Filename`] hashes the declared filename. This is the
//!   baseline behavior: two different images sharing a name collide, and the
//!   same image renamed is a cache miss.
//! - [`FingerprintBasis::Content`] hashes the full byte payload, so dedup
//!   follows the image itself rather than its name.
//!
//! Both use SHA-256 rendered as lowercase hex, prefixed with the basis
//! (`name:` / `content:`) so keys from different bases never alias in a
//! shared cache.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{Fingerprint, UploadedImage};

/// What part of an upload the fingerprint is derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintBasis {
    #[default]
    Filename,
    Content,
}

impl FingerprintBasis {
    fn prefix(self) -> &'static str {
        match self {
            FingerprintBasis::Filename => "name",
            FingerprintBasis::Content => "content",
        }
    }
}

impl fmt::Display for FingerprintBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FingerprintBasis::Filename => f.write_str("filename"),
            FingerprintBasis::Content => f.write_str("content"),
        }
    }
}

impl FromStr for FingerprintBasis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filename" => Ok(FingerprintBasis::Filename),
            "content" => Ok(FingerprintBasis::Content),
            other => Err(format!(
                "unknown fingerprint basis '{}': must be filename or content",
                other
            )),
        }
    }
}

/// Derives a [`Fingerprint`] from an accepted upload.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fingerprinter {
    basis: FingerprintBasis,
}

impl Fingerprinter {
    pub fn new(basis: FingerprintBasis) -> Self {
        Self { basis }
    }

    pub fn basis(&self) -> FingerprintBasis {
        self.basis
    }

    pub fn fingerprint(&self, image: &UploadedImage) -> Fingerprint {
        match self.basis {
            FingerprintBasis::Filename => self.digest(
                image
                    .filename
                    .as_deref()
                    .unwrap_or_default()
                    .as_bytes(),
            ),
            FingerprintBasis::Content => self.digest(&image.bytes),
        }
    }

    fn digest(&self, input: &[u8]) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(input);
        Fingerprint::from_raw(format!(
            "{}:{}",
            self.basis.prefix(),
            hex::encode(hasher.finalize())
        ))
    }
}
