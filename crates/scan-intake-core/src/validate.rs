//! Upload validation against a MIME type / extension allow-list.
//!
//! The validator is a pure decision function: it looks only at the declared
//! metadata and the payload length. No magic-byte sniffing is performed, so a
//! PNG renamed to `scan.jpg` and declared as `image/jpeg` is accepted.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. payload present (non-empty)
//! 2. payload within the size limit, if one is configured
//! 3. MIME type present and well-formed
//! 4. MIME type in the allow-list (parameters after `;` are ignored)
//! 5. filename has an extension
//! 6. extension (case-insensitive) in the allow-list

use std::collections::BTreeSet;

/// MIME types accepted when no allow-list is configured.
pub const DEFAULT_MIME_TYPES: &[&str] = &["image/jpeg"];

/// Extensions accepted when no allow-list is configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &[".jpg", ".jpeg"];

/// Reason an upload was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("No image file uploaded.")]
    EmptyUpload,

    #[error("Uploaded file is too large: {size} bytes (max: {max} bytes).")]
    TooLarge { size: usize, max: usize },

    #[error("Missing or malformed MIME type: '{0}'.")]
    MalformedMimeType(String),

    #[error("Uploaded file type '{mime_type}' is not allowed (allowed: {allowed}).")]
    UnsupportedMimeType { mime_type: String, allowed: String },

    #[error("Uploaded file name '{0}' has no file extension.")]
    MissingExtension(String),

    #[error("Uploaded file extension '{extension}' is not allowed (allowed: {allowed}).")]
    UnsupportedExtension { extension: String, allowed: String },
}

/// Normalized sets of accepted MIME types and extensions.
///
/// MIME types are stored lowercase; extensions are stored lowercase with a
/// leading dot, so `"JPG"`, `"jpg"`, and `".jpg"` are equivalent inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    mime_types: BTreeSet<String>,
    extensions: BTreeSet<String>,
}

impl AllowList {
    pub fn new<M, E>(mime_types: M, extensions: E) -> Self
    where
        M: IntoIterator,
        M::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self {
            mime_types: mime_types
                .into_iter()
                .map(|m| m.as_ref().trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
            extensions: extensions
                .into_iter()
                .filter_map(|e| normalize_extension(e.as_ref()))
                .collect(),
        }
    }

    pub fn mime_types(&self) -> impl Iterator<Item = &str> {
        self.mime_types.iter().map(String::as_str)
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.mime_types.is_empty() || self.extensions.is_empty()
    }

    fn allowed_mime_list(&self) -> String {
        self.mime_types().collect::<Vec<_>>().join(", ")
    }

    fn allowed_extension_list(&self) -> String {
        self.extensions().collect::<Vec<_>>().join(", ")
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::new(DEFAULT_MIME_TYPES, DEFAULT_EXTENSIONS)
    }
}

fn normalize_extension(ext: &str) -> Option<String> {
    let ext = ext.trim().trim_start_matches('.').to_lowercase();
    if ext.is_empty() {
        None
    } else {
        Some(format!(".{}", ext))
    }
}

/// Accepts or rejects uploads based on declared metadata.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    allow: AllowList,
    max_bytes: Option<usize>,
}

impl Validator {
    pub fn new(allow: AllowList) -> Self {
        Self {
            allow,
            max_bytes: None,
        }
    }

    /// Reject payloads larger than `max_bytes`.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow
    }

    /// Decide whether an upload is acceptable.
    ///
    /// `mime_type` and `filename` are the values declared by the client;
    /// `None` means the client did not send one.
    pub fn validate(
        &self,
        bytes: &[u8],
        mime_type: Option<&str>,
        filename: Option<&str>,
    ) -> Result<(), ValidationError> {
        if bytes.is_empty() {
            return Err(ValidationError::EmptyUpload);
        }
        if let Some(max) = self.max_bytes {
            if bytes.len() > max {
                return Err(ValidationError::TooLarge {
                    size: bytes.len(),
                    max,
                });
            }
        }

        let declared = mime_type.unwrap_or_default();
        let essence = mime_essence(declared)
            .ok_or_else(|| ValidationError::MalformedMimeType(declared.to_string()))?;
        if !self.allow.mime_types.contains(&essence) {
            return Err(ValidationError::UnsupportedMimeType {
                mime_type: essence,
                allowed: self.allow.allowed_mime_list(),
            });
        }

        let name = filename.unwrap_or_default();
        let extension = file_extension(name)
            .ok_or_else(|| ValidationError::MissingExtension(name.to_string()))?;
        if !self.allow.extensions.contains(&extension) {
            return Err(ValidationError::UnsupportedExtension {
                extension,
                allowed: self.allow.allowed_extension_list(),
            });
        }

        Ok(())
    }
}

/// Lowercased `type/subtype` with parameters stripped, or `None` if malformed.
fn mime_essence(declared: &str) -> Option<String> {
    let essence = declared.split(';').next()?.trim().to_lowercase();
    let (kind, subtype) = essence.split_once('/')?;
    let valid_part = |s: &str| {
        !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "!#$&-^_.+".contains(c))
    };
    if valid_part(kind) && valid_part(subtype) {
        Some(essence)
    } else {
        None
    }
}

/// Lowercased extension with leading dot, taken after the final `.` of the
/// base name. Directory components sent by some clients are ignored.
fn file_extension(filename: &str) -> Option<String> {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim();
    let (_, ext) = base.rsplit_once('.')?;
    normalize_extension(ext)
}
