//! Local submissions from the command line.
//!
//! `intake submit` pushes a file through the same pipeline the server uses,
//! against the configured cache. With the sqlite backend, a second submit of
//! the same file is answered from the cache.

use anyhow::{bail, Context, Result};
use std::path::Path;

use scan_intake_core::fingerprint::Fingerprinter;
use scan_intake_core::models::{SubmitOutcome, UploadedImage};

use crate::config::Config;
use crate::intake::IntakeService;

/// Guess a MIME type from a file extension, the way a browser would label
/// the upload. Unknown extensions map to `application/octet-stream`.
pub fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Read `path` into an upload, keeping only the file name as the declared name.
pub fn read_upload(path: &Path, mime: Option<String>) -> Result<UploadedImage> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mime = mime.unwrap_or_else(|| guess_mime(path).to_string());
    Ok(UploadedImage::new(bytes, mime, filename))
}

/// Submit a file and print the outcome.
///
/// Rejections and classifier failures are returned as errors so the process
/// exits non-zero.
pub async fn run_submit(config: &Config, path: &Path, mime: Option<String>, json: bool) -> Result<()> {
    let image = read_upload(path, mime)?;
    let service = IntakeService::from_config(config).await?;
    let outcome = service.submit(image).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    match outcome {
        SubmitOutcome::Classified {
            label,
            from_cache,
            fingerprint,
            confidence,
        } => {
            if !json {
                println!("Result:       {}", label);
                println!("From cache:   {}", if from_cache { "yes" } else { "no" });
                println!("Fingerprint:  {}", fingerprint);
                if let Some(c) = confidence {
                    println!("Confidence:   {:.3}", c);
                }
            }
            Ok(())
        }
        SubmitOutcome::Rejected { reason } => bail!("upload rejected: {}", reason),
        SubmitOutcome::ClassifierFailed { detail } => bail!("classification failed: {}", detail),
    }
}

/// Print the cache key a file would be stored under.
pub fn run_fingerprint(config: &Config, path: &Path) -> Result<()> {
    let image = read_upload(path, None)?;
    let fingerprinter = Fingerprinter::new(config.intake.fingerprint);
    println!("{}", fingerprinter.fingerprint(&image));
    Ok(())
}
