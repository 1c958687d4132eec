//! # Scan Intake Core
//!
//! Runtime-agnostic logic for scan-intake: the upload data model, the
//! allow-list validator, fingerprinting, the result cache abstraction with
//! its in-memory implementation, and the classifier trait.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. The
//! orchestration (`IntakeService`), the concrete classifiers, and the
//! durable SQLite cache live in the `scan-intake` app crate.

pub mod cache;
pub mod classifier;
pub mod fingerprint;
pub mod models;
pub mod validate;
