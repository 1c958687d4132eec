//! # Scan Intake
//!
//! An image intake service: validates uploads against an allow-list,
//! fingerprints them, answers resubmissions from a result cache, and hands
//! first-time uploads to a pluggable classifier.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────────────────┐   ┌────────────┐
//! │  HTTP / CLI  │──▶│ IntakeService                  │──▶│ Classifier │
//! │ multipart    │   │ validate → fingerprint → cache │   │ random/    │
//! └──────────────┘   └───────────────┬────────────────┘   │ fixed/http │
//!                                    │                    └────────────┘
//!                          ┌─────────┴─────────┐
//!                          ▼                   ▼
//!                    ┌──────────┐        ┌──────────┐
//!                    │  memory  │        │  SQLite  │
//!                    └──────────┘        └──────────┘
//! ```
//!
//! The pure pieces (validator, fingerprinter, cache trait and in-memory
//! cache, classifier trait) live in `scan-intake-core`; this crate adds
//! configuration, the durable cache, providers, and the transports.
//!
//! ## Quick Start
//!
//! ```bash
//! intake init                   # create the cache database
//! intake submit scan1.jpg       # classify a local file
//! intake submit scan1.jpg       # answered from the cache
//! intake serve                  # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`intake`] | Pipeline orchestration and request coalescing |
//! | [`classifier`] | Classifier providers |
//! | [`sqlite_cache`] | Durable result cache |
//! | [`server`] | HTTP server |
//! | [`submit_cmd`] | `intake submit` / `intake fingerprint` |
//! | [`stats`] | `intake stats` |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod classifier;
pub mod config;
pub mod db;
pub mod intake;
pub mod logging;
pub mod migrate;
pub mod server;
pub mod sqlite_cache;
pub mod stats;
pub mod submit_cmd;
