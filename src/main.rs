//! # Scan Intake CLI (`intake`)
//!
//! ## Usage
//!
//! ```bash
//! intake --config ./config/intake.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `intake init` | Create the cache database and run schema migrations |
//! | `intake submit <file>` | Run a local file through the pipeline |
//! | `intake fingerprint <file>` | Print the cache key for a file |
//! | `intake stats` | Summarize the durable cache |
//! | `intake serve` | Start the HTTP server |
//!
//! When `--config` is left at its default and the file does not exist, the
//! built-in defaults are used.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use scan_intake::config::{self, Config};
use scan_intake::{logging, migrate, server, stats, submit_cmd};

const DEFAULT_CONFIG_PATH: &str = "./config/intake.toml";

/// Scan Intake — validate, deduplicate, and classify image uploads.
#[derive(Parser)]
#[command(
    name = "intake",
    about = "Scan Intake — validate, deduplicate, and classify image uploads",
    version,
    long_about = "Scan Intake accepts image uploads, rejects anything outside the configured \
    MIME type and extension allow-lists, and classifies accepted images. Results are cached \
    by fingerprint so a resubmitted image is answered without calling the classifier again."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/intake.toml`. Intake, cache, classifier, and
    /// server settings are read from this file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the cache database schema.
    ///
    /// Only meaningful with `[cache] backend = "sqlite"`. Idempotent.
    Init,

    /// Submit a local image file.
    ///
    /// Validates, fingerprints, and classifies the file against the
    /// configured cache, then prints the result and whether it came from
    /// the cache. Exits non-zero if the upload is rejected or the
    /// classifier fails.
    Submit {
        /// Image file to submit.
        file: PathBuf,

        /// Declared MIME type. Guessed from the extension when omitted.
        #[arg(long)]
        mime: Option<String>,

        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the fingerprint a file would be cached under.
    Fingerprint {
        /// Image file to fingerprint.
        file: PathBuf,
    },

    /// Show cache statistics.
    Stats,

    /// Start the HTTP server.
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,
}

/// Load the config file, falling back to defaults only when the default
/// path was requested and is absent.
fn resolve_config(path: &Path) -> Result<Config> {
    if path == Path::new(DEFAULT_CONFIG_PATH) && !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }
    config::load_config(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.log_json);

    let cfg = resolve_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            if cfg.cache.is_durable() {
                migrate::run_migrations(&cfg).await?;
                println!("Cache database initialized at {}.", cfg.cache.path.display());
            } else {
                println!("Cache backend is '{}'; nothing to initialize.", cfg.cache.backend);
            }
        }
        Commands::Submit { file, mime, json } => {
            submit_cmd::run_submit(&cfg, &file, mime, json).await?;
        }
        Commands::Fingerprint { file } => {
            submit_cmd::run_fingerprint(&cfg, &file)?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
