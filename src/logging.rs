//! Tracing subscriber setup.
//!
//! Logs go to stderr so command output on stdout stays parseable. The
//! filter comes from `RUST_LOG` when set, otherwise [`DEFAULT_LOG_FILTER`].

use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "scan_intake=info,scan_intake_core=info";

/// Install the global subscriber. `json` switches to one JSON object per line.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
