//! Logging setup shared by the example binaries

use tracing_subscriber::EnvFilter;

/// Level used before a configuration has been loaded
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Install the global subscriber. `RUST_LOG` wins over everything; otherwise
/// `--verbose` selects debug and `level` applies.
pub fn setup_logging(verbose: bool, level: &str) {
    let default_level = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // A second call (tests, or a failed config load followed by a retry) is a no-op
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
