//! Logging setup for the binaries.
//!
//! Library code only emits `tracing` events; a process calls [`init`] once to
//! install a stderr formatter. The filter comes from `COMMWATCH_LOG`, then
//! `RUST_LOG`, and defaults to `info`.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

const FILTER_ENV: &str = "COMMWATCH_LOG";
const DEFAULT_FILTER: &str = "info";

static INIT: Once = Once::new();

/// Install the global subscriber. Later calls are no-ops.
pub fn init() {
    INIT.call_once(setup_logging);
}

fn setup_logging() {
    // File and line go into every event so fatal diagnostics carry their
    // source location.
    let result = tracing_subscriber::fmt()
        .with_env_filter(filters())
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .try_init();
    if let Err(e) = result {
        eprintln!("logging already initialized: {e}");
    }
}

fn filters() -> EnvFilter {
    EnvFilter::try_from_env(FILTER_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
