//! Logging initialization

use tracing_subscriber::EnvFilter;

use rill_core::{RillError, RillResult};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info";

/// Install the global `tracing` subscriber.
///
/// Verbosity comes from `RUST_LOG`. With `json` set, each event is one
/// JSON object per line. Fails if a subscriber is already installed.
pub fn init_logging(json: bool) -> RillResult<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| RillError::InvalidConfig(format!("logging: {}", e)))
}
