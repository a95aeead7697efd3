//! Logging setup on top of `tracing-subscriber`.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Directive used when neither `RUST_LOG` nor the config supplies one.
pub const DEFAULT_FILTER: &str = "info,renderer=debug";

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `default_directive`; an empty directive falls back to
/// [`DEFAULT_FILTER`]. Calling this twice is a no-op.
pub fn init_logging(default_directive: &str) {
    let directive = if default_directive.trim().is_empty() {
        DEFAULT_FILTER
    } else {
        default_directive
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
