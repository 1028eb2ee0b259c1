//! Diagnostic logging for the binary.
//!
//! Library code only emits `tracing` events; this installs the subscriber.
//! Logs go to stderr so reports on stdout stay clean.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Default filter when `RUST_LOG` is unset.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose { "cloudtidy=debug" } else { "cloudtidy=info" }
}

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
/// Calling it again (as tests may) is a no-op.
pub fn init_logger(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .with(filter)
        .try_init();
}
