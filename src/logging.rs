//! Structured logging setup, shared by the `causeway` and `causeway-launcher`
//! binaries.

use tracing_subscriber::EnvFilter;

/// Installs a `tracing-subscriber` `fmt` layer. Verbosity is controlled by
/// `CAUSEWAY_LOG` (default `info`, or `debug` when `verbose` is set and the
/// variable is unset).
pub fn init(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("CAUSEWAY_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
