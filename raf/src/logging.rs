//! Diagnostic tracing for the orchestrator.
//!
//! Logs go to stderr and are never part of command output; task results live
//! in outcome files and git history.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. `verbose` additionally enables
/// `debug` for this crate.
///
/// # Example
/// ```bash
/// RUST_LOG=raf=trace raf do a1b2c3
/// ```
pub fn init(verbose: bool) {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if verbose && let Ok(directive) = "raf=debug".parse() {
        filter = filter.add_directive(directive);
    }

    // A second init (tests driving `main` logic) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
