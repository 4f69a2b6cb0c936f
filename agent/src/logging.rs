//! Tracing setup for the agent binaries.
//!
//! Run progress (turns, tool calls, pull request outcome) is emitted as
//! `tracing` events. Nothing is persisted; the run result itself is returned
//! to the caller.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global subscriber. Call once per process.
///
/// Reads `RUST_LOG`. Defaults to `default_directive` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=agent=debug agent run --repo acme/widgets --title "Fix bug"
/// ```
pub fn init(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
