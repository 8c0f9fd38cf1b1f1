//! Diagnostic tracing for orchestrate commands.
//!
//! orchestrate writes to three places, and only the first is configured here:
//!
//! - **Diagnostics (this module)**: `tracing` events from the state store
//!   retry loop, git calls, claims and agent launches. Filtered by `RUST_LOG`
//!   and written to stderr. Not persisted.
//! - **Command output**: task lists, claim results and overview JSON go to
//!   stdout, so they stay parseable regardless of `RUST_LOG`.
//! - **Workspace logs (`.orchestrate/logs/`)**: `task-{id}.log` holds setup
//!   command output for a claimed task, `{runId}.log` holds the output of a
//!   background agent run. Both are plain files read back by `agent logs`
//!   and `overview`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the stderr subscriber for diagnostics.
///
/// Honors `RUST_LOG` and falls back to `warn`, so a plain run only shows
/// state fetch failures and reaping problems.
///
/// # Example
/// ```bash
/// RUST_LOG=orchestrate::io::state_store=debug orchestrate task add "Write docs"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
