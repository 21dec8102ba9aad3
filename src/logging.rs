//! Logging configuration for the microbatch scheduler
//!
//! Structured logging for queue triggers, batch dispatch, and worker
//! lifecycle events.

use std::io;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system.
///
/// Honors `RUST_LOG` when set; otherwise defaults to `info` globally with
/// `debug` for this crate so batch triggers and dispatches are visible.
pub fn init_logging() -> eyre::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,microbatch=debug"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("microbatch logging initialized");
    Ok(())
}
