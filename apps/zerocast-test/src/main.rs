//! zerocast test harness entry point.
//!
//! Publishes a few sample services, starts one browser of every kind and
//! dumps the record tables periodically. Takes an optional configuration
//! file path as its only argument.

mod app;
mod config;

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting zerocast test harness"
    );

    let config = config::Config::load(std::env::args_os().nth(1).map(PathBuf::from))?;
    tracing::info!(service = %config.service_name, "configuration loaded");

    // The server is single-threaded, so it runs on the current thread.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(app::run(config))?;

    tracing::info!("harness shut down cleanly");
    Ok(())
}
