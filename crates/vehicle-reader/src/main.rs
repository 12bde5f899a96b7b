//! Vehicle Reader - Main Entry Point
//!
//! Usage: `vehicle-reader [settings.toml]`

use anyhow::Context;
use tracing::info;
use vehicle_reader::{init_logging, run, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1);
    let settings = Settings::load(path.as_deref()).context("failed to load settings")?;

    init_logging(&settings.logging)?;

    info!("=== Vehicle Reader v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Polling {} signals on {}",
        settings.poller.signals.len(),
        settings.adapter.port
    );

    run(settings).await
}
