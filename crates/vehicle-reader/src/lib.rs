//! Vehicle Signal Reader
//!
//! Wires the adapter driver, the signal catalog and the poller together
//! and streams readings to stdout as JSON lines.

mod settings;

pub use settings::{LoggingConfig, Settings, DEFAULT_SETTINGS_FILE, ENV_PREFIX};

use anyhow::Context;
use obd_protocol::{Elm327, Transport};
use obd_scheduler::{Reading, SignalPoller};
use std::io::Write;
use std::str::FromStr;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Readings buffered between the poller and the printer
const READING_BUFFER: usize = 64;

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = Level::from_str(&config.level)
        .with_context(|| format!("invalid log level {:?}", config.level))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    let result = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.context("failed to set tracing subscriber")
}

/// Open the adapter and poll until interrupted or the query limit is hit
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let mut driver = Elm327::open(&settings.adapter)
        .await
        .with_context(|| format!("cannot use adapter on {}", settings.adapter.port))?;

    poll(&mut driver, &settings).await
}

/// Poll through an already connected driver, printing readings to stdout
pub async fn poll<T: Transport>(driver: &mut Elm327<T>, settings: &Settings) -> anyhow::Result<()> {
    if !driver.unconfirmed_commands().is_empty() {
        warn!(
            "Adapter did not confirm {:?}; readings may be garbled",
            driver.unconfirmed_commands()
        );
    }

    let mut poller = SignalPoller::new(settings.poller.clone());
    let (reading_tx, reading_rx) = mpsc::channel(READING_BUFFER);
    let printer = tokio::spawn(print_readings(reading_rx, std::io::stdout()));

    tokio::select! {
        result = poller.run(driver, reading_tx) => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    printer.await??;
    Ok(())
}

/// Write each reading as one JSON line
async fn print_readings<W: Write>(
    mut readings: mpsc::Receiver<Reading>,
    mut out: W,
) -> anyhow::Result<()> {
    while let Some(reading) = readings.recv().await {
        serde_json::to_writer(&mut out, &reading)?;
        writeln!(out)?;
        out.flush()?;
    }
    Ok(())
}
