//! Reading Signals Through the Adapter

use crate::decode::SignalValue;
use crate::error::SignalError;
use crate::signal::{Signal, SignalSpec};
use obd_protocol::{Elm327, Transport};
use tracing::debug;

/// Stateless entry point for reading named signals
pub struct SignalCatalog;

impl SignalCatalog {
    /// Every row of the table
    pub fn specs() -> impl Iterator<Item = &'static SignalSpec> {
        Signal::ALL.iter().map(Signal::spec)
    }

    /// Look up a signal by name
    pub fn lookup(name: &str) -> Result<&'static SignalSpec, SignalError> {
        name.parse::<Signal>().map(|signal| signal.spec())
    }

    /// Query and decode a signal by name
    ///
    /// Driver failures are passed through unchanged.
    pub async fn read<T: Transport>(
        driver: &mut Elm327<T>,
        name: &str,
    ) -> Result<SignalValue, SignalError> {
        let signal = name.parse::<Signal>()?;
        Self::read_signal(driver, signal).await
    }

    /// Query and decode a signal
    pub async fn read_signal<T: Transport>(
        driver: &mut Elm327<T>,
        signal: Signal,
    ) -> Result<SignalValue, SignalError> {
        let spec = signal.spec();
        let frame = driver.query(&spec.query()?).await?;
        let value = (spec.decode)(&frame);
        debug!(signal = spec.name, ?value, unit = spec.unit, "Decoded");
        Ok(value)
    }
}
