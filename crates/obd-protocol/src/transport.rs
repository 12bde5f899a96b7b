//! Byte Transport Abstraction
//!
//! The adapter driver only needs line-oriented reads, raw writes and the
//! ability to flush stale bytes. [`SerialTransport`] provides that over a
//! real serial port; [`crate::MockTransport`] provides it in tests.

use crate::error::ObdError;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::info;

/// Byte-oriented link to an adapter
pub trait Transport: Send {
    /// Write all of `data`
    fn write_bytes(&mut self, data: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Read until `terminator` (inclusive) or until the read window closes
    ///
    /// On timeout, returns whatever was accumulated, possibly nothing.
    fn read_line_until(&mut self, terminator: u8)
        -> impl Future<Output = io::Result<Vec<u8>>> + Send;

    /// Discard bytes received but not yet read
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Discard bytes written but not yet transmitted
    fn clear_output_buffer(&mut self) -> io::Result<()>;
}

/// Serial port transport (8N1, no flow control)
pub struct SerialTransport {
    /// Open port
    port: SerialStream,
    /// Per-line read window
    read_timeout: Duration,
}

impl SerialTransport {
    /// Open a serial device
    ///
    /// # Arguments
    /// * `device` - Serial port path (e.g., "/dev/ttyUSB0" on Linux, "COM3" on Windows)
    /// * `baud_rate` - Line speed
    /// * `read_timeout` - Upper bound for a single [`Transport::read_line_until`]
    ///
    /// # Errors
    /// Returns [`ObdError::SerialError`] if the port cannot be opened
    pub fn open(device: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self, ObdError> {
        info!("Opening serial port {} at {} baud", device, baud_rate);

        let port = tokio_serial::new(device, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(read_timeout)
            .open_native_async()
            .map_err(|e| ObdError::SerialError(format!("failed to open {}: {}", device, e)))?;

        Ok(Self { port, read_timeout })
    }
}

impl Transport for SerialTransport {
    async fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data).await?;
        self.port.flush().await
    }

    async fn read_line_until(&mut self, terminator: u8) -> io::Result<Vec<u8>> {
        let mut line = Vec::with_capacity(32);
        let mut byte = [0u8; 1];
        let deadline = Instant::now() + self.read_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match timeout(remaining, self.port.read(&mut byte)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(_)) => {
                    line.push(byte[0]);
                    if byte[0] == terminator {
                        break;
                    }
                }
                Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => break,
                Ok(Err(e)) => return Err(e),
                // Read window closed: hand back the partial line
                Err(_) => break,
            }
        }

        Ok(line)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }

    fn clear_output_buffer(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Output).map_err(io::Error::from)
    }
}
