//! Adapter connection settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serial and adapter timing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Serial port device path (e.g., "/dev/ttyUSB0" or "COM3")
    pub port: String,

    /// Baud rate for serial communication
    pub baud_rate: u32,

    /// How long a single line read may block (milliseconds)
    pub serial_timeout_ms: u64,

    /// How long the adapter waits for a module to answer (milliseconds)
    pub response_timeout_ms: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 500_000,
            serial_timeout_ms: 100,
            response_timeout_ms: 50,
        }
    }
}

impl AdapterConfig {
    /// Config for the given device with default timing
    pub fn for_port(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Default::default()
        }
    }

    /// Serial read timeout
    pub fn serial_timeout(&self) -> Duration {
        Duration::from_millis(self.serial_timeout_ms)
    }

    /// Adapter response timeout
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}
