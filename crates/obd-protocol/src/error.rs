//! OBD-II Error Types

use thiserror::Error;

/// Errors that can occur while talking to an ELM327 adapter
#[derive(Debug, Error)]
pub enum ObdError {
    /// Serial port could not be opened, read or written
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Nothing arrived within the read window
    #[error("Timeout waiting for adapter response")]
    Timeout,

    /// Adapter reported that no module answered
    #[error("Adapter reported NO DATA")]
    NoData,

    /// Adapter reported a CAN bus fault
    #[error("Adapter reported a CAN bus error: {0}")]
    BusError(String),

    /// Response line was not valid hex or was truncated
    #[error("Malformed frame: {0:?}")]
    MalformedFrame(String),

    /// Frame count or per-frame byte length disagrees with the declared shape
    #[error("Response shape {actual:?} does not match expected {expected:?}")]
    StructureMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// An AT command never got an `OK` back
    #[error("Adapter did not acknowledge {command} after {attempts} attempts")]
    ConfigurationNotAcknowledged { command: String, attempts: u32 },

    /// Query parameters cannot be encoded as an adapter command
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl ObdError {
    /// Whether this is a routine "no value" outcome the caller may simply retry.
    ///
    /// Only transport failures are not transient.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ObdError::SerialError(_) | ObdError::InvalidQuery(_))
    }

    /// Short stable name of the failure kind, used for log fields and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            ObdError::SerialError(_) => "serial",
            ObdError::Timeout => "timeout",
            ObdError::NoData => "no_data",
            ObdError::BusError(_) => "bus_error",
            ObdError::MalformedFrame(_) => "malformed_frame",
            ObdError::StructureMismatch { .. } => "structure_mismatch",
            ObdError::ConfigurationNotAcknowledged { .. } => "not_acknowledged",
            ObdError::InvalidQuery(_) => "invalid_query",
        }
    }
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}

impl From<tokio_serial::Error> for ObdError {
    fn from(err: tokio_serial::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}
