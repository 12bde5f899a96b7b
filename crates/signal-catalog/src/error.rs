//! Signal Lookup Errors

use obd_protocol::ObdError;
use thiserror::Error;

/// Errors while reading a named signal
#[derive(Debug, Error)]
pub enum SignalError {
    /// No signal with this name in the catalog
    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    /// The adapter query failed
    #[error(transparent)]
    Query(#[from] ObdError),
}

impl SignalError {
    /// Whether retrying the read may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            SignalError::UnknownSignal(_) => false,
            SignalError::Query(err) => err.is_transient(),
        }
    }

    /// Short stable name of the failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            SignalError::UnknownSignal(_) => "unknown_signal",
            SignalError::Query(err) => err.kind(),
        }
    }
}
