//! OBD-II Adapter Driver
//!
//! This crate provides async communication with ELM327-compatible adapters
//! for querying extended PIDs on CAN modules. It handles adapter
//! configuration, header/filter caching and reassembly of single- and
//! multi-line responses.

mod client;
mod config;
mod error;
mod frame;
mod mock;
mod protocol;
mod transport;

pub use client::Elm327;
pub use config::AdapterConfig;
pub use error::ObdError;
pub use frame::{Query, RawFrame};
pub use mock::MockTransport;
pub use protocol::AtCommand;
pub use transport::{SerialTransport, Transport};

/// Wire tokens exchanged with the adapter
pub mod token {
    pub use crate::protocol::{CAN_ERROR_TOKEN, NO_DATA_TOKEN, OK_TOKEN, PROMPT, TERMINATOR};
}
