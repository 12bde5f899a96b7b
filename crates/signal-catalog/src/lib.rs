//! Vehicle Signal Catalog
//!
//! Static table of extended-PID signals on the vehicle's CAN modules and
//! the formulas that turn their raw response bytes into physical values.

mod catalog;
mod decode;
mod error;
mod signal;

pub use catalog::SignalCatalog;
pub use decode::{GpsFix, SignalValue};
pub use error::SignalError;
pub use signal::{Module, Signal, SignalSpec};
