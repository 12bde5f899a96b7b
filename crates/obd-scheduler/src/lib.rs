//! Signal Polling for Vehicle CAN Modules
//!
//! Provides priority-based scheduling of signal reads through an ELM327
//! adapter, with per-signal rates, failure back-off and adapter reset on
//! protocol desync.

mod scheduler;

pub use scheduler::{Reading, ScheduledSignal, SchedulerConfig, SignalPoller, SignalRate};
