//! Signal Poller Implementation

use metrics::counter;
use obd_protocol::{Elm327, ObdError, Transport};
use serde::{Deserialize, Serialize};
use signal_catalog::{Signal, SignalCatalog, SignalError, SignalValue};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Longest retry back-off added to a signal's interval
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Polling rate for one signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalRate {
    /// Signal to poll
    pub signal: Signal,
    /// Sampling rate in Hz
    pub rate_hz: f64,
    /// Tie-break when several signals are due at once (higher first)
    #[serde(default)]
    pub priority: u8,
}

impl SignalRate {
    /// Poll `signal` at `rate_hz` with default priority
    pub fn new(signal: Signal, rate_hz: f64) -> Self {
        Self {
            signal,
            rate_hz,
            priority: 0,
        }
    }
}

/// Configuration for the signal poller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Signals to poll and their rates
    pub signals: Vec<SignalRate>,
    /// Consecutive failures of one signal before its interval is stretched
    pub max_retries: u8,
    /// Extra delay per consecutive failure past `max_retries` (milliseconds)
    pub retry_backoff_ms: u64,
    /// Consecutive desync-looking failures that trigger an adapter reset
    pub desync_threshold: u32,
    /// Stop after this many reads
    pub max_queries: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            signals: vec![
                SignalRate {
                    signal: Signal::AbsSteeringAngle,
                    rate_hz: 5.0,
                    priority: 10,
                },
                SignalRate {
                    signal: Signal::AbsVehicleSpeed,
                    rate_hz: 5.0,
                    priority: 10,
                },
            ],
            max_retries: 3,
            retry_backoff_ms: 100,
            desync_threshold: 10,
            max_queries: None,
        }
    }
}

/// A scheduled signal with priority and timing info
#[derive(Debug, Clone)]
pub struct ScheduledSignal {
    /// The signal to read
    pub signal: Signal,
    /// Current sampling rate in Hz
    pub rate_hz: f64,
    /// Next scheduled read time
    pub next_query: Instant,
    /// Priority (higher = more important)
    pub priority: u8,
    /// Consecutive failure count
    pub failures: u8,
}

impl ScheduledSignal {
    /// Create a new scheduled signal, due immediately
    pub fn new(rate: SignalRate) -> Self {
        Self {
            signal: rate.signal,
            rate_hz: rate.rate_hz,
            next_query: Instant::now(),
            priority: rate.priority,
            failures: 0,
        }
    }

    /// Calculate interval between reads
    ///
    /// Rates that do not give a finite, non-zero interval fall back to 1 s.
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.rate_hz)
            .ok()
            .filter(|interval| !interval.is_zero())
            .unwrap_or(Duration::from_secs(1))
    }

    /// Schedule next read, adding `backoff`
    pub fn schedule_next(&mut self, backoff: Duration) {
        self.next_query = Instant::now() + self.interval() + backoff;
    }
}

impl Eq for ScheduledSignal {}

impl PartialEq for ScheduledSignal {
    fn eq(&self, other: &Self) -> bool {
        self.next_query == other.next_query && self.priority == other.priority
    }
}

impl Ord for ScheduledSignal {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behavior (earliest time first)
        // Then by priority (higher priority first)
        other
            .next_query
            .cmp(&self.next_query)
            .then_with(|| self.priority.cmp(&other.priority))
    }
}

impl PartialOrd for ScheduledSignal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Outcome of one signal read
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// Signal that was read
    pub signal: Signal,
    /// When the read finished (Unix ms)
    pub timestamp_ms: u64,
    /// Decoded value, absent when the read failed
    pub value: Option<SignalValue>,
    /// Failure description when there is no value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reading {
    fn new(signal: Signal, outcome: &Result<SignalValue, SignalError>) -> Self {
        let timestamp_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        match outcome {
            Ok(value) => Self {
                signal,
                timestamp_ms,
                value: Some(*value),
                error: None,
            },
            Err(err) => Self {
                signal,
                timestamp_ms,
                value: None,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Whether a failure suggests the adapter lost track of the protocol
///
/// `NO DATA` is ordinary bus silence and does not count.
fn looks_like_desync(err: &SignalError) -> bool {
    matches!(
        err,
        SignalError::Query(
            ObdError::Timeout
                | ObdError::MalformedFrame(_)
                | ObdError::StructureMismatch { .. }
                | ObdError::BusError(_)
        )
    )
}

/// Polls signals through an adapter at their configured rates
pub struct SignalPoller {
    /// Scheduled signals in priority queue
    queue: BinaryHeap<ScheduledSignal>,
    /// Configuration
    config: SchedulerConfig,
    /// Desync-looking failures in a row, over all signals
    consecutive_failures: u32,
    /// Reads performed so far
    queries: u64,
}

impl SignalPoller {
    /// Create a poller for the configured signals
    pub fn new(config: SchedulerConfig) -> Self {
        let queue: BinaryHeap<_> = config
            .signals
            .iter()
            .copied()
            .map(ScheduledSignal::new)
            .collect();

        info!("Signal poller created with {} signals", queue.len());

        Self {
            queue,
            config,
            consecutive_failures: 0,
            queries: 0,
        }
    }

    /// Change the rate of a signal
    pub fn set_rate(&mut self, signal: Signal, new_rate_hz: f64) {
        let items: Vec<_> = self.queue.drain().collect();
        for mut item in items {
            if item.signal == signal {
                debug!("Setting {} rate to {} Hz", signal, new_rate_hz);
                item.rate_hz = new_rate_hz;
            }
            self.queue.push(item);
        }
    }

    /// Wait for the next due signal, read it and reschedule it
    ///
    /// Returns `None` when nothing is scheduled. Only transport failures
    /// are errors; read failures come back as readings without a value.
    pub async fn poll_next<T: Transport>(
        &mut self,
        driver: &mut Elm327<T>,
    ) -> Result<Option<Reading>, ObdError> {
        let Some(mut scheduled) = self.queue.pop() else {
            return Ok(None);
        };

        tokio::time::sleep_until(scheduled.next_query).await;

        let signal = scheduled.signal;
        let outcome = SignalCatalog::read_signal(driver, signal).await;
        self.queries += 1;
        counter!("obd_queries_total", "signal" => signal.name()).increment(1);

        let reading = Reading::new(signal, &outcome);

        let mut backoff = Duration::ZERO;
        match outcome {
            Ok(_) => {
                scheduled.failures = 0;
                self.consecutive_failures = 0;
            }
            Err(SignalError::Query(err)) if !err.is_transient() => {
                self.queue.push(scheduled);
                return Err(err);
            }
            Err(err) => {
                scheduled.failures = scheduled.failures.saturating_add(1);
                counter!(
                    "obd_query_failures_total",
                    "signal" => signal.name(),
                    "kind" => err.kind()
                )
                .increment(1);
                debug!(
                    "{} read failed (attempt {}): {}",
                    signal, scheduled.failures, err
                );

                if scheduled.failures >= self.config.max_retries {
                    let extra = u64::from(scheduled.failures - self.config.max_retries) + 1;
                    let millis = self.config.retry_backoff_ms.saturating_mul(extra);
                    backoff = Duration::from_millis(millis).min(MAX_BACKOFF);
                }

                if looks_like_desync(&err) {
                    self.consecutive_failures += 1;
                }
                if self.config.desync_threshold > 0
                    && self.consecutive_failures >= self.config.desync_threshold
                {
                    warn!(
                        "{} consecutive failed reads, resetting adapter",
                        self.consecutive_failures
                    );
                    counter!("obd_adapter_resets_total").increment(1);
                    self.consecutive_failures = 0;
                    if let Err(err) = driver.reset().await {
                        self.queue.push(scheduled);
                        return Err(err);
                    }
                }
            }
        }

        scheduled.schedule_next(backoff);
        self.queue.push(scheduled);
        Ok(Some(reading))
    }

    /// Run the polling loop
    ///
    /// Ends when the reading receiver is dropped, `max_queries` is reached
    /// or the transport fails.
    pub async fn run<T: Transport>(
        &mut self,
        driver: &mut Elm327<T>,
        reading_tx: mpsc::Sender<Reading>,
    ) -> Result<(), ObdError> {
        info!("Starting signal poller");

        while !self.limit_reached() {
            let Some(reading) = self.poll_next(driver).await? else {
                warn!("No signals scheduled");
                break;
            };

            if reading_tx.send(reading).await.is_err() {
                debug!("Reading receiver closed");
                break;
            }
        }

        info!("Signal poller stopped after {} reads", self.queries);
        Ok(())
    }

    fn limit_reached(&self) -> bool {
        self.config
            .max_queries
            .map_or(false, |max| self.queries >= max)
    }

    /// Get the number of scheduled signals
    pub fn signal_count(&self) -> usize {
        self.queue.len()
    }

    /// Reads performed so far
    pub fn query_count(&self) -> u64 {
        self.queries
    }
}
