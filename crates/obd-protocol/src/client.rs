//! ELM327 Adapter Driver
//!
//! Configures the adapter with AT commands, issues extended-PID queries and
//! reassembles single- and multi-line responses from the line stream.

use crate::config::AdapterConfig;
use crate::error::ObdError;
use crate::frame::{Query, RawFrame};
use crate::protocol::{AtCommand, CAN_ERROR_TOKEN, NO_DATA_TOKEN, OK_TOKEN, PROMPT, TERMINATOR};
use crate::transport::{SerialTransport, Transport};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Attempts made for each AT command before giving up
const ACK_ATTEMPTS: u32 = 10;

/// Continuation lines read for one multi-line message at most
const MAX_CONTINUATION_LINES: usize = 10;

/// Time the adapter needs to reboot after `ATZ`
const RESET_SETTLE: Duration = Duration::from_secs(1);

/// Pause after the configuration sequence
const CONFIG_SETTLE: Duration = Duration::from_millis(500);

/// Driver for an ELM327-compatible adapter
///
/// Owns the transport exclusively and caches the last header and receive
/// filter so they are only re-sent when a query needs different ones.
pub struct Elm327<T = SerialTransport> {
    /// Link to the adapter
    transport: T,
    /// Header most recently sent with `ATSH`
    last_header: Option<u32>,
    /// Filter most recently sent with `ATCRA`
    last_filter_address: Option<u32>,
    /// Adapter-side response timeout
    response_timeout: Duration,
    /// AT commands that never got an OK
    unconfirmed: Vec<String>,
}

impl Elm327<SerialTransport> {
    /// Open the serial port and reset the adapter
    ///
    /// # Errors
    /// Fails only if the port cannot be opened or written.
    pub async fn open(config: &AdapterConfig) -> Result<Self, ObdError> {
        info!("Connecting to ELM327 adapter on {}", config.port);
        let transport =
            SerialTransport::open(&config.port, config.baud_rate, config.serial_timeout())?;
        Self::with_transport(transport, config.response_timeout()).await
    }
}

impl<T: Transport> Elm327<T> {
    /// Wrap an already open transport and reset the adapter
    pub async fn with_transport(transport: T, response_timeout: Duration) -> Result<Self, ObdError> {
        let mut driver = Self {
            transport,
            last_header: None,
            last_filter_address: None,
            response_timeout,
            unconfirmed: Vec::new(),
        };
        driver.reset().await?;
        Ok(driver)
    }

    /// Reset the adapter and apply the configuration sequence
    ///
    /// Safe to call again after a protocol desync. The cached header and
    /// filter are dropped because the adapter forgets them on `ATZ`.
    pub async fn reset(&mut self) -> Result<(), ObdError> {
        info!("Resetting adapter");

        self.clear_buffers()?;
        self.send(&AtCommand::Reset.to_elm_command()).await?;
        tokio::time::sleep(RESET_SETTLE).await;
        self.clear_buffers()?;

        self.last_header = None;
        self.last_filter_address = None;
        self.unconfirmed.clear();

        debug!("Setting adapter parameters");
        for command in AtCommand::configuration_sequence(self.response_timeout) {
            self.send_and_wait_for_ok(&command.to_elm_command()).await?;
        }

        tokio::time::sleep(CONFIG_SETTLE).await;
        self.clear_buffers()?;

        if self.unconfirmed.is_empty() {
            info!("Adapter configured");
        } else {
            warn!(
                unconfirmed = ?self.unconfirmed,
                "Adapter configured with unacknowledged settings"
            );
        }
        Ok(())
    }

    /// Query a module and return the response frames
    ///
    /// Sends `ATSH`/`ATCRA` only when the header or filter differ from the
    /// previous query. Failures are not retried here.
    #[instrument(
        level = "debug",
        skip_all,
        fields(header = query.header(), command = %query.command_string())
    )]
    pub async fn query(&mut self, query: &Query) -> Result<RawFrame, ObdError> {
        if self.last_header != Some(query.header()) {
            self.send_and_wait_for_ok(&AtCommand::SetHeader(query.header()).to_elm_command())
                .await?;
            self.last_header = Some(query.header());
        }

        if self.last_filter_address != Some(query.filter_address()) {
            let command = AtCommand::SetReceiveFilter(query.filter_address()).to_elm_command();
            self.send_and_wait_for_ok(&command).await?;
            self.last_filter_address = Some(query.filter_address());
        }

        self.transport.clear_input_buffer()?;
        self.send(&query.command_string()).await?;

        let frame = self.receive_message().await?;

        if !frame.matches_shape(query.frame_lengths()) {
            let err = ObdError::StructureMismatch {
                expected: query.frame_lengths().to_vec(),
                actual: frame.shape(),
            };
            warn!("{}", err);
            return Err(err);
        }

        debug!(frames = frame.len(), "Query answered");
        Ok(frame)
    }

    /// Build a [`Query`] from its parts and run it
    pub async fn query_with(
        &mut self,
        header: u32,
        filter_address: u32,
        command: u32,
        frame_lengths: &[usize],
    ) -> Result<RawFrame, ObdError> {
        let query = Query::new(header, filter_address, command, frame_lengths)?;
        self.query(&query).await
    }

    /// Read one response message
    ///
    /// A 3-digit first line announces a multi-line message and carries its
    /// total byte count; each following line starts with a 2-character
    /// index prefix (`0:`, `1:`, ...). Anything else is a single frame.
    pub async fn receive_message(&mut self) -> Result<RawFrame, ObdError> {
        let line = self.receive_line().await?;

        if line.is_empty() {
            return Err(ObdError::Timeout);
        }
        if line.contains(NO_DATA_TOKEN) {
            return Err(ObdError::NoData);
        }
        if line.contains(CAN_ERROR_TOKEN) {
            return Err(ObdError::BusError(line));
        }

        let mut frame = RawFrame::default();

        if line.len() == 3 {
            let total = decode_byte_count(&line)?;
            debug!(total, "Multi-line response");

            let mut received = 0;
            let mut lines_read = 0;
            while received < total && lines_read < MAX_CONTINUATION_LINES {
                let line = self.receive_line().await?;
                if line.is_empty() {
                    return Err(ObdError::Timeout);
                }
                let payload = line
                    .get(2..)
                    .ok_or_else(|| ObdError::MalformedFrame(line.clone()))?;
                let bytes =
                    hex::decode(payload).map_err(|_| ObdError::MalformedFrame(line.clone()))?;

                received += bytes.len();
                frame.push(bytes);
                lines_read += 1;
            }

            if received < total {
                warn!(
                    received,
                    total, "Gave up on multi-line response after {} lines", lines_read
                );
            }
        } else {
            let bytes = hex::decode(&line).map_err(|_| ObdError::MalformedFrame(line.clone()))?;
            frame.push(bytes);
        }

        Ok(frame)
    }

    /// Send a command and wait for `OK`, retrying up to 10 times
    ///
    /// Returns `Ok(false)` when the adapter never acknowledged; the command
    /// is then listed in [`Elm327::unconfirmed_commands`]. Only transport
    /// failures are errors.
    pub async fn send_and_wait_for_ok(&mut self, command: &str) -> Result<bool, ObdError> {
        for attempt in 1..=ACK_ATTEMPTS {
            self.clear_buffers()?;
            self.send(command).await?;

            let response = self.transport.read_line_until(TERMINATOR).await?;
            let response = String::from_utf8_lossy(&response);

            if response.contains(OK_TOKEN) {
                debug!(command, attempt, "Acknowledged");
                self.unconfirmed.retain(|c| c != command);
                return Ok(true);
            }
            debug!(command, attempt, response = ?response, "No OK yet");
        }

        let err = ObdError::ConfigurationNotAcknowledged {
            command: command.to_string(),
            attempts: ACK_ATTEMPTS,
        };
        warn!("{}", err);
        if !self.unconfirmed.iter().any(|c| c == command) {
            self.unconfirmed.push(command.to_string());
        }
        Ok(false)
    }

    /// Write a command followed by a carriage return, without reading
    pub async fn send(&mut self, command: &str) -> Result<(), ObdError> {
        debug!(command, "Sending");
        let mut bytes = Vec::with_capacity(command.len() + 1);
        bytes.extend_from_slice(command.as_bytes());
        bytes.push(TERMINATOR);
        self.transport.write_bytes(&bytes).await?;
        Ok(())
    }

    /// Change the adapter response timeout
    pub async fn set_response_timeout(&mut self, timeout: Duration) -> Result<bool, ObdError> {
        self.response_timeout = timeout;
        self.send_and_wait_for_ok(&AtCommand::response_timeout(timeout).to_elm_command())
            .await
    }

    /// Header currently configured on the adapter, if any
    pub fn last_header(&self) -> Option<u32> {
        self.last_header
    }

    /// Receive filter currently configured on the adapter, if any
    pub fn last_filter_address(&self) -> Option<u32> {
        self.last_filter_address
    }

    /// Configured response timeout
    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// AT commands that were given up on without an `OK`
    pub fn unconfirmed_commands(&self) -> &[String] {
        &self.unconfirmed
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Release the transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    fn clear_buffers(&mut self) -> Result<(), ObdError> {
        self.transport.clear_input_buffer()?;
        self.transport.clear_output_buffer()?;
        Ok(())
    }

    /// Read one line with prompts and terminators removed
    async fn receive_line(&mut self) -> Result<String, ObdError> {
        let raw = self.transport.read_line_until(TERMINATOR).await?;
        let line: String = String::from_utf8_lossy(&raw)
            .chars()
            .filter(|&c| c != PROMPT as char && c != TERMINATOR as char)
            .collect();
        debug!(line = ?line, "Received");
        Ok(line)
    }
}

/// Decode the 3-digit byte count that opens a multi-line message
fn decode_byte_count(line: &str) -> Result<usize, ObdError> {
    let bytes = hex::decode(format!("0{}", line))
        .map_err(|_| ObdError::MalformedFrame(line.to_string()))?;
    Ok(bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use proptest::prelude::*;

    const TIMEOUT: Duration = Duration::from_millis(50);

    async fn connect(mock: MockTransport) -> Elm327<MockTransport> {
        Elm327::with_transport(mock, TIMEOUT).await.unwrap()
    }

    fn ambient_query() -> Query {
        Query::new(0x7E0, 0x7E8, 0x22057D, vec![4]).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_sequence() {
        let driver = connect(MockTransport::new()).await;
        let mock = driver.transport();

        assert_eq!(mock.sent_commands()[0], "ATZ");
        // Echo is still on for the first ATE0, so it takes a second attempt
        assert_eq!(mock.count_sent("ATE0"), 2);
        for command in ["ATS0", "ATL0", "ATH0", "ATST0C"] {
            assert_eq!(mock.count_sent(command), 1, "{}", command);
        }
        assert!(driver.unconfirmed_commands().is_empty());
        assert_eq!(driver.last_header(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_frame_query() {
        let mut mock = MockTransport::new();
        mock.respond_to("22057D1", "220102A0");
        let mut driver = connect(mock).await;

        let frame = driver.query(&ambient_query()).await.unwrap();
        assert_eq!(frame.frame(0), &[0x22, 0x01, 0x02, 0xA0]);

        let celsius = frame.frame(0)[3] as f64 / 2.0 - 40.0;
        assert!((celsius - 40.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_header_and_filter_are_cached() {
        let mut mock = MockTransport::new();
        mock.respond_to("22057D1", "220102A0")
            .respond_to("22F40F1", "62F40F50")
            .respond_to("2220311", "2220A1B2C3");
        let mut driver = connect(mock).await;
        driver.transport_mut().clear_sent();

        driver.query(&ambient_query()).await.unwrap();
        assert_eq!(driver.transport().count_sent("ATSH0007E0"), 1);
        assert_eq!(driver.transport().count_sent("ATCRA000007E8"), 1);
        assert_eq!(driver.last_header(), Some(0x7E0));
        assert_eq!(driver.last_filter_address(), Some(0x7E8));

        driver
            .query_with(0x7E0, 0x7E8, 0x22F40F, &[4])
            .await
            .unwrap();
        assert_eq!(driver.transport().count_sent("ATSH"), 1);
        assert_eq!(driver.transport().count_sent("ATCRA"), 1);

        // Same header, different filter: only ATCRA goes out
        let _ = driver.query_with(0x7E0, 0x7E9, 0x222031, &[5]).await;
        assert_eq!(driver.transport().count_sent("ATSH"), 1);
        assert_eq!(driver.transport().count_sent("ATCRA000007E9"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_input_is_discarded_before_query() {
        let mut mock = MockTransport::new();
        mock.respond_to("22057D1", "220102A0");
        let mut driver = connect(mock).await;
        driver.query(&ambient_query()).await.unwrap();

        driver.transport_mut().inject(b"DEADBEEF\r>");
        let clears = driver.transport().input_clears();

        let frame = driver.query(&ambient_query()).await.unwrap();
        assert_eq!(frame.into_frames(), vec![vec![0x22, 0x01, 0x02, 0xA0]]);
        assert!(driver.transport().input_clears() > clears);
        // Header and filter are cached, so only the command itself went out
        assert_eq!(driver.transport().sent_commands().last().unwrap(), "22057D1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_leaves_cache_untouched() {
        let mut driver = connect(MockTransport::new()).await;
        driver.transport_mut().set_write_failure(true);

        let result = driver.query(&ambient_query()).await;
        assert!(matches!(result, Err(ObdError::SerialError(_))));
        assert!(!result.unwrap_err().is_transient());
        assert_eq!(driver.last_header(), None);
        assert_eq!(driver.last_filter_address(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_drivers_do_not_share_cache() {
        let mut mock = MockTransport::new();
        mock.respond_to("22057D1", "220102A0");
        let mut first = connect(mock.clone()).await;
        first.query(&ambient_query()).await.unwrap();

        let mut second = connect(mock).await;
        second.transport_mut().clear_sent();
        second.query(&ambient_query()).await.unwrap();
        assert_eq!(second.transport().count_sent("ATSH"), 1);
        assert_eq!(second.transport().count_sent("ATCRA"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_forgets_cached_header() {
        let mut mock = MockTransport::new();
        mock.respond_to("22057D1", "220102A0");
        let mut driver = connect(mock).await;
        driver.query(&ambient_query()).await.unwrap();

        driver.reset().await.unwrap();
        assert_eq!(driver.last_header(), None);

        driver.transport_mut().clear_sent();
        driver.query(&ambient_query()).await.unwrap();
        assert_eq!(driver.transport().count_sent("ATSH"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_frame_reassembly() {
        let mut mock = MockTransport::new();
        // A third line is on the wire but the declared total is already reached
        mock.respond_to("2220312", "006\r0:AABBCC\r1:DDEEFF\r2:112233");
        let mut driver = connect(mock).await;

        let frame = driver.query_with(0x797, 0x79F, 0x222031, &[3, 3]).await.unwrap();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.frame(0), &[0xAA, 0xBB, 0xCC]);
        assert_eq!(frame.frame(1), &[0xDD, 0xEE, 0xFF]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_data_leaves_state() {
        let mut mock = MockTransport::new();
        mock.respond_once("22057D1", "220102A0");
        let mut driver = connect(mock).await;
        driver.query(&ambient_query()).await.unwrap();
        driver.transport_mut().clear_sent();

        // Unscripted repeats fall back to NO DATA
        let err = driver.query(&ambient_query()).await.unwrap_err();
        assert!(matches!(err, ObdError::NoData));
        assert_eq!(driver.last_header(), Some(0x7E0));
        assert_eq!(driver.last_filter_address(), Some(0x7E8));
        assert_eq!(driver.transport().count_sent("AT"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_error() {
        let mut mock = MockTransport::new();
        mock.respond_to("22057D1", "CAN ERROR");
        let mut driver = connect(mock).await;

        let err = driver.query(&ambient_query()).await.unwrap_err();
        assert!(matches!(err, ObdError::BusError(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_responses() {
        let mut mock = MockTransport::new();
        mock.respond_once("22057D1", "2201ZZA0")
            .respond_once("22057D1", "220102A")
            .respond_once("22057D1", "004\r0:22G1\r");
        let mut driver = connect(mock).await;

        for _ in 0..3 {
            let err = driver.query(&ambient_query()).await.unwrap_err();
            assert!(matches!(err, ObdError::MalformedFrame(_)), "{:?}", err);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_structure_mismatch() {
        let mut mock = MockTransport::new();
        mock.respond_to("22057D1", "220102A0FF");
        let mut driver = connect(mock).await;

        match driver.query(&ambient_query()).await {
            Err(ObdError::StructureMismatch { expected, actual }) => {
                assert_eq!(expected, vec![4]);
                assert_eq!(actual, vec![5]);
            }
            other => panic!("expected structure mismatch, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_adapter_times_out() {
        let mut mock = MockTransport::new();
        mock.respond_to("22057D1", "");
        let mut driver = connect(mock).await;

        let err = driver.query(&ambient_query()).await.unwrap_err();
        assert!(matches!(err, ObdError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_configuration_is_lenient() {
        let mut mock = MockTransport::unresponsive().without_echo();
        mock.respond_to("22057D1", "220102A0");
        let mut driver = connect(mock).await;

        assert_eq!(driver.transport().count_sent("ATH0"), 10);
        assert_eq!(
            driver.unconfirmed_commands(),
            &["ATE0", "ATS0", "ATL0", "ATH0", "ATST0C"]
        );

        // Queries still go out; the header is cached even though unconfirmed
        let frame = driver.query(&ambient_query()).await;
        assert!(frame.is_ok());
        assert_eq!(driver.last_header(), Some(0x7E0));
        assert!(driver
            .unconfirmed_commands()
            .iter()
            .any(|c| c == "ATSH0007E0"));

        // A later acknowledgment clears the record
        driver.transport_mut().set_acknowledge(true);
        assert!(driver.send_and_wait_for_ok("ATSH0007E0").await.unwrap());
        assert!(!driver
            .unconfirmed_commands()
            .iter()
            .any(|c| c == "ATSH0007E0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_is_stripped() {
        let mut driver = connect(MockTransport::new()).await;
        driver.transport_mut().inject(b">62F40D28\r");

        let frame = driver.receive_message().await.unwrap();
        assert_eq!(frame.frame(0), &[0x62, 0xF4, 0x0D, 0x28]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ten_line_ceiling() {
        let mut driver = connect(MockTransport::new()).await;
        let mut wire = String::from("0FF\r");
        for i in 0..12 {
            wire.push_str(&format!("{:X}:AABB\r", i));
        }
        driver.transport_mut().inject(wire.as_bytes());

        let frame = driver.receive_message().await.unwrap();
        assert_eq!(frame.len(), 10);
        assert_eq!(frame.total_bytes(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_response_timeout() {
        let mut driver = connect(MockTransport::new()).await;
        assert!(driver
            .set_response_timeout(Duration::from_millis(100))
            .await
            .unwrap());
        assert_eq!(driver.transport().count_sent("ATST19"), 1);
        assert_eq!(driver.response_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_decode_byte_count() {
        assert_eq!(decode_byte_count("006").unwrap(), 6);
        assert_eq!(decode_byte_count("1A4").unwrap(), 0x1A4);
        assert!(decode_byte_count("0G6").is_err());
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap()
            .block_on(future)
    }

    fn receive(wire: String) -> Result<RawFrame, ObdError> {
        block_on(async move {
            let mut driver = connect(MockTransport::new()).await;
            driver.transport_mut().inject(wire.as_bytes());
            driver.receive_message().await
        })
    }

    /// Valid hex with one non-hex character spliced in
    fn malformed_hex() -> impl Strategy<Value = String> {
        (
            proptest::collection::vec(any::<u8>(), 2..8),
            "[G-Zg-z:?!.]",
            any::<prop::sample::Index>(),
        )
            .prop_map(|(bytes, bad, at)| {
                let mut text = hex::encode_upper(bytes);
                let at = at.index(text.len() + 1);
                text.insert_str(at, &bad);
                text
            })
    }

    proptest! {
        #[test]
        fn prop_malformed_single_frame(line in malformed_hex()) {
            let result = receive(format!("{}\r", line));
            prop_assert!(matches!(result, Err(ObdError::MalformedFrame(_))));
        }

        #[test]
        fn prop_malformed_continuation(line in malformed_hex(), good in 0usize..3) {
            let mut wire = String::from("040\r");
            for i in 0..good {
                wire.push_str(&format!("{}:AABBCC\r", i));
            }
            wire.push_str(&format!("{}:{}\r", good, line));
            let result = receive(wire);
            prop_assert!(matches!(result, Err(ObdError::MalformedFrame(_))));
        }

        #[test]
        fn prop_reassembly_stops_at_total_or_ceiling(total in 1usize..200, per_line in 1usize..8) {
            let mut wire = format!("{:03X}\r", total);
            for i in 0..12 {
                wire.push_str(&format!("{:X}:{}\r", i % 16, "AB".repeat(per_line)));
            }

            let frame = receive(wire).unwrap();
            let expected = ((total + per_line - 1) / per_line).min(MAX_CONTINUATION_LINES);
            prop_assert_eq!(frame.len(), expected);
            prop_assert!(frame.iter().all(|f| f.len() == per_line));
        }
    }
}
