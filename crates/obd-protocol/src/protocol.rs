//! ELM327 Wire Protocol Vocabulary

use std::time::Duration;

/// Line terminator used in both directions
pub const TERMINATOR: u8 = b'\r';

/// Prompt character the adapter prints when it is ready for input
pub const PROMPT: u8 = b'>';

/// Acknowledgment token for AT commands
pub const OK_TOKEN: &str = "OK";

/// Adapter saw no response on the bus
pub const NO_DATA_TOKEN: &str = "NO DATA";

/// Adapter detected a bus fault
pub const CAN_ERROR_TOKEN: &str = "CAN ERROR";

/// Granularity of the `ATST` response timeout
const TIMEOUT_STEP_MS: u64 = 4;

/// AT commands used to configure the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtCommand {
    /// Full adapter reset
    Reset,
    /// Do not echo received characters
    EchoOff,
    /// Do not put spaces between hex bytes
    SpacesOff,
    /// Terminate lines with CR only
    LinefeedsOff,
    /// Do not print CAN ids in front of responses
    HeadersOff,
    /// Response timeout, in units of 4ms
    ResponseTimeout(u8),
    /// 24-bit transmit header
    SetHeader(u32),
    /// 32-bit CAN receive address filter
    SetReceiveFilter(u32),
}

impl AtCommand {
    /// Build the `ATST` command for a response timeout
    ///
    /// The adapter counts in 4ms steps; the value is clamped to 1..=255.
    pub fn response_timeout(timeout: Duration) -> Self {
        let steps = (timeout.as_millis() / u128::from(TIMEOUT_STEP_MS)).clamp(1, 0xFF);
        AtCommand::ResponseTimeout(steps as u8)
    }

    /// Get the ELM327 command text (without terminator)
    pub fn to_elm_command(&self) -> String {
        match self {
            AtCommand::Reset => "ATZ".to_string(),
            AtCommand::EchoOff => "ATE0".to_string(),
            AtCommand::SpacesOff => "ATS0".to_string(),
            AtCommand::LinefeedsOff => "ATL0".to_string(),
            AtCommand::HeadersOff => "ATH0".to_string(),
            AtCommand::ResponseTimeout(steps) => format!("ATST{:02X}", steps),
            AtCommand::SetHeader(header) => format!("ATSH{:06X}", header & 0xFF_FFFF),
            AtCommand::SetReceiveFilter(address) => format!("ATCRA{:08X}", address),
        }
    }

    /// Configuration applied after every reset, in order
    pub fn configuration_sequence(timeout: Duration) -> [AtCommand; 5] {
        [
            AtCommand::EchoOff,
            AtCommand::SpacesOff,
            AtCommand::LinefeedsOff,
            AtCommand::HeadersOff,
            AtCommand::response_timeout(timeout),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_and_filter_formatting() {
        assert_eq!(AtCommand::SetHeader(0x7E0).to_elm_command(), "ATSH0007E0");
        assert_eq!(
            AtCommand::SetReceiveFilter(0x7E8).to_elm_command(),
            "ATCRA000007E8"
        );
    }

    #[test]
    fn test_response_timeout_steps() {
        // 50ms / 4ms = 12 = 0x0C
        assert_eq!(
            AtCommand::response_timeout(Duration::from_millis(50)).to_elm_command(),
            "ATST0C"
        );
        assert_eq!(
            AtCommand::response_timeout(Duration::ZERO),
            AtCommand::ResponseTimeout(1)
        );
        assert_eq!(
            AtCommand::response_timeout(Duration::from_secs(5)),
            AtCommand::ResponseTimeout(0xFF)
        );
        assert_eq!(
            AtCommand::response_timeout(Duration::MAX),
            AtCommand::ResponseTimeout(0xFF)
        );
    }

    #[test]
    fn test_configuration_order() {
        let seq = AtCommand::configuration_sequence(Duration::from_millis(20));
        let cmds: Vec<_> = seq.iter().map(AtCommand::to_elm_command).collect();
        assert_eq!(cmds, ["ATE0", "ATS0", "ATL0", "ATH0", "ATST05"]);
    }
}
