//! Simulated ELM327 adapter for tests and offline runs
//!
//! Behaves like the real byte stream: commands are collected until a
//! carriage return, echo stays on until `ATE0` is processed, every reply is
//! followed by a blank line and the `>` prompt.

use crate::protocol::{NO_DATA_TOKEN, OK_TOKEN, PROMPT, TERMINATOR};
use crate::transport::Transport;
use std::collections::{HashMap, VecDeque};
use std::io;

/// Identification string printed after `ATZ`
const BANNER: &str = "ELM327 v1.5";

/// In-memory adapter implementing [`Transport`]
#[derive(Debug, Clone)]
pub struct MockTransport {
    /// Bytes the adapter has produced but the host has not read
    inbound: VecDeque<u8>,
    /// Partially written command
    pending: Vec<u8>,
    /// Every complete command received, in order
    sent: Vec<String>,
    /// Replies returned every time a command is seen
    replies: HashMap<String, String>,
    /// One-shot replies, consumed before `replies`
    queued: HashMap<String, VecDeque<String>>,
    /// Echo received commands back
    echo: bool,
    /// Echo state restored by `ATZ`
    echo_on_reset: bool,
    /// Answer AT commands with OK
    acknowledge: bool,
    /// Number of input buffer flushes
    input_clears: usize,
    /// Fail every write as if the link dropped
    fail_writes: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Adapter in power-on state (echo on, acknowledging)
    pub fn new() -> Self {
        Self {
            inbound: VecDeque::new(),
            pending: Vec::new(),
            sent: Vec::new(),
            replies: HashMap::new(),
            queued: HashMap::new(),
            echo: true,
            echo_on_reset: true,
            acknowledge: true,
            input_clears: 0,
            fail_writes: false,
        }
    }

    /// Adapter that never answers AT commands with OK
    pub fn unresponsive() -> Self {
        Self {
            acknowledge: false,
            ..Self::new()
        }
    }

    /// Adapter whose stored defaults have echo disabled
    pub fn without_echo(mut self) -> Self {
        self.echo = false;
        self.echo_on_reset = false;
        self
    }

    /// Always answer `command` with `reply`
    ///
    /// `reply` holds the response lines separated by `\r`; the trailing blank
    /// line and prompt are added. An empty reply means the adapter stays
    /// silent.
    pub fn respond_to(&mut self, command: &str, reply: &str) -> &mut Self {
        self.replies.insert(command.to_string(), reply.to_string());
        self
    }

    /// Answer the next occurrence of `command` with `reply`
    pub fn respond_once(&mut self, command: &str, reply: &str) -> &mut Self {
        self.queued
            .entry(command.to_string())
            .or_default()
            .push_back(reply.to_string());
        self
    }

    /// Start or stop acknowledging AT commands
    pub fn set_acknowledge(&mut self, acknowledge: bool) {
        self.acknowledge = acknowledge;
    }

    /// Make every following write fail with a broken pipe
    pub fn set_write_failure(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Put raw bytes on the line as if the adapter had sent them
    pub fn inject(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    /// Commands received so far
    pub fn sent_commands(&self) -> &[String] {
        &self.sent
    }

    /// How many received commands start with `prefix`
    pub fn count_sent(&self, prefix: &str) -> usize {
        self.sent.iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Forget the command history
    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }

    /// Number of input buffer flushes
    pub fn input_clears(&self) -> usize {
        self.input_clears
    }

    /// Whether echo is currently on
    pub fn echo_enabled(&self) -> bool {
        self.echo
    }

    fn emit(&mut self, text: &str) {
        self.inbound.extend(text.as_bytes());
        self.inbound.push_back(TERMINATOR);
        self.inbound.push_back(TERMINATOR);
        self.inbound.push_back(PROMPT);
    }

    fn process(&mut self, command: String) {
        if self.echo {
            self.inbound.extend(command.as_bytes());
            self.inbound.push_back(TERMINATOR);
        }

        let reply = if command == "ATZ" {
            self.echo = self.echo_on_reset;
            Some(BANNER.to_string())
        } else if command.starts_with("AT") {
            if !self.acknowledge {
                None
            } else {
                if command == "ATE0" {
                    self.echo = false;
                }
                Some(OK_TOKEN.to_string())
            }
        } else {
            let once = self.queued.get_mut(&command).and_then(VecDeque::pop_front);
            Some(
                once.or_else(|| self.replies.get(&command).cloned())
                    .unwrap_or_else(|| NO_DATA_TOKEN.to_string()),
            )
        };

        self.sent.push(command);

        if let Some(reply) = reply.filter(|r| !r.is_empty()) {
            self.emit(&reply);
        }
    }
}

impl Transport for MockTransport {
    async fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "adapter unplugged"));
        }
        for &byte in data {
            if byte == TERMINATOR {
                let command = String::from_utf8_lossy(&self.pending).trim().to_uppercase();
                self.pending.clear();
                if !command.is_empty() {
                    self.process(command);
                }
            } else if byte != b'\n' {
                self.pending.push(byte);
            }
        }
        Ok(())
    }

    async fn read_line_until(&mut self, terminator: u8) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        while let Some(byte) = self.inbound.pop_front() {
            line.push(byte);
            if byte == terminator {
                break;
            }
        }
        Ok(line)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.inbound.clear();
        self.input_clears += 1;
        Ok(())
    }

    fn clear_output_buffer(&mut self) -> io::Result<()> {
        self.pending.clear();
        Ok(())
    }
}
