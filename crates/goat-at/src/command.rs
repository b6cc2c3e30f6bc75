//! Command requests, results, and frame encoding.
//!
//! A command body such as `+CSQ` goes out on the wire as `AT+CSQ` followed by
//! the configured line ending. Data-mode payloads (SMS text) are terminated by
//! a single SUB byte instead.

use std::time::Instant;

use crate::config::LineEnding;
use crate::error::{AtError, AtResult};
use crate::response::Status;

/// SUB (Ctrl-Z), terminates a data-mode payload.
pub const DATA_TERMINATOR: u8 = 0x1A;

/// ESC, aborts a pending data-mode prompt.
pub const ESCAPE: u8 = 0x1B;

/// A command submitted to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    text: String,
    deadline: Instant,
}

impl CommandRequest {
    /// Create a request, rejecting text that would break the framing.
    pub fn new(text: impl Into<String>, deadline: Instant) -> AtResult<Self> {
        let text = text.into();
        if text.contains(['\r', '\n']) {
            return Err(AtError::InvalidCommand(format!(
                "command contains a line terminator: {:?}",
                text
            )));
        }
        Ok(CommandRequest { text, deadline })
    }

    /// The command body, without the `AT` prefix.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// The full command as the device sees it, e.g. `AT+CSQ`.
    pub fn command_line(&self) -> String {
        format!("AT{}", self.text)
    }

    /// Encode the request for transmission.
    pub fn encode(&self, ending: LineEnding) -> Vec<u8> {
        let ending = ending.as_bytes();
        let mut buf = Vec::with_capacity(2 + self.text.len() + ending.len());
        buf.extend_from_slice(b"AT");
        buf.extend_from_slice(self.text.as_bytes());
        buf.extend_from_slice(ending);
        buf
    }

    /// Whether `line` is the device echoing this command.
    ///
    /// Matches the full command line or the bare body, since some devices
    /// echo without the prefix.
    pub fn is_echo(&self, line: &str) -> bool {
        let line = line.trim_end();
        line.strip_prefix("AT").is_some_and(|rest| rest == self.text) || line == self.text
    }

    /// Command name used to tell a query's own response from an indication,
    /// e.g. `+CREG` for `+CREG?` or `+CREG=2`.
    pub fn name(&self) -> &str {
        let end = self.text.find(['=', '?']).unwrap_or(self.text.len());
        &self.text[..end]
    }
}

/// Encode a data-mode payload followed by the SUB terminator.
pub fn encode_payload(body: &str) -> AtResult<Vec<u8>> {
    if body.bytes().any(|b| b == DATA_TERMINATOR || b == ESCAPE) {
        return Err(AtError::InvalidCommand(
            "payload contains a SUB or ESC byte".to_string(),
        ));
    }
    let mut buf = Vec::with_capacity(body.len() + 1);
    buf.extend_from_slice(body.as_bytes());
    buf.push(DATA_TERMINATOR);
    Ok(buf)
}

/// Encode the escape sequence sent at Init.
pub fn encode_escape(ending: LineEnding) -> Vec<u8> {
    let mut buf = vec![ESCAPE];
    buf.extend_from_slice(ending.as_bytes());
    buf
}

/// Outcome of a completed command exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Information response lines, excluding the echo and the final result code.
    pub lines: Vec<String>,
    /// How the exchange ended.
    pub status: Status,
}

impl CommandResult {
    /// Check if the exchange ended with `OK`.
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Take the response lines, turning an error status into [`AtError::Device`].
    pub fn into_lines(self) -> AtResult<Vec<String>> {
        match self.status {
            Status::Ok => Ok(self.lines),
            Status::Error(e) => Err(AtError::Device(e)),
        }
    }
}
