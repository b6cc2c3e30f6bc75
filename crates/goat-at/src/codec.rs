//! Line-based codec for modem responses.
//!
//! Modems terminate response lines with CR, LF, or CRLF and usually surround
//! real content with blank lines. The codec:
//! - Accumulates received bytes until a complete line is found
//! - Accepts any of the three terminators and suppresses empty lines
//! - Surfaces the unterminated data-mode prompt (`"> "`) as a line of its own
//! - Keeps partial lines across reads, so a slow device loses nothing

use std::io::Read;
use std::time::Instant;

use bytes::BytesMut;
use tracing::warn;

use crate::error::{is_timeout, AtError, AtResult};
use crate::response::PROMPT;

/// Default bound on a pending line.
pub const MAX_LINE_LENGTH: usize = 4096;

/// A codec for splitting modem output into lines.
#[derive(Debug)]
pub struct LineCodec {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
    /// Pending bytes beyond this are surfaced as a line.
    max_line_length: usize,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCodec {
    /// Create a new line codec.
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        LineCodec {
            buffer: BytesMut::with_capacity(256),
            max_line_length: max_line_length.max(PROMPT.len()),
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode a complete line from the buffer.
    ///
    /// Returns `None` if more data is needed; partial data stays buffered.
    pub fn decode_line(&mut self) -> Option<String> {
        // Leading terminators are the tail of a previous line or blank lines.
        let skip = self
            .buffer
            .iter()
            .take_while(|&&b| b == b'\r' || b == b'\n')
            .count();
        let _ = self.buffer.split_to(skip);

        if self.buffer.is_empty() {
            return None;
        }

        if let Some(end) = self.buffer.iter().position(|&b| b == b'\r' || b == b'\n') {
            let line_data = self.buffer.split_to(end);
            return Some(String::from_utf8_lossy(&line_data).into_owned());
        }

        // The prompt is never terminated.
        if &self.buffer[..] == PROMPT.as_bytes() {
            let _ = self.buffer.split_to(PROMPT.len());
            return Some(PROMPT.to_string());
        }

        if self.buffer.len() > self.max_line_length {
            warn!(
                "line exceeds {} bytes without a terminator, flushing",
                self.max_line_length
            );
            let line_data = self.buffer.split();
            return Some(String::from_utf8_lossy(&line_data).into_owned());
        }

        None
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Get the current buffer contents as a string (for debugging).
    pub fn buffer_as_str(&self) -> String {
        String::from_utf8_lossy(&self.buffer).to_string()
    }
}

/// Reads lines from a byte stream with per-call deadlines.
///
/// The stream should have a read timeout; the deadline is only checked
/// between reads.
pub struct LineReader<R> {
    inner: R,
    codec: LineCodec,
    read_buf: Box<[u8]>,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_codec(inner, LineCodec::new())
    }

    pub fn with_codec(inner: R, codec: LineCodec) -> Self {
        LineReader {
            inner,
            codec,
            read_buf: vec![0u8; 1024].into_boxed_slice(),
        }
    }

    /// Block until a line is available or the deadline elapses.
    ///
    /// Fails with [`AtError::Timeout`] at the deadline, keeping any partial
    /// line for the next call, and with [`AtError::TransportClosed`] on EOF or a
    /// hard read error.
    pub fn next_line(&mut self, deadline: Instant) -> AtResult<String> {
        loop {
            if let Some(line) = self.codec.decode_line() {
                return Ok(line);
            }

            if Instant::now() >= deadline {
                return Err(AtError::Timeout);
            }

            match self.inner.read(&mut self.read_buf) {
                Ok(0) => return Err(AtError::TransportClosed),
                Ok(n) => self.codec.push(&self.read_buf[..n]),
                Err(e) if is_timeout(&e) => {}
                Err(e) => {
                    warn!("read failed: {}", e);
                    return Err(AtError::TransportClosed);
                }
            }
        }
    }

    /// Get the number of bytes held back as a partial line.
    pub fn buffered_len(&self) -> usize {
        self.codec.buffered_len()
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }
}
