//! Error types for the AT engine.

use std::io;

use thiserror::Error;

use crate::response::DeviceError;

/// Errors returned by the AT engine.
///
/// None of these are retried by the engine; retry policy belongs to the caller.
#[derive(Debug, Error)]
pub enum AtError {
    /// The deadline elapsed while waiting for the gate or the device.
    #[error("timeout waiting for modem")]
    Timeout,

    /// The underlying stream reported EOF or a hard read error.
    ///
    /// Terminal: every later call on the same engine fails with this error.
    #[error("transport closed")]
    TransportClosed,

    /// The device completed the exchange with an error result code.
    #[error("modem error: {0}")]
    Device(DeviceError),

    /// The data-mode prompt did not arrive before the deadline.
    #[error("data prompt not received")]
    PromptNotReceived,

    /// The device did not answer the Init probe.
    #[error("no response from modem")]
    NoResponse,

    /// The Init probe reply could not be recognised.
    #[error("unexpected device response: {0}")]
    UnexpectedDevice(String),

    /// Command text that would corrupt the framing.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// An indication with this prefix is already registered.
    #[error("indication already registered: {0}")]
    IndicationExists(String),

    /// A write failed for a reason other than closure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AtError {
    /// Short label used for the `outcome` metric label.
    pub fn outcome(&self) -> &'static str {
        match self {
            AtError::Timeout => "timeout",
            AtError::TransportClosed => "closed",
            AtError::Device(_) => "device_error",
            AtError::PromptNotReceived => "prompt_missing",
            _ => "other",
        }
    }
}

impl From<DeviceError> for AtError {
    fn from(e: DeviceError) -> Self {
        AtError::Device(e)
    }
}

/// Result type alias for AT operations.
pub type AtResult<T> = Result<T, AtError>;

/// Whether an I/O error means the stream is gone for good.
pub(crate) fn is_closure(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// Whether an I/O error is a read timeout rather than a failure.
pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
