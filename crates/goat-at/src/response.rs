//! Response line classification.
//!
//! Every line a modem sends while a command is in flight is either part of the
//! command's information response or a final result code that ends it:
//! - `OK`
//! - `ERROR`
//! - `+CME ERROR: <code>` (equipment errors) and `+CMS ERROR: <code>` (message
//!   service errors), where `<code>` is numeric or, after `AT+CMEE=2`, verbose
//! - the call result codes `NO CARRIER`, `BUSY`, `NO ANSWER`, `NO DIALTONE`
//!
//! [`classify`] is pure so the state machine can be tested without a device.

use std::fmt;

/// The data-mode prompt sent by the modem when it wants payload bytes.
pub const PROMPT: &str = "> ";

const CME_ERROR: &str = "+CME ERROR:";
const CMS_ERROR: &str = "+CMS ERROR:";

/// An error code reported by `+CME ERROR:` or `+CMS ERROR:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// Numeric report (`AT+CMEE=1`).
    Numeric(u32),
    /// Verbose report (`AT+CMEE=2`).
    Text(String),
}

impl ErrorCode {
    /// `None` when the device gave no code at all.
    fn parse(text: &str) -> Option<ErrorCode> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(match text.parse() {
            Ok(n) => ErrorCode::Numeric(n),
            Err(_) => ErrorCode::Text(text.to_string()),
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Numeric(n) => write!(f, "{}", n),
            ErrorCode::Text(s) => f.write_str(s),
        }
    }
}

/// V.250 call result codes that end an exchange unsuccessfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallResult {
    NoCarrier,
    Busy,
    NoAnswer,
    NoDialtone,
}

impl CallResult {
    /// The result code as sent by the modem.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallResult::NoCarrier => "NO CARRIER",
            CallResult::Busy => "BUSY",
            CallResult::NoAnswer => "NO ANSWER",
            CallResult::NoDialtone => "NO DIALTONE",
        }
    }

    fn from_line(line: &str) -> Option<CallResult> {
        match line {
            "NO CARRIER" => Some(CallResult::NoCarrier),
            "BUSY" => Some(CallResult::Busy),
            "NO ANSWER" => Some(CallResult::NoAnswer),
            "NO DIALTONE" => Some(CallResult::NoDialtone),
            _ => None,
        }
    }
}

/// An error reported by the device as the final result of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// `ERROR`, or a `+CME`/`+CMS` error that carries no code.
    Generic,
    /// `+CME ERROR: <code>`.
    Cme(ErrorCode),
    /// `+CMS ERROR: <code>`.
    Cms(ErrorCode),
    /// A call result code.
    Call(CallResult),
}

impl DeviceError {
    /// The reported error code, if the device gave one.
    pub fn code(&self) -> Option<&ErrorCode> {
        match self {
            DeviceError::Cme(code) | DeviceError::Cms(code) => Some(code),
            DeviceError::Generic | DeviceError::Call(_) => None,
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Generic => f.write_str("ERROR"),
            DeviceError::Cme(code) => write!(f, "CME error {}", code),
            DeviceError::Cms(code) => write!(f, "CMS error {}", code),
            DeviceError::Call(result) => f.write_str(result.as_str()),
        }
    }
}

/// Terminal status of a command exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error(DeviceError),
}

impl Status {
    /// Check if this is a successful completion.
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    /// Get the device error if the exchange failed.
    pub fn as_error(&self) -> Option<&DeviceError> {
        match self {
            Status::Error(e) => Some(e),
            Status::Ok => None,
        }
    }
}

/// Classification of a single response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// Part of the information response.
    Body(String),
    /// A final result code.
    Terminal(Status),
}

/// Classify a response line.
pub fn classify(line: &str) -> Classified {
    match terminal_status(line) {
        Some(status) => Classified::Terminal(status),
        None => Classified::Body(line.to_string()),
    }
}

/// The terminal status carried by `line`, or `None` for a body line.
pub fn terminal_status(line: &str) -> Option<Status> {
    let text = line.trim();

    if text == "OK" {
        return Some(Status::Ok);
    }

    if text == "ERROR" {
        return Some(Status::Error(DeviceError::Generic));
    }

    if let Some(rest) = text.strip_prefix(CME_ERROR) {
        let error = ErrorCode::parse(rest).map_or(DeviceError::Generic, DeviceError::Cme);
        return Some(Status::Error(error));
    }

    if let Some(rest) = text.strip_prefix(CMS_ERROR) {
        let error = ErrorCode::parse(rest).map_or(DeviceError::Generic, DeviceError::Cms);
        return Some(Status::Error(error));
    }

    CallResult::from_line(text).map(|r| Status::Error(DeviceError::Call(r)))
}

/// Check if the line is the data-mode prompt.
///
/// Some modems omit the trailing space, so a lone `>` also counts.
pub fn is_prompt(line: &str) -> bool {
    line == PROMPT || line.trim_end() == ">"
}
