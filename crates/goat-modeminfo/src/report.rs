//! Collecting and rendering modem information.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use goat_at::{AtError, AtResult, CommandResult, Engine, UnsolicitedNotification};
use serde::Serialize;
use tracing::debug;

/// Commands queried by default, in order.
pub const INFO_COMMANDS: &[&str] = &[
    "I", "+GCAP", "+CMEE=2", "+CGMI", "+CGMM", "+CGMR", "+CGSN", "+CSQ", "+CIMI", "+CREG?",
    "+CNUM", "+CPIN?", "+CEER", "+CSCA?", "+CSMS?", "+CSMS=?", "+CPMS=?", "+CNMI?", "+CNMI=?",
    "+CNMA=?", "+CMGF=?",
];

/// Outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandReport {
    /// Command body, without the `AT` prefix.
    pub command: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandReport {
    pub fn new(command: &str, result: AtResult<CommandResult>) -> Self {
        match result {
            Ok(result) => CommandReport {
                command: command.to_string(),
                error: result
                    .status
                    .as_error()
                    .map(|e| AtError::Device(e.clone()).to_string()),
                lines: result.lines,
            },
            Err(e) => CommandReport {
                command: command.to_string(),
                lines: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }

    /// Print as `AT<command>` followed by one indented line per response line.
    pub fn write_text(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "AT{}", self.command)?;
        for line in &self.lines {
            writeln!(out, " {}", line)?;
        }
        if let Some(error) = &self.error {
            writeln!(out, " {}", error)?;
        }
        Ok(())
    }
}

/// Everything one run found out.
#[derive(Debug, Default, Serialize)]
pub struct Report {
    pub device: String,
    pub echo: bool,
    pub commands: Vec<CommandReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sms: Option<CommandReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<UnsolicitedNotification>,
}

/// Run each command with its own deadline. Failures are recorded, not fatal,
/// except a closed transport which ends the run.
pub fn query(engine: &Engine, commands: &[&str], timeout: Duration) -> Vec<CommandReport> {
    let mut reports = Vec::with_capacity(commands.len());
    for cmd in commands {
        let result = engine.command(Instant::now() + timeout, cmd);
        let closed = matches!(result, Err(AtError::TransportClosed));
        reports.push(CommandReport::new(cmd, result));
        if closed {
            debug!("transport closed, skipping remaining commands");
            break;
        }
    }
    reports
}

/// Send one SMS through `+CMGS`.
pub fn send_sms(engine: &Engine, to: &str, body: &str, timeout: Duration) -> CommandReport {
    let header = format!("+CMGS=\"{}\"", to);
    let result = engine.sms_command(Instant::now() + timeout, &header, body);
    CommandReport::new(&header, result)
}

/// Collect unsolicited notifications until `duration` passes, `stop` is set,
/// or the engine closes. Each is handed to `on_notification` as it arrives.
pub fn watch(
    engine: &Engine,
    duration: Duration,
    stop: &AtomicBool,
    mut on_notification: impl FnMut(&UnsolicitedNotification),
) -> Vec<UnsolicitedNotification> {
    let subscription = engine.subscribe();
    let until = Instant::now() + duration;
    let mut seen = Vec::new();

    while !stop.load(Ordering::Relaxed) && !engine.is_closed() {
        let now = Instant::now();
        if now >= until {
            break;
        }
        let slice = (until - now).min(Duration::from_millis(100));
        if let Some(notification) = subscription.recv_timeout(slice) {
            on_notification(&notification);
            seen.push(notification);
        }
    }
    seen
}

/// Text form of a notification: RFC 3339 timestamp, the line, then any
/// trailing lines indented.
pub fn write_notification(
    out: &mut impl Write,
    notification: &UnsolicitedNotification,
) -> std::io::Result<()> {
    writeln!(out, "{} {}", notification.observed_at.to_rfc3339(), notification.text)?;
    for line in &notification.trailing {
        writeln!(out, " {}", line)?;
    }
    Ok(())
}
