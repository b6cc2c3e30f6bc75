//! The AT command engine.
//!
//! One engine drives one device. Callers on any thread issue commands; a FIFO
//! gate admits them one at a time, and a background reader thread routes every
//! line the device sends either to the admitted command, to the stale-exchange
//! drain, or to the unsolicited dispatcher.
//!
//! ```text
//! Idle -> Sending -> AwaitingEcho -> AwaitingBody -> (terminal) -> Idle
//!                         |               |
//!                         +-- deadline ---+--> Draining -> Idle
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use goat_metrics::{metric_defs, DeviceLabels};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::codec::{LineCodec, LineReader};
use crate::command::{encode_escape, encode_payload, CommandRequest, CommandResult};
use crate::config::EngineConfig;
use crate::dispatch::{Dispatcher, Subscription, UnsolicitedNotification};
use crate::error::{is_closure, AtError, AtResult};
use crate::gate::{Gate, GateGuard};
use crate::reader::{drain_line, Router};
use crate::response::{classify, is_prompt, Classified, Status};
use crate::transport::Transport;

/// Protocol state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No exchange; lines go to the dispatcher.
    Idle,
    /// Writing the command frame.
    Sending,
    /// Expecting the device to echo the command.
    AwaitingEcho,
    /// Collecting response lines until a final result code.
    AwaitingBody,
    /// Discarding the remains of an abandoned exchange.
    Draining {
        /// End of the grace window.
        until: Instant,
        /// Lines left before giving up.
        remaining: usize,
    },
}

impl Phase {
    /// Whether a command owns the line stream.
    pub fn is_active(&self) -> bool {
        matches!(self, Phase::Sending | Phase::AwaitingEcho | Phase::AwaitingBody)
    }
}

/// Snapshot of the engine's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineState {
    pub in_flight: bool,
    pub echo_enabled: bool,
    pub initialized: bool,
}

pub(crate) struct Exchange {
    pub(crate) phase: Phase,
    /// Name of the in-flight command, e.g. `+CREG`.
    pub(crate) command: Option<String>,
}

/// State shared between callers and the reader thread.
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) labels: DeviceLabels,
    pub(crate) exchange: Mutex<Exchange>,
    /// Signalled whenever the phase returns to `Idle` or the transport closes.
    pub(crate) idle: Condvar,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) closed: AtomicBool,
    pub(crate) shutdown: AtomicBool,
    gate: Gate,
    writer: Mutex<Box<dyn Write + Send>>,
    lines: Receiver<String>,
    echo: AtomicBool,
    initialized: AtomicBool,
}

impl Shared {
    /// Mark the transport closed and end every subscription.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.dispatcher.close();
        let _exchange = self.exchange.lock();
        self.idle.notify_all();
    }
}

/// AT command engine for a single device.
///
/// # Example
///
/// ```no_run
/// use std::net::TcpStream;
/// use std::time::{Duration, Instant};
/// use goat_at::{Engine, EngineConfig};
///
/// let stream = TcpStream::connect("127.0.0.1:2000")?;
/// let engine = Engine::new(stream, EngineConfig::default())?;
/// engine.init(Instant::now() + Duration::from_millis(400))?;
///
/// let result = engine.command(Instant::now() + Duration::from_millis(400), "+CSQ")?;
/// for line in result.into_lines()? {
///     println!("{}", line);
/// }
/// # Ok::<(), goat_at::AtError>(())
/// ```
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// Take ownership of a transport and start the reader thread.
    pub fn new<T: Transport>(transport: T, config: EngineConfig) -> AtResult<Self> {
        let (reader, writer) = transport.split(config.poll_interval())?;
        let (tx, rx) = crossbeam_channel::unbounded();

        let dispatcher = Dispatcher::new(config.subscriber_capacity, &config.name);
        for indication in &config.indications {
            dispatcher.add_indication(&indication.prefix, indication.trailing_lines)?;
        }

        let reader = LineReader::with_codec(
            reader,
            LineCodec::with_max_line_length(config.max_line_length),
        );
        let thread_name = format!("{}-reader", config.name);

        let shared = Arc::new(Shared {
            labels: DeviceLabels::new(config.name.clone()),
            config,
            exchange: Mutex::new(Exchange {
                phase: Phase::Idle,
                command: None,
            }),
            idle: Condvar::new(),
            dispatcher,
            closed: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            gate: Gate::new(),
            writer: Mutex::new(Box::new(writer)),
            lines: rx,
            echo: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
        });

        let router = Router::new(shared.clone(), tx);
        thread::Builder::new()
            .name(thread_name)
            .spawn(move || router.run(reader))?;

        Ok(Engine { shared })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Snapshot of the in-flight, echo, and initialized flags.
    pub fn state(&self) -> EngineState {
        EngineState {
            in_flight: self.phase().is_active(),
            echo_enabled: self.shared.echo.load(Ordering::Acquire),
            initialized: self.shared.initialized.load(Ordering::Acquire),
        }
    }

    pub fn phase(&self) -> Phase {
        self.shared.exchange.lock().phase
    }

    /// Whether a caller holds the admission gate.
    pub fn is_busy(&self) -> bool {
        self.shared.gate.is_held()
    }

    /// Whether the transport has closed. Terminal.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Subscribe to unsolicited notifications.
    pub fn subscribe(&self) -> Subscription {
        self.shared.dispatcher.subscribe()
    }

    /// Register an unsolicited result code prefix, e.g. `+CMTI:`.
    ///
    /// Matching lines go to subscribers even while a command is in flight,
    /// together with the `trailing_lines` lines that follow them.
    pub fn add_indication(&self, prefix: &str, trailing_lines: usize) -> AtResult<()> {
        self.shared.dispatcher.add_indication(prefix, trailing_lines)
    }

    /// Returns whether the prefix was registered.
    pub fn remove_indication(&self, prefix: &str) -> bool {
        self.shared.dispatcher.remove_indication(prefix)
    }

    /// Handshake with the device and work out whether it echoes commands.
    ///
    /// Safe to call repeatedly; each call re-derives the echo state.
    pub fn init(&self, deadline: Instant) -> AtResult<()> {
        let _turn = self.admit(deadline)?;

        if self.shared.config.escape_on_init {
            self.escape(deadline)?;
        }

        let probe = CommandRequest::new(self.shared.config.probe.clone(), deadline)?;
        let echo = self.probe(&probe)?;
        self.shared.echo.store(echo, Ordering::Release);
        self.shared.initialized.store(true, Ordering::Release);
        debug!("Engine[{}]: initialised, echo {}", self.shared.config.name, echo);

        for cmd in &self.shared.config.init_commands {
            let request = CommandRequest::new(cmd.clone(), deadline)?;
            self.run(&request, None)?.into_lines()?;
        }

        Ok(())
    }

    /// Send `AT<text>` and collect its response.
    pub fn command(&self, deadline: Instant, text: &str) -> AtResult<CommandResult> {
        let request = CommandRequest::new(text, deadline)?;
        self.execute(&request)
    }

    /// Run a prepared request.
    pub fn execute(&self, request: &CommandRequest) -> AtResult<CommandResult> {
        let started = Instant::now();
        let result = self
            .admit(request.deadline())
            .and_then(|_turn| self.run(request, None));
        self.record(&result, started);
        result
    }

    /// Send `AT<header>`, wait for the `"> "` prompt, then send `body`
    /// terminated by SUB, and collect the response.
    ///
    /// If the prompt does not arrive the body is never written.
    pub fn sms_command(
        &self,
        deadline: Instant,
        header: &str,
        body: &str,
    ) -> AtResult<CommandResult> {
        let request = CommandRequest::new(header, deadline)?;
        // Reject a bad payload before touching the device.
        encode_payload(body)?;

        let started = Instant::now();
        let result = self
            .admit(deadline)
            .and_then(|_turn| self.run(&request, Some(body)));
        self.record(&result, started);
        result
    }

    // ========================================================================
    // Exchange
    // ========================================================================

    fn admit(&self, deadline: Instant) -> AtResult<GateGuard<'_>> {
        self.check_open()?;
        let turn = self.shared.gate.acquire(deadline).ok_or(AtError::Timeout)?;
        self.wait_idle(deadline)?;
        if Instant::now() >= deadline {
            return Err(AtError::Timeout);
        }
        Ok(turn)
    }

    fn check_open(&self) -> AtResult<()> {
        if self.is_closed() {
            return Err(AtError::TransportClosed);
        }
        Ok(())
    }

    /// Wait for a previous exchange's drain to finish.
    ///
    /// The drain may use at most half of the caller's remaining time; after
    /// that it is cut short so the caller still gets to send.
    fn wait_idle(&self, deadline: Instant) -> AtResult<()> {
        let start = Instant::now();
        let cutoff = start + deadline.saturating_duration_since(start) / 2;

        let mut exchange = self.shared.exchange.lock();
        loop {
            self.check_open()?;
            let phase = exchange.phase;
            match phase {
                Phase::Idle => return Ok(()),
                Phase::Draining { until, .. } => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(AtError::Timeout);
                    }
                    if now >= until {
                        debug!(
                            "Engine[{}]: stale exchange did not finish in the grace window",
                            self.shared.config.name
                        );
                        exchange.phase = Phase::Idle;
                        return Ok(());
                    }
                    if now >= cutoff {
                        debug!(
                            "Engine[{}]: ending drain early for the next command",
                            self.shared.config.name
                        );
                        exchange.phase = Phase::Idle;
                        return Ok(());
                    }
                    self.shared.idle.wait_until(&mut exchange, until.min(cutoff));
                }
                phase => {
                    warn!(
                        "Engine[{}]: admitted while {:?}, resetting",
                        self.shared.config.name, phase
                    );
                    exchange.phase = Phase::Idle;
                    return Ok(());
                }
            }
        }
    }

    fn run(&self, request: &CommandRequest, payload: Option<&str>) -> AtResult<CommandResult> {
        let deadline = request.deadline();
        let frame = request.encode(self.shared.config.line_ending);

        trace!(
            "Engine[{}]: sending '{}' ({} bytes)",
            self.shared.config.name,
            request.command_line(),
            frame.len()
        );
        self.begin(request);
        if let Err(e) = self.write(&frame) {
            self.finish();
            return Err(e);
        }

        let echo = self.shared.echo.load(Ordering::Acquire);
        self.set_phase(if echo { Phase::AwaitingEcho } else { Phase::AwaitingBody });
        let mut collector = Collector::new(request, echo);

        if let Some(body) = payload {
            if let Some(status) = self.await_prompt(&mut collector, deadline)? {
                self.finish();
                return Ok(collector.into_result(status));
            }

            trace!("Engine[{}]: prompt received, sending payload", self.shared.config.name);
            if let Err(e) = self.write(&encode_payload(body)?) {
                self.finish();
                return Err(e);
            }
            collector.expect_payload_echo(body);
        }

        loop {
            let line = match self.next_line(deadline) {
                Ok(line) => line,
                Err(AtError::Timeout) => {
                    self.abandon();
                    return Err(AtError::Timeout);
                }
                Err(e) => {
                    self.finish();
                    return Err(e);
                }
            };
            self.set_phase(Phase::AwaitingBody);

            if let Some(status) = collector.push(line) {
                self.finish();
                return Ok(collector.into_result(status));
            }
        }
    }

    /// Read until the data prompt; a final result code instead ends the exchange.
    fn await_prompt(
        &self,
        collector: &mut Collector<'_>,
        deadline: Instant,
    ) -> AtResult<Option<Status>> {
        loop {
            let line = match self.next_line(deadline) {
                Ok(line) => line,
                Err(AtError::Timeout) => {
                    self.abandon();
                    return Err(AtError::PromptNotReceived);
                }
                Err(e) => {
                    self.finish();
                    return Err(e);
                }
            };
            self.set_phase(Phase::AwaitingBody);

            if is_prompt(&line) {
                return Ok(None);
            }
            if let Some(status) = collector.push(line) {
                return Ok(Some(status));
            }
        }
    }

    /// Send the probe and report whether the device echoed it.
    fn probe(&self, request: &CommandRequest) -> AtResult<bool> {
        let deadline = request.deadline();

        self.begin(request);
        if let Err(e) = self.write(&request.encode(self.shared.config.line_ending)) {
            self.finish();
            return Err(e);
        }
        self.set_phase(Phase::AwaitingEcho);

        let first = match self.next_line(deadline) {
            Ok(line) => line,
            Err(AtError::Timeout) => {
                self.abandon();
                return Err(AtError::NoResponse);
            }
            Err(e) => {
                self.finish();
                return Err(e);
            }
        };

        if let Classified::Terminal(status) = classify(&first) {
            self.finish();
            return match status {
                Status::Ok => Ok(false),
                Status::Error(e) => Err(AtError::Device(e)),
            };
        }

        if !request.is_echo(&first) {
            self.abandon();
            return Err(AtError::UnexpectedDevice(first));
        }
        self.set_phase(Phase::AwaitingBody);

        loop {
            let line = match self.next_line(deadline) {
                Ok(line) => line,
                Err(AtError::Timeout) => {
                    self.abandon();
                    return Err(AtError::UnexpectedDevice(format!(
                        "no final result after echo of '{}'",
                        first
                    )));
                }
                Err(e) => {
                    self.finish();
                    return Err(e);
                }
            };

            match classify(&line) {
                Classified::Terminal(Status::Ok) => {
                    self.finish();
                    return Ok(true);
                }
                Classified::Terminal(Status::Error(e)) => {
                    self.finish();
                    return Err(AtError::Device(e));
                }
                Classified::Body(line) => {
                    debug!("Engine[{}]: probe response '{}'", self.shared.config.name, line);
                }
            }
        }
    }

    /// Send ESC and swallow whatever the device says about it.
    fn escape(&self, deadline: Instant) -> AtResult<()> {
        let until = (Instant::now() + self.shared.config.escape_grace()).min(deadline);
        self.shared.exchange.lock().phase = Phase::Draining {
            until,
            remaining: self.shared.config.drain_max_lines,
        };

        if let Err(e) = self.write(&encode_escape(self.shared.config.line_ending)) {
            self.finish();
            return Err(e);
        }
        self.wait_idle(deadline)
    }

    fn begin(&self, request: &CommandRequest) {
        let mut exchange = self.shared.exchange.lock();
        exchange.phase = Phase::Sending;
        exchange.command = Some(request.name().to_string());
    }

    fn set_phase(&self, phase: Phase) {
        self.shared.exchange.lock().phase = phase;
    }

    /// End the exchange normally.
    fn finish(&self) {
        let mut exchange = self.shared.exchange.lock();
        exchange.phase = Phase::Idle;
        exchange.command = None;

        // Anything queued behind the final result code is not ours.
        for line in self.shared.lines.try_iter() {
            self.shared.dispatcher.publish(UnsolicitedNotification::new(line));
        }
        self.shared.idle.notify_all();
    }

    /// Give up on the exchange; its remaining lines will be drained.
    fn abandon(&self) {
        let config = &self.shared.config;
        debug!("Engine[{}]: abandoning exchange", config.name);

        let mut exchange = self.shared.exchange.lock();
        exchange.command = None;
        exchange.phase = Phase::Draining {
            until: Instant::now() + config.drain_grace(),
            remaining: config.drain_max_lines,
        };
        for line in self.shared.lines.try_iter() {
            drain_line(&self.shared, &mut exchange.phase, line);
        }
    }

    fn next_line(&self, deadline: Instant) -> AtResult<String> {
        match self.shared.lines.recv_deadline(deadline) {
            Ok(line) => Ok(line),
            Err(RecvTimeoutError::Timeout) => Err(AtError::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                self.shared.closed.store(true, Ordering::Release);
                Err(AtError::TransportClosed)
            }
        }
    }

    fn write(&self, data: &[u8]) -> AtResult<()> {
        let mut writer = self.shared.writer.lock();
        match writer.write_all(data).and_then(|_| writer.flush()) {
            Ok(()) => Ok(()),
            Err(e) if is_closure(&e) => {
                warn!("Engine[{}]: write failed: {}", self.shared.config.name, e);
                self.shared.shutdown.store(true, Ordering::Release);
                self.shared.close();
                Err(AtError::TransportClosed)
            }
            Err(e) => Err(AtError::Io(e)),
        }
    }

    fn record(&self, result: &AtResult<CommandResult>, started: Instant) {
        let outcome = match result {
            Ok(r) if r.is_ok() => "ok",
            Ok(_) => "device_error",
            Err(e) => e.outcome(),
        };
        let labels = &self.shared.labels;
        metrics::counter!(
            metric_defs::AT_COMMANDS.name,
            &labels.with(&[("outcome", outcome.to_string())])
        )
        .increment(1);
        metrics::histogram!(metric_defs::AT_COMMAND_DURATION.name, &labels.to_labels())
            .record(started.elapsed().as_secs_f64());
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
    }
}

/// Collects the response lines of one exchange.
struct Collector<'a> {
    request: &'a CommandRequest,
    awaiting_echo: bool,
    payload: Option<&'a str>,
    lines: Vec<String>,
}

impl<'a> Collector<'a> {
    fn new(request: &'a CommandRequest, echo: bool) -> Self {
        Collector {
            request,
            awaiting_echo: echo,
            payload: None,
            lines: Vec::new(),
        }
    }

    fn expect_payload_echo(&mut self, payload: &'a str) {
        self.payload = Some(payload);
    }

    /// Feed a line; returns the status once a final result code arrives.
    fn push(&mut self, line: String) -> Option<Status> {
        if self.awaiting_echo {
            self.awaiting_echo = false;
            if self.request.is_echo(&line) {
                return None;
            }
            debug!("expected echo of '{}', got '{}'", self.request.command_line(), line);
        }

        // Echo state may have drifted: an echo-shaped line before any body
        // line is taken as an echo.
        if self.lines.is_empty() && self.is_echo_like(&line) {
            debug!("dropping echo-like line '{}'", line);
            return None;
        }

        match classify(&line) {
            Classified::Terminal(status) => Some(status),
            Classified::Body(line) => {
                self.lines.push(line);
                None
            }
        }
    }

    fn is_echo_like(&self, line: &str) -> bool {
        if self.request.is_echo(line) {
            return true;
        }
        match self.payload {
            Some(payload) => {
                let line = line.trim_end_matches('\x1a');
                is_prompt(line) || line == payload || line.strip_prefix("> ") == Some(payload)
            }
            None => false,
        }
    }

    fn into_result(self, status: Status) -> CommandResult {
        CommandResult {
            lines: self.lines,
            status,
        }
    }
}
