//! Scripted in-memory modem for engine tests.

#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use goat_at::{Engine, EngineConfig};
use parking_lot::Mutex;

/// Maps a written frame to the bytes the modem sends back.
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

/// Test-side handle on the mock modem.
#[derive(Clone)]
pub struct MockModem {
    to_host: Sender<Vec<u8>>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicBool>,
    writes_broken: Arc<AtomicBool>,
    reader_dropped: Arc<AtomicBool>,
}

impl MockModem {
    /// Create a modem answering writes with `responder`, plus the transport
    /// halves to hand to the engine.
    pub fn new(responder: Responder) -> (Self, (MockReader, MockWriter)) {
        let (to_host, from_modem) = crossbeam_channel::unbounded();
        let modem = MockModem {
            to_host,
            writes: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            writes_broken: Arc::new(AtomicBool::new(false)),
            reader_dropped: Arc::new(AtomicBool::new(false)),
        };
        let reader = MockReader {
            rx: from_modem,
            pending: Vec::new(),
            closed: modem.closed.clone(),
            dropped: modem.reader_dropped.clone(),
        };
        let writer = MockWriter {
            responder,
            modem: modem.clone(),
        };
        (modem, (reader, writer))
    }

    /// A modem that never answers.
    pub fn silent() -> (Self, (MockReader, MockWriter)) {
        Self::new(Box::new(|_| Vec::new()))
    }

    /// A modem answering exact frames from a table.
    pub fn scripted(script: &[(&str, &str)]) -> (Self, (MockReader, MockWriter)) {
        let script: Vec<(Vec<u8>, Vec<u8>)> = script
            .iter()
            .map(|(frame, reply)| (frame.as_bytes().to_vec(), reply.as_bytes().to_vec()))
            .collect();
        Self::new(Box::new(move |frame| {
            script
                .iter()
                .find(|(f, _)| f.as_slice() == frame)
                .map(|(_, reply)| reply.clone())
                .unwrap_or_default()
        }))
    }

    /// Send bytes to the host as if the modem had emitted them.
    pub fn inject(&self, data: &[u8]) {
        self.to_host.send(data.to_vec()).unwrap();
    }

    /// Every write the host made, one entry per write call.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    /// All written bytes, concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.writes.lock().concat()
    }

    /// Hang up: reads hit EOF once drained, writes fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Make writes fail while reads keep timing out.
    pub fn break_writes(&self) {
        self.writes_broken.store(true, Ordering::Release);
    }

    /// Whether the engine has let go of the read half.
    pub fn reader_dropped(&self) -> bool {
        self.reader_dropped.load(Ordering::Acquire)
    }
}

pub struct MockReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    closed: Arc<AtomicBool>,
    dropped: Arc<AtomicBool>,
}

impl Drop for MockReader {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::Release);
    }
}

impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(Duration::from_millis(5)) {
                Ok(chunk) => self.pending = chunk,
                Err(RecvTimeoutError::Timeout) if self.closed.load(Ordering::Acquire) => {
                    return Ok(0)
                }
                Err(RecvTimeoutError::Timeout) => return Err(io::ErrorKind::TimedOut.into()),
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

pub struct MockWriter {
    responder: Responder,
    modem: MockModem,
}

impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.modem.closed.load(Ordering::Acquire)
            || self.modem.writes_broken.load(Ordering::Acquire)
        {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.modem.writes.lock().push(buf.to_vec());
        let reply = (self.responder)(buf);
        if !reply.is_empty() {
            let _ = self.modem.to_host.send(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Engine settings tuned for fast tests.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        name: "mock".to_string(),
        poll_interval_ms: 5,
        drain_grace_ms: 200,
        ..Default::default()
    }
}

pub fn engine(transport: (MockReader, MockWriter)) -> Engine {
    Engine::new(transport, test_config()).unwrap()
}

pub fn deadline(ms: u64) -> Instant {
    Instant::now() + Duration::from_millis(ms)
}
