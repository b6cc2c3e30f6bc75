//! The tracing wrapper.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use goat_at::Transport;

/// Which way the bytes went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host.
    Read,
    /// Host to device.
    Write,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Read => "read",
            Direction::Write => "write",
        }
    }

    /// One-letter prefix used in trace lines.
    pub fn prefix(&self) -> &'static str {
        match self {
            Direction::Read => "r",
            Direction::Write => "w",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives a copy of every chunk passing through a [`Trace`].
///
/// Called on the reader thread and on command callers' threads, so
/// implementations must be thread safe. A sink must not fail the stream.
pub trait TraceSink: Send + Sync {
    fn record(&self, direction: Direction, data: &[u8]);
}

impl<S: TraceSink + ?Sized> TraceSink for Box<S> {
    fn record(&self, direction: Direction, data: &[u8]) {
        (**self).record(direction, data)
    }
}

/// Pass-through wrapper that reports traffic to a sink.
///
/// Bytes are forwarded exactly as the inner stream delivers or accepts them:
/// no buffering, no reordering. Only the bytes the inner stream actually
/// transferred are recorded.
pub struct Trace<T, S> {
    inner: T,
    sink: Arc<S>,
}

impl<T, S: TraceSink> Trace<T, S> {
    pub fn new(inner: T, sink: S) -> Self {
        Self::with_shared_sink(inner, Arc::new(sink))
    }

    /// Wrap with a sink shared with other traced streams.
    pub fn with_shared_sink(inner: T, sink: Arc<S>) -> Self {
        Trace { inner, sink }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read, S: TraceSink> Read for Trace<T, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.sink.record(Direction::Read, &buf[..n]);
        }
        Ok(n)
    }
}

impl<T: Write, S: TraceSink> Write for Trace<T, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if n > 0 {
            self.sink.record(Direction::Write, &buf[..n]);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<T, S> Transport for Trace<T, S>
where
    T: Transport,
    S: TraceSink + 'static,
{
    type Reader = Trace<T::Reader, S>;
    type Writer = Trace<T::Writer, S>;

    fn split(self, read_timeout: Duration) -> io::Result<(Self::Reader, Self::Writer)> {
        let (reader, writer) = self.inner.split(read_timeout)?;
        Ok((
            Trace::with_shared_sink(reader, self.sink.clone()),
            Trace::with_shared_sink(writer, self.sink),
        ))
    }
}
