//! The byte-stream contract the engine runs over.
//!
//! The engine reads on a background thread and writes from the caller's
//! thread, so a transport hands out independent read and write halves. The
//! read half must honour the read timeout passed to [`Transport::split`]; the
//! reader thread relies on it to notice shutdown.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// A duplex byte stream that can be split into read and write halves.
pub trait Transport: Send + 'static {
    type Reader: Read + Send + 'static;
    type Writer: Write + Send + 'static;

    /// Split into halves, configuring reads to time out after `read_timeout`.
    fn split(self, read_timeout: Duration) -> io::Result<(Self::Reader, Self::Writer)>;
}

impl Transport for TcpStream {
    type Reader = TcpStream;
    type Writer = TcpStream;

    fn split(self, read_timeout: Duration) -> io::Result<(TcpStream, TcpStream)> {
        // Commands are a handful of bytes; don't let Nagle sit on them.
        self.set_nodelay(true)?;
        self.set_read_timeout(Some(read_timeout))?;
        let reader = self.try_clone()?;
        Ok((reader, self))
    }
}

/// Pre-split halves. The read timeout is ignored: the reader is expected to
/// have its own, or the engine's reader thread outlives the engine until the
/// next byte or EOF arrives.
impl<R, W> Transport for (R, W)
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    type Reader = R;
    type Writer = W;

    fn split(self, _read_timeout: Duration) -> io::Result<(R, W)> {
        Ok(self)
    }
}
