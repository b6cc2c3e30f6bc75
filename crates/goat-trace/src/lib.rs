//! Transparent byte tracing for modem transports.
//!
//! [`Trace`] wraps any transport (or any `Read`/`Write` half) and reports
//! every chunk of bytes to a [`TraceSink`] while forwarding it unchanged. The
//! engine cannot tell whether tracing is active.
//!
//! ```rust,ignore
//! use goat_trace::{LineSink, Trace};
//!
//! let port = TcpStream::connect("127.0.0.1:2000")?;
//! let engine = Engine::new(Trace::new(port, LineSink::new(std::io::stdout())), config)?;
//! ```

mod sink;
mod trace;

pub use sink::*;
pub use trace::*;
