//! Serial port transport for the AT engine.
//!
//! ```rust,ignore
//! use goat_serial::OpenOptions;
//!
//! let port = OpenOptions::new().baud_rate(115_200).open("/dev/ttyUSB0")?;
//! let engine = goat_at::Engine::new(port, config)?;
//! ```

use std::io;
use std::time::Duration;

use goat_at::Transport;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use thiserror::Error;
use tracing::debug;

/// Errors opening a serial port.
#[derive(Debug, Error)]
pub enum SerialError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("serial port error: {0}")]
    Port(#[from] serialport::Error),
}

pub type SerialResult<T> = Result<T, SerialError>;

/// Options for opening a serial port, 8N1 without flow control.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    baud_rate: u32,
    flow_control: FlowControl,
}

impl OpenOptions {
    pub const DEFAULT_BAUD_RATE: u32 = 115_200;

    pub fn new() -> Self {
        OpenOptions {
            baud_rate: Self::DEFAULT_BAUD_RATE,
            flow_control: FlowControl::None,
        }
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Enable RTS/CTS flow control.
    pub fn hardware_flow_control(mut self, enabled: bool) -> Self {
        self.flow_control = if enabled {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };
        self
    }

    pub fn open(&self, path: &str) -> SerialResult<SerialTransport> {
        debug!("opening {} at {} baud", path, self.baud_rate);
        let port = serialport::new(path, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(self.flow_control)
            .baud_rate(self.baud_rate)
            .open()
            .map_err(|source| SerialError::Open {
                path: path.to_string(),
                source,
            })?;
        Ok(SerialTransport {
            port,
            path: path.to_string(),
        })
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// An open serial port, ready to hand to the engine.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    path: String,
}

impl SerialTransport {
    /// Open with default options.
    pub fn open(path: &str) -> SerialResult<Self> {
        OpenOptions::new().open(path)
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Transport for SerialTransport {
    type Reader = Box<dyn SerialPort>;
    type Writer = Box<dyn SerialPort>;

    fn split(mut self, read_timeout: Duration) -> io::Result<(Self::Reader, Self::Writer)> {
        self.port.set_timeout(read_timeout)?;
        let reader = self.port.try_clone()?;
        Ok((reader, self.port))
    }
}
