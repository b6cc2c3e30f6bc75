//! Command line arguments and engine setup.

use std::fs;
use std::io;
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use goat_at::{AtResult, Engine, EngineConfig, Transport};
use goat_serial::OpenOptions;
use goat_trace::{LineSink, Trace};
use tracing::info;

use crate::error::{ModemInfoError, ModemInfoResult};

/// Collect and display information about a modem and its current
/// configuration.
#[derive(Debug, Parser)]
#[command(name = "modeminfo", version, about)]
pub struct Args {
    /// Path to the modem device
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    pub device: String,

    /// Baud rate
    #[arg(short, long, default_value_t = 115_200)]
    pub baud: u32,

    /// Command timeout in milliseconds
    #[arg(short = 't', long = "timeout-ms", default_value_t = 400)]
    pub timeout_ms: u64,

    /// Log modem interactions to stdout
    #[arg(short, long)]
    pub verbose: bool,

    /// Connect to a modem exposed over TCP instead of a serial device
    #[arg(long, value_name = "ADDR")]
    pub tcp: Option<String>,

    /// Engine configuration file (YAML)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Send one SMS to this number after the report
    #[arg(long, value_name = "NUMBER", requires = "sms_body")]
    pub sms_to: Option<String>,

    /// Text of the SMS
    #[arg(long, value_name = "TEXT", requires = "sms_to")]
    pub sms_body: Option<String>,

    /// Print unsolicited notifications for this many seconds at the end
    #[arg(long, value_name = "SECS")]
    pub watch_secs: Option<u64>,
}

impl Args {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Where the modem is: the TCP address or the device path.
    pub fn target(&self) -> &str {
        self.tcp.as_deref().unwrap_or(&self.device)
    }

    /// Load the config file, if any, and apply command line overrides.
    pub fn engine_config(&self) -> ModemInfoResult<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|source| {
                    ModemInfoError::ReadConfig {
                        path: path.clone(),
                        source,
                    }
                })?;
                parse_config(&text).map_err(|source| ModemInfoError::ParseConfig {
                    path: path.clone(),
                    source,
                })?
            }
            None => EngineConfig::default(),
        };
        if self.config.is_none() {
            config.name = self.target().to_string();
        }
        Ok(config)
    }

    /// Open the transport and start an engine on it.
    pub fn open_engine(&self, config: EngineConfig) -> ModemInfoResult<Engine> {
        let engine = match &self.tcp {
            Some(addr) => {
                info!("connecting to {}", addr);
                let stream =
                    TcpStream::connect(addr).map_err(|source| ModemInfoError::Connect {
                        addr: addr.clone(),
                        source,
                    })?;
                start(stream, config, self.verbose)?
            }
            None => {
                let port = OpenOptions::new()
                    .baud_rate(self.baud)
                    .open(&self.device)?;
                start(port, config, self.verbose)?
            }
        };
        Ok(engine)
    }
}

pub fn parse_config(text: &str) -> Result<EngineConfig, serde_yaml::Error> {
    serde_yaml::from_str(text)
}

fn start<T: Transport>(transport: T, config: EngineConfig, verbose: bool) -> AtResult<Engine> {
    if verbose {
        Engine::new(Trace::new(transport, LineSink::new(io::stdout())), config)
    } else {
        Engine::new(transport, config)
    }
}
