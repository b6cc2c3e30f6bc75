//! AT command engine for cellular modems.
//!
//! This crate drives a modem (or anything else speaking the Hayes AT command
//! set) over a byte stream: a serial port, a TCP socket, or any pair of
//! reader and writer halves.
//!
//! # Protocol Overview
//!
//! - **Commands** (host → modem): `AT<body>` followed by CR or CRLF
//! - **Responses** (modem → host): zero or more information lines, then a
//!   final result code: `OK`, `ERROR`, `+CME ERROR: <code>`,
//!   `+CMS ERROR: <code>`, `NO CARRIER`, `BUSY`, `NO ANSWER` or `NO DIALTONE`
//! - **Echo**: with `ATE1` the modem repeats each command line back first
//! - **Data mode**: commands such as `+CMGS` answer with a `"> "` prompt, then
//!   take a payload terminated by SUB (0x1A)
//! - **Unsolicited result codes**: lines such as `RING` or `+CMTI: "SM",3`
//!   may arrive at any time
//!
//! # Engine
//!
//! [`Engine`] serialises concurrent callers through a FIFO gate, matches
//! response lines to the admitted command, drains the leftovers of exchanges
//! that ran past their deadline, and fans unsolicited lines out to
//! [`Subscription`]s.
//!
//! # Example
//!
//! ```rust,ignore
//! use goat_at::{Engine, EngineConfig};
//!
//! let engine = Engine::new(stream, EngineConfig::default())?;
//! engine.init(deadline)?;
//!
//! let lines = engine.command(deadline, "+CGMI")?.into_lines()?;
//! let sent = engine.sms_command(deadline, "+CMGS=\"+15165551234\"", "hello")?;
//! ```

mod codec;
mod command;
mod config;
mod dispatch;
mod engine;
mod error;
mod gate;
mod reader;
mod response;
mod transport;

pub use codec::*;
pub use command::*;
pub use config::*;
pub use dispatch::{Dispatcher, Indication, Subscription, UnsolicitedNotification};
pub use engine::{Engine, EngineState, Phase};
pub use error::{AtError, AtResult};
pub use response::*;
pub use transport::*;
