//! Library half of the `modeminfo` tool: argument parsing, engine setup, and
//! report rendering.

mod cli;
mod error;
mod report;

pub use cli::*;
pub use error::*;
pub use report::*;
