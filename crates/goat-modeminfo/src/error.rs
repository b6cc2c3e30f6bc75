//! Error types for modeminfo.

use std::io;
use std::path::PathBuf;

use goat_at::AtError;
use goat_serial::SerialError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModemInfoError {
    #[error("failed to read config {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    At(#[from] AtError),

    #[error(transparent)]
    Serial(#[from] SerialError),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),

    #[error("failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to install Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

pub type ModemInfoResult<T> = Result<T, ModemInfoError>;
