//! Error types for capture analysis.
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnalyserError>;

#[derive(Error, Debug)]
pub enum AnalyserError {
    /// The capture header or a block could not be decoded. Fatal.
    #[error("Invalid capture format: {0}")]
    InvalidCaptureFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not load config {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// A result sink could not be written. Callers log this and carry on.
    #[error("Could not write to {path}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
