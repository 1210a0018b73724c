//! Error types for fingerprinting, configuration and detection

use crate::notifier::Report;
use thiserror::Error;

/// Errors produced by the detection core
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or unknown configuration value (dialect, threshold, pattern)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The normalizer could not process a query
    #[error("Failed to fingerprint query `{query}`: {reason}")]
    Fingerprint { query: String, reason: String },

    /// A dialect needs a capability that was not compiled in
    #[error("Missing dependency: {capability}")]
    MissingDependency { capability: String },

    /// Findings were produced and `raise` is configured
    #[error("{0}")]
    Detection(Box<Report>),

    /// A replayed event log line is not a valid query event
    #[error("Invalid event on line {line}: {reason}")]
    InvalidEvent { line: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Findings carried by a detection error, if this is one
    pub fn report(&self) -> Option<&Report> {
        match self {
            Error::Detection(report) => Some(report),
            _ => None,
        }
    }
}

/// Result type for the detection core
pub type Result<T> = std::result::Result<T, Error>;
