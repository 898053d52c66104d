//! Error types for locrelay-core

use thiserror::Error;

/// Main error type for the locrelay-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (invalid session or config file)
    #[error("configuration error: {0}")]
    Config(String),

    /// No network reachability when a delivery was attempted
    #[error("network unavailable: {0}")]
    Network(String),

    /// Transport failure or non-2xx response from the tracking endpoint
    #[error("server error: {message}")]
    Server {
        /// HTTP status, absent when the transport itself failed
        status: Option<u16>,
        message: String,
    },

    /// Malformed fix input
    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A tracking session is already running
    #[error("tracking session already active")]
    AlreadyActive,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Logging setup error
    #[error("logging error: {0}")]
    Logging(String),
}

/// Result type alias for locrelay-core
pub type Result<T> = std::result::Result<T, Error>;
