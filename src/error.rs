//! Custom error types for the measurement tools.
//!
//! This module defines `ToolsError`, the single error type shared by the
//! transports, instrument wrappers, prompt helpers and file utilities. Using the
//! `thiserror` crate it keeps error reporting consistent from the serial port
//! all the way up to the command-line tools.
//!
//! ## Error Hierarchy
//!
//! - **`Config`** / **`Configuration`**: figment load failures and semantic
//!   validation failures of `measurement_tools.toml`.
//! - **`Io`**, **`Csv`**, **`Json`**: file and stream errors from the standard
//!   library, the `csv` crate and `serde_json`.
//! - **`Transport`**, **`Timeout`**, **`NotConnected`**: communication with an
//!   instrument failed, took too long, or the session was already closed.
//! - **`InvalidResponse`**: the instrument answered something that could not be
//!   parsed for the command that was sent.
//! - **`LimitExceeded`**, **`OutOfRange`**: a requested setting was refused
//!   before it reached the hardware.
//! - **`NoInstrumentFound`**, **`Cancelled`**: resource selection could not
//!   complete, or the operator closed standard input.
//! - **`FeatureNotEnabled`**: a transport or file format was not compiled in.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, ToolsError>;

#[derive(Error, Debug)]
pub enum ToolsError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error on '{resource}': {message}")]
    Transport { resource: String, message: String },

    #[error("Timed out after {elapsed:?}: {context}")]
    Timeout { context: String, elapsed: Duration },

    #[error("Session '{0}' is not connected")]
    NotConnected(String),

    #[error("Invalid response to '{command}': '{response}'")]
    InvalidResponse { command: String, response: String },

    #[error("Requested {requested} exceeds the {limit} limit set on the instrument")]
    LimitExceeded { requested: f64, limit: f64 },

    #[error("Value out of range: {0}")]
    OutOfRange(String),

    #[error("No unopened (VISA) instrument found :(")]
    NoInstrumentFound,

    #[error("Input closed before a selection was made")]
    Cancelled,

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Laser driver reported a fault: {0}")]
    LaserFault(String),
}

impl ToolsError {
    /// Shorthand for a transport failure on `resource`.
    pub fn transport(resource: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Transport {
            resource: resource.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for an unparsable instrument reply.
    pub fn invalid_response(command: impl Into<String>, response: impl Into<String>) -> Self {
        Self::InvalidResponse {
            command: command.into(),
            response: response.into(),
        }
    }
}

impl From<figment::Error> for ToolsError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ToolsError::transport("ASRL/dev/ttyUSB0::INSTR", "broken pipe");
        assert_eq!(
            err.to_string(),
            "Transport error on 'ASRL/dev/ttyUSB0::INSTR': broken pipe"
        );
    }

    #[test]
    fn test_limit_exceeded_display() {
        let err = ToolsError::LimitExceeded {
            requested: 120.0,
            limit: 100.0,
        };
        assert!(err.to_string().contains("120"));
        assert!(err.to_string().contains("100"));
    }

    #[test]
    fn test_timeout_mentions_context() {
        let err = ToolsError::Timeout {
            context: "waiting for LASER:COND?".into(),
            elapsed: Duration::from_millis(5000),
        };
        assert!(err.to_string().contains("LASER:COND?"));
    }
}
