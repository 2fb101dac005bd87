//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the kinds of errors that can occur, from configuration problems to transport and
//! script failures.
//!
//! ## Error Hierarchy
//!
//! - **Transport**: `ConnectFailure`, `NotConnected`, `LinkLost`, `ResponseTimeout`,
//!   `ResponseTooLarge` and `DecodeFailure` describe the life of one round trip.
//!   `ResponseTimeout` is the only one a caller may choose to downgrade, and only
//!   through [`crate::session::DeviceSession::flush_lenient`].
//! - **Validation**: raised before any wire I/O so the device never receives an
//!   invalid command.
//! - **Scripting**: `Script` for errors raised by or inside a script, `ScriptTimeout`
//!   for deadline expiry. The two are never conflated.
//! - **Ambient**: `Config`, `Io` and `Csv` wrap the underlying crates via `#[from]`.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Every failure the library can surface.
#[derive(Error, Debug)]
pub enum DaqError {
    /// DNS resolution failure, refused connection or connect timeout.
    #[error("Failed to connect to {host}:{port}: {reason}")]
    ConnectFailure {
        /// Host that was dialled
        host: String,
        /// Port that was dialled
        port: u16,
        /// Underlying cause
        reason: String,
    },

    /// I/O attempted without an open connection.
    #[error("Not connected to any instrument")]
    NotConnected,

    /// The peer reset or closed the stream.
    #[error("Connection lost: {0}")]
    LinkLost(String),

    /// No line terminator arrived within the read budget.
    #[error("No response within {0:?}")]
    ResponseTimeout(Duration),

    /// The response buffer grew past the ceiling without a line terminator.
    #[error("Response exceeded {limit} bytes without a line terminator")]
    ResponseTooLarge {
        /// Ceiling in bytes
        limit: usize,
    },

    /// The response line was not valid UTF-8.
    #[error("Response is not valid text: {0}")]
    DecodeFailure(#[from] std::string::FromUtf8Error),

    /// A value was rejected before reaching the wire.
    #[error("Invalid value: {0}")]
    Validation(String),

    /// A descriptor was used in a way its kind does not support.
    #[error("Invalid command usage: {0}")]
    InvalidCommand(String),

    /// Compilation or runtime error inside a script.
    #[error("Script error: {0}")]
    Script(String),

    /// The script exceeded its wall-clock budget.
    #[error("Script exceeded its {0:?} execution budget")]
    ScriptTimeout(Duration),

    /// Configuration could not be extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but is semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File or socket I/O outside the transport framing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialization error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

impl DaqError {
    /// True for the timeout a permissive caller may turn into a sentinel.
    pub fn is_response_timeout(&self) -> bool {
        matches!(self, DaqError::ResponseTimeout(_))
    }
}
