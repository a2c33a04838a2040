//! Error types for ami-client.

use std::time::Duration;

use thiserror::Error;

use crate::message::ErrorResponse;

/// Main error type for all AMI operations.
#[derive(Debug, Error)]
pub enum AmiError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TCP connect did not finish within the configured timeout.
    #[error("Timed out after {0:?} while connecting")]
    ConnectTimeout(Duration),

    /// Asterisk answered the action with `Response: Error`.
    ///
    /// Only the action is affected; the connection stays up.
    #[error("Action failed: {}", .0.message().unwrap_or("no message"))]
    Action(ErrorResponse),

    /// A response referenced an ActionID that is not in flight.
    #[error("Received an AMI response with an unrecognized ActionID: {0}")]
    UnknownActionId(String),

    /// The lexer met a line it has no state for.
    #[error("Parser error: {0}")]
    Parser(String),

    /// Connection closed before the operation could finish.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using AmiError.
pub type Result<T> = std::result::Result<T, AmiError>;
