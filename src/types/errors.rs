//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Every
//! variant classifies into an [`ErrorKind`] so the domain layer can decide how
//! to present a failed call without matching on message text.

use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::types::RequestId;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the correlation client.
#[derive(Error, Debug)]
pub enum Error {
    /// A call's deadline elapsed with no correlated reply.
    #[error("request {id} timed out after {}ms", .after.as_millis())]
    Timeout { id: RequestId, after: Duration },

    /// The channel closed or errored while the call was pending.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// `call`/`send` attempted outside the Ready/Open state.
    #[error("not open: {0}")]
    NotOpen(String),

    /// The peer replied to this specific request with the error sentinel.
    #[error("server rejected request: {payload}")]
    Application { payload: Value },

    /// Inbound data that cannot be attributed to any request.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Single connection attempt failed or timed out.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Caller-supplied input rejected before anything was sent.
    #[error("validation error: {0}")]
    Validation(String),

    /// Operation not allowed in the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Configuration could not be loaded or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// Internal invariant failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// WebSocket transport errors (boxed to reduce Result size).
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    ConnectionLost,
    NotOpen,
    ApplicationError,
    MalformedFrame,
    ConnectFailed,
    Validation,
    InvalidState,
    Config,
    Internal,
}

impl ErrorKind {
    /// Stable string code for logs and CLI output.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ConnectionLost => "CONNECTION_LOST",
            ErrorKind::NotOpen => "NOT_OPEN",
            ErrorKind::ApplicationError => "APPLICATION_ERROR",
            ErrorKind::MalformedFrame => "MALFORMED_FRAME",
            ErrorKind::ConnectFailed => "CONNECT_FAILED",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::InvalidState => "INVALID_STATE",
            ErrorKind::Config => "CONFIG",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Error {
    /// Classify this error.
    ///
    /// Transport faults (websocket and I/O errors) surface to callers as
    /// `ConnectionLost`, since they only ever reach a call through the
    /// broadcast cancellation path.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::ConnectionLost(_) => ErrorKind::ConnectionLost,
            Error::NotOpen(_) => ErrorKind::NotOpen,
            Error::Application { .. } => ErrorKind::ApplicationError,
            Error::MalformedFrame(_) => ErrorKind::MalformedFrame,
            Error::Connect(_) => ErrorKind::ConnectFailed,
            Error::Validation(_) => ErrorKind::Validation,
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::Config(_) => ErrorKind::Config,
            Error::Internal(_) | Error::Serialization(_) => ErrorKind::Internal,
            Error::WebSocket(_) | Error::Io(_) => ErrorKind::ConnectionLost,
        }
    }
}

// Convenience constructors
impl Error {
    pub fn connection_lost(msg: impl Into<String>) -> Self {
        Self::ConnectionLost(msg.into())
    }

    pub fn not_open(msg: impl Into<String>) -> Self {
        Self::NotOpen(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedFrame(msg.into())
    }

    pub fn connect(msg: impl Into<String>) -> Self {
        Self::Connect(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes() {
        let timeout = Error::Timeout {
            id: RequestId::new(3),
            after: Duration::from_millis(5000),
        };
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert_eq!(timeout.to_string(), "request 3 timed out after 5000ms");

        let app = Error::Application {
            payload: Value::String("error".to_string()),
        };
        assert_eq!(app.kind().code(), "APPLICATION_ERROR");
    }

    #[test]
    fn test_transport_faults_classify_as_connection_lost() {
        let io = Error::from(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "pipe closed",
        ));
        assert_eq!(io.kind(), ErrorKind::ConnectionLost);

        let ws = Error::from(tokio_tungstenite::tungstenite::Error::ConnectionClosed);
        assert_eq!(ws.kind(), ErrorKind::ConnectionLost);
    }
}
