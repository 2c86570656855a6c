//! Error types for the GraphQL client core
//!
//! This module provides the error hierarchy shared by every transport and by
//! the client session. Each variant corresponds to one of the error kinds the
//! transport state machine can raise.

use serde_json::Value;
use thiserror::Error;

/// Main error type for the GraphQL client core
#[derive(Error, Debug, Clone)]
pub enum GqlError {
    /// Handshake or TLS failure while opening the WebSocket connection.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The connection was open but is now unusable (remote close, I/O error,
    /// frame decode failure).
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// `connect` was called twice on the same transport.
    #[error("transport is already connected")]
    AlreadyConnected,

    /// The transport was used after `close`.
    #[error("transport is closed")]
    Closed,

    /// The peer violated the wire protocol (bad JSON, missing id, wrong
    /// payload shape, binary frame where text was required).
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The server sent a connection-scope error (`connection_error`, an
    /// `error` message with no id on AppSync), or the transport declared a
    /// fatal condition of its own (e.g. a keep-alive timeout).
    #[error("server error: {0}")]
    ServerError(Value),

    /// The server returned an error for one specific operation. Does not
    /// close the transport.
    #[error("query error for id {query_id:?}: {message}")]
    QueryError {
        query_id: Option<i64>,
        message: String,
        errors: Vec<Value>,
        data: Option<Value>,
    },
}

/// Type alias for Results using [`GqlError`].
pub type Result<T> = std::result::Result<T, GqlError>;

impl GqlError {
    /// Build a [`GqlError::ServerError`] from a plain message.
    pub fn server_error(msg: impl Into<String>) -> Self {
        GqlError::ServerError(Value::String(msg.into()))
    }

    /// Whether this error closes the whole connection rather than a single
    /// operation.
    pub fn is_connection_scope(&self) -> bool {
        matches!(
            self,
            GqlError::ProtocolError(_) | GqlError::ServerError(_) | GqlError::ConnectionFailed(_)
        )
    }
}

impl From<serde_json::Error> for GqlError {
    fn from(error: serde_json::Error) -> Self {
        GqlError::ProtocolError(error.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GqlError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        GqlError::ConnectionFailed(error.to_string())
    }
}

impl From<std::io::Error> for GqlError {
    fn from(error: std::io::Error) -> Self {
        GqlError::ConnectionFailed(error.to_string())
    }
}

impl From<reqwest::Error> for GqlError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_status() {
            GqlError::server_error(error.to_string())
        } else {
            GqlError::ConnectionFailed(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GqlError::Closed;
        assert_eq!(err.to_string(), "transport is closed");

        let err = GqlError::QueryError {
            query_id: Some(1),
            message: "boom".into(),
            errors: vec![],
            data: None,
        };
        assert_eq!(err.to_string(), "query error for id Some(1): boom");
    }

    #[test]
    fn test_connection_scope_classification() {
        assert!(GqlError::ProtocolError("x".into()).is_connection_scope());
        assert!(GqlError::server_error("x").is_connection_scope());
        assert!(!GqlError::AlreadyConnected.is_connection_scope());
        assert!(!GqlError::QueryError {
            query_id: None,
            message: "x".into(),
            errors: vec![],
            data: None
        }
        .is_connection_scope());
    }
}
