//! Error types for the BaseX client
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using ClientError
pub type Result<T> = std::result::Result<T, ClientError>;

/// Unified error type for client operations
#[derive(Debug, Error)]
pub enum ClientError {
    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    /// A queued or in-flight command was cut off by a connection-fatal condition.
    #[error("Connection closed")]
    ConnectionClosed,

    // -------------------------------------------------------------------------
    // Session Errors
    // -------------------------------------------------------------------------
    #[error("Access denied: {0}")]
    Auth(String),

    /// The server answered a command with a nonzero status byte.
    #[error("Server error: {0}")]
    Server(String),

    #[error("Malformed stream: {0}")]
    Parser(String),

    // -------------------------------------------------------------------------
    // Resource Misuse
    // -------------------------------------------------------------------------
    #[error("Query closed")]
    QueryClosed,

    #[error("Session closed")]
    SessionClosed,

    /// A request was made before the session was opened.
    #[error("Not connected")]
    NotConnected,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns true for conditions that end the whole session rather than a
    /// single command.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Transport(_)
                | ClientError::ConnectionClosed
                | ClientError::Auth(_)
                | ClientError::Parser(_)
        )
    }
}

impl Clone for ClientError {
    fn clone(&self) -> Self {
        match self {
            // io::Error is not Clone; keep its kind and message
            ClientError::Io(e) => ClientError::Io(std::io::Error::new(e.kind(), e.to_string())),
            ClientError::Transport(msg) => ClientError::Transport(msg.clone()),
            ClientError::ConnectionClosed => ClientError::ConnectionClosed,
            ClientError::Auth(msg) => ClientError::Auth(msg.clone()),
            ClientError::Server(msg) => ClientError::Server(msg.clone()),
            ClientError::Parser(msg) => ClientError::Parser(msg.clone()),
            ClientError::QueryClosed => ClientError::QueryClosed,
            ClientError::SessionClosed => ClientError::SessionClosed,
            ClientError::NotConnected => ClientError::NotConnected,
            ClientError::Config(msg) => ClientError::Config(msg.clone()),
        }
    }
}
