//! Server error types.

use std::io;

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (socket, bind, etc.).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error (framing, encoding, etc.).
    #[error("protocol error: {0}")]
    Protocol(#[from] peerlink_protocol::ProtocolError),

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Registry-level failures. These are reported back to the offending client
/// as ERROR frames; the connection stays open.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Another record already holds this nickname.
    #[error("nickname already in use: {nickname}")]
    DuplicateNickname { nickname: String },

    /// A required registration field was absent or empty.
    #[error("missing field: {field}")]
    MissingField { field: &'static str },

    /// The caller has no record in the registry.
    #[error("not registered")]
    NotRegistered,
}
