//! Client error types.

use std::fmt;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
///
/// The session variants (`UnknownPeer`, `AlreadyActive`, `NoActiveSession`)
/// are surfaced locally to the user issuing the command and have no network
/// effect.
#[derive(Debug)]
pub enum ClientError {
    /// The named peer is not in the directory.
    UnknownPeer(String),
    /// A chat session (or an in-flight request) already exists for the peer.
    AlreadyActive(String),
    /// No chat session exists for the peer.
    NoActiveSession(String),
    /// Connection to the server or a peer failed.
    Connection(String),
    /// Protocol/framing error.
    Protocol(peerlink_protocol::ProtocolError),
    /// IO error.
    Io(std::io::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPeer(peer) => write!(f, "unknown peer: {}", peer),
            Self::AlreadyActive(peer) => write!(f, "chat with {} is already active", peer),
            Self::NoActiveSession(peer) => write!(f, "no active chat with {}", peer),
            Self::Connection(msg) => write!(f, "connection error: {}", msg),
            Self::Protocol(err) => write!(f, "protocol error: {}", err),
            Self::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<peerlink_protocol::ProtocolError> for ClientError {
    fn from(err: peerlink_protocol::ProtocolError) -> Self {
        Self::Protocol(err)
    }
}
