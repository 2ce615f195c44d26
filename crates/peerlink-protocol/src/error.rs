//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Header block exceeded the maximum allowed size before the blank-line
    /// terminator was seen.
    #[error("header block exceeds {max} bytes")]
    HeaderBlockTooLarge { max: usize },

    /// Declared Content-Length exceeds the maximum allowed body size.
    #[error("declared body length {size} exceeds maximum {max}")]
    BodyTooLarge { size: usize, max: usize },

    /// The start line did not split into exactly two tokens.
    #[error("malformed start line: {line:?}")]
    MalformedStartLine { line: String },

    /// Content-Length header present but not a valid length.
    #[error("invalid Content-Length value: {value:?}")]
    InvalidContentLength { value: String },

    /// A frame terminated its header block without any header lines.
    #[error("frame has no header lines")]
    EmptyFrame,

    /// Datagram without a CRLFCRLF header/body separator.
    #[error("datagram has no header/body separator")]
    MissingSeparator,

    /// Header block bytes are not valid UTF-8.
    #[error("header block is not valid UTF-8")]
    InvalidUtf8,

    /// Stream closed partway through a frame.
    #[error("stream closed mid-frame while reading {context}")]
    UnexpectedEof { context: &'static str },

    /// Failed to serialize or deserialize a JSON body.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error during read/write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
