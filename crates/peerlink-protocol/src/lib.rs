//! Wire framing and message types for the peerlink rendezvous protocol.
//!
//! Every socket in the system speaks the same self-describing text framing:
//! a start line of `{TYPE} {VERSION}`, CRLF-terminated `{Key}: {Value}`
//! header lines, a blank line, then a body whose byte length is declared by
//! the `Content-Length` header. Bodies are JSON documents.
//!
//! The same [`Frame`] type serves all three channels:
//! - client ↔ server TCP (registration, broadcast, directory updates),
//! - client ↔ client UDP (chat request/response signaling),
//! - client ↔ client TCP (the direct chat session).
//!
//! # Example
//!
//! ```rust
//! use peerlink_protocol::{ChatMsgBody, Frame, MessageType};
//!
//! let frame = Frame::with_json(MessageType::ChatMsg, &ChatMsgBody {
//!     message: "hello".to_string(),
//! })
//! .unwrap();
//! let decoded = Frame::parse_datagram(&frame.encode()).unwrap();
//! assert_eq!(decoded.message_type(), Some(MessageType::ChatMsg));
//! ```

mod error;
mod frame;
mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use frame::{Frame, read_frame};
pub use types::{
    AckBody, BroadcastBody, BroadcastMsgBody, ChatHelloBody, ChatMsgBody, ChatRequestBody,
    ChatResponseBody, MessageType, PeerEntry, RegisterBody, UserEventBody, UserListBody, header,
};

/// Protocol version carried in every start line. Mismatches are not
/// rejected; the tag exists for diagnostics.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Maximum size of a frame's header block, including line terminators.
pub const MAX_HEADER_BLOCK: usize = 8 * 1024;

/// Maximum declared body size (1 MiB).
pub const MAX_BODY_SIZE: usize = 1024 * 1024;
