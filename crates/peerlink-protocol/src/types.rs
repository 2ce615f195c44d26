//! Message vocabulary and wire body types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known header names.
///
/// Header keys are case-sensitive as transmitted; these constants are the
/// canonical spellings both sides emit.
pub mod header {
    /// Byte length of the frame body.
    pub const CONTENT_LENGTH: &str = "Content-Length";
    /// Sender's host string.
    pub const HOST: &str = "Host";
    /// Sender's nickname on peer-to-peer frames.
    pub const FROM: &str = "From";
    /// Intended recipient's nickname.
    pub const TO: &str = "To";
    /// Correlation id for a chat request/response pair.
    pub const REQUEST_ID: &str = "Request-ID";
    /// Human-readable send time on chat messages.
    pub const TIMESTAMP: &str = "Timestamp";
}

/// The message types spoken on all three channels (client↔server TCP,
/// client↔client UDP signaling, client↔client TCP chat).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Register,
    RegisterOk,
    Unregister,
    UnregisterOk,
    Broadcast,
    BroadcastMsg,
    BroadcastOk,
    GetUsers,
    UserList,
    UserJoined,
    UserLeft,
    Error,
    ChatRequest,
    ChatResponse,
    ChatHello,
    ChatMsg,
    ChatClose,
}

impl MessageType {
    /// Returns the wire token for this message type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Register => "REGISTER",
            Self::RegisterOk => "REGISTER_OK",
            Self::Unregister => "UNREGISTER",
            Self::UnregisterOk => "UNREGISTER_OK",
            Self::Broadcast => "BROADCAST",
            Self::BroadcastMsg => "BROADCAST_MSG",
            Self::BroadcastOk => "BROADCAST_OK",
            Self::GetUsers => "GET_USERS",
            Self::UserList => "USER_LIST",
            Self::UserJoined => "USER_JOINED",
            Self::UserLeft => "USER_LEFT",
            Self::Error => "ERROR",
            Self::ChatRequest => "CHAT_REQUEST",
            Self::ChatResponse => "CHAT_RESPONSE",
            Self::ChatHello => "CHAT_HELLO",
            Self::ChatMsg => "CHAT_MSG",
            Self::ChatClose => "CHAT_CLOSE",
        }
    }

    /// Parses a wire token. Unknown tokens yield `None`; they still travel
    /// on a [`crate::Frame`] as raw text so receivers can report them.
    pub fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "REGISTER" => Self::Register,
            "REGISTER_OK" => Self::RegisterOk,
            "UNREGISTER" => Self::Unregister,
            "UNREGISTER_OK" => Self::UnregisterOk,
            "BROADCAST" => Self::Broadcast,
            "BROADCAST_MSG" => Self::BroadcastMsg,
            "BROADCAST_OK" => Self::BroadcastOk,
            "GET_USERS" => Self::GetUsers,
            "USER_LIST" => Self::UserList,
            "USER_JOINED" => Self::UserJoined,
            "USER_LEFT" => Self::UserLeft,
            "ERROR" => Self::Error,
            "CHAT_REQUEST" => Self::ChatRequest,
            "CHAT_RESPONSE" => Self::ChatResponse,
            "CHAT_HELLO" => Self::ChatHello,
            "CHAT_MSG" => Self::ChatMsg,
            "CHAT_CLOSE" => Self::ChatClose,
            _ => return None,
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in the server's user directory, as carried in USER_LIST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    /// Registered nickname, unique server-wide.
    pub nickname: String,
    /// Host string the peer is reachable at.
    pub ip: String,
    /// The peer's rendezvous (UDP) listening port.
    pub udp_port: u16,
}

/// REGISTER body. The server prefers the `Host` header over the body `ip`.
///
/// All fields are lenient on decode; the server reports absent ones as
/// missing-field errors rather than refusing to parse the frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterBody {
    #[serde(default)]
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default)]
    pub udp_port: u16,
}

/// Generic acknowledgment body (REGISTER_OK, UNREGISTER_OK, BROADCAST_OK,
/// ERROR).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckBody {
    #[serde(default)]
    pub message: String,
}

impl AckBody {
    /// Creates an acknowledgment with the given message text.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// BROADCAST body sent by a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastBody {
    #[serde(default)]
    pub message: String,
}

/// BROADCAST_MSG body relayed by the server to everyone but the sender.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMsgBody {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub message: String,
    /// Send time as float unix seconds.
    #[serde(default)]
    pub timestamp: f64,
}

/// USER_LIST body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserListBody {
    #[serde(default)]
    pub users: Vec<PeerEntry>,
}

/// USER_JOINED / USER_LEFT body. USER_LEFT carries an empty ip and port 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserEventBody {
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub udp_port: u16,
    #[serde(default)]
    pub timestamp: f64,
}

/// CHAT_REQUEST body: the requester's chat (TCP) listening port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequestBody {
    #[serde(default)]
    pub tcp_port: u16,
}

/// CHAT_RESPONSE body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponseBody {
    #[serde(default)]
    pub accepted: bool,
    #[serde(default)]
    pub tcp_port: u16,
}

/// CHAT_HELLO body: the dialing peer identifies itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHelloBody {
    #[serde(default)]
    pub nickname: String,
}

/// CHAT_MSG body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMsgBody {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_tokens_roundtrip() {
        let all = [
            MessageType::Register,
            MessageType::RegisterOk,
            MessageType::Unregister,
            MessageType::UnregisterOk,
            MessageType::Broadcast,
            MessageType::BroadcastMsg,
            MessageType::BroadcastOk,
            MessageType::GetUsers,
            MessageType::UserList,
            MessageType::UserJoined,
            MessageType::UserLeft,
            MessageType::Error,
            MessageType::ChatRequest,
            MessageType::ChatResponse,
            MessageType::ChatHello,
            MessageType::ChatMsg,
            MessageType::ChatClose,
        ];
        for ty in all {
            assert_eq!(MessageType::parse(ty.as_str()), Some(ty));
        }
    }

    #[test]
    fn unknown_token_parses_to_none() {
        assert_eq!(MessageType::parse("SHOUT"), None);
        assert_eq!(MessageType::parse(""), None);
        assert_eq!(MessageType::parse("register"), None);
    }

    #[test]
    fn register_body_ip_is_optional() {
        let body: RegisterBody =
            serde_json::from_str(r#"{"nickname":"alice","udp_port":5000}"#).unwrap();
        assert_eq!(body.nickname, "alice");
        assert_eq!(body.ip, None);
        assert_eq!(body.udp_port, 5000);
    }

    #[test]
    fn user_list_body_defaults_to_empty() {
        let body: UserListBody = serde_json::from_str("{}").unwrap();
        assert!(body.users.is_empty());
    }
}
