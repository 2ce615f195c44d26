//! Events surfaced to whatever is driving the client.
//!
//! The session manager and its listener tasks never print; everything a user
//! should see flows through this channel and the frontend decides how to
//! render it.

use tokio::sync::mpsc;

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The server confirmed our registration.
    Registered { message: String },
    /// The server reported an error (the connection stays open).
    ServerError { message: String },
    /// The server connection is gone.
    ServerClosed,
    /// A peer joined the network.
    UserJoined { nickname: String },
    /// A peer left the network.
    UserLeft { nickname: String },
    /// A fresh directory snapshot arrived.
    UserList { nicknames: Vec<String> },
    /// A broadcast from another client, relayed by the server.
    Broadcast { sender: String, message: String },
    /// The server confirmed our broadcast.
    BroadcastSent,
    /// A peer asked to chat with us.
    ChatRequested { peer: String },
    /// A peer answered our chat request.
    ChatResponse { peer: String, accepted: bool },
    /// Our chat request went unanswered past its deadline.
    ChatRequestExpired { peer: String },
    /// Dialing a peer's chat endpoint failed; no session was created.
    ChatDialFailed { peer: String, reason: String },
    /// A direct chat session is now open.
    ChatOpened { peer: String },
    /// A direct chat session ended (either side, any reason).
    ChatClosed { peer: String },
    /// A chat message arrived on an open session.
    ChatMessage {
        peer: String,
        timestamp: Option<String>,
        message: String,
    },
}

/// Sending half of the event channel.
pub type EventSender = mpsc::UnboundedSender<Event>;

/// Receiving half of the event channel, handed to the frontend.
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;
