//! The assembled client node: sockets, listener tasks, and the operations
//! the frontend calls.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::ClientResult;
use crate::event::EventReceiver;
use crate::server_link::{self, ServerLink};
use crate::session::{self, AcceptPolicy, DEFAULT_REQUEST_TIMEOUT, Identity, SessionManager};
use crate::chat;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Rendezvous server host.
    pub server_host: String,
    /// Rendezvous server port.
    pub server_port: u16,
    /// Nickname to register.
    pub nickname: String,
    /// How long a chat request may go unanswered before it is cancelled.
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Creates a configuration for the given nickname with default server
    /// address.
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8888,
            nickname: nickname.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Builder: set the server address.
    pub fn with_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.server_host = host.into();
        self.server_port = port;
        self
    }

    /// Builder: set the chat-request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// A connected peerlink client: registered with the server, listening for
/// rendezvous datagrams and inbound chat connections.
pub struct ChatClient {
    session: SessionManager,
    server: ServerLink,
    tasks: Vec<JoinHandle<()>>,
}

impl ChatClient {
    /// Binds the local sockets, connects to the server, spawns the listener
    /// tasks, and registers. Returns the client and the event stream the
    /// frontend should consume.
    pub async fn connect(config: ClientConfig) -> ClientResult<(Self, EventReceiver)> {
        Self::connect_with_policy(config, Arc::new(|_: &str| true)).await
    }

    /// Like [`ChatClient::connect`], with an accept/reject policy for
    /// inbound chat requests.
    pub async fn connect_with_policy(
        config: ClientConfig,
        policy: AcceptPolicy,
    ) -> ClientResult<(Self, EventReceiver)> {
        let udp = UdpSocket::bind(("0.0.0.0", 0)).await?;
        let udp_port = udp.local_addr()?.port();

        let chat_listener = TcpListener::bind(("0.0.0.0", 0)).await?;
        let chat_port = chat_listener.local_addr()?.port();

        let (server, read_half) =
            ServerLink::connect(&config.server_host, config.server_port).await?;

        let identity = Identity {
            nickname: config.nickname.clone(),
            ip: server.local_ip().to_string(),
            udp_port,
            chat_port,
        };
        debug!(
            nickname = %identity.nickname,
            ip = %identity.ip,
            udp_port,
            chat_port,
            "local endpoints bound"
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = SessionManager::with_policy(
            identity,
            Arc::new(udp),
            events_tx,
            policy,
            config.request_timeout,
        );

        let tasks = vec![
            tokio::spawn(server_link::run_server_reader(session.clone(), read_half)),
            tokio::spawn(session::run_udp_listener(session.clone())),
            tokio::spawn(chat::run_chat_listener(session.clone(), chat_listener)),
        ];

        server.register(&config.nickname, udp_port)?;

        Ok((
            Self {
                session,
                server,
                tasks,
            },
            events_rx,
        ))
    }

    /// Returns our network identity.
    pub fn identity(&self) -> &Identity {
        self.session.identity()
    }

    /// Returns the session manager, for callers that want direct access.
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Returns the sorted nicknames currently in the directory.
    pub async fn peers(&self) -> Vec<String> {
        self.session.peers().await
    }

    /// Returns the nicknames with an open chat session.
    pub async fn active_chats(&self) -> Vec<String> {
        self.session.active_chats().await
    }

    /// Sends a chat request to a known peer.
    pub async fn request_chat(&self, peer: &str) -> ClientResult<()> {
        self.session.request_chat(peer).await
    }

    /// Sends a message over an open chat session.
    pub async fn send_chat_message(&self, peer: &str, message: &str) -> ClientResult<()> {
        self.session.send_chat_message(peer, message).await
    }

    /// Closes an open chat session.
    pub async fn close_chat(&self, peer: &str) -> ClientResult<()> {
        self.session.close_chat(peer).await
    }

    /// Asks the server to relay a message to everyone else.
    pub fn broadcast(&self, message: &str) -> ClientResult<()> {
        self.server.broadcast(message)
    }

    /// Asks the server for a fresh user list; the reply arrives as
    /// [`crate::Event::UserList`].
    pub fn refresh_users(&self) -> ClientResult<()> {
        self.server.request_users()
    }

    /// Deregisters and tears everything down: chat sessions, pending
    /// requests, listener tasks. Queued outbound frames (including the
    /// UNREGISTER) are flushed by the writer tasks as they wind down.
    pub async fn shutdown(self) {
        let _ = self.server.unregister();
        self.session.shutdown().await;
        for task in self.tasks {
            task.abort();
        }
    }
}
