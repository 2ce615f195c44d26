//! The rendezvous session manager.
//!
//! Owns this process's view of the peer directory and the table of active
//! chat sessions, and drives the handshake that upgrades a directory entry
//! into a live direct connection: a CHAT_REQUEST datagram to the peer's
//! registered UDP port, a policy-decided CHAT_RESPONSE, and a TCP dial from
//! the answering side back to the requester's advertised chat port.
//! Whichever side answers the UDP request becomes the TCP dialer; the
//! requester just listens.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use rand::Rng;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use peerlink_protocol::{
    ChatMsgBody, ChatRequestBody, ChatResponseBody, Frame, MessageType, UserEventBody, header,
};

use crate::chat;
use crate::directory::{Directory, PeerDescriptor};
use crate::error::{ClientError, ClientResult};
use crate::event::{Event, EventSender};

/// Decides whether an inbound chat request from the named peer is accepted.
///
/// The reference behavior accepts everything; install a real policy to get
/// accept/reject without touching the handshake.
pub type AcceptPolicy = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// How long a chat request may go unanswered before it is cancelled.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Who we are on the network: the addresses the server and peers reach us at.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Nickname registered with the server.
    pub nickname: String,
    /// Our host string as seen by the server.
    pub ip: String,
    /// Port of our rendezvous (UDP) listener.
    pub udp_port: u16,
    /// Port of our chat-accept (TCP) listener.
    pub chat_port: u16,
}

/// An outbound chat request waiting for its CHAT_RESPONSE.
struct PendingRequest {
    request_id: String,
    timer: JoinHandle<()>,
}

/// One live direct chat: the outbox feeding its writer task and the handle
/// of its receive loop.
struct ChatSession {
    outbox: mpsc::UnboundedSender<Frame>,
    receiver: JoinHandle<()>,
}

impl ChatSession {
    fn send(&self, frame: Frame) -> bool {
        self.outbox.send(frame).is_ok()
    }

    /// Stops the receive loop. The writer task drains whatever is still
    /// queued and exits once the outbox is dropped, which releases the
    /// transport.
    fn stop(&self) {
        self.receiver.abort();
    }
}

struct SessionInner {
    identity: Identity,
    udp: Arc<UdpSocket>,
    directory: RwLock<Directory>,
    chats: Mutex<HashMap<String, ChatSession>>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    events: EventSender,
    accept_policy: AcceptPolicy,
    request_timeout: Duration,
}

/// The client-side session manager. A cheap cloneable handle; clones share
/// the directory, chat table, and pending-request table, so the
/// server-message task, the UDP rendezvous listener, the chat-accept
/// listener, every per-chat receive loop, and the interactive command path
/// all see the same state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Creates a session manager for the given identity, accepting every
    /// inbound chat request and using the default request deadline. The UDP
    /// socket is used for sending signaling datagrams; receiving runs
    /// separately in [`run_udp_listener`].
    pub fn new(identity: Identity, udp: Arc<UdpSocket>, events: EventSender) -> Self {
        Self::with_policy(
            identity,
            udp,
            events,
            Arc::new(|_| true),
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    /// Creates a session manager with an accept/reject policy and a custom
    /// chat-request deadline.
    pub fn with_policy(
        identity: Identity,
        udp: Arc<UdpSocket>,
        events: EventSender,
        accept_policy: AcceptPolicy,
        request_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                identity,
                udp,
                directory: RwLock::new(Directory::new()),
                chats: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                events,
                accept_policy,
                request_timeout,
            }),
        }
    }

    /// Returns our network identity.
    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    /// Returns the sorted nicknames currently in the directory.
    pub async fn peers(&self) -> Vec<String> {
        self.inner.directory.read().await.nicknames()
    }

    /// Returns the nicknames with an open chat session, sorted.
    pub async fn active_chats(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.chats.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn emit(&self, event: Event) {
        let _ = self.inner.events.send(event);
    }

    // --- directory maintenance, driven by server frames ---

    /// USER_LIST: replace the whole directory.
    pub(crate) async fn replace_directory(&self, users: Vec<peerlink_protocol::PeerEntry>) {
        let mut directory = self.inner.directory.write().await;
        directory.replace_all(users);
        let nicknames = directory.nicknames();
        drop(directory);
        self.emit(Event::UserList { nicknames });
    }

    /// USER_JOINED: insert one entry.
    pub(crate) async fn peer_joined(&self, event: UserEventBody) {
        let nickname = event.nickname.clone();
        self.inner.directory.write().await.insert(PeerDescriptor {
            nickname: event.nickname,
            ip: event.ip,
            udp_port: event.udp_port,
        });
        info!(peer = %nickname, "peer joined");
        self.emit(Event::UserJoined { nickname });
    }

    /// USER_LEFT: drop the entry and force-close any chat with that peer.
    pub(crate) async fn peer_left(&self, nickname: &str) {
        self.inner.directory.write().await.remove(nickname);
        if let Some(session) = self.inner.chats.lock().await.remove(nickname) {
            session.stop();
            self.emit(Event::ChatClosed {
                peer: nickname.to_string(),
            });
        }
        info!(peer = %nickname, "peer left");
        self.emit(Event::UserLeft {
            nickname: nickname.to_string(),
        });
    }

    // --- the session operations ---

    /// Sends a chat request to a known peer.
    ///
    /// The request is recorded as pending with a deadline; if no response
    /// arrives in time it is cancelled and surfaced as
    /// [`Event::ChatRequestExpired`].
    pub async fn request_chat(&self, peer: &str) -> ClientResult<()> {
        let target = self
            .inner
            .directory
            .read()
            .await
            .get(peer)
            .cloned()
            .ok_or_else(|| ClientError::UnknownPeer(peer.to_string()))?;

        if self.inner.chats.lock().await.contains_key(peer)
            || self.inner.pending.lock().await.contains_key(peer)
        {
            return Err(ClientError::AlreadyActive(peer.to_string()));
        }

        let request_id = new_request_id(&self.inner.identity.nickname);
        let frame = Frame::with_json(MessageType::ChatRequest, &ChatRequestBody {
            tcp_port: self.inner.identity.chat_port,
        })?
        .with_header(header::FROM, &self.inner.identity.nickname)
        .with_header(header::HOST, &self.inner.identity.ip)
        .with_header(header::TO, peer)
        .with_header(header::REQUEST_ID, &request_id);

        self.inner
            .udp
            .send_to(&frame.encode(), (target.ip.as_str(), target.udp_port))
            .await?;
        info!(peer = %peer, request_id = %request_id, "chat request sent");

        let manager = self.clone();
        let peer_name = peer.to_string();
        let expired_id = request_id.clone();
        let deadline = self.inner.request_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            manager.expire_request(&peer_name, &expired_id).await;
        });

        self.inner
            .pending
            .lock()
            .await
            .insert(peer.to_string(), PendingRequest { request_id, timer });
        Ok(())
    }

    /// Sends a message over an open chat session.
    pub async fn send_chat_message(&self, peer: &str, message: &str) -> ClientResult<()> {
        let frame = Frame::with_json(MessageType::ChatMsg, &ChatMsgBody {
            message: message.to_string(),
        })?
        .with_header(header::FROM, &self.inner.identity.nickname)
        .with_header(header::HOST, &self.inner.identity.ip)
        .with_header(header::TO, peer)
        .with_header(header::TIMESTAMP, Local::now().format("%H:%M:%S").to_string());

        let chats = self.inner.chats.lock().await;
        let session = chats
            .get(peer)
            .ok_or_else(|| ClientError::NoActiveSession(peer.to_string()))?;
        if !session.send(frame) {
            return Err(ClientError::Connection(format!(
                "chat session with {} is closing",
                peer
            )));
        }
        Ok(())
    }

    /// Closes an open chat session: CHAT_CLOSE to the peer, then teardown.
    pub async fn close_chat(&self, peer: &str) -> ClientResult<()> {
        let session = self
            .inner
            .chats
            .lock()
            .await
            .remove(peer)
            .ok_or_else(|| ClientError::NoActiveSession(peer.to_string()))?;

        let close = Frame::new(MessageType::ChatClose)
            .with_header(header::FROM, &self.inner.identity.nickname)
            .with_header(header::TO, peer);
        let _ = session.send(close);
        session.stop();

        info!(peer = %peer, "chat closed");
        self.emit(Event::ChatClosed {
            peer: peer.to_string(),
        });
        Ok(())
    }

    // --- rendezvous signaling ---

    /// Handles one received rendezvous datagram. Unparseable datagrams and
    /// unexpected message types are dropped.
    pub(crate) async fn handle_datagram(&self, data: &[u8], addr: SocketAddr) {
        let frame = match Frame::parse_datagram(data) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(%addr, error = %e, "dropping unparseable datagram");
                return;
            }
        };

        match frame.message_type() {
            Some(MessageType::ChatRequest) => self.handle_chat_request(&frame, addr).await,
            Some(MessageType::ChatResponse) => self.handle_chat_response(&frame).await,
            _ => debug!(
                %addr,
                message_type = frame.type_token(),
                "ignoring datagram"
            ),
        }
    }

    /// Inbound CHAT_REQUEST: answer it, and if accepted, dial the requester's
    /// advertised chat port and introduce ourselves with CHAT_HELLO.
    async fn handle_chat_request(&self, frame: &Frame, addr: SocketAddr) {
        let requester = frame
            .header(header::FROM)
            .unwrap_or("unknown")
            .to_string();
        let body: ChatRequestBody = match frame.json_or_default() {
            Ok(body) => body,
            Err(e) => {
                debug!(peer = %requester, error = %e, "bad chat request body");
                return;
            }
        };

        info!(peer = %requester, %addr, "chat request received");
        self.emit(Event::ChatRequested {
            peer: requester.clone(),
        });

        let accepted = (self.inner.accept_policy)(&requester);
        let response = match Frame::with_json(MessageType::ChatResponse, &ChatResponseBody {
            accepted,
            tcp_port: self.inner.identity.chat_port,
        }) {
            Ok(response) => response
                .with_header(header::FROM, &self.inner.identity.nickname)
                .with_header(header::HOST, &self.inner.identity.ip)
                .with_header(header::TO, &requester)
                .with_header(
                    header::REQUEST_ID,
                    frame.header(header::REQUEST_ID).unwrap_or("unknown"),
                ),
            Err(e) => {
                warn!(error = %e, "failed to build chat response");
                return;
            }
        };

        if let Err(e) = self.inner.udp.send_to(&response.encode(), addr).await {
            warn!(peer = %requester, error = %e, "failed to answer chat request");
            return;
        }

        if !accepted {
            info!(peer = %requester, "chat request declined");
            return;
        }

        match TcpStream::connect((addr.ip(), body.tcp_port)).await {
            Ok(stream) => {
                if let Err(e) = self.start_session(requester.clone(), stream, true).await {
                    warn!(peer = %requester, error = %e, "failed to start chat session");
                }
            }
            Err(e) => {
                warn!(peer = %requester, error = %e, "failed to dial chat endpoint");
                self.emit(Event::ChatDialFailed {
                    peer: requester,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Inbound CHAT_RESPONSE: resolve the matching pending request. The
    /// session itself arrives through the chat-accept listener.
    async fn handle_chat_response(&self, frame: &Frame) {
        let responder = frame
            .header(header::FROM)
            .unwrap_or("unknown")
            .to_string();
        let body: ChatResponseBody = match frame.json_or_default() {
            Ok(body) => body,
            Err(e) => {
                debug!(peer = %responder, error = %e, "bad chat response body");
                return;
            }
        };

        let request_id = frame.header(header::REQUEST_ID);
        let mut pending = self.inner.pending.lock().await;
        let resolved = match pending.get(&responder) {
            Some(entry) if request_id == Some(entry.request_id.as_str()) => {
                pending.remove(&responder)
            }
            Some(_) => {
                warn!(peer = %responder, "chat response with stale request id ignored");
                None
            }
            None => {
                debug!(peer = %responder, "unsolicited chat response ignored");
                None
            }
        };
        drop(pending);

        let Some(entry) = resolved else { return };
        entry.timer.abort();

        info!(peer = %responder, accepted = body.accepted, "chat response received");
        self.emit(Event::ChatResponse {
            peer: responder,
            accepted: body.accepted,
        });
    }

    /// Cancels an unanswered chat request once its deadline passes.
    async fn expire_request(&self, peer: &str, request_id: &str) {
        let mut pending = self.inner.pending.lock().await;
        let expired = pending
            .get(peer)
            .is_some_and(|entry| entry.request_id == request_id);
        if !expired {
            return;
        }
        pending.remove(peer);
        drop(pending);

        warn!(peer = %peer, "chat request unanswered, giving up");
        self.emit(Event::ChatRequestExpired {
            peer: peer.to_string(),
        });
    }

    // --- session lifecycle ---

    /// Registers a freshly established connection as the chat session for
    /// `peer` and starts its writer task and receive loop. Rejects the
    /// connection if a session for that nickname already exists.
    pub(crate) async fn start_session(
        &self,
        peer: String,
        stream: TcpStream,
        send_hello: bool,
    ) -> ClientResult<()> {
        let mut chats = self.inner.chats.lock().await;
        if chats.contains_key(&peer) {
            return Err(ClientError::AlreadyActive(peer));
        }

        let (read_half, write_half) = stream.into_split();
        let (outbox, rx) = mpsc::unbounded_channel();

        if send_hello {
            let hello = Frame::with_json(
                MessageType::ChatHello,
                &peerlink_protocol::ChatHelloBody {
                    nickname: self.inner.identity.nickname.clone(),
                },
            )?
            .with_header(header::FROM, &self.inner.identity.nickname)
            .with_header(header::HOST, &self.inner.identity.ip);
            let _ = outbox.send(hello);
        }

        tokio::spawn(chat::drain_outbox(write_half, rx));
        let receiver = tokio::spawn(chat::run_receiver(self.clone(), peer.clone(), read_half));
        chats.insert(peer.clone(), ChatSession { outbox, receiver });
        drop(chats);

        info!(peer = %peer, "chat session open");
        self.emit(Event::ChatOpened { peer });
        Ok(())
    }

    /// Removes a session after its receive loop exits. A session already
    /// removed by another path is a no-op, which is what makes double-close
    /// harmless.
    pub(crate) async fn remove_chat(&self, peer: &str) {
        if self.inner.chats.lock().await.remove(peer).is_some() {
            info!(peer = %peer, "chat session ended");
            self.emit(Event::ChatClosed {
                peer: peer.to_string(),
            });
        }
    }

    /// Tears down every chat session and pending request. Safe to call more
    /// than once.
    pub async fn shutdown(&self) {
        let mut chats = self.inner.chats.lock().await;
        for (peer, session) in chats.drain() {
            let close = Frame::new(MessageType::ChatClose)
                .with_header(header::FROM, &self.inner.identity.nickname)
                .with_header(header::TO, &peer);
            let _ = session.send(close);
            session.stop();
        }
        drop(chats);

        let mut pending = self.inner.pending.lock().await;
        for (_, entry) in pending.drain() {
            entry.timer.abort();
        }
    }
}

/// Runs the rendezvous listener: receives signaling datagrams on the
/// manager's UDP socket and dispatches them until the task is stopped.
pub(crate) async fn run_udp_listener(manager: SessionManager) {
    let udp = Arc::clone(&manager.inner.udp);
    let mut buf = vec![0u8; 4096];
    loop {
        match udp.recv_from(&mut buf).await {
            Ok((len, addr)) => manager.handle_datagram(&buf[..len], addr).await,
            Err(e) => {
                warn!(error = %e, "udp receive failed");
            }
        }
    }
}

/// Builds a fresh chat request identifier: `{nickname}_{unix-time}_{random}`.
fn new_request_id(nickname: &str) -> String {
    let suffix: u16 = rand::thread_rng().gen_range(1000..=9999);
    format!("{}_{}_{}", nickname, Utc::now().timestamp(), suffix)
}
