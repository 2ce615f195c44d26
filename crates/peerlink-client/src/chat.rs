//! Direct chat plumbing: the per-session writer task and receive loop, and
//! the standing chat-accept listener.

use std::net::SocketAddr;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use peerlink_protocol::{ChatHelloBody, ChatMsgBody, Frame, MessageType, header, read_frame};

use crate::event::Event;
use crate::session::SessionManager;

/// Writes queued frames to the connection until the outbox closes or the
/// peer stops reading. Exiting drops the write half, which closes our side
/// of the transport.
pub(crate) async fn drain_outbox(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = writer.write_all(&frame.encode()).await {
            debug!(error = %e, "write failed, stopping writer");
            break;
        }
    }
}

/// Receive loop for one established chat session.
///
/// CHAT_MSG frames are surfaced to the user; CHAT_CLOSE ends the loop; any
/// other frame type on this channel is ignored. However the loop exits, the
/// session entry is removed exactly once.
pub(crate) async fn run_receiver(
    manager: SessionManager,
    peer: String,
    read_half: OwnedReadHalf,
) {
    let mut reader = BufReader::new(read_half);
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => match frame.message_type() {
                Some(MessageType::ChatMsg) => {
                    let body: ChatMsgBody = match frame.json_or_default() {
                        Ok(body) => body,
                        Err(e) => {
                            debug!(peer = %peer, error = %e, "bad chat message body");
                            continue;
                        }
                    };
                    manager.emit(Event::ChatMessage {
                        peer: peer.clone(),
                        timestamp: frame.header(header::TIMESTAMP).map(str::to_string),
                        message: body.message,
                    });
                }
                Some(MessageType::ChatClose) => {
                    debug!(peer = %peer, "peer closed the chat");
                    break;
                }
                _ => debug!(
                    peer = %peer,
                    message_type = frame.type_token(),
                    "ignoring frame on chat channel"
                ),
            },
            Ok(None) => break,
            Err(e) => {
                debug!(peer = %peer, error = %e, "chat read failed");
                break;
            }
        }
    }
    manager.remove_chat(&peer).await;
}

/// Runs the standing chat-accept listener: each inbound connection must
/// introduce itself with CHAT_HELLO before it becomes a session.
pub(crate) async fn run_chat_listener(manager: SessionManager, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let manager = manager.clone();
                tokio::spawn(async move {
                    accept_session(manager, stream, addr).await;
                });
            }
            Err(e) => {
                warn!(error = %e, "chat accept failed");
            }
        }
    }
}

/// Performs the inbound handshake: the first frame must be CHAT_HELLO with
/// the peer's nickname (falling back to the `From` header). Anything else
/// closes the connection without creating a session.
async fn accept_session(manager: SessionManager, mut stream: TcpStream, addr: SocketAddr) {
    let hello = match read_frame(&mut stream).await {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            debug!(%addr, "connection closed before handshake");
            return;
        }
        Err(e) => {
            debug!(%addr, error = %e, "handshake read failed");
            return;
        }
    };

    if hello.message_type() != Some(MessageType::ChatHello) {
        warn!(
            %addr,
            message_type = hello.type_token(),
            "expected CHAT_HELLO, closing connection"
        );
        return;
    }

    let body: ChatHelloBody = match hello.json_or_default() {
        Ok(body) => body,
        Err(e) => {
            warn!(%addr, error = %e, "bad hello body, closing connection");
            return;
        }
    };
    let peer = if body.nickname.is_empty() {
        hello
            .header(header::FROM)
            .unwrap_or("unknown")
            .to_string()
    } else {
        body.nickname
    };

    info!(peer = %peer, %addr, "inbound chat connection");
    if let Err(e) = manager.start_session(peer.clone(), stream, false).await {
        warn!(peer = %peer, error = %e, "rejecting inbound chat connection");
    }
}
