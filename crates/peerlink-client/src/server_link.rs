//! The long-lived connection to the rendezvous server.

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tracing::debug;

use peerlink_protocol::{
    AckBody, BroadcastBody, BroadcastMsgBody, Frame, MessageType, RegisterBody, UserEventBody,
    UserListBody, header, read_frame,
};

use crate::chat;
use crate::error::{ClientError, ClientResult};
use crate::event::Event;
use crate::session::SessionManager;

/// Writing side of the server connection. Reading happens in
/// [`run_server_reader`], which owns the read half.
pub struct ServerLink {
    outbox: mpsc::UnboundedSender<Frame>,
    local_ip: String,
}

impl ServerLink {
    /// Connects to the server. Returns the link and the read half for the
    /// reader task; the local address of the connection is the ip this
    /// client reports to the server.
    pub async fn connect(host: &str, port: u16) -> ClientResult<(Self, OwnedReadHalf)> {
        let stream = TcpStream::connect((host, port)).await.map_err(|e| {
            ClientError::Connection(format!("failed to connect to {}:{}: {}", host, port, e))
        })?;
        let local_ip = stream.local_addr()?.ip().to_string();

        let (read_half, write_half) = stream.into_split();
        let (outbox, rx) = mpsc::unbounded_channel();
        tokio::spawn(chat::drain_outbox(write_half, rx));

        Ok((Self { outbox, local_ip }, read_half))
    }

    /// Returns the local ip of the server connection.
    pub fn local_ip(&self) -> &str {
        &self.local_ip
    }

    /// Registers a nickname and rendezvous port with the server.
    pub fn register(&self, nickname: &str, udp_port: u16) -> ClientResult<()> {
        let frame = Frame::with_json(MessageType::Register, &RegisterBody {
            nickname: nickname.to_string(),
            ip: Some(self.local_ip.clone()),
            udp_port,
        })?
        .with_header(header::HOST, &self.local_ip);
        self.send(frame)
    }

    /// Asks the server to relay a message to everyone else.
    pub fn broadcast(&self, message: &str) -> ClientResult<()> {
        let frame = Frame::with_json(MessageType::Broadcast, &BroadcastBody {
            message: message.to_string(),
        })?
        .with_header(header::HOST, &self.local_ip);
        self.send(frame)
    }

    /// Asks the server for a fresh user list.
    pub fn request_users(&self) -> ClientResult<()> {
        self.send(Frame::new(MessageType::GetUsers).with_header(header::HOST, &self.local_ip))
    }

    /// Deregisters from the server.
    pub fn unregister(&self) -> ClientResult<()> {
        self.send(Frame::new(MessageType::Unregister).with_header(header::HOST, &self.local_ip))
    }

    fn send(&self, frame: Frame) -> ClientResult<()> {
        self.outbox
            .send(frame)
            .map_err(|_| ClientError::Connection("server connection is closed".to_string()))
    }
}

/// Runs the server-message loop: reads frames from the server and routes
/// them into the session manager until the connection closes.
pub(crate) async fn run_server_reader(manager: SessionManager, read_half: OwnedReadHalf) {
    let mut reader = BufReader::new(read_half);
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => handle_server_frame(&manager, frame).await,
            Ok(None) => {
                debug!("server closed the connection");
                break;
            }
            Err(e) => {
                debug!(error = %e, "server read failed");
                break;
            }
        }
    }
    manager.emit(Event::ServerClosed);
}

async fn handle_server_frame(manager: &SessionManager, frame: Frame) {
    match frame.message_type() {
        Some(MessageType::RegisterOk) => {
            if let Some(body) = body_or_log::<AckBody>(&frame) {
                manager.emit(Event::Registered {
                    message: body.message,
                });
            }
        }
        Some(MessageType::UnregisterOk) => debug!("unregistered from server"),
        Some(MessageType::UserList) => {
            if let Some(body) = body_or_log::<UserListBody>(&frame) {
                manager.replace_directory(body.users).await;
            }
        }
        Some(MessageType::UserJoined) => {
            if let Some(body) = body_or_log::<UserEventBody>(&frame) {
                manager.peer_joined(body).await;
            }
        }
        Some(MessageType::UserLeft) => {
            if let Some(body) = body_or_log::<UserEventBody>(&frame) {
                manager.peer_left(&body.nickname).await;
            }
        }
        Some(MessageType::BroadcastMsg) => {
            if let Some(body) = body_or_log::<BroadcastMsgBody>(&frame) {
                manager.emit(Event::Broadcast {
                    sender: body.sender,
                    message: body.message,
                });
            }
        }
        Some(MessageType::BroadcastOk) => manager.emit(Event::BroadcastSent),
        Some(MessageType::Error) => {
            if let Some(body) = body_or_log::<AckBody>(&frame) {
                manager.emit(Event::ServerError {
                    message: body.message,
                });
            }
        }
        _ => debug!(
            message_type = frame.type_token(),
            "ignoring server frame"
        ),
    }
}

fn body_or_log<T: serde::de::DeserializeOwned + Default>(frame: &Frame) -> Option<T> {
    match frame.json_or_default() {
        Ok(body) => Some(body),
        Err(e) => {
            debug!(
                message_type = frame.type_token(),
                error = %e,
                "bad server frame body"
            );
            None
        }
    }
}
