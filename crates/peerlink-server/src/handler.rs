//! Per-connection frame dispatch.
//!
//! Each accepted connection runs one read loop feeding [`Broker::dispatch`]
//! and one writer task draining the connection's outbox. All registry access
//! goes through the single shared guard; the outbox indirection means a slow
//! or dead peer never blocks the task that is fanning a broadcast out.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use peerlink_protocol::{
    AckBody, BroadcastBody, BroadcastMsgBody, Frame, MessageType, ProtocolResult, RegisterBody,
    UserEventBody, UserListBody, header, read_frame,
};

use crate::error::{RegistryError, ServerResult};
use crate::registry::{ClientId, ClientRecord, Registry};

/// Outbound frame queue for one connection.
pub type Outbox = mpsc::UnboundedSender<Frame>;

/// The registry broker: owns the client registry and answers every inbound
/// frame on the per-client server connections.
#[derive(Debug)]
pub struct Broker {
    /// Host string advertised in the `Host` header of every outgoing frame.
    host: String,
    registry: RwLock<Registry>,
    next_id: AtomicU64,
}

/// Broker shared across all connection tasks.
pub type SharedBroker = Arc<Broker>;

impl Broker {
    /// Creates a broker advertising the given host string.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            registry: RwLock::new(Registry::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Mints the next connection identity.
    pub fn next_id(&self) -> ClientId {
        ClientId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the number of currently registered clients.
    pub async fn client_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Drives one accepted connection until the peer goes away: reads frames,
    /// dispatches them, and tears the client down on exit.
    pub async fn handle_connection(self: Arc<Self>, stream: TcpStream) {
        let id = self.next_id();
        let peer = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();

        let (outbox, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(drain_outbox(write_half, rx));

        debug!(%id, ?peer, "connection open");

        let mut reader = BufReader::new(read_half);
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(frame)) => self.dispatch(id, &outbox, frame).await,
                Ok(None) => {
                    debug!(%id, "connection closed by peer");
                    break;
                }
                Err(e) => {
                    debug!(%id, error = %e, "read failed, dropping connection");
                    break;
                }
            }
        }

        self.disconnect(id).await;
        drop(outbox);
        let _ = writer.await;
    }

    /// Routes one inbound frame. Handler failures are logged; they never take
    /// the connection down.
    pub async fn dispatch(&self, id: ClientId, outbox: &Outbox, frame: Frame) {
        let result = match frame.message_type() {
            Some(MessageType::Register) => self.handle_register(id, outbox, &frame).await,
            Some(MessageType::Unregister) => self.handle_unregister(id, outbox).await,
            Some(MessageType::Broadcast) => self.handle_broadcast(id, outbox, &frame).await,
            Some(MessageType::GetUsers) => self.handle_get_users(id, outbox).await,
            _ => self.reply_error(
                outbox,
                format!("unknown message type: {}", frame.type_token()),
            ),
        };
        if let Err(e) = result {
            warn!(%id, message_type = frame.type_token(), error = %e, "failed to handle frame");
        }
    }

    /// REGISTER: validate, insert, confirm, send the user list, announce.
    ///
    /// The whole sequence runs under one write-lock hold so the USER_LIST the
    /// new client sees and the USER_JOINED everyone else sees reflect the
    /// same membership instant.
    async fn handle_register(&self, id: ClientId, outbox: &Outbox, frame: &Frame) -> ServerResult<()> {
        let body: RegisterBody = frame.json_or_default()?;
        let ip = frame
            .header(header::HOST)
            .map(str::to_string)
            .or(body.ip.clone());

        let (nickname, ip, udp_port) = match validate_registration(&body, ip) {
            Ok(fields) => fields,
            Err(e) => return self.reply_error(outbox, e.to_string()),
        };

        let mut registry = self.registry.write().await;
        let record = ClientRecord::new(nickname.clone(), ip.clone(), udp_port, outbox.clone());
        if let Err(e) = registry.register(id, record) {
            drop(registry);
            return self.reply_error(outbox, e.to_string());
        }

        info!(%id, nickname = %nickname, ip = %ip, udp_port, "client registered");

        let _ = outbox.send(self.ack(
            MessageType::RegisterOk,
            format!("registered as {}", nickname),
        )?);
        let _ = outbox.send(self.user_list_frame(&registry, id)?);

        let joined = self.user_event_frame(MessageType::UserJoined, &nickname, &ip, udp_port)?;
        registry.fan_out(id, &joined);
        Ok(())
    }

    /// UNREGISTER: confirm, remove, announce. A caller with no record is a
    /// silent no-op.
    async fn handle_unregister(&self, id: ClientId, outbox: &Outbox) -> ServerResult<()> {
        let mut registry = self.registry.write().await;
        let Some(record) = registry.unregister(id) else {
            return Ok(());
        };

        info!(%id, nickname = %record.nickname, "client unregistered");

        let _ = outbox.send(self.ack(
            MessageType::UnregisterOk,
            format!("unregistered {}", record.nickname),
        )?);

        let left = self.user_event_frame(MessageType::UserLeft, &record.nickname, "", 0)?;
        registry.fan_out(id, &left);
        Ok(())
    }

    /// BROADCAST: relay to everyone else, then confirm to the sender.
    async fn handle_broadcast(&self, id: ClientId, outbox: &Outbox, frame: &Frame) -> ServerResult<()> {
        let registry = self.registry.read().await;
        let Some(record) = registry.get(id) else {
            drop(registry);
            return self.reply_error(outbox, RegistryError::NotRegistered.to_string());
        };

        let body: BroadcastBody = frame.json_or_default()?;
        let relay = Frame::with_json(MessageType::BroadcastMsg, &BroadcastMsgBody {
            sender: record.nickname.clone(),
            message: body.message.clone(),
            timestamp: unix_now(),
        })?
        .with_header(header::HOST, &self.host);

        info!(sender = %record.nickname, recipients = registry.len() - 1, "broadcast relayed");
        registry.fan_out(id, &relay);

        let _ = outbox.send(self.ack(MessageType::BroadcastOk, "message broadcast")?);
        Ok(())
    }

    /// GET_USERS: reply with the directory, excluding the caller.
    async fn handle_get_users(&self, id: ClientId, outbox: &Outbox) -> ServerResult<()> {
        let registry = self.registry.read().await;
        let _ = outbox.send(self.user_list_frame(&registry, id)?);
        Ok(())
    }

    /// Tears down a departed connection: removes the record (if any) and
    /// announces USER_LEFT to the remaining clients. No confirmation is sent;
    /// the peer is gone.
    pub async fn disconnect(&self, id: ClientId) {
        let mut registry = self.registry.write().await;
        let Some(record) = registry.unregister(id) else {
            return;
        };

        info!(%id, nickname = %record.nickname, "client disconnected");

        match self.user_event_frame(MessageType::UserLeft, &record.nickname, "", 0) {
            Ok(left) => registry.fan_out(id, &left),
            Err(e) => warn!(error = %e, "failed to build USER_LEFT frame"),
        }
    }

    fn ack(&self, message_type: MessageType, message: impl Into<String>) -> ProtocolResult<Frame> {
        Ok(
            Frame::with_json(message_type, &AckBody::new(message))?
                .with_header(header::HOST, &self.host),
        )
    }

    fn reply_error(&self, outbox: &Outbox, message: impl Into<String>) -> ServerResult<()> {
        let _ = outbox.send(self.ack(MessageType::Error, message)?);
        Ok(())
    }

    fn user_list_frame(&self, registry: &Registry, exclude: ClientId) -> ProtocolResult<Frame> {
        Ok(Frame::with_json(MessageType::UserList, &UserListBody {
            users: registry.user_list(exclude),
        })?
        .with_header(header::HOST, &self.host))
    }

    fn user_event_frame(
        &self,
        message_type: MessageType,
        nickname: &str,
        ip: &str,
        udp_port: u16,
    ) -> ProtocolResult<Frame> {
        Ok(Frame::with_json(message_type, &UserEventBody {
            nickname: nickname.to_string(),
            ip: ip.to_string(),
            udp_port,
            timestamp: unix_now(),
        })?
        .with_header(header::HOST, &self.host))
    }
}

/// Checks the three required registration fields, preferring the `Host`
/// header over the body `ip`.
fn validate_registration(
    body: &RegisterBody,
    ip: Option<String>,
) -> Result<(String, String, u16), RegistryError> {
    if body.nickname.is_empty() {
        return Err(RegistryError::MissingField { field: "nickname" });
    }
    let ip = match ip {
        Some(ip) if !ip.is_empty() => ip,
        _ => return Err(RegistryError::MissingField { field: "ip" }),
    };
    if body.udp_port == 0 {
        return Err(RegistryError::MissingField { field: "udp_port" });
    }
    Ok((body.nickname.clone(), ip, body.udp_port))
}

/// Writes queued frames to the connection until the outbox closes or the
/// peer stops reading.
async fn drain_outbox(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = writer.write_all(&frame.encode()).await {
            debug!(error = %e, "write failed, stopping writer");
            break;
        }
    }
}

/// Current time as float unix seconds, the wire timestamp format.
fn unix_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_frame(nickname: &str, udp_port: u16) -> Frame {
        Frame::with_json(MessageType::Register, &RegisterBody {
            nickname: nickname.to_string(),
            ip: None,
            udp_port,
        })
        .unwrap()
        .with_header(header::HOST, "127.0.0.1")
    }

    async fn register(
        broker: &Broker,
        nickname: &str,
        udp_port: u16,
    ) -> (ClientId, mpsc::UnboundedReceiver<Frame>) {
        let id = broker.next_id();
        let (outbox, rx) = mpsc::unbounded_channel();
        broker
            .dispatch(id, &outbox, register_frame(nickname, udp_port))
            .await;
        (id, rx)
    }

    fn expect_type(rx: &mut mpsc::UnboundedReceiver<Frame>, expected: MessageType) -> Frame {
        let frame = rx.try_recv().expect("expected a queued frame");
        assert_eq!(frame.message_type(), Some(expected));
        frame
    }

    #[tokio::test]
    async fn register_replies_ok_then_user_list() {
        let broker = Broker::new("127.0.0.1");
        let (_id, mut rx) = register(&broker, "alice", 5000).await;

        let ok = expect_type(&mut rx, MessageType::RegisterOk);
        assert!(ok.json::<AckBody>().unwrap().message.contains("alice"));
        assert_eq!(ok.header(header::HOST), Some("127.0.0.1"));

        let list = expect_type(&mut rx, MessageType::UserList);
        assert!(list.json::<UserListBody>().unwrap().users.is_empty());
    }

    #[tokio::test]
    async fn second_register_sees_first_and_triggers_user_joined() {
        let broker = Broker::new("127.0.0.1");
        let (_alice, mut rx_alice) = register(&broker, "alice", 5000).await;
        let (_bob, mut rx_bob) = register(&broker, "bob", 5001).await;

        // Drain alice's registration replies.
        expect_type(&mut rx_alice, MessageType::RegisterOk);
        expect_type(&mut rx_alice, MessageType::UserList);

        expect_type(&mut rx_bob, MessageType::RegisterOk);
        let list = expect_type(&mut rx_bob, MessageType::UserList);
        let users = list.json::<UserListBody>().unwrap().users;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].nickname, "alice");
        assert_eq!(users[0].udp_port, 5000);

        let joined = expect_type(&mut rx_alice, MessageType::UserJoined);
        let event = joined.json::<UserEventBody>().unwrap();
        assert_eq!(event.nickname, "bob");
        assert_eq!(event.udp_port, 5001);
    }

    #[tokio::test]
    async fn duplicate_nickname_gets_error_and_no_join_notice() {
        let broker = Broker::new("127.0.0.1");
        let (_alice, mut rx_alice) = register(&broker, "alice", 5000).await;
        expect_type(&mut rx_alice, MessageType::RegisterOk);
        expect_type(&mut rx_alice, MessageType::UserList);

        let (_imposter, mut rx_imposter) = register(&broker, "alice", 6000).await;
        let error = expect_type(&mut rx_imposter, MessageType::Error);
        assert!(error.json::<AckBody>().unwrap().message.contains("alice"));

        assert_eq!(broker.client_count().await, 1);
        assert!(rx_alice.try_recv().is_err());
    }

    #[tokio::test]
    async fn register_with_missing_fields_is_rejected() {
        let broker = Broker::new("127.0.0.1");
        let id = broker.next_id();
        let (outbox, mut rx) = mpsc::unbounded_channel();

        // No nickname.
        let frame = Frame::with_json(MessageType::Register, &RegisterBody {
            nickname: String::new(),
            ip: None,
            udp_port: 5000,
        })
        .unwrap()
        .with_header(header::HOST, "127.0.0.1");
        broker.dispatch(id, &outbox, frame).await;
        expect_type(&mut rx, MessageType::Error);

        // No udp_port.
        let frame = Frame::with_json(MessageType::Register, &RegisterBody {
            nickname: "alice".to_string(),
            ip: None,
            udp_port: 0,
        })
        .unwrap()
        .with_header(header::HOST, "127.0.0.1");
        broker.dispatch(id, &outbox, frame).await;
        expect_type(&mut rx, MessageType::Error);

        // No Host header and no body ip.
        let frame = Frame::with_json(MessageType::Register, &RegisterBody {
            nickname: "alice".to_string(),
            ip: None,
            udp_port: 5000,
        })
        .unwrap();
        broker.dispatch(id, &outbox, frame).await;
        expect_type(&mut rx, MessageType::Error);

        assert_eq!(broker.client_count().await, 0);
    }

    #[tokio::test]
    async fn register_falls_back_to_body_ip() {
        let broker = Broker::new("127.0.0.1");
        let id = broker.next_id();
        let (outbox, mut rx) = mpsc::unbounded_channel();

        let frame = Frame::with_json(MessageType::Register, &RegisterBody {
            nickname: "alice".to_string(),
            ip: Some("10.0.0.7".to_string()),
            udp_port: 5000,
        })
        .unwrap();
        broker.dispatch(id, &outbox, frame).await;

        expect_type(&mut rx, MessageType::RegisterOk);
        let list = broker.registry.read().await;
        assert_eq!(list.get(id).unwrap().ip, "10.0.0.7");
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_but_the_sender() {
        let broker = Broker::new("127.0.0.1");
        let (alice, mut rx_alice) = register(&broker, "alice", 5000).await;
        let (_bob, mut rx_bob) = register(&broker, "bob", 5001).await;
        let (_carol, mut rx_carol) = register(&broker, "carol", 5002).await;

        // Drain registration traffic.
        while rx_alice.try_recv().is_ok() {}
        while rx_bob.try_recv().is_ok() {}
        while rx_carol.try_recv().is_ok() {}

        let (outbox, mut rx_sender) = mpsc::unbounded_channel();
        // Re-dispatch through alice's id but a fresh outbox to capture replies.
        let frame = Frame::with_json(MessageType::Broadcast, &BroadcastBody {
            message: "hi".to_string(),
        })
        .unwrap();
        broker.dispatch(alice, &outbox, frame).await;

        for rx in [&mut rx_bob, &mut rx_carol] {
            let relay = expect_type(rx, MessageType::BroadcastMsg);
            let body = relay.json::<BroadcastMsgBody>().unwrap();
            assert_eq!(body.sender, "alice");
            assert_eq!(body.message, "hi");
            assert!(body.timestamp > 0.0);
            assert!(rx.try_recv().is_err(), "exactly one copy expected");
        }

        expect_type(&mut rx_sender, MessageType::BroadcastOk);
        assert!(rx_alice.try_recv().is_err(), "sender must not receive the relay");
    }

    #[tokio::test]
    async fn broadcast_from_unregistered_caller_is_an_error() {
        let broker = Broker::new("127.0.0.1");
        let id = broker.next_id();
        let (outbox, mut rx) = mpsc::unbounded_channel();

        let frame = Frame::with_json(MessageType::Broadcast, &BroadcastBody {
            message: "hi".to_string(),
        })
        .unwrap();
        broker.dispatch(id, &outbox, frame).await;

        let error = expect_type(&mut rx, MessageType::Error);
        assert!(
            error
                .json::<AckBody>()
                .unwrap()
                .message
                .contains("not registered")
        );
    }

    #[tokio::test]
    async fn unregister_confirms_and_notifies_the_rest() {
        let broker = Broker::new("127.0.0.1");
        let (alice, mut rx_alice) = register(&broker, "alice", 5000).await;
        let (_bob, mut rx_bob) = register(&broker, "bob", 5001).await;
        while rx_alice.try_recv().is_ok() {}
        while rx_bob.try_recv().is_ok() {}

        let (outbox, mut rx) = mpsc::unbounded_channel();
        broker
            .dispatch(alice, &outbox, Frame::new(MessageType::Unregister))
            .await;

        expect_type(&mut rx, MessageType::UnregisterOk);
        let left = expect_type(&mut rx_bob, MessageType::UserLeft);
        let event = left.json::<UserEventBody>().unwrap();
        assert_eq!(event.nickname, "alice");
        assert_eq!(event.ip, "");
        assert_eq!(event.udp_port, 0);
        assert_eq!(broker.client_count().await, 1);
    }

    #[tokio::test]
    async fn unregister_without_record_is_a_silent_noop() {
        let broker = Broker::new("127.0.0.1");
        let id = broker.next_id();
        let (outbox, mut rx) = mpsc::unbounded_channel();
        broker
            .dispatch(id, &outbox, Frame::new(MessageType::Unregister))
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_broadcasts_user_left_without_confirmation() {
        let broker = Broker::new("127.0.0.1");
        let (alice, mut rx_alice) = register(&broker, "alice", 5000).await;
        let (_bob, mut rx_bob) = register(&broker, "bob", 5001).await;
        while rx_alice.try_recv().is_ok() {}
        while rx_bob.try_recv().is_ok() {}

        broker.disconnect(alice).await;

        let left = expect_type(&mut rx_bob, MessageType::UserLeft);
        assert_eq!(left.json::<UserEventBody>().unwrap().nickname, "alice");
        assert_eq!(broker.client_count().await, 1);

        // Disconnecting again is a no-op.
        broker.disconnect(alice).await;
        assert!(rx_bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_message_type_gets_error_reply() {
        let broker = Broker::new("127.0.0.1");
        let id = broker.next_id();
        let (outbox, mut rx) = mpsc::unbounded_channel();

        broker.dispatch(id, &outbox, Frame::from_token("SHOUT")).await;

        let error = expect_type(&mut rx, MessageType::Error);
        assert!(error.json::<AckBody>().unwrap().message.contains("SHOUT"));
    }

    #[tokio::test]
    async fn get_users_excludes_caller() {
        let broker = Broker::new("127.0.0.1");
        let (alice, mut rx_alice) = register(&broker, "alice", 5000).await;
        let (_bob, _rx_bob) = register(&broker, "bob", 5001).await;
        while rx_alice.try_recv().is_ok() {}

        let (outbox, mut rx) = mpsc::unbounded_channel();
        broker
            .dispatch(alice, &outbox, Frame::new(MessageType::GetUsers))
            .await;

        let list = expect_type(&mut rx, MessageType::UserList);
        let users = list.json::<UserListBody>().unwrap().users;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].nickname, "bob");
    }
}
