//! End-to-end broker scenarios over real TCP connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use peerlink_protocol::{
    AckBody, BroadcastBody, BroadcastMsgBody, Frame, MessageType, RegisterBody, UserEventBody,
    UserListBody, header, read_frame,
};
use peerlink_server::{Broker, BrokerServer, ServerConfig};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn spawn_server() -> SocketAddr {
    let config = ServerConfig::new("127.0.0.1", 0);
    let server = BrokerServer::bind(config).await.expect("bind");
    let addr = server.local_addr().expect("local addr");
    let broker = Arc::new(Broker::new("127.0.0.1"));
    tokio::spawn(async move {
        let _ = server.run(broker).await;
    });
    addr
}

/// A raw protocol speaker standing in for a real client.
struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    async fn send(&mut self, frame: Frame) {
        self.writer.write_all(&frame.encode()).await.expect("send");
    }

    async fn recv(&mut self) -> Frame {
        tokio::time::timeout(RECV_TIMEOUT, read_frame(&mut self.reader))
            .await
            .expect("timed out waiting for a frame")
            .expect("read frame")
            .expect("connection closed unexpectedly")
    }

    async fn expect(&mut self, expected: MessageType) -> Frame {
        let frame = self.recv().await;
        assert_eq!(
            frame.message_type(),
            Some(expected),
            "unexpected frame type {}",
            frame.type_token()
        );
        frame
    }

    async fn register(&mut self, nickname: &str, udp_port: u16) {
        let frame = Frame::with_json(MessageType::Register, &RegisterBody {
            nickname: nickname.to_string(),
            ip: None,
            udp_port,
        })
        .expect("encode")
        .with_header(header::HOST, "127.0.0.1");
        self.send(frame).await;
    }
}

#[tokio::test]
async fn register_flow_with_user_list_and_join_notice() {
    let addr = spawn_server().await;

    let mut alice = TestClient::connect(addr).await;
    alice.register("alice", 5000).await;
    alice.expect(MessageType::RegisterOk).await;
    let list = alice.expect(MessageType::UserList).await;
    assert!(list.json::<UserListBody>().unwrap().users.is_empty());

    let mut bob = TestClient::connect(addr).await;
    bob.register("bob", 5001).await;
    bob.expect(MessageType::RegisterOk).await;
    let list = bob.expect(MessageType::UserList).await;
    let users = list.json::<UserListBody>().unwrap().users;
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].nickname, "alice");
    assert_eq!(users[0].udp_port, 5000);

    let joined = alice.expect(MessageType::UserJoined).await;
    let event = joined.json::<UserEventBody>().unwrap();
    assert_eq!(event.nickname, "bob");
    assert_eq!(event.udp_port, 5001);
}

#[tokio::test]
async fn broadcast_is_relayed_to_the_other_client_only() {
    let addr = spawn_server().await;

    let mut alice = TestClient::connect(addr).await;
    alice.register("alice", 5000).await;
    alice.expect(MessageType::RegisterOk).await;
    alice.expect(MessageType::UserList).await;

    let mut bob = TestClient::connect(addr).await;
    bob.register("bob", 5001).await;
    bob.expect(MessageType::RegisterOk).await;
    bob.expect(MessageType::UserList).await;
    alice.expect(MessageType::UserJoined).await;

    alice
        .send(
            Frame::with_json(MessageType::Broadcast, &BroadcastBody {
                message: "hi".to_string(),
            })
            .unwrap(),
        )
        .await;

    let relay = bob.expect(MessageType::BroadcastMsg).await;
    let body = relay.json::<BroadcastMsgBody>().unwrap();
    assert_eq!(body.sender, "alice");
    assert_eq!(body.message, "hi");

    // The sender gets the confirmation and never its own relay.
    alice.expect(MessageType::BroadcastOk).await;
}

#[tokio::test]
async fn duplicate_nickname_is_rejected_but_connection_survives() {
    let addr = spawn_server().await;

    let mut alice = TestClient::connect(addr).await;
    alice.register("alice", 5000).await;
    alice.expect(MessageType::RegisterOk).await;
    alice.expect(MessageType::UserList).await;

    let mut imposter = TestClient::connect(addr).await;
    imposter.register("alice", 6000).await;
    let error = imposter.expect(MessageType::Error).await;
    assert!(error.json::<AckBody>().unwrap().message.contains("alice"));

    // Same connection can retry with a fresh nickname.
    imposter.register("bob", 6000).await;
    imposter.expect(MessageType::RegisterOk).await;
}

#[tokio::test]
async fn dropped_connection_broadcasts_user_left() {
    let addr = spawn_server().await;

    let mut alice = TestClient::connect(addr).await;
    alice.register("alice", 5000).await;
    alice.expect(MessageType::RegisterOk).await;
    alice.expect(MessageType::UserList).await;

    let mut bob = TestClient::connect(addr).await;
    bob.register("bob", 5001).await;
    bob.expect(MessageType::RegisterOk).await;
    bob.expect(MessageType::UserList).await;
    alice.expect(MessageType::UserJoined).await;

    drop(bob);

    let left = alice.expect(MessageType::UserLeft).await;
    let event = left.json::<UserEventBody>().unwrap();
    assert_eq!(event.nickname, "bob");
    assert_eq!(event.ip, "");
    assert_eq!(event.udp_port, 0);
}

#[tokio::test]
async fn unknown_message_type_yields_error_and_connection_stays_open() {
    let addr = spawn_server().await;

    let mut client = TestClient::connect(addr).await;
    client.send(Frame::from_token("SHOUT")).await;
    let error = client.expect(MessageType::Error).await;
    assert!(error.json::<AckBody>().unwrap().message.contains("SHOUT"));

    client.register("alice", 5000).await;
    client.expect(MessageType::RegisterOk).await;
}

#[tokio::test]
async fn get_users_reflects_current_membership() {
    let addr = spawn_server().await;

    let mut alice = TestClient::connect(addr).await;
    alice.register("alice", 5000).await;
    alice.expect(MessageType::RegisterOk).await;
    alice.expect(MessageType::UserList).await;

    let mut bob = TestClient::connect(addr).await;
    bob.register("bob", 5001).await;
    bob.expect(MessageType::RegisterOk).await;
    bob.expect(MessageType::UserList).await;
    alice.expect(MessageType::UserJoined).await;

    alice.send(Frame::new(MessageType::GetUsers)).await;
    let list = alice.expect(MessageType::UserList).await;
    let users = list.json::<UserListBody>().unwrap().users;
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].nickname, "bob");
}
