//! Shared helpers for the integration suite: server/client bootstrap
//! and a raw wire-speaking peer for protocol-level scenarios.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time;

use chatroom_core::crypto::{derive_session_key, SessionCipher, SessionKeypair};
use chatroom_core::protocol::payload::{self, LoginRequest, RegisterRequest};
use chatroom_core::protocol::{Datagram, Direction, Frame, OpCode};
use chatroom_core::{
    ChatClient, ChatServer, ClientConfig, Error, NotificationSink, ServerConfig, SinkEvent,
};

pub const EVENT_DEADLINE: Duration = Duration::from_secs(5);

/// Start a server on loopback with a temp store.
pub async fn start_server(
    heartbeat: Duration,
) -> (ChatServer, mpsc::Receiver<SinkEvent>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let (server, events) = start_server_at(heartbeat, dir.path().join("users.bin")).await;
    (server, events, dir)
}

/// Start a server with an explicit store path (for restart scenarios).
pub async fn start_server_at(
    heartbeat: Duration,
    store_path: std::path::PathBuf,
) -> (ChatServer, mpsc::Receiver<SinkEvent>) {
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".parse().expect("addr"),
        heartbeat_interval: heartbeat,
        store_path,
        ..ServerConfig::default()
    };
    let (sink, events) = NotificationSink::channel(256);
    let server = ChatServer::start(config, sink).await.expect("server starts");
    (server, events)
}

/// Connect a client to the server with test-friendly timeouts.
pub async fn connect_client(server_addr: SocketAddr) -> (ChatClient, mpsc::Receiver<SinkEvent>) {
    connect_client_with_heartbeat(server_addr, Duration::from_secs(60)).await
}

/// Connect a client with a specific heartbeat interval.
pub async fn connect_client_with_heartbeat(
    server_addr: SocketAddr,
    heartbeat: Duration,
) -> (ChatClient, mpsc::Receiver<SinkEvent>) {
    let config = ClientConfig {
        heartbeat_interval: heartbeat,
        request_timeout: Duration::from_secs(2),
        ..ClientConfig::new(server_addr)
    };
    let (sink, events) = NotificationSink::channel(256);
    let client = ChatClient::connect(config, sink).await.expect("client connects");
    (client, events)
}

/// Drain the sink until an event matches, or the deadline passes.
pub async fn await_event<F>(rx: &mut mpsc::Receiver<SinkEvent>, mut want: F) -> SinkEvent
where
    F: FnMut(&SinkEvent) -> bool,
{
    time::timeout(EVENT_DEADLINE, async {
        loop {
            let event = rx.recv().await.expect("sink stays open");
            if want(&event) {
                break event;
            }
        }
    })
    .await
    .expect("expected event before deadline")
}

pub fn digest(password: &str) -> [u8; 32] {
    Sha256::digest(password.as_bytes()).into()
}

/// A scripted peer speaking the wire protocol directly, for scenarios
/// the high-level client cannot express (replays, stalled heartbeats).
pub struct RawPeer {
    sock: UdpSocket,
    server: SocketAddr,
    cipher: SessionCipher,
    next_corr: u32,
}

impl RawPeer {
    /// Bind, perform the cleartext handshake and derive the session key.
    pub async fn handshake(server: SocketAddr) -> Self {
        let sock = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let keypair = SessionKeypair::generate();
        sock.send_to(&Datagram::Hello(*keypair.public_key()).encode(), server)
            .await
            .expect("send hello");

        let mut buf = vec![0u8; 65536];
        let server_pub = time::timeout(EVENT_DEADLINE, async {
            loop {
                let (len, from) = sock.recv_from(&mut buf).await.expect("recv");
                if from != server {
                    continue;
                }
                if let Ok(Datagram::HelloAck(key)) = Datagram::decode(&buf[..len]) {
                    break key;
                }
            }
        })
        .await
        .expect("hello-ack before deadline");

        let shared = keypair.diffie_hellman(&server_pub);
        let key = derive_session_key(&shared, keypair.public_key(), &server_pub).expect("derive");
        Self {
            sock,
            server,
            cipher: SessionCipher::client(key),
            next_corr: 1,
        }
    }

    /// Seal a request, returning its correlation id and datagram bytes.
    pub fn seal_request(&mut self, op: OpCode, body: Vec<u8>) -> (u32, Vec<u8>) {
        let corr_id = self.next_corr;
        self.next_corr += 1;
        let plaintext = Frame::request(corr_id, op, body).to_bytes();
        let (nonce, ciphertext) = self.cipher.seal_payload(&plaintext).expect("seal");
        (corr_id, Datagram::Sealed { nonce, ciphertext }.encode())
    }

    /// Send raw datagram bytes verbatim.
    pub async fn send_raw(&self, bytes: &[u8]) {
        self.sock.send_to(bytes, self.server).await.expect("send");
    }

    /// Send a request and await its response payload.
    pub async fn request(&mut self, op: OpCode, body: Vec<u8>) -> Result<Vec<u8>, Error> {
        let (corr_id, bytes) = self.seal_request(op, body);
        self.send_raw(&bytes).await;
        let frame = self.recv_response(corr_id).await;
        payload::decode_response(&frame.body).map(<[u8]>::to_vec)
    }

    /// Await the response with the given correlation id, skipping events.
    pub async fn recv_response(&mut self, corr_id: u32) -> Frame {
        time::timeout(EVENT_DEADLINE, async {
            loop {
                if let Some(frame) = self.recv_frame().await {
                    if frame.dir == Direction::Response && frame.corr_id == corr_id {
                        break frame;
                    }
                }
            }
        })
        .await
        .expect("response before deadline")
    }

    /// Receive and open one sealed frame, if the next datagram is one.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        let mut buf = vec![0u8; 65536];
        let (len, from) = self.sock.recv_from(&mut buf).await.expect("recv");
        if from != self.server {
            return None;
        }
        let Ok(Datagram::Sealed { nonce, ciphertext }) = Datagram::decode(&buf[..len]) else {
            return None;
        };
        let plaintext = self.cipher.open_payload(&nonce, &ciphertext).ok()?;
        Frame::from_bytes(&plaintext).ok()
    }

    /// Register and login in two round trips.
    pub async fn register_and_login(&mut self, username: &str, password: &str) {
        self.request(
            OpCode::Register,
            RegisterRequest {
                username: username.to_string(),
                digest: digest(password),
            }
            .to_bytes(),
        )
        .await
        .expect("register");
        self.request(
            OpCode::Login,
            LoginRequest {
                username: username.to_string(),
                digest: digest(password),
            }
            .to_bytes(),
        )
        .await
        .expect("login");
    }
}
