//! The chatroom server: explicit context, op handlers, receive loop and
//! session reaper.
//!
//! All mutable state lives in one [`ServerContext`] value threaded
//! through every handler: the session registry and chat history under a
//! single guard (so presence and message ordering are serialized), the
//! user store under its own read/write guard, and the endpoint. No
//! guard is ever held across an await point; handlers compute their
//! outbound datagrams under the guard and send them after releasing it.

pub mod chat;
pub mod registry;
pub mod store;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock;
use crate::crypto::{
    derive_session_key, SessionCipher, SessionKeypair, X25519PublicKey, NONCE_SIZE,
};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::protocol::payload::{
    self, ChangePasswordRequest, ChatsOk, EntryKind, GetChatsRequest, LoginOk, LoginRequest,
    NewMsgEvent, PresenceEvent, RegisterRequest, SayOk, SayRequest, StatusOk, UserSnapshot,
};
use crate::protocol::{Datagram, Direction, Frame, OpCode};
use crate::sink::{NotificationSink, SinkEvent};
use crate::MAX_DATAGRAM_SIZE;

use chat::{ChatroomState, DEFAULT_HISTORY_LIMIT};
use registry::SessionRegistry;
use store::UserStore;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the UDP socket on.
    pub bind_addr: SocketAddr,
    /// Sessions expire after this much silence; clients send heartbeats
    /// at a third of it.
    pub heartbeat_interval: Duration,
    /// Path of the persisted user store.
    pub store_path: PathBuf,
    /// Bound of every chat log.
    pub history_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            heartbeat_interval: Duration::from_secs(60),
            store_path: PathBuf::from("./users.bin"),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Session registry and chat history under one guard.
struct Room {
    sessions: SessionRegistry,
    chat: ChatroomState,
}

/// Everything a handler needs, passed explicitly.
struct ServerContext {
    endpoint: Endpoint,
    room: Mutex<Room>,
    store: RwLock<UserStore>,
    sink: NotificationSink,
    config: ServerConfig,
}

impl ServerContext {
    fn room(&self) -> MutexGuard<'_, Room> {
        self.room.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Sealed datagrams waiting to leave once the room guard is released.
type Outbound = Vec<(SocketAddr, Vec<u8>)>;

/// A running chatroom server.
///
/// Dropping the value aborts both loops and completes any endpoint
/// bookkeeping; there is no partially-shut-down state.
pub struct ChatServer {
    ctx: Arc<ServerContext>,
    local_addr: SocketAddr,
    recv_task: JoinHandle<()>,
    reap_task: JoinHandle<()>,
}

impl ChatServer {
    /// Load the store, bind the socket and spawn the server loops.
    pub async fn start(config: ServerConfig, sink: NotificationSink) -> Result<Self> {
        let store = UserStore::load(&config.store_path)?;
        let endpoint = Endpoint::bind(config.bind_addr).await?;
        let local_addr = endpoint.local_addr();
        info!(%local_addr, store = %config.store_path.display(), "server listening");

        let ctx = Arc::new(ServerContext {
            endpoint,
            room: Mutex::new(Room {
                sessions: SessionRegistry::new(),
                chat: ChatroomState::new(config.history_limit),
            }),
            store: RwLock::new(store),
            sink,
            config,
        });

        ctx.sink
            .emit(SinkEvent::Log(format!("listening on {local_addr}")));
        let recv_task = tokio::spawn(recv_loop(ctx.clone()));
        let reap_task = tokio::spawn(reap_loop(ctx.clone()));

        Ok(Self {
            ctx,
            local_addr,
            recv_task,
            reap_task,
        })
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Count of events the sink had to drop.
    pub fn dropped_notifications(&self) -> u64 {
        self.ctx.sink.dropped()
    }
}

impl Drop for ChatServer {
    fn drop(&mut self) {
        self.recv_task.abort();
        self.reap_task.abort();
        self.ctx.endpoint.close();
    }
}

async fn recv_loop(ctx: Arc<ServerContext>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (dgram, addr) = match ctx.endpoint.recv_datagram(&mut buf).await {
            Ok(received) => received,
            Err(Error::Transport(err)) => {
                error!(%err, "socket receive failed");
                continue;
            }
            Err(err) => {
                debug!(kind = err.kind(), "dropping undecodable datagram");
                continue;
            }
        };

        let sends = match dgram {
            Datagram::Hello(client_pub) => handle_hello(&ctx, addr, client_pub),
            Datagram::HelloAck(_) => {
                debug!(%addr, "unexpected hello-ack, dropping");
                Vec::new()
            }
            Datagram::Sealed { nonce, ciphertext } => {
                handle_sealed(&ctx, addr, nonce, ciphertext).await
            }
        };
        flush(&ctx, sends).await;
    }
}

async fn reap_loop(ctx: Arc<ServerContext>) {
    let mut ticker = tokio::time::interval(ctx.config.heartbeat_interval / 4);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let now = Instant::now();
        let wall = clock::wall_now();

        let sends = {
            let mut room = ctx.room();
            let reaped = room
                .sessions
                .reap(now, ctx.config.heartbeat_interval);
            let mut sends = Vec::new();
            for (addr, username) in reaped {
                debug!(%addr, "session reaped");
                if let Some(name) = username {
                    info!(username = name.as_str(), "heartbeat lost, user offline");
                    sends.extend(offline_transition(&ctx.sink, &mut room, &name, wall));
                }
            }
            sends
        };
        flush(&ctx, sends).await;
    }
}

/// Post the Offline presence entry and seal the Offline event for every
/// other authenticated session. Must run under the room guard.
fn offline_transition(
    sink: &NotificationSink,
    room: &mut Room,
    username: &str,
    wall: chrono::DateTime<chrono::Utc>,
) -> Outbound {
    room.chat.post_presence(username, EntryKind::Offline, wall);
    let event = Frame::event(
        OpCode::EventOffline,
        PresenceEvent {
            timestamp: wall,
            username: username.to_string(),
        }
        .to_bytes(),
    );
    let targets = room.sessions.authenticated_addrs_except(Some(username));
    let sends = seal_for(room, &targets, &event);
    sink.emit(SinkEvent::Offline(username.to_string()));
    sink.emit(SinkEvent::UsersUpdated);
    sends
}

/// Counterpart of [`offline_transition`] for a user coming online.
fn online_transition(
    sink: &NotificationSink,
    room: &mut Room,
    username: &str,
    wall: chrono::DateTime<chrono::Utc>,
) -> Outbound {
    room.chat.post_presence(username, EntryKind::Online, wall);
    let event = Frame::event(
        OpCode::EventOnline,
        PresenceEvent {
            timestamp: wall,
            username: username.to_string(),
        }
        .to_bytes(),
    );
    let targets = room.sessions.authenticated_addrs_except(Some(username));
    let sends = seal_for(room, &targets, &event);
    sink.emit(SinkEvent::Online(username.to_string()));
    sink.emit(SinkEvent::UsersUpdated);
    sends
}

/// Seal one frame separately for each target session.
fn seal_for(room: &mut Room, targets: &[SocketAddr], frame: &Frame) -> Outbound {
    let plaintext = frame.to_bytes();
    let mut sends = Vec::with_capacity(targets.len());
    for addr in targets {
        let Some(session) = room.sessions.get_mut(addr) else {
            continue;
        };
        match session.cipher.seal_payload(&plaintext) {
            Ok((nonce, ciphertext)) => {
                sends.push((*addr, Datagram::Sealed { nonce, ciphertext }.encode()));
            }
            Err(err) => {
                // NonceExhausted: the peer must rehandshake; skip it.
                warn!(%addr, kind = err.kind(), "could not seal event for peer");
            }
        }
    }
    sends
}

async fn flush(ctx: &ServerContext, sends: Outbound) {
    for (addr, bytes) in sends {
        if let Err(err) = ctx.endpoint.send_bytes(&bytes, addr).await {
            warn!(%addr, kind = err.kind(), "send failed");
        }
    }
}

/// A hello creates (or re-creates) the session for an address and is
/// answered with the server's session public key.
fn handle_hello(ctx: &ServerContext, addr: SocketAddr, client_pub: X25519PublicKey) -> Outbound {
    let keypair = SessionKeypair::generate();
    let shared = keypair.diffie_hellman(&client_pub);
    let key = match derive_session_key(&shared, &client_pub, keypair.public_key()) {
        Ok(key) => key,
        Err(err) => {
            debug!(%addr, kind = err.kind(), "handshake key derivation failed");
            return Vec::new();
        }
    };
    let cipher = SessionCipher::server(key);

    let now = Instant::now();
    let wall = clock::wall_now();
    let mut sends = Vec::new();
    {
        let mut room = ctx.room();
        // A rehandshake from an authenticated address takes its user
        // offline first; the new session starts clean.
        if let Some(evicted) = room.sessions.upsert_unauth(addr, client_pub, cipher, now) {
            info!(%addr, username = evicted.as_str(), "rehandshake evicted authenticated session");
            sends.extend(offline_transition(&ctx.sink, &mut room, &evicted, wall));
        }
    }
    debug!(%addr, "session established");
    sends.push((addr, Datagram::HelloAck(*keypair.public_key()).encode()));
    sends
}

async fn handle_sealed(
    ctx: &ServerContext,
    addr: SocketAddr,
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
) -> Outbound {
    let now = Instant::now();

    // Open and validate under the room guard; failures leave session
    // state untouched apart from the failure counter.
    let frame = {
        let mut room = ctx.room();
        let Some(session) = room.sessions.get_mut(&addr) else {
            debug!(%addr, "sealed frame from unknown peer, dropping");
            return Vec::new();
        };
        let opened = session
            .cipher
            .open_payload(&nonce, &ciphertext)
            .and_then(|plain| Frame::from_bytes(&plain));
        match opened {
            Ok(frame) => {
                session.note_decode_success();
                if session.is_authenticated() {
                    session.last_heartbeat = now;
                }
                frame
            }
            Err(err) => {
                debug!(%addr, kind = err.kind(), "dropping undecipherable frame");
                if session.record_decode_failure(now) {
                    warn!(%addr, "too many decode failures, closing session");
                    let username = room.sessions.remove(&addr).and_then(|s| s.username);
                    if let Some(name) = username {
                        return offline_transition(&ctx.sink, &mut room, &name, clock::wall_now());
                    }
                }
                return Vec::new();
            }
        }
    };

    match frame.dir {
        Direction::Request => handle_request(ctx, addr, frame).await,
        Direction::Response => {
            debug!(%addr, "server does not issue requests, dropping response");
            Vec::new()
        }
        Direction::Event => {
            // The only client event is a redundant heartbeat; the
            // timestamp refresh above already served it.
            if frame.op != OpCode::Heartbeat {
                debug!(%addr, op = ?frame.op, "unexpected event, dropping");
            }
            Vec::new()
        }
    }
}

async fn handle_request(ctx: &ServerContext, addr: SocketAddr, frame: Frame) -> Outbound {
    let op = frame.op;
    let corr_id = frame.corr_id;
    let result = dispatch_op(ctx, addr, op, &frame.body).await;

    let (body, mut sends) = match result {
        Ok((body, sends)) => (payload::encode_ok(&body), sends),
        Err(err) => {
            debug!(%addr, op = ?op, kind = err.kind(), "request refused");
            (payload::encode_err(&err), Vec::new())
        }
    };

    let response = Frame::response(corr_id, op, body);
    // Response first, then the events the request caused. Order across
    // sessions carries no guarantee either way.
    let mut out = {
        let mut room = ctx.room();
        seal_for(&mut room, &[addr], &response)
    };
    out.append(&mut sends);
    out
}

async fn dispatch_op(
    ctx: &ServerContext,
    addr: SocketAddr,
    op: OpCode,
    body: &[u8],
) -> Result<(Vec<u8>, Outbound)> {
    match op {
        OpCode::Register => op_register(ctx, addr, body).await,
        OpCode::Login => op_login(ctx, addr, body),
        OpCode::Logout => op_logout(ctx, addr),
        OpCode::ChangePassword => op_change_password(ctx, addr, body).await,
        OpCode::Say => op_say(ctx, addr, body),
        OpCode::GetChats => op_get_chats(ctx, addr, body),
        OpCode::GetUsers => op_get_users(ctx, addr),
        OpCode::FetchStatus => op_fetch_status(ctx, addr),
        OpCode::Heartbeat => op_heartbeat(ctx, addr),
        _ => Err(Error::Unsupported),
    }
}

fn build_roster(store: &UserStore, sessions: &SessionRegistry) -> Vec<UserSnapshot> {
    store
        .usernames()
        .into_iter()
        .map(|name| {
            let online = sessions.is_online(&name);
            UserSnapshot { name, online }
        })
        .collect()
}

/// The username bound to `addr`, or `NotAuthenticated`.
fn require_auth(room: &Room, addr: &SocketAddr) -> Result<String> {
    room.sessions
        .username_of(addr)
        .map(str::to_string)
        .ok_or(Error::NotAuthenticated)
}

async fn op_register(
    ctx: &ServerContext,
    addr: SocketAddr,
    body: &[u8],
) -> Result<(Vec<u8>, Outbound)> {
    let req = RegisterRequest::from_bytes(body)?;
    let snapshot = {
        let mut store = ctx.store.write().unwrap_or_else(|e| e.into_inner());
        store.register(&req.username, &req.digest)?;
        store.snapshot()
    };
    store::persist(snapshot, ctx.config.store_path.clone()).await?;
    info!(%addr, username = req.username.as_str(), "user registered");
    ctx.sink.emit(SinkEvent::UsersUpdated);

    let sends = {
        let mut room = ctx.room();
        let targets = room.sessions.authenticated_addrs_except(None);
        seal_for(
            &mut room,
            &targets,
            &Frame::event(OpCode::EventUsersUpdated, Vec::new()),
        )
    };
    Ok((Vec::new(), sends))
}

fn op_login(ctx: &ServerContext, addr: SocketAddr, body: &[u8]) -> Result<(Vec<u8>, Outbound)> {
    let req = LoginRequest::from_bytes(body)?;

    // Store guard before room guard, always in this order.
    let store = ctx.store.read().unwrap_or_else(|e| e.into_inner());
    store.verify(&req.username, &req.digest)?;

    let now = Instant::now();
    let wall = clock::wall_now();
    let mut room = ctx.room();

    let evicted = room.sessions.authenticate(addr, &req.username, now)?;
    let mut sends = Vec::new();
    if let Some(old_addr) = evicted {
        info!(
            %old_addr,
            username = req.username.as_str(),
            "prior session evicted by new login"
        );
        // Offline for the evictee precedes Online for the new peer.
        sends.extend(offline_transition(&ctx.sink, &mut room, &req.username, wall));
    }
    sends.extend(online_transition(&ctx.sink, &mut room, &req.username, wall));
    info!(%addr, username = req.username.as_str(), "user logged in");

    let roster = build_roster(&store, &room.sessions);
    Ok((LoginOk { users: roster }.to_bytes(), sends))
}

fn op_logout(ctx: &ServerContext, addr: SocketAddr) -> Result<(Vec<u8>, Outbound)> {
    let now = Instant::now();
    let wall = clock::wall_now();
    let mut room = ctx.room();
    let username = room.sessions.logout(addr, now)?;
    info!(%addr, username = username.as_str(), "user logged out");
    let sends = offline_transition(&ctx.sink, &mut room, &username, wall);
    Ok((Vec::new(), sends))
}

async fn op_change_password(
    ctx: &ServerContext,
    addr: SocketAddr,
    body: &[u8],
) -> Result<(Vec<u8>, Outbound)> {
    let req = ChangePasswordRequest::from_bytes(body)?;
    let username = require_auth(&ctx.room(), &addr)?;

    let snapshot = {
        let mut store = ctx.store.write().unwrap_or_else(|e| e.into_inner());
        store.change_password(&username, &req.old, &req.new)?;
        store.snapshot()
    };
    store::persist(snapshot, ctx.config.store_path.clone()).await?;
    info!(username = username.as_str(), "password changed");
    Ok((Vec::new(), Vec::new()))
}

fn op_say(ctx: &ServerContext, addr: SocketAddr, body: &[u8]) -> Result<(Vec<u8>, Outbound)> {
    let req = SayRequest::from_bytes(body)?;
    if req.text.trim().is_empty() {
        return Err(Error::EmptyMessage);
    }

    let wall = clock::wall_now();
    let store = ctx.store.read().unwrap_or_else(|e| e.into_inner());
    let mut room = ctx.room();
    let username = require_auth(&room, &addr)?;

    let sends = match &req.to {
        Some(to) => {
            if !store.contains(to) {
                return Err(Error::RecipientUnknown);
            }
            let Some(peer_addr) = room.sessions.addr_of(to) else {
                return Err(Error::RecipientOffline);
            };
            room.chat.post_private(&username, to, &req.text, wall);
            let event = Frame::event(
                OpCode::EventNewMsg,
                NewMsgEvent {
                    timestamp: wall,
                    from: username.clone(),
                    public: false,
                    text: req.text.clone(),
                }
                .to_bytes(),
            );
            // A note to self needs no relay; the sender's log has it.
            if peer_addr == addr {
                Vec::new()
            } else {
                seal_for(&mut room, &[peer_addr], &event)
            }
        }
        None => {
            room.chat.post_public(&username, &req.text, wall);
            let event = Frame::event(
                OpCode::EventNewMsg,
                NewMsgEvent {
                    timestamp: wall,
                    from: username.clone(),
                    public: true,
                    text: req.text.clone(),
                }
                .to_bytes(),
            );
            let targets = room.sessions.authenticated_addrs_except(Some(&username));
            seal_for(&mut room, &targets, &event)
        }
    };

    Ok((SayOk { timestamp: wall }.to_bytes(), sends))
}

fn op_get_chats(ctx: &ServerContext, addr: SocketAddr, body: &[u8]) -> Result<(Vec<u8>, Outbound)> {
    let req = GetChatsRequest::from_bytes(body)?;
    let store = ctx.store.read().unwrap_or_else(|e| e.into_inner());
    let room = ctx.room();
    let username = require_auth(&room, &addr)?;
    if let Some(peer) = &req.peer {
        // Unlike login, history fetches may say who exists: the roster
        // already lists every registered user.
        if !store.contains(peer) {
            return Err(Error::UserUnknown);
        }
    }
    let entries = room.chat.get_chats(&username, req.peer.as_deref());
    Ok((ChatsOk { entries }.to_bytes(), Vec::new()))
}

fn op_get_users(ctx: &ServerContext, addr: SocketAddr) -> Result<(Vec<u8>, Outbound)> {
    let store = ctx.store.read().unwrap_or_else(|e| e.into_inner());
    let room = ctx.room();
    require_auth(&room, &addr)?;
    let roster = build_roster(&store, &room.sessions);
    Ok((LoginOk { users: roster }.to_bytes(), Vec::new()))
}

fn op_fetch_status(ctx: &ServerContext, addr: SocketAddr) -> Result<(Vec<u8>, Outbound)> {
    let store = ctx.store.read().unwrap_or_else(|e| e.into_inner());
    let room = ctx.room();
    require_auth(&room, &addr)?;
    let roster = build_roster(&store, &room.sessions);
    Ok((
        StatusOk {
            users: roster,
            public_len: room.chat.public_len() as u32,
        }
        .to_bytes(),
        Vec::new(),
    ))
}

fn op_heartbeat(ctx: &ServerContext, addr: SocketAddr) -> Result<(Vec<u8>, Outbound)> {
    // The liveness refresh already happened on frame receipt; the
    // response only confirms the session is still authenticated.
    let room = ctx.room();
    require_auth(&room, &addr)?;
    Ok((Vec::new(), Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(60));
        assert_eq!(config.history_limit, DEFAULT_HISTORY_LIMIT);
        assert_eq!(config.store_path, PathBuf::from("./users.bin"));
    }

    #[test]
    fn test_build_roster_marks_online_users() {
        use crate::crypto::{SessionCipher, SessionKey};
        use sha2::{Digest, Sha256};

        let mut store = UserStore::new();
        let digest: [u8; 32] = Sha256::digest(b"pw").into();
        store.register("alice", &digest).expect("register");
        store.register("bob", &digest).expect("register");

        let mut sessions = SessionRegistry::new();
        let addr = "127.0.0.1:4000".parse().expect("addr");
        let now = Instant::now();
        sessions.upsert_unauth(
            addr,
            X25519PublicKey::from_bytes([0u8; 32]),
            SessionCipher::server(SessionKey::from_bytes([0u8; 32])),
            now,
        );
        sessions.authenticate(addr, "alice", now).expect("auth");

        let roster = build_roster(&store, &sessions);
        assert_eq!(
            roster,
            vec![
                UserSnapshot {
                    name: "alice".into(),
                    online: true
                },
                UserSnapshot {
                    name: "bob".into(),
                    online: false
                },
            ]
        );
    }
}
