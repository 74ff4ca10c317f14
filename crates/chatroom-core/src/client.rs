//! Client session: one endpoint aimed at one server.
//!
//! The client mirrors a slice of server state locally (roster, chat
//! histories, personal info) and refreshes it on explicit fetches and on
//! server-pushed events. Every event is forwarded to the injected
//! notification sink; the shell never polls the core.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::crypto::{derive_session_key, SessionCipher, SessionKeypair, NONCE_SIZE};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::protocol::payload::{
    self, ChangePasswordRequest, ChatEntry, ChatsOk, EntryKind, GetChatsRequest, LoginOk,
    LoginRequest, NewMsgEvent, PasswordDigest, PresenceEvent, RegisterRequest, SayOk, SayRequest,
    StatusOk, UserSnapshot,
};
use crate::protocol::{Datagram, Direction, Frame, OpCode};
use crate::server::chat::DEFAULT_HISTORY_LIMIT;
use crate::sink::{NotificationSink, SinkEvent};
use crate::MAX_DATAGRAM_SIZE;

/// Decode failures tolerated before declaring the connection lost.
const MAX_DECODE_FAILURES: u32 = 32;

/// Length of the decode-failure window.
const FAILURE_WINDOW: Duration = Duration::from_secs(10);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The server to hold a session with.
    pub server_addr: SocketAddr,
    /// Local socket address.
    pub bind_addr: SocketAddr,
    /// Liveness bound: heartbeats leave every third of it, and silence
    /// longer than it means the connection is lost.
    pub heartbeat_interval: Duration,
    /// Deadline for each correlated request.
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Defaults for the given server.
    pub fn new(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            heartbeat_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Who this client is logged in as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonalInfo {
    /// Authenticated username.
    pub username: String,
    /// Local socket address.
    pub local_addr: SocketAddr,
    /// The server held accountable for this session.
    pub server_addr: SocketAddr,
}

/// Connection summary for the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// The configured server address.
    pub server_addr: SocketAddr,
    /// Local socket address.
    pub local_addr: SocketAddr,
    /// False once the liveness bound has been crossed.
    pub connected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connected,
    Authenticated,
    Disconnected,
}

/// Local mirror of server state.
struct Mirror {
    roster: HashMap<String, UserSnapshot>,
    public: VecDeque<ChatEntry>,
    private: HashMap<String, VecDeque<ChatEntry>>,
}

impl Mirror {
    fn new() -> Self {
        Self {
            roster: HashMap::new(),
            public: VecDeque::new(),
            private: HashMap::new(),
        }
    }

    fn apply_roster(&mut self, users: Vec<UserSnapshot>) {
        self.roster = users.into_iter().map(|u| (u.name.clone(), u)).collect();
    }

    fn set_online(&mut self, username: &str, online: bool) {
        self.roster
            .entry(username.to_string())
            .or_insert_with(|| UserSnapshot {
                name: username.to_string(),
                online,
            })
            .online = online;
    }

    fn push_public(&mut self, entry: ChatEntry) {
        if self.public.len() == DEFAULT_HISTORY_LIMIT {
            self.public.pop_front();
        }
        self.public.push_back(entry);
    }

    fn push_private(&mut self, peer: &str, entry: ChatEntry) {
        let log = self.private.entry(peer.to_string()).or_default();
        if log.len() == DEFAULT_HISTORY_LIMIT {
            log.pop_front();
        }
        log.push_back(entry);
    }

    /// Presence lands in the public mirror and, as on the server, only
    /// in private logs that already hold a conversation with the user.
    fn push_presence(&mut self, username: &str, entry: ChatEntry) {
        self.push_public(entry.clone());
        if let Some(log) = self.private.get_mut(username) {
            if log.len() == DEFAULT_HISTORY_LIMIT {
                log.pop_front();
            }
            log.push_back(entry);
        }
    }
}

struct FailureCounter {
    failures: u32,
    window_start: Instant,
}

impl FailureCounter {
    fn new() -> Self {
        Self {
            failures: 0,
            window_start: Instant::now(),
        }
    }

    fn record(&mut self, now: Instant) -> bool {
        if now.duration_since(self.window_start) > FAILURE_WINDOW {
            self.window_start = now;
            self.failures = 0;
        }
        self.failures += 1;
        self.failures >= MAX_DECODE_FAILURES
    }

    fn reset(&mut self) {
        self.failures = 0;
    }
}

struct ClientShared {
    cipher: Mutex<SessionCipher>,
    mirror: Mutex<Mirror>,
    personal: Mutex<Option<PersonalInfo>>,
    phase: Mutex<Phase>,
    last_inbound: Mutex<Instant>,
    failures: Mutex<FailureCounter>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl ClientShared {
    /// Mark traffic seen; restores the phase after a reported loss.
    fn note_inbound(&self) {
        *guard(&self.last_inbound) = Instant::now();
        let mut phase = guard(&self.phase);
        if *phase == Phase::Disconnected {
            *phase = if guard(&self.personal).is_some() {
                Phase::Authenticated
            } else {
                Phase::Connected
            };
        }
    }

    /// Cross into Disconnected; true if this call made the transition.
    fn note_lost(&self) -> bool {
        let mut phase = guard(&self.phase);
        if *phase == Phase::Disconnected {
            false
        } else {
            *phase = Phase::Disconnected;
            true
        }
    }
}

/// A live client session.
///
/// Dropping the value aborts its tasks and completes outstanding
/// requests with `EndpointClosed`.
pub struct ChatClient {
    endpoint: Endpoint,
    shared: Arc<ClientShared>,
    sink: NotificationSink,
    config: ClientConfig,
    recv_task: JoinHandle<()>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChatClient {
    /// Bind a socket, perform the handshake and start the receive loop.
    pub async fn connect(config: ClientConfig, sink: NotificationSink) -> Result<Self> {
        let endpoint = Endpoint::bind(config.bind_addr).await?;
        let keypair = SessionKeypair::generate();
        endpoint
            .send_datagram(&Datagram::Hello(*keypair.public_key()), config.server_addr)
            .await?;

        let server_pub = time::timeout(config.request_timeout, async {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                match endpoint.recv_datagram(&mut buf).await {
                    Ok((Datagram::HelloAck(key), from)) if from == config.server_addr => {
                        break Ok(key)
                    }
                    Ok(_) => continue,
                    Err(Error::Transport(err)) => break Err(Error::Transport(err)),
                    Err(_) => continue,
                }
            }
        })
        .await
        .map_err(|_| Error::RequestTimeout)??;

        let shared_secret = keypair.diffie_hellman(&server_pub);
        let key = derive_session_key(&shared_secret, keypair.public_key(), &server_pub)?;
        info!(server = %config.server_addr, local = %endpoint.local_addr(), "handshake complete");

        let shared = Arc::new(ClientShared {
            cipher: Mutex::new(SessionCipher::client(key)),
            mirror: Mutex::new(Mirror::new()),
            personal: Mutex::new(None),
            phase: Mutex::new(Phase::Connected),
            last_inbound: Mutex::new(Instant::now()),
            failures: Mutex::new(FailureCounter::new()),
        });

        let recv_task = tokio::spawn(recv_loop(
            endpoint.clone(),
            shared.clone(),
            sink.clone(),
            config.clone(),
        ));

        Ok(Self {
            endpoint,
            shared,
            sink,
            config,
            recv_task,
            heartbeat_task: Mutex::new(None),
        })
    }

    /// Create a user record on the server.
    pub async fn register(&self, username: &str, password: &str) -> Result<()> {
        let body = RegisterRequest {
            username: username.to_string(),
            digest: digest_password(password),
        }
        .to_bytes();
        request_ok(&self.endpoint, &self.shared, &self.sink, &self.config, OpCode::Register, body)
            .await?;
        Ok(())
    }

    /// Authenticate; on success the roster seeds the mirror and the
    /// heartbeat task starts.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let body = LoginRequest {
            username: username.to_string(),
            digest: digest_password(password),
        }
        .to_bytes();
        let ok = request_ok(&self.endpoint, &self.shared, &self.sink, &self.config, OpCode::Login, body)
            .await?;
        let LoginOk { users } = LoginOk::from_bytes(&ok)?;

        guard(&self.shared.mirror).apply_roster(users);
        *guard(&self.shared.personal) = Some(PersonalInfo {
            username: username.to_string(),
            local_addr: self.endpoint.local_addr(),
            server_addr: self.config.server_addr,
        });
        *guard(&self.shared.phase) = Phase::Authenticated;
        self.start_heartbeat();
        info!(username, "logged in");
        Ok(())
    }

    /// End the authenticated session; the envelope stays usable for a
    /// later login.
    pub async fn logout(&self) -> Result<()> {
        self.stop_heartbeat();
        let result = request_ok(
            &self.endpoint,
            &self.shared,
            &self.sink,
            &self.config,
            OpCode::Logout,
            Vec::new(),
        )
        .await;
        *guard(&self.shared.personal) = None;
        let mut phase = guard(&self.shared.phase);
        if *phase == Phase::Authenticated {
            *phase = Phase::Connected;
        }
        drop(phase);
        result.map(|_| ())
    }

    /// Replace the password for the logged-in user.
    pub async fn change_password(&self, old: &str, new: &str) -> Result<()> {
        let body = ChangePasswordRequest {
            old: digest_password(old),
            new: digest_password(new),
        }
        .to_bytes();
        request_ok(
            &self.endpoint,
            &self.shared,
            &self.sink,
            &self.config,
            OpCode::ChangePassword,
            body,
        )
        .await?;
        Ok(())
    }

    /// Send a message; `None` recipient broadcasts to the room. The
    /// server's authoritative timestamp lands in the local mirror.
    pub async fn say(&self, recipient: Option<&str>, text: &str) -> Result<()> {
        let me = match guard(&self.shared.personal).clone() {
            Some(info) => info.username,
            None => {
                self.sink.emit(SinkEvent::NotLogin);
                return Err(Error::NotAuthenticated);
            }
        };
        let body = SayRequest {
            to: recipient.map(str::to_string),
            text: text.to_string(),
        }
        .to_bytes();
        let ok = request_ok(&self.endpoint, &self.shared, &self.sink, &self.config, OpCode::Say, body)
            .await?;
        let SayOk { timestamp } = SayOk::from_bytes(&ok)?;

        let entry = ChatEntry {
            timestamp,
            speaker: me,
            kind: EntryKind::Message(text.to_string()),
        };
        let mut mirror = guard(&self.shared.mirror);
        match recipient {
            Some(peer) => mirror.push_private(peer, entry),
            None => mirror.push_public(entry),
        }
        Ok(())
    }

    /// Refresh the mirror from the server and return the snapshot.
    pub async fn fetch_chatroom_status(&self) -> Result<StatusOk> {
        let ok = request_ok(
            &self.endpoint,
            &self.shared,
            &self.sink,
            &self.config,
            OpCode::FetchStatus,
            Vec::new(),
        )
        .await?;
        let status = StatusOk::from_bytes(&ok)?;
        guard(&self.shared.mirror).apply_roster(status.users.clone());
        Ok(status)
    }

    /// Fetch a conversation from the server, refreshing the mirror copy.
    pub async fn fetch_chats(&self, peer: Option<&str>) -> Result<Vec<ChatEntry>> {
        let body = GetChatsRequest {
            peer: peer.map(str::to_string),
        }
        .to_bytes();
        let ok = request_ok(&self.endpoint, &self.shared, &self.sink, &self.config, OpCode::GetChats, body)
            .await?;
        let ChatsOk { entries } = ChatsOk::from_bytes(&ok)?;

        let mut mirror = guard(&self.shared.mirror);
        match peer {
            Some(peer) => {
                mirror.private.insert(peer.to_string(), entries.iter().cloned().collect());
            }
            None => mirror.public = entries.iter().cloned().collect(),
        }
        Ok(entries)
    }

    /// The mirrored conversation with `peer`, or the public log.
    pub fn get_chats(&self, peer: Option<&str>) -> Vec<ChatEntry> {
        let mirror = guard(&self.shared.mirror);
        match peer {
            Some(peer) => mirror
                .private
                .get(peer)
                .map(|log| log.iter().cloned().collect())
                .unwrap_or_default(),
            None => mirror.public.iter().cloned().collect(),
        }
    }

    /// The mirrored roster, sorted by name.
    pub fn get_user_info(&self) -> Vec<UserSnapshot> {
        let mirror = guard(&self.shared.mirror);
        let mut users: Vec<UserSnapshot> = mirror.roster.values().cloned().collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        users
    }

    /// Who we are logged in as, if anyone.
    pub fn get_personal_info(&self) -> Option<PersonalInfo> {
        guard(&self.shared.personal).clone()
    }

    /// Connection summary.
    pub fn get_server_info(&self) -> ServerInfo {
        ServerInfo {
            server_addr: self.config.server_addr,
            local_addr: self.endpoint.local_addr(),
            connected: *guard(&self.shared.phase) != Phase::Disconnected,
        }
    }

    /// Tear the session down. Outstanding requests complete with
    /// `EndpointClosed`.
    pub fn disconnect(self) {
        drop(self);
    }

    fn start_heartbeat(&self) {
        let endpoint = self.endpoint.clone();
        let shared = self.shared.clone();
        let sink = self.sink.clone();
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(config.heartbeat_interval / 3);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            // The first tick completes immediately; the login round trip
            // just proved liveness.
            ticker.tick().await;
            loop {
                ticker.tick().await;

                let idle = guard(&shared.last_inbound).elapsed();
                if idle > config.heartbeat_interval && shared.note_lost() {
                    warn!(?idle, "no server traffic inside the heartbeat interval");
                    sink.emit(SinkEvent::ConnectionLost);
                }

                match request(&endpoint, &shared, &config, OpCode::Heartbeat, Vec::new()).await {
                    Ok(frame) => {
                        if let Err(Error::NotAuthenticated) = payload::decode_response(&frame.body)
                        {
                            // Evicted or reaped while we were away.
                            debug!("heartbeat refused, session no longer authenticated");
                            sink.emit(SinkEvent::NotLogin);
                            *guard(&shared.personal) = None;
                            let mut phase = guard(&shared.phase);
                            if *phase == Phase::Authenticated {
                                *phase = Phase::Connected;
                            }
                            break;
                        }
                    }
                    Err(Error::EndpointClosed) => break,
                    Err(err) => debug!(kind = err.kind(), "heartbeat not answered"),
                }
            }
        });

        if let Some(old) = guard(&self.heartbeat_task).replace(task) {
            old.abort();
        }
    }

    fn stop_heartbeat(&self) {
        if let Some(task) = guard(&self.heartbeat_task).take() {
            task.abort();
        }
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.recv_task.abort();
        self.stop_heartbeat();
        self.endpoint.close();
    }
}

fn digest_password(password: &str) -> PasswordDigest {
    Sha256::digest(password.trim_start().as_bytes()).into()
}

/// Seal and send one request, awaiting its correlated response frame.
async fn request(
    endpoint: &Endpoint,
    shared: &ClientShared,
    config: &ClientConfig,
    op: OpCode,
    body: Vec<u8>,
) -> Result<Frame> {
    let frame = endpoint
        .request(config.server_addr, config.request_timeout, |corr_id| {
            let plaintext = Frame::request(corr_id, op, body).to_bytes();
            let mut cipher = guard(&shared.cipher);
            let (nonce, ciphertext) = cipher.seal_payload(&plaintext)?;
            Ok(Datagram::Sealed { nonce, ciphertext }.encode())
        })
        .await?;
    if frame.op != op {
        return Err(Error::MalformedFrame("response op mismatch".into()));
    }
    Ok(frame)
}

/// Like [`request`], but unwraps the response status byte, reporting
/// `NotLogin` to the sink when the server refused for lack of
/// authentication.
async fn request_ok(
    endpoint: &Endpoint,
    shared: &ClientShared,
    sink: &NotificationSink,
    config: &ClientConfig,
    op: OpCode,
    body: Vec<u8>,
) -> Result<Vec<u8>> {
    let frame = request(endpoint, shared, config, op, body).await?;
    match payload::decode_response(&frame.body) {
        Ok(rest) => Ok(rest.to_vec()),
        Err(err) => {
            if matches!(err, Error::NotAuthenticated) {
                sink.emit(SinkEvent::NotLogin);
            }
            Err(err)
        }
    }
}

async fn recv_loop(
    endpoint: Endpoint,
    shared: Arc<ClientShared>,
    sink: NotificationSink,
    config: ClientConfig,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (dgram, from) = match endpoint.recv_datagram(&mut buf).await {
            Ok(received) => received,
            Err(Error::Transport(err)) => {
                warn!(%err, "socket receive failed");
                continue;
            }
            Err(err) => {
                debug!(kind = err.kind(), "dropping undecodable datagram");
                continue;
            }
        };
        if from != config.server_addr {
            debug!(%from, "datagram from unexpected peer, dropping");
            continue;
        }
        let (nonce, ciphertext) = match dgram {
            Datagram::Sealed { nonce, ciphertext } => (nonce, ciphertext),
            // Duplicate hello-acks from a lossy handshake are harmless.
            _ => continue,
        };

        let frame = match open_frame(&shared, &nonce, &ciphertext) {
            Some(frame) => frame,
            None => {
                let now = Instant::now();
                if guard(&shared.failures).record(now) && shared.note_lost() {
                    warn!("too many undecipherable frames, treating connection as lost");
                    sink.emit(SinkEvent::ConnectionLost);
                }
                continue;
            }
        };
        guard(&shared.failures).reset();
        shared.note_inbound();

        match frame.dir {
            Direction::Response => {
                if !endpoint.requests().complete(frame.corr_id, frame) {
                    debug!("response for unknown correlation id, dropping");
                }
            }
            Direction::Event => handle_event(&endpoint, &shared, &sink, &config, frame),
            Direction::Request => {
                debug!("server sent a request, dropping");
            }
        }
    }
}

fn open_frame(shared: &ClientShared, nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Option<Frame> {
    let plaintext = {
        let mut cipher = guard(&shared.cipher);
        cipher.open_payload(nonce, ciphertext)
    };
    match plaintext.and_then(|plain| Frame::from_bytes(&plain)) {
        Ok(frame) => Some(frame),
        Err(err) => {
            debug!(kind = err.kind(), "dropping undecipherable frame");
            None
        }
    }
}

fn handle_event(
    endpoint: &Endpoint,
    shared: &Arc<ClientShared>,
    sink: &NotificationSink,
    config: &ClientConfig,
    frame: Frame,
) {
    match frame.op {
        OpCode::EventOnline => {
            let Ok(event) = PresenceEvent::from_bytes(&frame.body) else {
                return;
            };
            let mut mirror = guard(&shared.mirror);
            mirror.set_online(&event.username, true);
            mirror.push_presence(
                &event.username,
                ChatEntry {
                    timestamp: event.timestamp,
                    speaker: event.username.clone(),
                    kind: EntryKind::Online,
                },
            );
            drop(mirror);
            sink.emit(SinkEvent::Online(event.username));
        }
        OpCode::EventOffline => {
            let Ok(event) = PresenceEvent::from_bytes(&frame.body) else {
                return;
            };
            let mut mirror = guard(&shared.mirror);
            mirror.set_online(&event.username, false);
            mirror.push_presence(
                &event.username,
                ChatEntry {
                    timestamp: event.timestamp,
                    speaker: event.username.clone(),
                    kind: EntryKind::Offline,
                },
            );
            drop(mirror);
            sink.emit(SinkEvent::Offline(event.username));
        }
        OpCode::EventNewMsg => {
            let Ok(event) = NewMsgEvent::from_bytes(&frame.body) else {
                return;
            };
            let entry = ChatEntry {
                timestamp: event.timestamp,
                speaker: event.from.clone(),
                kind: EntryKind::Message(event.text),
            };
            let mut mirror = guard(&shared.mirror);
            if event.public {
                mirror.push_public(entry);
            } else {
                mirror.push_private(&event.from, entry);
            }
            drop(mirror);
            sink.emit(SinkEvent::NewMsg(if event.public {
                None
            } else {
                Some(event.from)
            }));
        }
        OpCode::EventUsersUpdated => {
            sink.emit(SinkEvent::UsersUpdated);
            if guard(&shared.personal).is_none() {
                return;
            }
            // Refresh the roster off the receive loop so the request's
            // own response can be dispatched.
            let endpoint = endpoint.clone();
            let shared = shared.clone();
            let config = config.clone();
            tokio::spawn(async move {
                match request(&endpoint, &shared, &config, OpCode::GetUsers, Vec::new()).await {
                    Ok(frame) => {
                        let users = payload::decode_response(&frame.body)
                            .map(|rest| LoginOk::from_bytes(rest));
                        if let Ok(Ok(LoginOk { users })) = users {
                            guard(&shared.mirror).apply_roster(users);
                        }
                    }
                    Err(err) => debug!(kind = err.kind(), "roster refresh failed"),
                }
            });
        }
        other => {
            debug!(op = ?other, "unexpected event op, dropping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::wall_now;

    fn entry(speaker: &str, text: &str) -> ChatEntry {
        ChatEntry {
            timestamp: wall_now(),
            speaker: speaker.into(),
            kind: EntryKind::Message(text.into()),
        }
    }

    #[test]
    fn test_mirror_roster_updates() {
        let mut mirror = Mirror::new();
        mirror.apply_roster(vec![UserSnapshot {
            name: "alice".into(),
            online: false,
        }]);
        mirror.set_online("alice", true);
        mirror.set_online("bob", true);

        assert!(mirror.roster["alice"].online);
        assert!(mirror.roster["bob"].online);
    }

    #[test]
    fn test_mirror_presence_only_touches_known_conversations() {
        let mut mirror = Mirror::new();
        mirror.push_private("alice", entry("alice", "hi"));
        let presence = ChatEntry {
            timestamp: wall_now(),
            speaker: "alice".into(),
            kind: EntryKind::Offline,
        };
        mirror.push_presence("alice", presence.clone());
        mirror.push_presence("bob", presence);

        assert_eq!(mirror.private["alice"].len(), 2);
        assert!(!mirror.private.contains_key("bob"));
        assert_eq!(mirror.public.len(), 2);
    }

    #[test]
    fn test_mirror_logs_are_bounded() {
        let mut mirror = Mirror::new();
        for i in 0..DEFAULT_HISTORY_LIMIT + 10 {
            mirror.push_public(entry("alice", &i.to_string()));
        }
        assert_eq!(mirror.public.len(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(
            mirror.public.front().map(|e| &e.kind),
            Some(&EntryKind::Message("10".into()))
        );
    }

    #[test]
    fn test_failure_counter_policy() {
        let mut counter = FailureCounter::new();
        let now = Instant::now();
        for _ in 0..MAX_DECODE_FAILURES - 1 {
            assert!(!counter.record(now));
        }
        assert!(counter.record(now));

        counter.reset();
        assert!(!counter.record(now));
    }

    #[test]
    fn test_password_digest_is_stable() {
        assert_eq!(digest_password("pw"), digest_password("pw"));
        assert_ne!(digest_password("pw"), digest_password("other"));
        // Leading whitespace is not significant, as in the original UI.
        assert_eq!(digest_password("  pw"), digest_password("pw"));
    }
}
