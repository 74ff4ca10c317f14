//! Server-side session registry.
//!
//! Sessions are indexed by peer address (hit on every inbound datagram)
//! and by authenticated username. At most one authenticated session
//! exists per username; a fresh login atomically evicts the previous
//! holder. Eviction and logout demote the peer to a fresh
//! unauthenticated session that keeps its envelope state, so the old
//! client's frames still decrypt and its requests fail with
//! `NotAuthenticated` instead of vanishing.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::error;

use crate::crypto::{SessionCipher, X25519PublicKey};
use crate::error::{Error, Result};

/// Decode failures tolerated inside the failure window.
const MAX_DECODE_FAILURES: u32 = 32;

/// Length of the decode-failure window.
const FAILURE_WINDOW: Duration = Duration::from_secs(10);

/// Runtime state for one peer.
#[derive(Debug)]
pub struct Session {
    /// Peer address, the primary key.
    pub addr: SocketAddr,
    /// Peer's session public key from its hello.
    pub pub_key: X25519PublicKey,
    /// Envelope state: shared key, send counter, replay window.
    pub cipher: SessionCipher,
    /// Set exactly once, by a successful login.
    pub username: Option<String>,
    /// Refreshed on every authenticated inbound frame.
    pub last_heartbeat: Instant,
    failures: u32,
    failure_window_start: Instant,
}

impl Session {
    fn new(addr: SocketAddr, pub_key: X25519PublicKey, cipher: SessionCipher, now: Instant) -> Self {
        Self {
            addr,
            pub_key,
            cipher,
            username: None,
            last_heartbeat: now,
            failures: 0,
            failure_window_start: now,
        }
    }

    /// Whether a login bound a username to this session.
    pub fn is_authenticated(&self) -> bool {
        self.username.is_some()
    }

    /// Count one decode/MAC failure. Returns true when the failure
    /// policy says to close the session.
    pub fn record_decode_failure(&mut self, now: Instant) -> bool {
        if now.duration_since(self.failure_window_start) > FAILURE_WINDOW {
            self.failure_window_start = now;
            self.failures = 0;
        }
        self.failures += 1;
        self.failures >= MAX_DECODE_FAILURES
    }

    /// A frame decoded cleanly; the failure streak is broken.
    pub fn note_decode_success(&mut self) {
        self.failures = 0;
    }

    fn demoted(self, now: Instant) -> Self {
        Self {
            username: None,
            last_heartbeat: now,
            failures: 0,
            failure_window_start: now,
            ..self
        }
    }
}

/// Both session indexes, kept consistent under one guard.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    by_addr: HashMap<SocketAddr, Session>,
    by_user: HashMap<String, SocketAddr>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    /// Whether the registry holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }

    /// Install the session for a handshaking peer, replacing whatever
    /// session the address held. Returns the username that went offline
    /// if the replaced session was authenticated.
    pub fn upsert_unauth(
        &mut self,
        addr: SocketAddr,
        pub_key: X25519PublicKey,
        cipher: SessionCipher,
        now: Instant,
    ) -> Option<String> {
        let evicted = self.by_addr.remove(&addr).and_then(|old| {
            let name = old.username?;
            self.by_user.remove(&name);
            Some(name)
        });
        self.by_addr
            .insert(addr, Session::new(addr, pub_key, cipher, now));
        evicted
    }

    /// Session at an address.
    pub fn get(&self, addr: &SocketAddr) -> Option<&Session> {
        self.by_addr.get(addr)
    }

    /// Mutable session at an address.
    pub fn get_mut(&mut self, addr: &SocketAddr) -> Option<&mut Session> {
        self.by_addr.get_mut(addr)
    }

    /// Username authenticated at an address.
    pub fn username_of(&self, addr: &SocketAddr) -> Option<&str> {
        self.by_addr.get(addr)?.username.as_deref()
    }

    /// Address of a username's live session.
    pub fn addr_of(&self, username: &str) -> Option<SocketAddr> {
        self.by_user.get(username).copied()
    }

    /// Whether an authenticated session exists for the username.
    pub fn is_online(&self, username: &str) -> bool {
        self.by_user.contains_key(username)
    }

    /// Bind a username to the session at `addr`, evicting any previous
    /// session of that username. Returns the evicted peer's address.
    ///
    /// The caller has already verified credentials; this is purely the
    /// registry transition.
    pub fn authenticate(
        &mut self,
        addr: SocketAddr,
        username: &str,
        now: Instant,
    ) -> Result<Option<SocketAddr>> {
        let session = self.by_addr.get(&addr).ok_or(Error::NotAuthenticated)?;
        if session.is_authenticated() {
            return Err(Error::AlreadyAuthenticated);
        }

        let evicted = match self.by_user.get(username).copied() {
            Some(old_addr) => {
                self.demote(old_addr, now);
                Some(old_addr)
            }
            None => None,
        };

        self.by_user.insert(username.to_string(), addr);
        if let Some(session) = self.by_addr.get_mut(&addr) {
            session.username = Some(username.to_string());
            session.last_heartbeat = now;
        }
        Ok(evicted)
    }

    /// Replace the session at `addr` with a fresh unauthenticated one
    /// keeping its envelope state. Returns the username it held.
    pub fn demote(&mut self, addr: SocketAddr, now: Instant) -> Option<String> {
        let old = self.by_addr.remove(&addr)?;
        let username = old.username.clone();
        if let Some(name) = &username {
            let indexed = self.by_user.remove(name);
            if indexed != Some(addr) {
                // Both indexes are mutated under one guard; disagreement
                // is a programmer bug.
                debug_assert!(false, "registry indexes disagree for {name}");
                error!(username = name.as_str(), "registry indexes disagree, dropping session");
                if let Some(other) = indexed {
                    self.by_user.insert(name.clone(), other);
                }
                return username;
            }
        }
        self.by_addr.insert(addr, old.demoted(now));
        username
    }

    /// Explicit logout: demote the session, reporting its username.
    pub fn logout(&mut self, addr: SocketAddr, now: Instant) -> Result<String> {
        match self.by_addr.get(&addr) {
            Some(session) if session.is_authenticated() => {
                self.demote(addr, now).ok_or(Error::NotAuthenticated)
            }
            _ => Err(Error::NotAuthenticated),
        }
    }

    /// Drop a session entirely, e.g. after repeated decode failures.
    pub fn remove(&mut self, addr: &SocketAddr) -> Option<Session> {
        let session = self.by_addr.remove(addr)?;
        if let Some(name) = &session.username {
            self.by_user.remove(name);
        }
        Some(session)
    }

    /// Reset the liveness timer for a session.
    pub fn touch(&mut self, addr: &SocketAddr, now: Instant) {
        if let Some(session) = self.by_addr.get_mut(addr) {
            session.last_heartbeat = now;
        }
    }

    /// Remove every session whose heartbeat is older than the interval.
    /// Returns the removed peers with their usernames.
    pub fn reap(&mut self, now: Instant, interval: Duration) -> Vec<(SocketAddr, Option<String>)> {
        let expired: Vec<SocketAddr> = self
            .by_addr
            .values()
            .filter(|s| now.duration_since(s.last_heartbeat) > interval)
            .map(|s| s.addr)
            .collect();

        let mut reaped = Vec::with_capacity(expired.len());
        for addr in expired {
            if let Some(session) = self.by_addr.remove(&addr) {
                if let Some(name) = &session.username {
                    self.by_user.remove(name);
                }
                reaped.push((addr, session.username));
            }
        }
        reaped
    }

    /// Addresses of all authenticated sessions except `exclude`.
    pub fn authenticated_addrs_except(&self, exclude: Option<&str>) -> Vec<SocketAddr> {
        self.by_user
            .iter()
            .filter(|(name, _)| Some(name.as_str()) != exclude)
            .map(|(_, addr)| *addr)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SessionKey;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().expect("addr")
    }

    fn cipher() -> SessionCipher {
        SessionCipher::server(SessionKey::from_bytes([1u8; 32]))
    }

    fn key() -> X25519PublicKey {
        X25519PublicKey::from_bytes([2u8; 32])
    }

    fn registry_with_session(port: u16, now: Instant) -> SessionRegistry {
        let mut reg = SessionRegistry::new();
        reg.upsert_unauth(addr(port), key(), cipher(), now);
        reg
    }

    #[test]
    fn test_authenticate_binds_username() {
        let now = Instant::now();
        let mut reg = registry_with_session(1000, now);

        let evicted = reg.authenticate(addr(1000), "alice", now).expect("auth");
        assert!(evicted.is_none());
        assert_eq!(reg.username_of(&addr(1000)), Some("alice"));
        assert_eq!(reg.addr_of("alice"), Some(addr(1000)));
    }

    #[test]
    fn test_single_active_session_per_username() {
        let now = Instant::now();
        let mut reg = registry_with_session(1000, now);
        reg.upsert_unauth(addr(2000), key(), cipher(), now);

        reg.authenticate(addr(1000), "alice", now).expect("auth");
        let evicted = reg.authenticate(addr(2000), "alice", now).expect("auth");

        assert_eq!(evicted, Some(addr(1000)));
        assert_eq!(reg.addr_of("alice"), Some(addr(2000)));
        // The evicted peer keeps a session, but an unauthenticated one.
        let old = reg.get(&addr(1000)).expect("session");
        assert!(!old.is_authenticated());
    }

    #[test]
    fn test_second_login_on_same_session_refused() {
        let now = Instant::now();
        let mut reg = registry_with_session(1000, now);
        reg.authenticate(addr(1000), "alice", now).expect("auth");
        assert!(matches!(
            reg.authenticate(addr(1000), "bob", now),
            Err(Error::AlreadyAuthenticated)
        ));
    }

    #[test]
    fn test_logout_requires_authentication() {
        let now = Instant::now();
        let mut reg = registry_with_session(1000, now);
        assert!(matches!(
            reg.logout(addr(1000), now),
            Err(Error::NotAuthenticated)
        ));

        reg.authenticate(addr(1000), "alice", now).expect("auth");
        assert_eq!(reg.logout(addr(1000), now).expect("logout"), "alice");
        assert!(!reg.is_online("alice"));
        assert!(reg.get(&addr(1000)).is_some());
    }

    #[test]
    fn test_rehandshake_drops_authentication() {
        let now = Instant::now();
        let mut reg = registry_with_session(1000, now);
        reg.authenticate(addr(1000), "alice", now).expect("auth");

        let offline = reg.upsert_unauth(addr(1000), key(), cipher(), now);
        assert_eq!(offline, Some("alice".to_string()));
        assert!(!reg.is_online("alice"));
    }

    #[test]
    fn test_reap_expired_sessions() {
        let start = Instant::now();
        let interval = Duration::from_secs(60);
        let mut reg = registry_with_session(1000, start);
        reg.upsert_unauth(addr(2000), key(), cipher(), start);
        reg.authenticate(addr(1000), "alice", start).expect("auth");

        // A touched session survives.
        let later = start + interval / 2;
        reg.touch(&addr(2000), later);

        let reaped = reg.reap(start + interval + Duration::from_secs(1), interval);
        assert_eq!(reaped, vec![(addr(1000), Some("alice".to_string()))]);
        assert!(reg.get(&addr(1000)).is_none());
        assert!(reg.get(&addr(2000)).is_some());
        assert!(!reg.is_online("alice"));
    }

    #[test]
    fn test_broadcast_targets_exclude_user() {
        let now = Instant::now();
        let mut reg = registry_with_session(1000, now);
        reg.upsert_unauth(addr(2000), key(), cipher(), now);
        reg.authenticate(addr(1000), "alice", now).expect("auth");
        reg.authenticate(addr(2000), "bob", now).expect("auth");

        let mut targets = reg.authenticated_addrs_except(Some("alice"));
        targets.sort();
        assert_eq!(targets, vec![addr(2000)]);
        assert_eq!(reg.authenticated_addrs_except(None).len(), 2);
    }

    #[test]
    fn test_decode_failure_policy() {
        let now = Instant::now();
        let mut reg = registry_with_session(1000, now);
        let session = reg.get_mut(&addr(1000)).expect("session");

        for _ in 0..MAX_DECODE_FAILURES - 1 {
            assert!(!session.record_decode_failure(now));
        }
        assert!(session.record_decode_failure(now));
    }

    #[test]
    fn test_decode_failures_reset_after_window() {
        let now = Instant::now();
        let mut reg = registry_with_session(1000, now);
        let session = reg.get_mut(&addr(1000)).expect("session");

        for _ in 0..MAX_DECODE_FAILURES - 1 {
            session.record_decode_failure(now);
        }
        // Outside the window the streak restarts.
        let later = now + FAILURE_WINDOW + Duration::from_secs(1);
        assert!(!session.record_decode_failure(later));
    }

    #[test]
    fn test_decode_success_breaks_streak() {
        let now = Instant::now();
        let mut reg = registry_with_session(1000, now);
        let session = reg.get_mut(&addr(1000)).expect("session");

        for _ in 0..MAX_DECODE_FAILURES - 1 {
            session.record_decode_failure(now);
        }
        session.note_decode_success();
        assert!(!session.record_decode_failure(now));
    }
}
