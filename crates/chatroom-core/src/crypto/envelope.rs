//! Authenticated envelope sealing with counter nonces.
//!
//! Post-handshake frames are sealed with XChaCha20-Poly1305. The 24-byte
//! nonce is `direction_tag(1) || counter_be(8) || zeros(15)`; each side
//! counts its own sends from zero and tracks the peer's counters in a
//! 64-entry sliding replay window. Direction tags are nonzero so a sealed
//! datagram can never start with the cleartext marker byte.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};

use super::keys::SessionKey;
use crate::error::{Error, Result};

/// Size of envelope nonces in bytes (192 bits).
pub const NONCE_SIZE: usize = 24;

/// Size of the Poly1305 authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Nonce direction tag for the client-to-server stream.
pub const TAG_CLIENT_TO_SERVER: u8 = 0x01;

/// Nonce direction tag for the server-to-client stream.
pub const TAG_SERVER_TO_CLIENT: u8 = 0x02;

/// Width of the receive-side replay window, in counters.
const REPLAY_WINDOW: u64 = 64;

/// Compose a nonce from a direction tag and a send counter.
pub fn compose_nonce(tag: u8, counter: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[0] = tag;
    nonce[1..9].copy_from_slice(&counter.to_be_bytes());
    nonce
}

fn split_nonce(nonce: &[u8; NONCE_SIZE]) -> (u8, u64) {
    let mut counter = [0u8; 8];
    counter.copy_from_slice(&nonce[1..9]);
    (nonce[0], u64::from_be_bytes(counter))
}

/// Seal a plaintext under the session key.
pub fn seal(key: &SessionKey, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|_| Error::AuthFailure)
}

/// Open a sealed payload. Returns a generic error on any failure.
pub fn open(key: &SessionKey, nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::AuthFailure)
}

/// Outbound nonce counter for one direction of one session.
#[derive(Debug)]
pub struct SendNonces {
    tag: u8,
    next: u64,
}

impl SendNonces {
    /// Counter starts at zero.
    pub fn new(tag: u8) -> Self {
        Self { tag, next: 0 }
    }

    /// Mint the next nonce. Wraparound is fatal: the session must
    /// rehandshake rather than ever reuse a counter.
    pub fn next(&mut self) -> Result<[u8; NONCE_SIZE]> {
        if self.next == u64::MAX {
            return Err(Error::NonceExhausted);
        }
        let nonce = compose_nonce(self.tag, self.next);
        self.next += 1;
        Ok(nonce)
    }
}

/// Receive-side sliding replay window.
///
/// Anchored at the highest accepted counter (the nonce ceiling). The
/// ceiling never decreases. `check` is non-mutating so that a frame
/// failing authentication leaves the window untouched.
#[derive(Debug, Default)]
pub struct ReplayWindow {
    ceiling: u64,
    // Bit i set means counter `ceiling - i` was accepted.
    seen: u64,
}

impl ReplayWindow {
    /// Create an empty window; counter 0 is acceptable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest accepted counter so far.
    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Would this counter be accepted right now?
    pub fn check(&self, counter: u64) -> Result<()> {
        if counter > self.ceiling {
            return Ok(());
        }
        let offset = self.ceiling - counter;
        if offset >= REPLAY_WINDOW {
            return Err(Error::ReplayRejected);
        }
        if self.seen & (1u64 << offset) != 0 {
            return Err(Error::ReplayRejected);
        }
        Ok(())
    }

    /// Record an accepted counter. Call only after `check` passed and the
    /// envelope authenticated.
    pub fn record(&mut self, counter: u64) {
        if counter > self.ceiling {
            let shift = counter - self.ceiling;
            self.seen = if shift >= REPLAY_WINDOW {
                0
            } else {
                self.seen << shift
            };
            self.seen |= 1;
            self.ceiling = counter;
        } else {
            self.seen |= 1u64 << (self.ceiling - counter);
        }
    }
}

/// Full envelope state for one established session: the symmetric key,
/// the outbound counter, and the inbound replay window.
#[derive(Debug)]
pub struct SessionCipher {
    key: SessionKey,
    send: SendNonces,
    recv: ReplayWindow,
    recv_tag: u8,
}

impl SessionCipher {
    /// Cipher for the client side of a session.
    pub fn client(key: SessionKey) -> Self {
        Self {
            key,
            send: SendNonces::new(TAG_CLIENT_TO_SERVER),
            recv: ReplayWindow::new(),
            recv_tag: TAG_SERVER_TO_CLIENT,
        }
    }

    /// Cipher for the server side of a session.
    pub fn server(key: SessionKey) -> Self {
        Self {
            key,
            send: SendNonces::new(TAG_SERVER_TO_CLIENT),
            recv: ReplayWindow::new(),
            recv_tag: TAG_CLIENT_TO_SERVER,
        }
    }

    /// Seal one outbound frame, consuming the next send counter.
    pub fn seal_payload(&mut self, plaintext: &[u8]) -> Result<([u8; NONCE_SIZE], Vec<u8>)> {
        let nonce = self.send.next()?;
        let ciphertext = seal(&self.key, &nonce, plaintext)?;
        Ok((nonce, ciphertext))
    }

    /// Open one inbound sealed payload.
    ///
    /// The replay window is only advanced after the envelope
    /// authenticates, so forged or replayed frames cannot move the
    /// ceiling.
    pub fn open_payload(&mut self, nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let (tag, counter) = split_nonce(nonce);
        if tag != self.recv_tag {
            return Err(Error::AuthFailure);
        }
        self.recv.check(counter)?;
        let plaintext = open(&self.key, nonce, ciphertext)?;
        self.recv.record(counter);
        Ok(plaintext)
    }
}
