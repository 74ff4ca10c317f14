//! X25519 key types for the session handshake.
//!
//! Each side generates a fresh ephemeral keypair per session; the shared
//! session key is derived deterministically from the DH output with both
//! public keys bound into the HKDF info, so client and server agree on
//! the key without a confirmation round trip.

use std::fmt;

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::hkdf_derive;
use crate::error::Result;

/// Size of X25519 keys in bytes.
pub const X25519_KEY_SIZE: usize = 32;

/// Domain separation for session-key derivation.
const SESSION_KEY_INFO: &[u8] = b"chatroom session key v1";

/// An X25519 public key carried in handshake frames.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct X25519PublicKey([u8; X25519_KEY_SIZE]);

impl X25519PublicKey {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; X25519_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; X25519_KEY_SIZE] {
        &self.0
    }

    pub(crate) fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl fmt::Debug for X25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only show the first 8 bytes in debug output
        write!(f, "X25519PublicKey({}...)", hex::encode(&self.0[..8]))
    }
}

impl From<PublicKey> for X25519PublicKey {
    fn from(key: PublicKey) -> Self {
        Self(*key.as_bytes())
    }
}

/// Raw Diffie-Hellman output. Zeroized on drop; only ever fed to HKDF.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; X25519_KEY_SIZE]);

impl SharedSecret {
    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; X25519_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret([REDACTED])")
    }
}

/// The symmetric envelope key for one session.
///
/// Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; X25519_KEY_SIZE]);

impl SessionKey {
    /// Get the raw bytes.
    pub(crate) fn as_bytes(&self) -> &[u8; X25519_KEY_SIZE] {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: [u8; X25519_KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey([REDACTED])")
    }
}

/// A per-session ephemeral X25519 keypair.
///
/// Uses `StaticSecret` internally because both the handshake initiator and
/// responder need to hold the secret across an await point; the keypair is
/// still generated fresh per session and never persisted.
#[derive(ZeroizeOnDrop)]
pub struct SessionKeypair {
    #[zeroize(skip)]
    secret: StaticSecret,
    #[zeroize(skip)]
    public: X25519PublicKey,
}

impl SessionKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(PublicKey::from(&secret));
        Self { secret, public }
    }

    /// Get the public key.
    pub fn public_key(&self) -> &X25519PublicKey {
        &self.public
    }

    /// Perform Diffie-Hellman key exchange.
    pub fn diffie_hellman(&self, their_public: &X25519PublicKey) -> SharedSecret {
        let shared = self.secret.diffie_hellman(&their_public.to_dalek());
        SharedSecret(*shared.as_bytes())
    }
}

impl fmt::Debug for SessionKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeypair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Derive the session envelope key from the DH output.
///
/// The client public key is bound first, then the server key, so both
/// sides derive the same key regardless of which role they played.
pub fn derive_session_key(
    shared: &SharedSecret,
    client_pub: &X25519PublicKey,
    server_pub: &X25519PublicKey,
) -> Result<SessionKey> {
    let mut info = Vec::with_capacity(SESSION_KEY_INFO.len() + 2 * X25519_KEY_SIZE);
    info.extend_from_slice(SESSION_KEY_INFO);
    info.extend_from_slice(client_pub.as_bytes());
    info.extend_from_slice(server_pub.as_bytes());

    let output = hkdf_derive(None, shared.as_bytes(), &info, X25519_KEY_SIZE)?;
    let mut key = [0u8; X25519_KEY_SIZE];
    key.copy_from_slice(&output);
    Ok(SessionKey(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dh_agreement() {
        let client = SessionKeypair::generate();
        let server = SessionKeypair::generate();

        let client_shared = client.diffie_hellman(server.public_key());
        let server_shared = server.diffie_hellman(client.public_key());

        assert_eq!(client_shared.as_bytes(), server_shared.as_bytes());
    }

    #[test]
    fn test_both_sides_derive_same_key() {
        let client = SessionKeypair::generate();
        let server = SessionKeypair::generate();

        let k1 = derive_session_key(
            &client.diffie_hellman(server.public_key()),
            client.public_key(),
            server.public_key(),
        )
        .expect("should derive");
        let k2 = derive_session_key(
            &server.diffie_hellman(client.public_key()),
            client.public_key(),
            server.public_key(),
        )
        .expect("should derive");

        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_key_depends_on_both_publics() {
        let client = SessionKeypair::generate();
        let server = SessionKeypair::generate();
        let other = SessionKeypair::generate();
        let shared = client.diffie_hellman(server.public_key());

        let k1 = derive_session_key(&shared, client.public_key(), server.public_key())
            .expect("should derive");
        let k2 = derive_session_key(&shared, other.public_key(), server.public_key())
            .expect("should derive");

        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }
}
