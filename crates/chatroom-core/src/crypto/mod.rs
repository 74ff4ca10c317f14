//! Cryptographic primitives for the chatroom core.
//!
//! - **X25519**: per-session ephemeral key exchange
//! - **XChaCha20-Poly1305**: authenticated envelope encryption
//! - **HKDF-SHA256**: session-key derivation
//!
//! Secret material is zeroized on drop. No custom constructions: the
//! envelope is a stock AEAD with a counter nonce, the handshake is plain
//! Diffie-Hellman with both public keys bound into the derivation.

mod envelope;
mod keys;

pub use envelope::{
    compose_nonce, open, seal, ReplayWindow, SendNonces, SessionCipher, NONCE_SIZE, TAG_SIZE,
    TAG_CLIENT_TO_SERVER, TAG_SERVER_TO_CLIENT,
};
pub use keys::{
    derive_session_key, SessionKey, SessionKeypair, SharedSecret, X25519PublicKey, X25519_KEY_SIZE,
};

use crate::error::{Error, Result};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Key size for XChaCha20-Poly1305.
pub const KEY_SIZE: usize = 32;

/// Derive keys using HKDF-SHA256.
pub fn hkdf_derive(
    salt: Option<&[u8]>,
    input_key_material: &[u8],
    info: &[u8],
    output_length: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let hkdf = Hkdf::<Sha256>::new(salt, input_key_material);
    let mut output = Zeroizing::new(vec![0u8; output_length]);
    hkdf.expand(info, &mut output)
        .map_err(|_| Error::AuthFailure)?;
    Ok(output)
}

/// Generate cryptographically secure random bytes, e.g. a fresh
/// credential salt.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
    bytes
}

/// Constant-time comparison of byte slices.
///
/// Credential verification recomputes the stored Argon2 output and
/// compares through this, so a mismatch reveals nothing about where the
/// hashes diverge.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    #[test]
    fn test_hkdf_deterministic() {
        let out1 = hkdf_derive(None, b"ikm", b"chatroom test", 32).expect("should derive");
        let out2 = hkdf_derive(None, b"ikm", b"chatroom test", 32).expect("should derive");
        assert_eq!(&*out1, &*out2);

        let out3 = hkdf_derive(None, b"ikm", b"other info", 32).expect("should derive");
        assert_ne!(&*out1, &*out3);
    }

    #[test]
    fn test_fresh_salts_never_repeat() {
        // Every registered credential gets its own salt.
        let first: [u8; 32] = random_bytes();
        let second: [u8; 32] = random_bytes();
        assert_ne!(first, second);
    }

    #[test]
    fn test_digest_comparison_is_exact() {
        let hunter2: [u8; 32] = Sha256::digest(b"hunter2").into();
        let hunter2_again: [u8; 32] = Sha256::digest(b"hunter2").into();
        let hunter3: [u8; 32] = Sha256::digest(b"hunter3").into();

        assert!(constant_time_eq(&hunter2, &hunter2_again));
        assert!(!constant_time_eq(&hunter2, &hunter3));
        // A truncated digest must not verify either.
        assert!(!constant_time_eq(&hunter2, &hunter2[..16]));
    }
}
