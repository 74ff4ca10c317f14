//! Datagram and frame framing.
//!
//! Malformed input never panics; it decodes to `MalformedFrame` and the
//! caller drops the datagram silently.

use super::{
    Direction, OpCode, WireReader, WireWriter, CLEARTEXT_HELLO, CLEARTEXT_HELLO_ACK,
    CLEARTEXT_MARKER,
};
use crate::crypto::{X25519PublicKey, NONCE_SIZE, X25519_KEY_SIZE};
use crate::error::{Error, Result};
use crate::MAX_DATAGRAM_SIZE;

/// One decoded sealed plaintext: `dir(1) corr_id(4) op(1) body`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Request, response or event.
    pub dir: Direction,
    /// Correlation id; zero for events.
    pub corr_id: u32,
    /// Operation code.
    pub op: OpCode,
    /// Op-specific payload.
    pub body: Vec<u8>,
}

impl Frame {
    /// Build a request frame.
    pub fn request(corr_id: u32, op: OpCode, body: Vec<u8>) -> Self {
        Self {
            dir: Direction::Request,
            corr_id,
            op,
            body,
        }
    }

    /// Build a response frame correlated to a request.
    pub fn response(corr_id: u32, op: OpCode, body: Vec<u8>) -> Self {
        Self {
            dir: Direction::Response,
            corr_id,
            op,
            body,
        }
    }

    /// Build an event frame (correlation id zero).
    pub fn event(op: OpCode, body: Vec<u8>) -> Self {
        Self {
            dir: Direction::Event,
            corr_id: 0,
            op,
            body,
        }
    }

    /// Serialize for sealing.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_u8(self.dir.to_byte());
        w.put_u32(self.corr_id);
        w.put_u8(self.op.to_byte());
        w.put_fixed(&self.body);
        w.finish()
    }

    /// Parse an opened plaintext.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let dir = Direction::from_byte(r.get_u8()?)?;
        let corr_id = r.get_u32()?;
        let op = OpCode::from_byte(r.get_u8()?)?;
        let body = bytes[6..].to_vec();
        if dir == Direction::Event && corr_id != 0 {
            return Err(Error::MalformedFrame("event with correlation id".into()));
        }
        Ok(Self {
            dir,
            corr_id,
            op,
            body,
        })
    }
}

/// One wire datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    /// Cleartext client hello carrying the client's session public key.
    Hello(X25519PublicKey),
    /// Cleartext server acknowledgement carrying the server's session key.
    HelloAck(X25519PublicKey),
    /// Post-handshake sealed frame.
    Sealed {
        /// Envelope nonce: direction tag, counter, zero padding.
        nonce: [u8; NONCE_SIZE],
        /// AEAD output including the tag.
        ciphertext: Vec<u8>,
    },
}

impl Datagram {
    /// Serialize to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Datagram::Hello(key) => {
                let mut buf = Vec::with_capacity(2 + X25519_KEY_SIZE);
                buf.push(CLEARTEXT_MARKER);
                buf.push(CLEARTEXT_HELLO);
                buf.extend_from_slice(key.as_bytes());
                buf
            }
            Datagram::HelloAck(key) => {
                let mut buf = Vec::with_capacity(2 + X25519_KEY_SIZE);
                buf.push(CLEARTEXT_MARKER);
                buf.push(CLEARTEXT_HELLO_ACK);
                buf.extend_from_slice(key.as_bytes());
                buf
            }
            Datagram::Sealed { nonce, ciphertext } => {
                let mut buf = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
                buf.extend_from_slice(nonce);
                buf.extend_from_slice(ciphertext);
                buf
            }
        }
    }

    /// Parse wire bytes.
    ///
    /// Sealed nonces carry a nonzero direction tag, so the first byte
    /// distinguishes the two arms unambiguously.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(Error::MalformedFrame("datagram above bound".into()));
        }
        match bytes.first() {
            None => Err(Error::MalformedFrame("empty datagram".into())),
            Some(&CLEARTEXT_MARKER) => {
                let mut r = WireReader::new(&bytes[1..]);
                let disc = r.get_u8()?;
                let key = X25519PublicKey::from_bytes(r.get_fixed::<X25519_KEY_SIZE>()?);
                r.expect_end()?;
                match disc {
                    CLEARTEXT_HELLO => Ok(Datagram::Hello(key)),
                    CLEARTEXT_HELLO_ACK => Ok(Datagram::HelloAck(key)),
                    _ => Err(Error::MalformedFrame(format!(
                        "unknown cleartext discriminant: {:#04x}",
                        disc
                    ))),
                }
            }
            Some(_) => {
                if bytes.len() < NONCE_SIZE {
                    return Err(Error::MalformedFrame("sealed datagram too short".into()));
                }
                let mut nonce = [0u8; NONCE_SIZE];
                nonce.copy_from_slice(&bytes[..NONCE_SIZE]);
                Ok(Datagram::Sealed {
                    nonce,
                    ciphertext: bytes[NONCE_SIZE..].to_vec(),
                })
            }
        }
    }
}
