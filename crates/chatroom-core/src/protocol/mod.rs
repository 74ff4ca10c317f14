//! Wire protocol: datagram grammar, frame layout, op codes and payloads.
//!
//! One datagram carries exactly one frame. Before the handshake completes
//! a datagram is a cleartext hello (marker byte `0x00`); afterwards it is
//! `nonce(24) || ciphertext`, where the sealed plaintext is
//! `dir(1) corr_id(4) op(1) body`.

mod frame;
pub mod payload;
mod wire;

pub use frame::{Datagram, Frame};
pub use wire::{WireReader, WireWriter};

use crate::error::{Error, Result};

/// Marker byte opening every cleartext (pre-handshake) datagram.
pub const CLEARTEXT_MARKER: u8 = 0x00;

/// Cleartext discriminant: client hello.
pub const CLEARTEXT_HELLO: u8 = 0x01;

/// Cleartext discriminant: server hello acknowledgement.
pub const CLEARTEXT_HELLO_ACK: u8 = 0x02;

/// Frame direction, the first byte of every sealed plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    /// Awaits a response under its correlation id.
    Request = 0,
    /// Completes the request with the same correlation id.
    Response = 1,
    /// One-way; correlation id is zero.
    Event = 2,
}

impl Direction {
    /// Parse a direction from its wire byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Request),
            1 => Ok(Self::Response),
            2 => Ok(Self::Event),
            _ => Err(Error::MalformedFrame(format!(
                "unknown direction: {:#04x}",
                byte
            ))),
        }
    }

    /// Convert to the wire byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Authenticate a session.
    Login = 0x10,
    /// Create a user record.
    Register = 0x11,
    /// End the authenticated session.
    Logout = 0x12,
    /// Replace the caller's credential.
    ChangePassword = 0x13,
    /// Relay a private or public message.
    Say = 0x20,
    /// Fetch chat history.
    GetChats = 0x21,
    /// Fetch the user roster.
    GetUsers = 0x22,
    /// Fetch a chatroom status snapshot.
    FetchStatus = 0x23,
    /// Liveness probe.
    Heartbeat = 0x30,
    /// A user came online.
    EventOnline = 0x40,
    /// A user went offline.
    EventOffline = 0x41,
    /// A message was relayed to this client.
    EventNewMsg = 0x42,
    /// The roster changed; clients should refetch.
    EventUsersUpdated = 0x43,
}

impl OpCode {
    /// Parse an op code from its wire byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x10 => Ok(Self::Login),
            0x11 => Ok(Self::Register),
            0x12 => Ok(Self::Logout),
            0x13 => Ok(Self::ChangePassword),
            0x20 => Ok(Self::Say),
            0x21 => Ok(Self::GetChats),
            0x22 => Ok(Self::GetUsers),
            0x23 => Ok(Self::FetchStatus),
            0x30 => Ok(Self::Heartbeat),
            0x40 => Ok(Self::EventOnline),
            0x41 => Ok(Self::EventOffline),
            0x42 => Ok(Self::EventNewMsg),
            0x43 => Ok(Self::EventUsersUpdated),
            _ => Err(Error::MalformedFrame(format!(
                "unknown op code: {:#04x}",
                byte
            ))),
        }
    }

    /// Convert to the wire byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_roundtrip() {
        for dir in [Direction::Request, Direction::Response, Direction::Event] {
            assert_eq!(
                Direction::from_byte(dir.to_byte()).expect("should parse"),
                dir
            );
        }
        assert!(Direction::from_byte(3).is_err());
    }

    #[test]
    fn test_op_code_roundtrip() {
        for op in [
            OpCode::Login,
            OpCode::Register,
            OpCode::Logout,
            OpCode::ChangePassword,
            OpCode::Say,
            OpCode::GetChats,
            OpCode::GetUsers,
            OpCode::FetchStatus,
            OpCode::Heartbeat,
            OpCode::EventOnline,
            OpCode::EventOffline,
            OpCode::EventNewMsg,
            OpCode::EventUsersUpdated,
        ] {
            assert_eq!(OpCode::from_byte(op.to_byte()).expect("should parse"), op);
        }
        assert!(OpCode::from_byte(0xFF).is_err());
    }
}
