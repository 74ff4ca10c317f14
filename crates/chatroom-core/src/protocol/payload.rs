//! Typed op payloads and their wire layouts.
//!
//! Every body type round-trips through `to_bytes`/`from_bytes`; decoding
//! is strict and consumes the body exactly. Response bodies open with a
//! status byte: zero then the op-specific payload, or a nonzero error
//! code.

use chrono::{DateTime, Utc};

use super::{WireReader, WireWriter};
use crate::clock;
use crate::error::{Error, Result};

/// SHA-256 digest of a password, the only credential form on the wire.
pub type PasswordDigest = [u8; 32];

/// One line of chat history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    /// Server-assigned wall-clock stamp, millisecond precision.
    pub timestamp: DateTime<Utc>,
    /// Username the entry is attributed to.
    pub speaker: String,
    /// What happened.
    pub kind: EntryKind,
}

/// Kind of a chat history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// The speaker came online.
    Online,
    /// The speaker went offline.
    Offline,
    /// The speaker said something.
    Message(String),
}

impl ChatEntry {
    fn encode(&self, w: &mut WireWriter) {
        w.put_i64(clock::to_wire_millis(self.timestamp));
        w.put_str(&self.speaker);
        match &self.kind {
            EntryKind::Online => w.put_u8(0),
            EntryKind::Offline => w.put_u8(1),
            EntryKind::Message(text) => {
                w.put_u8(2);
                w.put_str(text);
            }
        }
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let timestamp = clock::from_wire_millis(r.get_i64()?)?;
        let speaker = r.get_str()?;
        let kind = match r.get_u8()? {
            0 => EntryKind::Online,
            1 => EntryKind::Offline,
            2 => EntryKind::Message(r.get_str()?),
            d => {
                return Err(Error::MalformedFrame(format!(
                    "unknown entry kind: {:#04x}",
                    d
                )))
            }
        };
        Ok(Self {
            timestamp,
            speaker,
            kind,
        })
    }
}

/// Roster line: a registered user and whether a live session exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSnapshot {
    /// Registered username.
    pub name: String,
    /// Whether an authenticated session currently exists.
    pub online: bool,
}

fn encode_roster(w: &mut WireWriter, users: &[UserSnapshot]) {
    w.put_u32(users.len() as u32);
    for user in users {
        w.put_str(&user.name);
        w.put_u8(u8::from(user.online));
    }
}

fn decode_roster(r: &mut WireReader<'_>) -> Result<Vec<UserSnapshot>> {
    let count = r.get_u32()? as usize;
    let mut users = Vec::new();
    for _ in 0..count {
        let name = r.get_str()?;
        let online = match r.get_u8()? {
            0 => false,
            1 => true,
            d => {
                return Err(Error::MalformedFrame(format!(
                    "invalid online flag: {:#04x}",
                    d
                )))
            }
        };
        users.push(UserSnapshot { name, online });
    }
    Ok(users)
}

/// `Login` request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    /// Username to authenticate as.
    pub username: String,
    /// Password digest.
    pub digest: PasswordDigest,
}

impl LoginRequest {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_str(&self.username);
        w.put_fixed(&self.digest);
        w.finish()
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let username = r.get_str()?;
        let digest = r.get_fixed()?;
        r.expect_end()?;
        Ok(Self { username, digest })
    }
}

/// `Register` request body; same shape as login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    /// Username to create.
    pub username: String,
    /// Password digest.
    pub digest: PasswordDigest,
}

impl RegisterRequest {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_str(&self.username);
        w.put_fixed(&self.digest);
        w.finish()
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let username = r.get_str()?;
        let digest = r.get_fixed()?;
        r.expect_end()?;
        Ok(Self { username, digest })
    }
}

/// `ChangePassword` request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePasswordRequest {
    /// Current password digest.
    pub old: PasswordDigest,
    /// Replacement password digest.
    pub new: PasswordDigest,
}

impl ChangePasswordRequest {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_fixed(&self.old);
        w.put_fixed(&self.new);
        w.finish()
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let old = r.get_fixed()?;
        let new = r.get_fixed()?;
        r.expect_end()?;
        Ok(Self { old, new })
    }
}

/// `Say` request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SayRequest {
    /// Private recipient, or `None` for the public room.
    pub to: Option<String>,
    /// Message text.
    pub text: String,
}

impl SayRequest {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_opt_str(self.to.as_deref());
        w.put_str(&self.text);
        w.finish()
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let to = r.get_opt_str()?;
        let text = r.get_str()?;
        r.expect_end()?;
        Ok(Self { to, text })
    }
}

/// `GetChats` request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetChatsRequest {
    /// Peer whose conversation to fetch, or `None` for the public log.
    pub peer: Option<String>,
}

impl GetChatsRequest {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_opt_str(self.peer.as_deref());
        w.finish()
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let peer = r.get_opt_str()?;
        r.expect_end()?;
        Ok(Self { peer })
    }
}

/// Successful `Login` response: the roster seeds the client mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOk {
    /// All registered users with their online state.
    pub users: Vec<UserSnapshot>,
}

impl LoginOk {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        encode_roster(&mut w, &self.users);
        w.finish()
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let users = decode_roster(&mut r)?;
        r.expect_end()?;
        Ok(Self { users })
    }
}

/// Successful `GetUsers` response.
pub type UsersOk = LoginOk;

/// Successful `Say` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SayOk {
    /// Authoritative stamp the server recorded for the message.
    pub timestamp: DateTime<Utc>,
}

impl SayOk {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_i64(clock::to_wire_millis(self.timestamp));
        w.finish()
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let timestamp = clock::from_wire_millis(r.get_i64()?)?;
        r.expect_end()?;
        Ok(Self { timestamp })
    }
}

/// Successful `GetChats` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatsOk {
    /// History slice, oldest first.
    pub entries: Vec<ChatEntry>,
}

impl ChatsOk {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_u32(self.entries.len() as u32);
        for entry in &self.entries {
            entry.encode(&mut w);
        }
        w.finish()
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let count = r.get_u32()? as usize;
        let mut entries = Vec::new();
        for _ in 0..count {
            entries.push(ChatEntry::decode(&mut r)?);
        }
        r.expect_end()?;
        Ok(Self { entries })
    }
}

/// Successful `FetchStatus` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusOk {
    /// All registered users with their online state.
    pub users: Vec<UserSnapshot>,
    /// Number of entries currently in the public log.
    pub public_len: u32,
}

impl StatusOk {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        encode_roster(&mut w, &self.users);
        w.put_u32(self.public_len);
        w.finish()
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let users = decode_roster(&mut r)?;
        let public_len = r.get_u32()?;
        r.expect_end()?;
        Ok(Self { users, public_len })
    }
}

/// `Event_Online` / `Event_Offline` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    /// When the transition was decided.
    pub timestamp: DateTime<Utc>,
    /// The user whose presence changed.
    pub username: String,
}

impl PresenceEvent {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_i64(clock::to_wire_millis(self.timestamp));
        w.put_str(&self.username);
        w.finish()
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let timestamp = clock::from_wire_millis(r.get_i64()?)?;
        let username = r.get_str()?;
        r.expect_end()?;
        Ok(Self {
            timestamp,
            username,
        })
    }
}

/// `Event_NewMsg` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMsgEvent {
    /// Server stamp, identical to the sender's `SayOk` stamp.
    pub timestamp: DateTime<Utc>,
    /// Who said it.
    pub from: String,
    /// Whether this was a public broadcast.
    pub public: bool,
    /// Message text.
    pub text: String,
}

impl NewMsgEvent {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_i64(clock::to_wire_millis(self.timestamp));
        w.put_str(&self.from);
        w.put_u8(u8::from(self.public));
        w.put_str(&self.text);
        w.finish()
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let timestamp = clock::from_wire_millis(r.get_i64()?)?;
        let from = r.get_str()?;
        let public = match r.get_u8()? {
            0 => false,
            1 => true,
            d => {
                return Err(Error::MalformedFrame(format!(
                    "invalid public flag: {:#04x}",
                    d
                )))
            }
        };
        let text = r.get_str()?;
        r.expect_end()?;
        Ok(Self {
            timestamp,
            from,
            public,
            text,
        })
    }
}

/// Wrap an op-specific payload as a success response body.
pub fn encode_ok(payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(1 + payload.len());
    body.push(0);
    body.extend_from_slice(payload);
    body
}

/// Wrap an error as a response body. Errors without a wire code are
/// reported as `Unsupported`; the taxonomy never leaks crypto detail.
pub fn encode_err(err: &Error) -> Vec<u8> {
    vec![err.wire_code().unwrap_or(9)]
}

/// Split a response body into its ok payload, or the decoded error.
pub fn decode_response(body: &[u8]) -> Result<&[u8]> {
    match body.first() {
        None => Err(Error::MalformedFrame("empty response body".into())),
        Some(0) => Ok(&body[1..]),
        Some(&code) => Err(Error::from_wire_code(code)),
    }
}
