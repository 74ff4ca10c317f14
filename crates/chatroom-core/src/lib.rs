//! # Chatroom protocol core
//!
//! An end-to-end encrypted chatroom over an unreliable datagram
//! transport. This crate is the protocol core shared by the client and
//! server shells: framing, authenticated key exchange, per-peer session
//! state, request/response correlation, heartbeat liveness, and the
//! server's user and session registries.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          shells (CLI / UI)              │
//! ├────────────────────┬────────────────────┤
//! │   client session   │   server context   │
//! │                    │ registry·store·chat│
//! ├────────────────────┴────────────────────┤
//! │     endpoint · request table · sink     │
//! ├─────────────────────────────────────────┤
//! │        protocol (frames, codec)         │
//! ├─────────────────────────────────────────┤
//! │        crypto (X25519, envelope)        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The core is testable in isolation: construct a [`ChatServer`] and
//! [`ChatClient`] with in-memory [`NotificationSink`]s and drive them
//! over loopback UDP.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod client;
pub mod clock;
pub mod crypto;
pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod request;
pub mod server;
pub mod sink;

pub use client::{ChatClient, ClientConfig, PersonalInfo, ServerInfo};
pub use error::{Error, Result};
pub use protocol::payload::{ChatEntry, EntryKind, UserSnapshot};
pub use server::{ChatServer, ServerConfig};
pub use sink::{NotificationSink, SinkEvent};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upper bound for one datagram and for any length prefix (64 KiB).
pub const MAX_DATAGRAM_SIZE: usize = 65536;
