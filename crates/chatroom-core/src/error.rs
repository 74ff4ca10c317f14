//! Error types for the chatroom protocol core.
//!
//! Wire and crypto failures carry deliberately vague messages: a peer
//! probing the envelope must not learn why a frame was refused.

use thiserror::Error;

/// Core error type for chatroom operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Frame could not be decoded: truncated input, unknown discriminant,
    /// or a length prefix above the datagram bound.
    #[error("malformed frame")]
    MalformedFrame(String),

    /// Envelope authentication failed. Details are intentionally vague.
    #[error("envelope authentication failed")]
    AuthFailure,

    /// Frame nonce fell below or collided inside the replay window.
    #[error("replayed frame rejected")]
    ReplayRejected,

    /// Send nonce counter would wrap; the session must rehandshake.
    #[error("nonce counter exhausted")]
    NonceExhausted,

    /// No response arrived before the request deadline.
    #[error("request timed out")]
    RequestTimeout,

    /// The endpoint shut down while the operation was in flight.
    #[error("endpoint closed")]
    EndpointClosed,

    /// Socket-level send or receive failure.
    #[error("transport error")]
    Transport(#[from] std::io::Error),

    /// Registration refused: the username is taken.
    #[error("user already exists")]
    UserExists,

    /// The named user is not registered.
    #[error("unknown user")]
    UserUnknown,

    /// Username/password pair did not verify.
    #[error("invalid credentials")]
    CredentialInvalid,

    /// Operation requires an authenticated session.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The session already carries a username.
    #[error("already authenticated")]
    AlreadyAuthenticated,

    /// Message recipient is not a registered user.
    #[error("unknown recipient")]
    RecipientUnknown,

    /// Message recipient is registered but has no live session.
    #[error("recipient offline")]
    RecipientOffline,

    /// Refusing to relay an empty message.
    #[error("empty message")]
    EmptyMessage,

    /// The persisted user store failed validation on load.
    #[error("user store corrupt")]
    StoreCorrupt(String),

    /// The user store could not be read or written.
    #[error("user store I/O error")]
    StoreIo(String),

    /// The peer sent an op this endpoint does not serve.
    #[error("unsupported operation")]
    Unsupported,
}

/// Result type alias using the chatroom [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short machine-readable kind string, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MalformedFrame(_) => "malformed-frame",
            Error::AuthFailure => "auth-failure",
            Error::ReplayRejected => "replay-rejected",
            Error::NonceExhausted => "nonce-exhausted",
            Error::RequestTimeout => "request-timeout",
            Error::EndpointClosed => "endpoint-closed",
            Error::Transport(_) => "transport",
            Error::UserExists => "user-exists",
            Error::UserUnknown => "user-unknown",
            Error::CredentialInvalid => "credential-invalid",
            Error::NotAuthenticated => "not-authenticated",
            Error::AlreadyAuthenticated => "already-authenticated",
            Error::RecipientUnknown => "recipient-unknown",
            Error::RecipientOffline => "recipient-offline",
            Error::EmptyMessage => "empty-message",
            Error::StoreCorrupt(_) => "store-corrupt",
            Error::StoreIo(_) => "store-io",
            Error::Unsupported => "unsupported",
        }
    }

    /// Whether this error is handled locally by dropping the offending
    /// frame without mutating session state.
    pub fn is_silent_drop(&self) -> bool {
        matches!(
            self,
            Error::MalformedFrame(_) | Error::AuthFailure | Error::ReplayRejected
        )
    }

    /// Code carried in the first byte of an error response. `None` for
    /// errors that never cross the wire.
    pub(crate) fn wire_code(&self) -> Option<u8> {
        match self {
            Error::UserExists => Some(1),
            Error::UserUnknown => Some(2),
            Error::CredentialInvalid => Some(3),
            Error::NotAuthenticated => Some(4),
            Error::AlreadyAuthenticated => Some(5),
            Error::RecipientUnknown => Some(6),
            Error::RecipientOffline => Some(7),
            Error::EmptyMessage => Some(8),
            Error::Unsupported => Some(9),
            _ => None,
        }
    }

    /// Inverse of [`Error::wire_code`]; unknown codes decode as
    /// [`Error::Unsupported`].
    pub(crate) fn from_wire_code(code: u8) -> Error {
        match code {
            1 => Error::UserExists,
            2 => Error::UserUnknown,
            3 => Error::CredentialInvalid,
            4 => Error::NotAuthenticated,
            5 => Error::AlreadyAuthenticated,
            6 => Error::RecipientUnknown,
            7 => Error::RecipientOffline,
            8 => Error::EmptyMessage,
            _ => Error::Unsupported,
        }
    }
}
