use std::time::Duration;

use thiserror::Error;

/// Everything that can go wrong while talking to the network.
///
/// A missing key is not an error: `get` returns `None` for it. Nothing in
/// this enum is fatal to a running node; only a socket bind failure at
/// startup (surfaced as [`Error::Io`]) aborts `start`.
#[derive(Debug, Error)]
pub enum Error {
    /// No reply arrived within the bound. Never retried automatically.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// A datagram that did not decode into a known message.
    #[error("malformed message: {0}")]
    MalformedMessage(serde_json::Error),

    /// An outbound message that failed to serialize. Distinct from
    /// [`Error::MalformedMessage`], which is about inbound traffic.
    #[error("message encoding failed: {0}")]
    Encode(serde_json::Error),

    /// A peer address that did not parse or resolve as `host:port`.
    #[error("invalid peer address `{0}`")]
    InvalidAddress(String),

    /// The join handshake failed; the caller may retry or run standalone.
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    /// An operation that requires a started node was called before `start`
    /// or after `stop`.
    #[error("node is not running")]
    NotRunning,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
