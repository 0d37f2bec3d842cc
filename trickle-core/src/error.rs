//! Domain-specific error types for the Trickle protocol.
//!
//! All fallible operations return `Result<T, TrickleError>`. The
//! variants fall into four classes that decide how a caller recovers:
//!
//! | Class     | Variants                                              | Recovery                     |
//! |-----------|-------------------------------------------------------|------------------------------|
//! | Transport | `Transport`, `ChannelClosed`, `Timeout`               | reconnect with backoff       |
//! | Protocol  | `Protocol`, `ProtocolViolation`, `UnknownSequence`, `LoginRejected` | fatal to the session |
//! | Decode    | `Decode`                                              | drop the frame, keep going   |
//! | Encoding  | `Encoding`                                            | fatal to the message         |
//!
//! Bounds violations inside [`PixelSurface`](crate::surface::PixelSurface)
//! are not represented here: they are contract violations and panic.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the Trickle protocol.
#[derive(Debug, Error)]
pub enum TrickleError {
    // ── Transport Errors ─────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Protocol Errors ──────────────────────────────────────────
    /// A message or draw string was malformed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A message arrived in a state where it is not allowed.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// A frame request referenced a sequence the session cannot serve.
    #[error("unknown sequence: {0}")]
    UnknownSequence(u64),

    /// The host refused the login response.
    #[error("login rejected")]
    LoginRejected,

    // ── Decode Errors ────────────────────────────────────────────
    /// A pixel payload could not be materialised.
    #[error("decode error: {0}")]
    Decode(String),

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a message failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl TrickleError {
    /// Whether the error should trigger a reconnect with backoff.
    pub fn is_reconnectable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::ChannelClosed
                | Self::Timeout(_)
                | Self::Protocol(_)
                | Self::ProtocolViolation(_)
                | Self::UnknownSequence(_)
        )
    }

    /// Whether the error only affects a single frame.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    /// Shorthand for a [`TrickleError::Protocol`] with a formatted message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Shorthand for a [`TrickleError::Decode`] with a formatted message.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for TrickleError {
    fn from(s: String) -> Self {
        TrickleError::Other(s)
    }
}

impl From<&str> for TrickleError {
    fn from(s: &str) -> Self {
        TrickleError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for TrickleError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        TrickleError::ChannelClosed
    }
}

impl From<serde_json::Error> for TrickleError {
    fn from(e: serde_json::Error) -> Self {
        TrickleError::Encoding(e.to_string())
    }
}
