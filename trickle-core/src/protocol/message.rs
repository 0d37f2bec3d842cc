//! Session messages exchanged between viewer and host.
//!
//! Every message is one JSON document tagged by its `Type` field:
//!
//! ```text
//! viewer                                   host
//!   │ StartSession ───────────────────────► │
//!   │ ◄─────────── Challenge{SessionId, Salt, Challenge}
//!   │ Login{Response} ────────────────────► │
//!   │ ◄────────────────── LoggedIn{LoggedIn}│
//!   │ RequestFrame{Seq, ...} ─────────────► │
//!   │ ◄────────────────────── Frame{Seq, Frames, Stats}
//!   │ SendEvents{Seq, Batch} ─────────────► │
//!   │ ◄───────────────────────── EventsAck{Seq}
//!   │ Close ──────────────────────────────► │
//! ```
//!
//! Unknown fields are rejected rather than ignored.

use serde::{Deserialize, Serialize};

use crate::delta::classify::ComplexityCounts;
use crate::flags::FrameOptions;
use crate::protocol::input::InputBatch;
use crate::surface::PixelPayload;

// ── Frame ────────────────────────────────────────────────────────

/// One draw string and the payload it copies from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct FrameTile {
    pub draw: String,
    pub image: PixelPayload,
}

/// Counters describing how a frame was encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default, deny_unknown_fields)]
pub struct FrameStats {
    pub blocks: u32,
    pub unchanged: u32,
    pub solid: u32,
    pub duplicate: u32,
    pub copied: u32,
    /// Duplicates whose reference never reached a payload.
    pub dropped_duplicates: u32,
    pub flat: u32,
    pub smooth: u32,
    pub textured: u32,
    pub tiles: u32,
    /// Compressed payload bytes across all tiles.
    pub payload_bytes: u64,
    pub encode_micros: u64,
    pub full_frame: bool,
}

impl FrameStats {
    pub(crate) fn record_complexity(&mut self, counts: ComplexityCounts) {
        self.flat = counts.flat;
        self.smooth = counts.smooth;
        self.textured = counts.textured;
    }
}

/// Clipboard text published by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct ClipMessage {
    pub text: String,
}

/// Reply to a `RequestFrame`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct FrameMessage {
    pub seq: u64,
    /// Tiles in application order.
    pub frames: Vec<FrameTile>,
    pub stats: FrameStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip: Option<ClipMessage>,
}

impl FrameMessage {
    /// Compressed payload bytes of all tiles.
    pub fn payload_bytes(&self) -> u64 {
        self.frames.iter().map(|t| t.image.byte_len() as u64).sum()
    }
}

// ── Viewer → Host ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Type", rename_all_fields = "PascalCase", deny_unknown_fields)]
pub enum ClientMessage {
    StartSession,
    Login {
        /// Hex digest from [`login_response`](crate::session::auth::login_response).
        response: String,
    },
    RequestFrame {
        seq: u64,
        max_width: u32,
        max_height: u32,
        #[serde(default)]
        options: FrameOptions,
    },
    SendEvents {
        seq: u64,
        batch: InputBatch,
    },
    Close,
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartSession => "StartSession",
            Self::Login { .. } => "Login",
            Self::RequestFrame { .. } => "RequestFrame",
            Self::SendEvents { .. } => "SendEvents",
            Self::Close => "Close",
        }
    }
}

// ── Host → Viewer ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Type", rename_all_fields = "PascalCase", deny_unknown_fields)]
pub enum ServerMessage {
    Challenge {
        session_id: String,
        salt: String,
        challenge: String,
    },
    LoggedIn {
        logged_in: bool,
    },
    Close {
        reason: String,
    },
    Frame(FrameMessage),
    Clip(ClipMessage),
    EventsAck {
        seq: u64,
    },
}

impl ServerMessage {
    pub fn close(reason: impl Into<String>) -> Self {
        Self::Close {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Challenge { .. } => "Challenge",
            Self::LoggedIn { .. } => "LoggedIn",
            Self::Close { .. } => "Close",
            Self::Frame(_) => "Frame",
            Self::Clip(_) => "Clip",
            Self::EventsAck { .. } => "EventsAck",
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
