//! Viewer → host input events.
//!
//! ```text
//! { "Events": [
//!     { "Event": "mousemove", "Time": 1200, "X": 40, "Y": 17 },
//!     { "Event": "keydown",   "Time": 1210, "KeyCode": 65, "KeyShift": true, "KeyCtrl": false, "KeyAlt": false }
//! ] }
//! ```

use serde::{Deserialize, Serialize};

// ── Pointer Input ────────────────────────────────────────────────

/// Pointer payload shared by all mouse events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PointerEvent {
    /// Milliseconds since the viewer session started.
    pub time: u64,
    pub x: i32,
    pub y: i32,
    /// Button index for press / release.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub which: Option<u8>,
    /// Wheel delta for `mousewheel`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i32>,
}

impl PointerEvent {
    pub fn at(time: u64, x: i32, y: i32) -> Self {
        Self {
            time,
            x,
            y,
            which: None,
            delta: None,
        }
    }
}

// ── Keyboard Input ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyEvent {
    pub time: u64,
    pub key_code: u32,
    pub key_shift: bool,
    pub key_ctrl: bool,
    pub key_alt: bool,
}

// ── InputEvent ───────────────────────────────────────────────────

/// One input event, tagged by its `Event` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Event", rename_all = "lowercase")]
pub enum InputEvent {
    MouseDown(PointerEvent),
    MouseUp(PointerEvent),
    MouseMove(PointerEvent),
    MouseWheel(PointerEvent),
    KeyDown(KeyEvent),
    KeyUp(KeyEvent),
}

impl InputEvent {
    pub fn time(&self) -> u64 {
        match self {
            Self::MouseDown(p) | Self::MouseUp(p) | Self::MouseMove(p) | Self::MouseWheel(p) => {
                p.time
            }
            Self::KeyDown(k) | Self::KeyUp(k) => k.time,
        }
    }

    /// Pointer position carried by mouse events.
    pub fn position(&self) -> Option<(i32, i32)> {
        match self {
            Self::MouseDown(p) | Self::MouseUp(p) | Self::MouseMove(p) | Self::MouseWheel(p) => {
                Some((p.x, p.y))
            }
            Self::KeyDown(_) | Self::KeyUp(_) => None,
        }
    }

    pub fn is_pointer(&self) -> bool {
        self.position().is_some()
    }
}

/// An ordered batch of events flushed together.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct InputBatch {
    pub events: Vec<InputEvent>,
}

impl InputBatch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────
