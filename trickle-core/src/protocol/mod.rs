//! Wire message definitions.
//!
//! | Module    | Direction       | Contents                                  |
//! |-----------|-----------------|-------------------------------------------|
//! | `message` | both            | session envelope, frame reply, stats      |
//! | `input`   | viewer → host   | pointer and keyboard events, batches      |
//!
//! Messages are framed by [`MessageCodec`](crate::codec::MessageCodec).

pub mod input;
pub mod message;

pub use input::{InputBatch, InputEvent, KeyEvent, PointerEvent};
pub use message::{
    ClientMessage, ClipMessage, FrameMessage, FrameStats, FrameTile, ServerMessage,
};
