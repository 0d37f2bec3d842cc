//! # trickle-core
//!
//! Core library for Trickle, a low-bandwidth screen streaming protocol.
//!
//! This crate contains:
//! - **Surface**: `PixelSurface` 32-bit canvases and zstd `PixelPayload`s
//! - **Delta**: block classification, the draw-string encoder and decoder
//! - **Protocol**: `ClientMessage` / `ServerMessage` and input events
//! - **Codec**: `MessageCodec` for framed TCP I/O via `tokio_util`
//! - **Session**: host session state machine, frame pipeline, RTT filter
//!   and input batching
//! - **Network**: `TcpTransport`, a logged-in viewer connection
//! - **Client**: `ScreenClient`, the viewer scheduling loop
//! - **Error**: `TrickleError`, a typed `thiserror` error hierarchy

pub mod client;
pub mod codec;
pub mod config;
pub mod delta;
pub mod error;
pub mod flags;
pub mod network;
pub mod protocol;
pub mod session;
pub mod surface;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use client::{ClientStats, FrameTransport, ScreenClient, run_with_reconnect};
pub use codec::{ClientCodec, HostCodec, MAX_FRAME_SIZE, MessageCodec};
pub use config::{ClientConfig, ReconnectPolicy};
pub use delta::{
    BlockClass, BlockClassifier, BlockGrid, Classification, DeltaEncoder, DrawDecoder,
    EncodedFrame, EncoderConfig,
};
pub use error::TrickleError;
pub use flags::FrameOptions;
pub use network::TcpTransport;
pub use protocol::{
    ClientMessage, FrameMessage, FrameStats, FrameTile, InputBatch, InputEvent, ServerMessage,
};
pub use session::{FramePipeline, HostSession, InputBatcher, RttFilter, SessionConfig};
pub use surface::{PixelPayload, PixelSurface, Rect};
