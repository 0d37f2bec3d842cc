//! # trickle-host: Screen Streaming Host
//!
//! Serves delta-compressed frames of a screen to Trickle viewers over
//! TCP and hands their input events to an input sink.
//!
//! - **config**: `HostConfig`, loaded from TOML
//! - **service**: `HostService`, the accept loop and per-connection tasks
//! - **source**: `FrameSource` and the synthetic `PatternSource`
//! - **input**: `InputSink` and `LoggingInputSink`

pub mod config;
pub mod input;
pub mod service;
pub mod source;
