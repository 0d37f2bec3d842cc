//! Session-level state machines.
//!
//! | Module     | Side   | Purpose                                            |
//! |------------|--------|----------------------------------------------------|
//! | `rtt`      | viewer | damped RTT estimate with outlier rejection          |
//! | `pipeline` | viewer | double-buffered requests, in-order frame release    |
//! | `input`    | viewer | input batching with idle pointer refresh            |
//! | `auth`     | both   | challenge-response login digest                     |
//! | `host`     | host   | login phase, retained frame, request ordering       |
//!
//! None of these touch the network or read a clock on their own; the
//! async drivers in [`client`](crate::client) and `trickle-host` feed them.

pub mod auth;
pub mod host;
pub mod input;
pub mod pipeline;
pub mod rtt;

pub use host::{FrameRequest, HostSession, Scheduled, SessionConfig, SessionPhase};
pub use input::InputBatcher;
pub use pipeline::FramePipeline;
pub use rtt::RttFilter;
