//! Input sinks.
//!
//! Replaying events into the OS input stream is platform glue. The
//! host hands every accepted batch to an [`InputSink`], in order.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use trickle_core::error::TrickleError;
use trickle_core::protocol::{InputBatch, InputEvent};

/// Receives input batches accepted by a session.
pub trait InputSink: Send + Sync {
    fn inject(&self, session: &str, batch: &InputBatch) -> Result<(), TrickleError>;
}

// ── LoggingInputSink ─────────────────────────────────────────────

/// Logs every event at `debug` and counts them.
#[derive(Debug, Default)]
pub struct LoggingInputSink {
    events: AtomicU64,
}

impl LoggingInputSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events seen so far.
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }
}

impl InputSink for LoggingInputSink {
    fn inject(&self, session: &str, batch: &InputBatch) -> Result<(), TrickleError> {
        for event in &batch.events {
            match event {
                InputEvent::KeyDown(key) | InputEvent::KeyUp(key) => debug!(
                    session,
                    time = event.time(),
                    key = key.key_code,
                    shift = key.key_shift,
                    ctrl = key.key_ctrl,
                    alt = key.key_alt,
                    down = matches!(event, InputEvent::KeyDown(_)),
                    "key"
                ),
                InputEvent::MouseDown(p)
                | InputEvent::MouseUp(p)
                | InputEvent::MouseMove(p)
                | InputEvent::MouseWheel(p) => debug!(
                    session,
                    time = p.time,
                    x = p.x,
                    y = p.y,
                    which = ?p.which,
                    delta = ?p.delta,
                    "pointer"
                ),
            }
        }
        self.events.fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trickle_core::protocol::{KeyEvent, PointerEvent};

    #[test]
    fn counts_events() {
        let sink = LoggingInputSink::new();
        let batch = InputBatch {
            events: vec![
                InputEvent::MouseMove(PointerEvent::at(1, 10, 20)),
                InputEvent::KeyDown(KeyEvent {
                    time: 2,
                    key_code: 65,
                    key_shift: true,
                    key_ctrl: false,
                    key_alt: false,
                }),
            ],
        };
        sink.inject("s", &batch).unwrap();
        sink.inject("s", &InputBatch::default()).unwrap();
        assert_eq!(sink.events(), 2);
    }
}
