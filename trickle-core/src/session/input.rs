//! Input event batching.
//!
//! Events queue in arrival order and are flushed as one batch per tick.
//! When nothing happened for `idle_interval`, a synthetic `mousemove` at
//! the last known pointer position is sent so the host always has a
//! fresh cursor position.

use std::time::{Duration, Instant};

use crate::protocol::{InputBatch, InputEvent, PointerEvent};

pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct InputBatcher {
    queue: Vec<InputEvent>,
    idle_interval: Duration,
    /// Origin of the `Time` field of synthetic events.
    started: Instant,
    last_flush: Instant,
    last_pointer: Option<(i32, i32)>,
    /// Independent of frame sequence numbers.
    next_seq: u64,
}

impl InputBatcher {
    pub fn new(idle_interval: Duration, now: Instant) -> Self {
        Self {
            queue: Vec::new(),
            idle_interval,
            started: now,
            last_flush: now,
            last_pointer: None,
            next_seq: 1,
        }
    }

    pub fn push(&mut self, event: InputEvent) {
        if let Some(pos) = event.position() {
            self.last_pointer = Some(pos);
        }
        self.queue.push(event);
    }

    /// The batch to send now with its sequence number, if any.
    pub fn take_batch(&mut self, now: Instant) -> Option<(u64, InputBatch)> {
        if self.queue.is_empty() {
            let (x, y) = self.last_pointer?;
            if now.saturating_duration_since(self.last_flush) < self.idle_interval {
                return None;
            }
            let time = now.saturating_duration_since(self.started).as_millis() as u64;
            self.queue.push(InputEvent::MouseMove(PointerEvent::at(time, x, y)));
        }

        self.last_flush = now;
        let seq = self.next_seq;
        self.next_seq += 1;
        Some((
            seq,
            InputBatch {
                events: std::mem::take(&mut self.queue),
            },
        ))
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn last_pointer(&self) -> Option<(i32, i32)> {
        self.last_pointer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::KeyEvent;

    const MS: Duration = Duration::from_millis(1);

    fn key(time: u64) -> InputEvent {
        InputEvent::KeyDown(KeyEvent {
            time,
            key_code: 13,
            key_shift: false,
            key_ctrl: false,
            key_alt: false,
        })
    }

    #[test]
    fn queued_events_flush_in_order() {
        let t0 = Instant::now();
        let mut b = InputBatcher::new(DEFAULT_IDLE_INTERVAL, t0);
        b.push(InputEvent::MouseMove(PointerEvent::at(1, 5, 6)));
        b.push(key(2));

        let (seq, batch) = b.take_batch(t0 + MS).unwrap();
        assert_eq!(seq, 1);
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.events[1], key(2));
        assert_eq!(b.pending(), 0);
    }

    #[test]
    fn nothing_to_send_without_pointer() {
        let t0 = Instant::now();
        let mut b = InputBatcher::new(DEFAULT_IDLE_INTERVAL, t0);
        assert!(b.take_batch(t0 + 500 * MS).is_none());
    }

    #[test]
    fn idle_pointer_is_repeated() {
        let t0 = Instant::now();
        let mut b = InputBatcher::new(DEFAULT_IDLE_INTERVAL, t0);
        b.push(InputEvent::MouseDown(PointerEvent::at(0, 30, 40)));
        b.take_batch(t0).unwrap();

        assert!(b.take_batch(t0 + 99 * MS).is_none());
        let (seq, batch) = b.take_batch(t0 + 100 * MS).unwrap();
        assert_eq!(seq, 2);
        assert_eq!(
            batch.events,
            vec![InputEvent::MouseMove(PointerEvent::at(100, 30, 40))]
        );
        // The synthetic flush restarts the idle timer.
        assert!(b.take_batch(t0 + 150 * MS).is_none());
    }

    #[test]
    fn key_events_do_not_move_the_pointer() {
        let t0 = Instant::now();
        let mut b = InputBatcher::new(DEFAULT_IDLE_INTERVAL, t0);
        b.push(InputEvent::MouseMove(PointerEvent::at(0, 1, 2)));
        b.push(key(1));
        assert_eq!(b.last_pointer(), Some((1, 2)));
    }
}
