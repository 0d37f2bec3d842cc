//! Double-buffered frame request scheduling.
//!
//! ```text
//!  time ─────────────────────────────────────────────────────────►
//!  req 1 ├──────────── rtt ────────────┤ complete(1)
//!              req 2 ├──────────── rtt ────────────┤ complete(2)
//!        ◄ rtt/2 - 40ms ►
//! ```
//!
//! At most two requests are outstanding. The second one goes out before
//! the first completes, so one frame is always in flight while the
//! previous one is drawn. Replies are buffered by sequence number and
//! handed out strictly in order; failed sequences are skipped. While
//! [`MAX_BUFFERED`] replies wait behind a missing one, nothing new is
//! requested.
//!
//! The pipeline never reads a clock; callers pass `now`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::session::rtt::RttFilter;

pub const MAX_IN_FLIGHT: usize = 2;

/// Completed frames held behind a missing sequence before requests stop.
pub const MAX_BUFFERED: usize = 8;

/// Subtracted from half the RTT before the second request is sent.
const PREEMPT_MARGIN: Duration = Duration::from_millis(40);

#[derive(Debug)]
pub struct FramePipeline<T> {
    rtt: RttFilter,
    running: bool,
    next_seq: u64,
    /// Next sequence handed out by [`next_ready`](Self::next_ready).
    next_apply: u64,
    /// Sequence → when it was requested.
    in_flight: BTreeMap<u64, Instant>,
    /// Completed sequences; `None` marks a failed frame.
    completed: BTreeMap<u64, Option<T>>,
    last_request: Option<Instant>,
}

impl<T> FramePipeline<T> {
    pub fn new() -> Self {
        Self::with_rtt(RttFilter::new())
    }

    pub fn with_rtt(rtt: RttFilter) -> Self {
        Self {
            rtt,
            running: true,
            next_seq: 1,
            next_apply: 1,
            in_flight: BTreeMap::new(),
            completed: BTreeMap::new(),
            last_request: None,
        }
    }

    /// Sequence to request now, if any.
    pub fn poll_request(&mut self, now: Instant) -> Option<u64> {
        if !self.running || self.completed.len() >= MAX_BUFFERED {
            return None;
        }
        let due = match self.in_flight.len() {
            0 => true,
            n if n < MAX_IN_FLIGHT => {
                let wait = (self.rtt.estimate() / 2).saturating_sub(PREEMPT_MARGIN);
                self.last_request
                    .is_none_or(|last| now.saturating_duration_since(last) > wait)
            }
            _ => false,
        };
        if !due {
            return None;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_flight.insert(seq, now);
        self.last_request = Some(now);
        Some(seq)
    }

    /// Record the reply for `seq`. Returns `false` for a sequence that is
    /// not outstanding or after [`stop`](Self::stop).
    pub fn complete(&mut self, seq: u64, now: Instant, frame: T) -> bool {
        self.finish(seq, now, Some(frame))
    }

    /// Record that `seq` could not be decoded; ordering moves past it.
    pub fn fail(&mut self, seq: u64, now: Instant) -> bool {
        self.finish(seq, now, None)
    }

    fn finish(&mut self, seq: u64, now: Instant, frame: Option<T>) -> bool {
        if !self.running {
            return false;
        }
        let Some(sent) = self.in_flight.remove(&seq) else {
            return false;
        };
        self.rtt.record(now.saturating_duration_since(sent));
        self.completed.insert(seq, frame);
        true
    }

    /// Next frame in sequence order, if it has arrived.
    pub fn next_ready(&mut self) -> Option<(u64, T)> {
        while let Some(entry) = self.completed.first_entry() {
            if *entry.key() != self.next_apply {
                return None;
            }
            let seq = *entry.key();
            let frame = entry.remove();
            self.next_apply += 1;
            if let Some(frame) = frame {
                return Some((seq, frame));
            }
        }
        None
    }

    /// Drop everything outstanding; later completions are no-ops.
    pub fn stop(&mut self) {
        self.running = false;
        self.in_flight.clear();
        self.completed.clear();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Sequence the next request will carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Sequence [`next_ready`](Self::next_ready) waits for.
    pub fn next_apply(&self) -> u64 {
        self.next_apply
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Completed frames waiting for an earlier sequence.
    pub fn buffered(&self) -> usize {
        self.completed.len()
    }

    pub fn rtt(&self) -> Duration {
        self.rtt.estimate()
    }
}

impl<T> Default for FramePipeline<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
