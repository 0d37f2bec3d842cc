//! Damped round-trip time estimate.
//!
//! `rtt' = clamp(sample) * α + rtt * (1 - α)`. A sample above
//! `OUTLIER_FACTOR × rtt` is treated as a transient stall and skipped,
//! but never more than `MAX_OUTLIER_SKIPS` times in a row.

use std::time::Duration;

pub const MIN_RTT: Duration = Duration::from_millis(10);
pub const MAX_RTT: Duration = Duration::from_millis(2500);
pub const INITIAL_RTT: Duration = Duration::from_millis(250);

const ALPHA: f64 = 0.2;
const OUTLIER_FACTOR: f64 = 1.6;
const MAX_OUTLIER_SKIPS: u32 = 2;

#[derive(Debug, Clone)]
pub struct RttFilter {
    estimate: Duration,
    /// Consecutive outliers skipped so far.
    skipped: u32,
    accepted: u64,
}

impl RttFilter {
    pub fn new() -> Self {
        Self::with_initial(INITIAL_RTT)
    }

    pub fn with_initial(initial: Duration) -> Self {
        Self {
            estimate: initial.clamp(MIN_RTT, MAX_RTT),
            skipped: 0,
            accepted: 0,
        }
    }

    /// Feed one sample. Returns `false` when it was skipped as an outlier.
    pub fn record(&mut self, sample: Duration) -> bool {
        let limit = self.estimate.mul_f64(OUTLIER_FACTOR);
        if sample > limit && self.skipped < MAX_OUTLIER_SKIPS {
            self.skipped += 1;
            return false;
        }
        self.skipped = 0;
        self.accepted += 1;

        let sample = sample.clamp(MIN_RTT, MAX_RTT).as_secs_f64();
        let blended = sample * ALPHA + self.estimate.as_secs_f64() * (1.0 - ALPHA);
        self.estimate = Duration::from_secs_f64(blended).clamp(MIN_RTT, MAX_RTT);
        true
    }

    pub fn estimate(&self) -> Duration {
        self.estimate
    }

    pub fn consecutive_skips(&self) -> u32 {
        self.skipped
    }

    /// Samples that moved the estimate.
    pub fn accepted(&self) -> u64 {
        self.accepted
    }
}

impl Default for RttFilter {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn blends_toward_samples() {
        let mut rtt = RttFilter::new();
        assert!(rtt.record(Duration::from_millis(200)));
        // 200 * 0.2 + 250 * 0.8 = 240
        let ms = rtt.estimate().as_secs_f64() * 1000.0;
        assert!((ms - 240.0).abs() < 0.01, "estimate {ms}");
    }

    #[test]
    fn spike_is_skipped_twice_then_accepted() {
        let mut rtt = RttFilter::new();
        let spike = rtt.estimate() * 10;

        assert!(!rtt.record(spike));
        assert!(!rtt.record(spike));
        assert_eq!(rtt.estimate(), INITIAL_RTT);
        assert_eq!(rtt.consecutive_skips(), 2);

        assert!(rtt.record(spike));
        assert_eq!(rtt.consecutive_skips(), 0);
        assert!(rtt.estimate() > INITIAL_RTT);
    }

    #[test]
    fn normal_sample_resets_skip_count() {
        let mut rtt = RttFilter::new();
        assert!(!rtt.record(Duration::from_secs(2)));
        assert!(rtt.record(Duration::from_millis(250)));
        assert!(!rtt.record(Duration::from_secs(2)));
        assert_eq!(rtt.consecutive_skips(), 1);
    }

    #[test]
    fn tiny_samples_clamp_to_min() {
        let mut rtt = RttFilter::with_initial(MIN_RTT);
        for _ in 0..50 {
            rtt.record(Duration::ZERO);
        }
        assert_eq!(rtt.estimate(), MIN_RTT);
    }

    proptest! {
        #[test]
        fn estimate_stays_in_bounds(samples in prop::collection::vec(0u64..10_000, 1..200)) {
            let mut rtt = RttFilter::new();
            for ms in samples {
                rtt.record(Duration::from_millis(ms));
                prop_assert!(rtt.estimate() >= MIN_RTT && rtt.estimate() <= MAX_RTT);
                prop_assert!(rtt.consecutive_skips() <= 2);
            }
        }
    }
}
