// Round-trip tracker: rolling estimator of ack latency used to compute the
// dynamic direct-ping timeout.
//
// Maintains a bounded history of observed latencies, separately for direct
// and indirect acks, and exposes a percentile read used as
// `percentile(p99) * 1.1`, clamped to the configured bounds. Falls back to
// a configured default when no samples have been observed yet.

use std::collections::VecDeque;
use std::time::Duration;

const HISTORY_CAPACITY: usize = 512;

pub struct RoundTripTracker {
    direct_samples: VecDeque<Duration>,
    indirect_samples: VecDeque<Duration>,
    default_timeout: Duration,
    lower_bound: Duration,
    upper_bound: Duration,
}

impl RoundTripTracker {
    pub fn new(default_timeout: Duration, lower_bound: Duration, upper_bound: Duration) -> Self {
        RoundTripTracker {
            direct_samples: VecDeque::with_capacity(HISTORY_CAPACITY),
            indirect_samples: VecDeque::with_capacity(HISTORY_CAPACITY),
            default_timeout,
            lower_bound,
            upper_bound,
        }
    }

    pub fn observe_direct(&mut self, rtt: Duration) {
        push_bounded(&mut self.direct_samples, rtt);
    }

    pub fn observe_indirect(&mut self, rtt: Duration) {
        push_bounded(&mut self.indirect_samples, rtt);
    }

    /// `p99(direct samples) * 1.1`, clamped to `[lower_bound, upper_bound]`.
    /// Returns `default_timeout` (also clamped) when no samples exist.
    pub fn direct_ping_timeout(&self) -> Duration {
        self.timeout_from(&self.direct_samples)
    }

    pub fn indirect_ping_timeout(&self) -> Duration {
        self.timeout_from(&self.indirect_samples)
    }

    fn timeout_from(&self, samples: &VecDeque<Duration>) -> Duration {
        let base = percentile(samples, 0.99).unwrap_or(self.default_timeout);
        let scaled = base.mul_f64(1.1);
        scaled.clamp(self.lower_bound, self.upper_bound)
    }
}

fn push_bounded(history: &mut VecDeque<Duration>, sample: Duration) {
    if history.len() == HISTORY_CAPACITY {
        history.pop_front();
    }
    history.push_back(sample);
}

/// Nearest-rank percentile over an unsorted sample set. `p` in `[0, 1]`.
fn percentile(samples: &VecDeque<Duration>, p: f64) -> Option<Duration> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted: Vec<Duration> = samples.iter().copied().collect();
    sorted.sort();
    let rank = ((sorted.len() as f64) * p).ceil() as usize;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    Some(sorted[index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_history_returns_default() {
        let tracker = RoundTripTracker::new(
            Duration::from_millis(500),
            Duration::from_millis(100),
            Duration::from_millis(2000),
        );
        assert_eq!(tracker.direct_ping_timeout(), Duration::from_millis(550));
    }

    #[test]
    fn timeout_tracks_observed_latency_scaled_and_clamped() {
        let mut tracker = RoundTripTracker::new(
            Duration::from_millis(500),
            Duration::from_millis(10),
            Duration::from_millis(2000),
        );
        for _ in 0..100 {
            tracker.observe_direct(Duration::from_millis(100));
        }
        let timeout = tracker.direct_ping_timeout();
        assert!(timeout >= Duration::from_millis(100));
        assert!(timeout <= Duration::from_millis(2000));
    }

    #[test]
    fn upper_bound_clamps_large_latencies() {
        let mut tracker = RoundTripTracker::new(
            Duration::from_millis(500),
            Duration::from_millis(10),
            Duration::from_millis(1000),
        );
        for _ in 0..10 {
            tracker.observe_direct(Duration::from_secs(10));
        }
        assert_eq!(tracker.direct_ping_timeout(), Duration::from_millis(1000));
    }

    #[test]
    fn history_is_bounded() {
        let mut tracker = RoundTripTracker::new(
            Duration::from_millis(500),
            Duration::from_millis(10),
            Duration::from_millis(2000),
        );
        for i in 0..(HISTORY_CAPACITY * 2) {
            tracker.observe_direct(Duration::from_millis(i as u64));
        }
        assert_eq!(tracker.direct_samples.len(), HISTORY_CAPACITY);
    }
}
