// Cluster-size-derived estimators.
//
// These are observability helpers, not control-flow: `dissemination_periods`
// feeds the gossip queue's max transmission count and the suspicion-to-
// faulty promotion threshold; `ping_target_probability` and
// `failure_detection_duration` are exposed for monitoring/debugging only.
// Suspicion period derives from `ceil(log2(N)) * SafetyFactor`.

/// `ceil(log2(N))`, the number of protocol periods expected for a rumor to
/// reach all members with high probability under random pairing. `N <= 1`
/// returns 0 (a lone member has nothing to disseminate to).
pub fn dissemination_periods(n: usize) -> u32 {
    if n <= 1 {
        return 0;
    }
    (n as f64).log2().ceil() as u32
}

/// Suspicion-to-faulty promotion threshold: `SafetyFactor *
/// dissemination_periods(N)`.
pub fn suspicion_timeout_periods(n: usize, safety_factor: u32) -> u32 {
    safety_factor * dissemination_periods(n)
}

/// Probability that a specific member is chosen as the direct-ping target
/// in a single period, given uniform random selection among `N-1` peers
/// (self excluded) and `member_reliability` modeling datagram delivery
/// odds.
pub fn ping_target_probability(n: usize, member_reliability: f64) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    (1.0 / (n - 1) as f64) * member_reliability
}

/// Expected number of periods before a silenced member is detected, given
/// the per-period detection probability implied by `reliability` and
/// cluster size. A rough statistical estimator, exposed for observability
/// only — not used by the protocol engine's own timers.
pub fn failure_detection_duration(period_millis: u64, n: usize, reliability: f64) -> f64 {
    let p = ping_target_probability(n, reliability).max(f64::EPSILON);
    let expected_periods = 1.0 / p;
    expected_periods * period_millis as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dissemination_periods_matches_known_values() {
        assert_eq!(dissemination_periods(0), 0);
        assert_eq!(dissemination_periods(1), 0);
        assert_eq!(dissemination_periods(2), 1);
        assert_eq!(dissemination_periods(8), 3);
        assert_eq!(dissemination_periods(9), 4);
        assert_eq!(dissemination_periods(64), 6);
        assert_eq!(dissemination_periods(512), 9);
    }

    #[test]
    fn suspicion_timeout_scales_with_safety_factor() {
        assert_eq!(suspicion_timeout_periods(16, 3), 12);
    }

    #[test]
    fn ping_target_probability_is_uniform_over_peers() {
        let p = ping_target_probability(5, 1.0);
        assert!((p - 0.25).abs() < 1e-9);
    }

    #[test]
    fn failure_detection_duration_scales_with_period() {
        let short = failure_detection_duration(1000, 16, 1.0);
        let long = failure_detection_duration(2000, 16, 1.0);
        assert!(long > short);
    }
}
