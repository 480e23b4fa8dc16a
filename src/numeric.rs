// 16-bit wrap-around counters: incarnation numbers and sequence numbers.
//
// Both wrap modulo 2^16. Incarnation ordering uses the "circular distance
// less than half the range" rule; sequence numbers are only ever compared
// for equality within a bounded recent window, never ordered.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A member's self-owned refutation counter. Only the member itself may
/// raise its own incarnation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IncarnationNumber(pub u16);

impl IncarnationNumber {
    pub const ZERO: IncarnationNumber = IncarnationNumber(0);

    pub fn next(self) -> IncarnationNumber {
        IncarnationNumber(self.0.wrapping_add(1))
    }

    /// `a.circular_lt(b)` iff `(b - a) mod 2^16` lies in `(0, 2^15)`.
    /// Irreflexive and antisymmetric on pairs within half the modulus.
    pub fn circular_lt(self, other: IncarnationNumber) -> bool {
        let diff = other.0.wrapping_sub(self.0);
        diff != 0 && diff < 0x8000
    }

    pub fn circular_le(self, other: IncarnationNumber) -> bool {
        self == other || self.circular_lt(other)
    }

    pub fn circular_gt(self, other: IncarnationNumber) -> bool {
        other.circular_lt(self)
    }

    pub fn circular_ge(self, other: IncarnationNumber) -> bool {
        self == other || self.circular_gt(other)
    }
}

impl From<u16> for IncarnationNumber {
    fn from(v: u16) -> Self {
        IncarnationNumber(v)
    }
}

impl std::fmt::Display for IncarnationNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message sequence number, advanced on every outgoing direct ping.
/// Matching on acks is by equality within a bounded recent window, not
/// monotonic comparison — wrap-around must never be mistaken for staleness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SequenceNumber(pub u16);

impl SequenceNumber {
    pub fn next(self) -> SequenceNumber {
        SequenceNumber(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State precedence used by the gossip-queue replacement rule: `Alive <
/// Suspect < Faulty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatePrecedence {
    Alive = 0,
    Suspect = 1,
    Faulty = 2,
}

pub fn precedence_cmp(a: StatePrecedence, b: StatePrecedence) -> Ordering {
    a.cmp(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circular_lt_is_irreflexive() {
        let a = IncarnationNumber(5);
        assert!(!a.circular_lt(a));
    }

    #[test]
    fn circular_lt_wraps() {
        // (2^16 - 1) < 0 is true: wrap-around, not staleness.
        let max = IncarnationNumber(0xFFFF);
        let zero = IncarnationNumber(0);
        assert!(max.circular_lt(zero));
        assert!(!zero.circular_lt(max));
    }

    #[test]
    fn circular_lt_antisymmetric_within_half_range() {
        let a = IncarnationNumber(100);
        let b = IncarnationNumber(200);
        assert!(a.circular_lt(b));
        assert!(!b.circular_lt(a));
    }

    #[test]
    fn far_lag_is_treated_as_stale_not_fresher() {
        // A peer lagging by more than 2^15 should compare as "behind", not
        // as having lapped ahead.
        let behind = IncarnationNumber(10);
        let ahead = IncarnationNumber(10u16.wrapping_sub(0x9000)); // lags by > 2^15
        assert!(ahead.circular_lt(behind));
    }
}
