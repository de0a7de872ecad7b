//! # Tracewatch-Time
//!
//! Monotonic timestamps and unit-aware durations.
//!
//! `Time` is the partial order every other tracewatch crate is built on:
//! extractor history, residual deadlines, and violation witnesses are all
//! keyed or compared by `Time`. There is deliberately no wall-clock or
//! calendar notion here: a `Time` is just "milliseconds since this trace
//! started admitting states".

use serde::{Deserialize, Serialize};
use std::fmt;

/// A non-negative number of milliseconds since trace start.
///
/// Totally ordered. The runtime enforces monotonic non-decrease on state
/// admission; `Time` itself has no such enforcement, it is a plain value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Time(u64);

impl Time {
    /// Construct a `Time` from a millisecond value.
    pub fn from_millis(ms: u64) -> Self {
        Time(ms)
    }

    /// The zero timestamp.
    pub const ZERO: Time = Time(0);

    /// `self` strictly precedes `other`.
    pub fn is_before(&self, other: &Time) -> bool {
        self.0 < other.0
    }

    /// Extract the underlying millisecond value.
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// `self` advanced by `duration`.
    pub fn add(&self, duration: Duration) -> Time {
        Time(self.0 + duration.as_millis())
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// The unit a [`Duration`] was expressed in.
///
/// Only `{milliseconds, seconds}` are recognised, per the contract that
/// bounded modalities accept no other granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
}

/// A magnitude with a unit, used only as an offset from some start `Time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Duration {
    magnitude: u64,
    unit: TimeUnit,
}

impl Duration {
    pub fn new(magnitude: u64, unit: TimeUnit) -> Self {
        Self { magnitude, unit }
    }

    pub fn milliseconds(magnitude: u64) -> Self {
        Self::new(magnitude, TimeUnit::Milliseconds)
    }

    pub fn seconds(magnitude: u64) -> Self {
        Self::new(magnitude, TimeUnit::Seconds)
    }

    /// Canonical millisecond value of this duration.
    pub fn as_millis(&self) -> u64 {
        match self.unit {
            TimeUnit::Milliseconds => self.magnitude,
            TimeUnit::Seconds => self.magnitude * 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ordering_is_strict_less_than() {
        let a = Time::from_millis(100);
        let b = Time::from_millis(200);
        assert!(a.is_before(&b));
        assert!(!b.is_before(&a));
        assert!(!a.is_before(&a));
    }

    #[test]
    fn addition_advances_by_duration() {
        let t = Time::from_millis(1000);
        let d = Duration::seconds(5);
        assert_eq!(t.add(d), Time::from_millis(6000));
    }

    #[test]
    fn seconds_convert_to_milliseconds() {
        assert_eq!(Duration::seconds(2).as_millis(), 2000);
        assert_eq!(Duration::milliseconds(250).as_millis(), 250);
    }

    proptest! {
        #[test]
        fn total_order_is_transitive(a in 0u64..1_000_000, b in 0u64..1_000_000, c in 0u64..1_000_000) {
            let (ta, tb, tc) = (Time::from_millis(a), Time::from_millis(b), Time::from_millis(c));
            if ta.is_before(&tb) && tb.is_before(&tc) {
                prop_assert!(ta.is_before(&tc));
            }
        }

        #[test]
        fn add_is_monotonic(start in 0u64..1_000_000, mag in 0u64..100_000) {
            let t = Time::from_millis(start);
            let advanced = t.add(Duration::milliseconds(mag));
            prop_assert!(!advanced.is_before(&t));
        }
    }
}
