use core::{
    cmp::Ordering,
    fmt::{self, Display},
    ops::{Add, AddAssign, Sub},
};

// TIMESTAMP
// ================================================================================================

/// A point in time on a location's clock, in seconds since an arbitrary epoch.
///
/// Trace timestamps are recorded as doubles; differences between two timestamps are plain `f64`
/// durations. Timestamps of events on a single location are non-decreasing; timestamps across
/// locations are comparable only through explicit communication (clock-condition checks report
/// cross-location anomalies, they are never assumed away).
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timestamp(f64);

impl Timestamp {
    /// The zero timestamp.
    pub const ZERO: Self = Self(0.0);

    /// A timestamp earlier than every valid trace timestamp.
    pub const MIN: Self = Self(f64::NEG_INFINITY);

    /// A timestamp later than every valid trace timestamp.
    pub const MAX: Self = Self(f64::INFINITY);

    /// Returns a new timestamp at the specified number of seconds.
    pub const fn new(secs: f64) -> Self {
        Self(secs)
    }

    /// Returns the raw number of seconds.
    #[inline(always)]
    pub const fn secs(self) -> f64 {
        self.0
    }

    /// Returns the later of two timestamps.
    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    /// Returns the earlier of two timestamps.
    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    /// Total ordering over timestamps (IEEE-754 total order).
    ///
    /// Trace timestamps are finite, so this coincides with the natural order everywhere the
    /// engine uses it; it exists so timestamps can key ordered reductions.
    pub fn cmp_total(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl From<f64> for Timestamp {
    fn from(secs: f64) -> Self {
        Self(secs)
    }
}

impl From<Timestamp> for f64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl Sub for Timestamp {
    type Output = f64;

    /// The duration, in seconds, from `rhs` to `self`.
    fn sub(self, rhs: Self) -> f64 {
        self.0 - rhs.0
    }
}

impl Add<f64> for Timestamp {
    type Output = Self;

    fn add(self, rhs: f64) -> Self {
        Self(self.0 + rhs)
    }
}

impl AddAssign<f64> for Timestamp {
    fn add_assign(&mut self, rhs: f64) {
        self.0 += rhs;
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9}", self.0)
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn differences_are_durations() {
        let a = Timestamp::new(2.5);
        let b = Timestamp::new(4.0);
        assert_eq!(b - a, 1.5);
        assert_eq!(a - b, -1.5);
    }

    #[test]
    fn extrema_bound_all_finite_timestamps() {
        let t = Timestamp::new(1e12);
        assert!(Timestamp::MIN < t);
        assert!(t < Timestamp::MAX);
        assert_eq!(t.max(Timestamp::MIN), t);
        assert_eq!(t.min(Timestamp::MAX), t);
    }

    #[test]
    fn total_order_is_consistent_with_partial_order() {
        let a = Timestamp::new(1.0);
        let b = Timestamp::new(2.0);
        assert_eq!(a.cmp_total(&b), Ordering::Less);
        assert_eq!(b.cmp_total(&a), Ordering::Greater);
        assert_eq!(a.cmp_total(&a), Ordering::Equal);
    }
}
