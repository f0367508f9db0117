//! Absolute timestamps with nanosecond resolution.

use std::fmt;
use std::ops::Sub;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const NANOS_PER_SECOND: f64 = 1.0e9;

/// Absolute time in nanoseconds relative to the facility epoch.
///
/// [`DateAndTime::MINIMUM`] and [`DateAndTime::MAXIMUM`] stand for negative and positive
/// infinity; they are one nanosecond inside the `i64` range so that arithmetic on them
/// does not wrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(from = "i64", into = "i64")
)]
pub struct DateAndTime(i64);

impl DateAndTime {
    /// Smallest representable time.
    pub const MINIMUM: Self = Self(i64::MIN + 1);
    /// Largest representable time.
    pub const MAXIMUM: Self = Self(i64::MAX - 1);

    /// Creates a timestamp from total nanoseconds, clamped to the representable range.
    #[inline]
    #[must_use]
    pub fn from_nanoseconds(ns: i64) -> Self {
        Self(ns.clamp(Self::MINIMUM.0, Self::MAXIMUM.0))
    }

    /// Creates a timestamp from seconds.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_seconds(seconds: f64) -> Self {
        // `as` saturates on overflow and maps NaN to 0.
        Self::from_nanoseconds((seconds * NANOS_PER_SECOND).round() as i64)
    }

    /// Returns the raw nanosecond count.
    #[inline]
    #[must_use]
    pub fn total_nanoseconds(self) -> i64 {
        self.0
    }

    /// Seconds elapsed from `earlier` to `self`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn seconds_since(self, earlier: Self) -> f64 {
        (i128::from(self.0) - i128::from(earlier.0)) as f64 / NANOS_PER_SECOND
    }
}

impl Sub for DateAndTime {
    type Output = f64;

    /// Difference in seconds.
    fn sub(self, rhs: Self) -> f64 {
        self.seconds_since(rhs)
    }
}

impl From<i64> for DateAndTime {
    fn from(ns: i64) -> Self {
        Self::from_nanoseconds(ns)
    }
}

impl From<DateAndTime> for i64 {
    fn from(time: DateAndTime) -> Self {
        time.0
    }
}

impl fmt::Display for DateAndTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::MINIMUM => f.write_str("-inf"),
            Self::MAXIMUM => f.write_str("+inf"),
            Self(ns) => write!(f, "{ns}ns"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_extremes_are_ordered() {
        assert!(DateAndTime::MINIMUM < DateAndTime::from_nanoseconds(0));
        assert!(DateAndTime::from_nanoseconds(0) < DateAndTime::MAXIMUM);
        assert_eq!(DateAndTime::from_nanoseconds(i64::MIN), DateAndTime::MINIMUM);
        assert_eq!(DateAndTime::from_nanoseconds(i64::MAX), DateAndTime::MAXIMUM);
    }

    #[test]
    fn test_seconds_conversion() {
        let t = DateAndTime::from_seconds(1.5);
        assert_eq!(t.total_nanoseconds(), 1_500_000_000);
        assert_relative_eq!(t - DateAndTime::from_nanoseconds(500_000_000), 1.0);
    }

    #[test]
    fn test_span_of_extremes_does_not_overflow() {
        let span = DateAndTime::MAXIMUM - DateAndTime::MINIMUM;
        assert!(span > 0.0);
        assert!(span.is_finite());
    }

    #[test]
    fn test_display() {
        assert_eq!(DateAndTime::MINIMUM.to_string(), "-inf");
        assert_eq!(DateAndTime::from_nanoseconds(42).to_string(), "42ns");
    }
}
