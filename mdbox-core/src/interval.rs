//! Splitting intervals: a time range routed to an output index.

use crate::time::DateAndTime;
use crate::{Error, Result};
use std::cmp::Ordering;
use std::ops::BitAnd;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Index carried by an interval with no destination.
pub const UNSET_INDEX: i32 = -1;

/// A time range `[start, stop)` and the output index it is routed to.
///
/// Index `0` (or [`UNSET_INDEX`]) means "keep" in a filter; indices above `0` name
/// numbered destinations in a splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SplittingInterval {
    start: DateAndTime,
    stop: DateAndTime,
    index: i32,
}

impl Default for SplittingInterval {
    fn default() -> Self {
        Self {
            start: DateAndTime::default(),
            stop: DateAndTime::default(),
            index: UNSET_INDEX,
        }
    }
}

impl SplittingInterval {
    /// Creates a new interval.
    #[inline]
    #[must_use]
    pub fn new(start: DateAndTime, stop: DateAndTime, index: i32) -> Self {
        Self { start, stop, index }
    }

    /// Convenience constructor from raw nanoseconds.
    #[inline]
    #[must_use]
    pub fn from_nanoseconds(start: i64, stop: i64, index: i32) -> Self {
        Self::new(start.into(), stop.into(), index)
    }

    #[inline]
    #[must_use]
    pub fn start(&self) -> DateAndTime {
        self.start
    }

    #[inline]
    #[must_use]
    pub fn stop(&self) -> DateAndTime {
        self.stop
    }

    /// Destination of this time block.
    #[inline]
    #[must_use]
    pub fn index(&self) -> i32 {
        self.index
    }

    /// Duration in seconds.
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.stop - self.start
    }

    /// True when `stop <= start`.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stop <= self.start
    }

    /// Half-open containment: `start <= time < stop`.
    #[inline]
    #[must_use]
    pub fn contains(&self, time: DateAndTime) -> bool {
        self.start <= time && time < self.stop
    }

    /// Returns true if `other` overlaps this interval.
    ///
    /// Intervals that only touch (one's stop equals the other's start) count as
    /// overlapping.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        (other.start < self.stop && other.start >= self.start)
            || (other.stop < self.stop && other.stop >= self.start)
            || (self.start < other.stop && self.start >= other.start)
            || (self.stop < other.stop && self.stop >= other.start)
    }

    /// Smallest range where both intervals are true. Keeps the index of `self`.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        Self {
            start: self.start.max(other.start),
            stop: self.stop.min(other.stop),
            index: self.index,
        }
    }

    /// Largest range covered by two overlapping intervals. Keeps the index of `self`.
    ///
    /// # Errors
    /// Returns [`Error::NonOverlappingUnion`] if the intervals do not overlap.
    pub fn union(&self, other: &Self) -> Result<Self> {
        if !self.overlaps(other) {
            return Err(Error::NonOverlappingUnion);
        }
        Ok(Self {
            start: self.start.min(other.start),
            stop: self.stop.max(other.stop),
            index: self.index,
        })
    }

    /// Orders intervals by start time only.
    #[inline]
    #[must_use]
    pub fn cmp_start(&self, other: &Self) -> Ordering {
        self.start.cmp(&other.start)
    }
}

impl BitAnd for SplittingInterval {
    type Output = SplittingInterval;

    fn bitand(self, rhs: Self) -> Self::Output {
        self.intersect(&rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn iv(start: i64, stop: i64, index: i32) -> SplittingInterval {
        SplittingInterval::from_nanoseconds(start, stop, index)
    }

    #[test]
    fn test_default_is_unset() {
        let interval = SplittingInterval::default();
        assert_eq!(interval.index(), UNSET_INDEX);
        assert!(interval.is_empty());
    }

    #[test]
    fn test_overlaps_partial_and_contained() {
        assert!(iv(0, 10, 0).overlaps(&iv(5, 15, 0)));
        assert!(iv(5, 15, 0).overlaps(&iv(0, 10, 0)));
        assert!(iv(0, 10, 0).overlaps(&iv(2, 4, 0)));
        assert!(iv(2, 4, 0).overlaps(&iv(0, 10, 0)));
    }

    #[test]
    fn test_overlaps_touching_boundaries() {
        // a.stop == b.start satisfies `a.stop < b.stop && a.stop >= b.start`
        assert!(iv(0, 10, 0).overlaps(&iv(10, 20, 0)));
        assert!(iv(10, 20, 0).overlaps(&iv(0, 10, 0)));
    }

    #[test]
    fn test_disjoint_does_not_overlap() {
        assert!(!iv(0, 10, 0).overlaps(&iv(11, 20, 0)));
        assert!(!iv(11, 20, 0).overlaps(&iv(0, 10, 0)));
    }

    #[test]
    fn test_intersect_keeps_left_index() {
        assert_eq!(iv(0, 10, 5) & iv(2, 4, 0), iv(2, 4, 5));
        assert_eq!(iv(2, 4, 0) & iv(0, 10, 5), iv(2, 4, 0));
    }

    #[test]
    fn test_union() {
        assert_eq!(iv(0, 10, 3).union(&iv(5, 15, 0)).unwrap(), iv(0, 15, 3));
        assert_eq!(iv(5, 15, 0).union(&iv(0, 10, 3)).unwrap(), iv(0, 15, 0));
    }

    #[test]
    fn test_union_non_overlapping_fails() {
        let err = iv(0, 10, 0).union(&iv(20, 30, 0)).unwrap_err();
        assert_eq!(err, Error::NonOverlappingUnion);
    }

    #[test]
    fn test_duration_and_contains() {
        let interval = iv(1_000_000_000, 3_500_000_000, 1);
        assert_relative_eq!(interval.duration(), 2.5);
        assert!(interval.contains(DateAndTime::from_nanoseconds(1_000_000_000)));
        assert!(!interval.contains(DateAndTime::from_nanoseconds(3_500_000_000)));
    }
}
