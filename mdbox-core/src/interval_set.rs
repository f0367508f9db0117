//! Sets of splitting intervals and their algebra.
//!
//! A set is a *filter* when every member's index is `<= 0` and a *splitter* otherwise.
//! The role is computed from the content on demand; both roles share [`IntervalSet`].
//!
//! All operators are pure: they borrow their inputs and return a new set.

use crate::interval::SplittingInterval;
use crate::time::DateAndTime;
use crate::{Error, Result};
use std::ops::{BitAnd, BitOr, Not};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An ordered sequence of splitting intervals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct IntervalSet {
    intervals: Vec<SplittingInterval>,
}

impl IntervalSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn push(&mut self, interval: SplittingInterval) {
        self.intervals.push(interval);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SplittingInterval> {
        self.intervals.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[SplittingInterval] {
        &self.intervals
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<SplittingInterval> {
        self.intervals
    }

    /// True when the largest index is `<= 0`. The empty set is a filter.
    #[must_use]
    pub fn is_filter(&self) -> bool {
        self.intervals.iter().all(|interval| interval.index() <= 0)
    }

    /// Combines a filter with a splitter, or two filters.
    ///
    /// Two filters are ANDed. With one splitter, the splitter is placed on the left of the
    /// AND so it supplies the output indices.
    ///
    /// # Errors
    /// Returns [`Error::AmbiguousCombination`] if both sets are splitters.
    pub fn combine(&self, other: &Self) -> Result<Self> {
        match (self.is_filter(), other.is_filter()) {
            (true, true) | (false, true) => Ok(self.and(other)),
            (true, false) => Ok(other.and(self)),
            (false, false) => Err(Error::AmbiguousCombination),
        }
    }

    /// Keeps the times where both sets are true.
    ///
    /// Every pair of overlapping intervals contributes its intersection, carrying the
    /// index of the interval from `self`. The result is neither sorted nor de-duplicated.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        if self.is_empty() || other.is_empty() {
            return Self::new();
        }

        let mut out = Vec::new();
        for a in &self.intervals {
            for b in &other.intervals {
                if a.overlaps(b) {
                    out.push(a.intersect(b));
                }
            }
        }
        Self::from(out)
    }

    /// Keeps the times where either filter is true.
    ///
    /// Empty intervals (`stop <= start`) are dropped, the rest sorted by start and merged.
    /// Only meaningful for filters: indices are reset to `0`.
    #[must_use]
    pub fn or(&self, other: &Self) -> Self {
        let mut merged: Vec<SplittingInterval> = self
            .intervals
            .iter()
            .chain(&other.intervals)
            .filter(|interval| !interval.is_empty())
            .copied()
            .collect();
        merged.sort_by(SplittingInterval::cmp_start);
        remove_overlap(&merged)
    }

    /// Complement of a filter over the whole representable time range.
    ///
    /// The complement of the empty filter is a single interval from
    /// [`DateAndTime::MINIMUM`] to [`DateAndTime::MAXIMUM`].
    #[must_use]
    pub fn complement(&self) -> Self {
        let mut sorted = self.intervals.clone();
        sorted.sort_by(SplittingInterval::cmp_start);
        let merged = remove_overlap(&sorted);

        let Some(first) = merged.intervals.first() else {
            return Self::from(vec![SplittingInterval::new(
                DateAndTime::MINIMUM,
                DateAndTime::MAXIMUM,
                0,
            )]);
        };

        let mut out = Vec::with_capacity(merged.len() + 1);
        out.push(SplittingInterval::new(DateAndTime::MINIMUM, first.start(), 0));
        for (i, interval) in merged.intervals.iter().enumerate() {
            let stop = merged
                .intervals
                .get(i + 1)
                .map_or(DateAndTime::MAXIMUM, SplittingInterval::start);
            out.push(SplittingInterval::new(interval.stop(), stop, 0));
        }
        Self::from(out)
    }

    /// Sum of the member durations in seconds. Overlaps are counted twice.
    #[must_use]
    pub fn total_duration(&self) -> f64 {
        self.intervals.iter().map(SplittingInterval::duration).sum()
    }

    /// Index of the first interval containing `time`, if any.
    #[must_use]
    pub fn destination(&self, time: DateAndTime) -> Option<i32> {
        self.intervals
            .iter()
            .find(|interval| interval.contains(time))
            .map(SplittingInterval::index)
    }
}

/// Merges overlapping or touching runs of a filter sorted by start time.
///
/// Every emitted interval has index `0`. Unsorted input produces unspecified (but
/// memory-safe) output; sort with [`SplittingInterval::cmp_start`] first.
#[must_use]
pub fn remove_overlap(sorted: &[SplittingInterval]) -> IntervalSet {
    let mut out = Vec::with_capacity(sorted.len());
    let mut iter = sorted.iter().peekable();

    while let Some(first) = iter.next() {
        let start = first.start();
        let mut stop = first.stop();
        while let Some(next) = iter.next_if(|next| next.start() <= stop) {
            stop = stop.max(next.stop());
        }
        out.push(SplittingInterval::new(start, stop, 0));
    }

    IntervalSet::from(out)
}

impl From<Vec<SplittingInterval>> for IntervalSet {
    fn from(intervals: Vec<SplittingInterval>) -> Self {
        Self { intervals }
    }
}

impl FromIterator<SplittingInterval> for IntervalSet {
    fn from_iter<I: IntoIterator<Item = SplittingInterval>>(iter: I) -> Self {
        Self {
            intervals: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for IntervalSet {
    type Item = SplittingInterval;
    type IntoIter = std::vec::IntoIter<SplittingInterval>;

    fn into_iter(self) -> Self::IntoIter {
        self.intervals.into_iter()
    }
}

impl<'a> IntoIterator for &'a IntervalSet {
    type Item = &'a SplittingInterval;
    type IntoIter = std::slice::Iter<'a, SplittingInterval>;

    fn into_iter(self) -> Self::IntoIter {
        self.intervals.iter()
    }
}

impl BitAnd for &IntervalSet {
    type Output = IntervalSet;

    fn bitand(self, rhs: Self) -> IntervalSet {
        self.and(rhs)
    }
}

impl BitOr for &IntervalSet {
    type Output = IntervalSet;

    fn bitor(self, rhs: Self) -> IntervalSet {
        self.or(rhs)
    }
}

impl Not for &IntervalSet {
    type Output = IntervalSet;

    fn not(self) -> IntervalSet {
        self.complement()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn set(intervals: &[(i64, i64, i32)]) -> IntervalSet {
        intervals
            .iter()
            .map(|&(start, stop, index)| SplittingInterval::from_nanoseconds(start, stop, index))
            .collect()
    }

    #[test]
    fn test_is_filter() {
        assert!(IntervalSet::new().is_filter());
        assert!(set(&[(0, 1, 0), (1, 2, -1)]).is_filter());
        assert!(!set(&[(0, 1, 0), (1, 2, 1)]).is_filter());
    }

    #[test]
    fn test_and_left_index_wins() {
        let splitter = set(&[(0, 10, 5)]);
        let filter = set(&[(2, 4, 0)]);
        assert_eq!(&splitter & &filter, set(&[(2, 4, 5)]));
        assert_eq!(&filter & &splitter, set(&[(2, 4, 0)]));
    }

    #[test]
    fn test_and_with_empty_is_empty() {
        let a = set(&[(0, 10, 0)]);
        assert!((&a & &IntervalSet::new()).is_empty());
        assert!((&IntervalSet::new() & &a).is_empty());
    }

    #[test]
    fn test_and_is_pairwise() {
        let a = set(&[(0, 10, 1), (20, 30, 2)]);
        let b = set(&[(5, 25, 0)]);
        assert_eq!(&a & &b, set(&[(5, 10, 1), (20, 25, 2)]));
    }

    #[test]
    fn test_or_and_of_two_filters() {
        let a = set(&[(0, 10, 0)]);
        let b = set(&[(5, 15, 0)]);
        assert_eq!(&a | &b, set(&[(0, 15, 0)]));
        assert_eq!(&a & &b, set(&[(5, 10, 0)]));
    }

    #[test]
    fn test_or_drops_empty_and_sorts() {
        let a = set(&[(30, 40, 0), (7, 7, 0)]);
        let b = set(&[(0, 10, 0), (12, 5, 0)]);
        assert_eq!(&a | &b, set(&[(0, 10, 0), (30, 40, 0)]));
    }

    #[test]
    fn test_remove_overlap_merges_touching() {
        let sorted = set(&[(0, 10, 0), (10, 20, 0), (15, 18, 0), (25, 30, 0)]);
        assert_eq!(
            remove_overlap(sorted.as_slice()),
            set(&[(0, 20, 0), (25, 30, 0)])
        );
    }

    #[test]
    fn test_not_of_empty_is_everything() {
        let everything = !&IntervalSet::new();
        assert_eq!(everything.len(), 1);
        assert_eq!(everything.as_slice()[0].start(), DateAndTime::MINIMUM);
        assert_eq!(everything.as_slice()[0].stop(), DateAndTime::MAXIMUM);
    }

    #[test]
    fn test_not_emits_gaps() {
        let filter = set(&[(20, 30, 0), (0, 10, 0)]);
        let gaps = !&filter;
        let expected: IntervalSet = vec![
            SplittingInterval::new(DateAndTime::MINIMUM, DateAndTime::from_nanoseconds(0), 0),
            SplittingInterval::from_nanoseconds(10, 20, 0),
            SplittingInterval::new(DateAndTime::from_nanoseconds(30), DateAndTime::MAXIMUM, 0),
        ]
        .into();
        assert_eq!(gaps, expected);
    }

    #[test]
    fn test_combine_resolves_order() {
        let splitter = set(&[(0, 10, 5)]);
        let filter = set(&[(2, 4, 0)]);
        assert_eq!(splitter.combine(&filter).unwrap(), set(&[(2, 4, 5)]));
        assert_eq!(filter.combine(&splitter).unwrap(), set(&[(2, 4, 5)]));
    }

    #[test]
    fn test_combine_two_filters_is_and() {
        let a = set(&[(0, 10, 0)]);
        let b = set(&[(5, 15, 0)]);
        assert_eq!(a.combine(&b).unwrap(), a.and(&b));
    }

    #[test]
    fn test_combine_two_splitters_fails() {
        let a = set(&[(0, 10, 1)]);
        let b = set(&[(5, 15, 2)]);
        assert_eq!(a.combine(&b).unwrap_err(), Error::AmbiguousCombination);
    }

    #[test]
    fn test_destination_and_duration() {
        let splitter = set(&[(0, 1_000_000_000, 1), (1_000_000_000, 3_000_000_000, 2)]);
        assert_eq!(splitter.destination(DateAndTime::from_nanoseconds(0)), Some(1));
        assert_eq!(
            splitter.destination(DateAndTime::from_nanoseconds(1_000_000_000)),
            Some(2)
        );
        assert_eq!(
            splitter.destination(DateAndTime::from_nanoseconds(3_000_000_000)),
            None
        );
        assert_relative_eq!(splitter.total_duration(), 3.0);
    }
}
