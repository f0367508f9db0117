//! Box controller: splitting policy and box id allocation for one tree.

use crate::{Error, Result};
use std::ops::Range;
use std::path::{Path, PathBuf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The file a tree's events live in once it has been saved or loaded file-backed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    #[must_use]
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Splitting policy and id allocator shared by all boxes of a tree.
///
/// Ids are dense: every id in `0..max_id()` has been handed out exactly once. The
/// children of a split box receive one contiguous block.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoxController {
    /// Number of children along each dimension when a box is split.
    pub split_into: Vec<usize>,
    /// A leaf holding more events than this is split.
    pub split_threshold: usize,
    /// Leaves at this depth are never split.
    pub max_depth: usize,
    next_id: usize,
    #[cfg_attr(feature = "serde", serde(skip))]
    file_backend: Option<FileBackend>,
}

impl BoxController {
    /// Creates a controller splitting every dimension in two.
    #[must_use]
    pub fn new(nd: usize) -> Self {
        Self {
            split_into: vec![2; nd],
            split_threshold: 1000,
            max_depth: 5,
            next_id: 0,
            file_backend: None,
        }
    }

    /// Set the same split factor for every dimension.
    ///
    /// Values less than 2 are clamped to 2. Use [`Self::try_with_split_into`] to surface
    /// invalid values as an error instead.
    #[must_use]
    pub fn with_split_into(mut self, factor: usize) -> Self {
        let factor = factor.max(2);
        self.split_into.iter_mut().for_each(|f| *f = factor);
        self
    }

    /// Set the event count above which a leaf is split.
    #[must_use]
    pub fn with_split_threshold(mut self, threshold: usize) -> Self {
        self.split_threshold = threshold;
        self
    }

    /// Set the maximum recursion depth.
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Fallible variant of [`Self::with_split_into`] taking one factor per dimension.
    ///
    /// # Errors
    /// Returns an error if the dimension count changes or any factor is below 2.
    pub fn try_with_split_into(mut self, factors: &[usize]) -> Result<Self> {
        if factors.len() != self.split_into.len() {
            return Err(Error::InvalidDimensions {
                expected: self.split_into.len(),
                actual: factors.len(),
            });
        }
        check_split_factors(factors)?;
        self.split_into = factors.to_vec();
        Ok(self)
    }

    /// Checks the public fields, which bypass the builder when set directly or
    /// deserialized.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if any split factor is below 2.
    pub fn validate(&self) -> Result<()> {
        check_split_factors(&self.split_into)
    }

    #[must_use]
    pub fn nd(&self) -> usize {
        self.split_into.len()
    }

    /// Number of children produced by one split.
    #[must_use]
    pub fn num_split(&self) -> usize {
        self.split_into.iter().product()
    }

    /// One past the largest id handed out so far.
    #[must_use]
    pub fn max_id(&self) -> usize {
        self.next_id
    }

    /// Overrides the id counter, e.g. after loading a tree from a file.
    pub fn set_max_id(&mut self, max_id: usize) {
        self.next_id = max_id;
    }

    /// Hands out one new id.
    pub fn next_id(&mut self) -> usize {
        self.allocate_ids(1).start
    }

    /// Hands out `count` consecutive ids.
    pub fn allocate_ids(&mut self, count: usize) -> Range<usize> {
        let start = self.next_id;
        self.next_id += count;
        start..self.next_id
    }

    #[must_use]
    pub fn file_backend(&self) -> Option<&FileBackend> {
        self.file_backend.as_ref()
    }

    #[must_use]
    pub fn is_file_backed(&self) -> bool {
        self.file_backend.is_some()
    }

    pub fn set_file_backend(&mut self, backend: Option<FileBackend>) {
        self.file_backend = backend;
    }
}

fn check_split_factors(factors: &[usize]) -> Result<()> {
    match factors.iter().find(|&&f| f < 2) {
        Some(&bad) => Err(Error::Config(format!(
            "split_into must be at least 2, got {bad}"
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_is_dense_and_contiguous() {
        let mut bc = BoxController::new(3);
        assert_eq!(bc.next_id(), 0);
        assert_eq!(bc.allocate_ids(8), 1..9);
        assert_eq!(bc.max_id(), 9);
    }

    #[test]
    fn test_split_into() {
        let bc = BoxController::new(2).with_split_into(1);
        assert_eq!(bc.split_into, vec![2, 2]);
        assert_eq!(bc.num_split(), 4);

        let bc = BoxController::new(2).try_with_split_into(&[3, 5]).unwrap();
        assert_eq!(bc.num_split(), 15);

        assert!(BoxController::new(2).try_with_split_into(&[3]).is_err());
        assert!(BoxController::new(2).try_with_split_into(&[3, 1]).is_err());
    }

    #[test]
    fn test_validate_rejects_direct_factor_below_two() {
        let mut bc = BoxController::new(2);
        assert!(bc.validate().is_ok());
        bc.split_into = vec![2, 0];
        assert!(matches!(bc.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_file_backend() {
        let mut bc = BoxController::new(1);
        assert!(!bc.is_file_backed());
        bc.set_file_backend(Some(FileBackend::new("/tmp/tree.nxs")));
        assert_eq!(bc.file_backend().unwrap().path(), Path::new("/tmp/tree.nxs"));
    }
}
