//! Dimensions and per-box extents.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Min/max range of a box in one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Extent {
    pub min: f64,
    pub max: f64,
}

impl Extent {
    #[inline]
    #[must_use]
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> f64 {
        self.max - self.min
    }

    /// Half-open containment: `min <= value < max`.
    #[inline]
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value < self.max
    }
}

/// An axis of the multi-dimensional space.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Dimension {
    /// Stable identifier, e.g. `"Q_lab_x"`.
    pub id: String,
    /// Display name.
    pub name: String,
    pub units: String,
    pub min: f64,
    pub max: f64,
    /// Bin count used when the space is histogrammed.
    pub n_bins: usize,
}

impl Dimension {
    /// Creates a dimension whose id and name are the same.
    ///
    /// # Errors
    /// Returns an error if `min >= max` or a bound is not finite.
    pub fn new(name: &str, units: &str, min: f64, max: f64, n_bins: usize) -> Result<Self> {
        if !(min.is_finite() && max.is_finite() && min < max) {
            return Err(Error::InvalidExtents { dim: 0, min, max });
        }
        Ok(Self {
            id: name.to_string(),
            name: name.to_string(),
            units: units.to_string(),
            min,
            max,
            n_bins,
        })
    }

    #[must_use]
    pub fn extent(&self) -> Extent {
        Extent::new(self.min, self.max)
    }
}

/// Inverse of the volume spanned by `extents`.
///
/// Zero-sized boxes report `0.0` instead of infinity.
#[must_use]
pub fn inverse_volume(extents: &[Extent]) -> f64 {
    let volume: f64 = extents.iter().map(Extent::size).product();
    if volume > 0.0 {
        1.0 / volume
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_dimension_validation() {
        assert!(Dimension::new("x", "A", 0.0, 1.0, 10).is_ok());
        assert!(Dimension::new("x", "A", 1.0, 1.0, 10).is_err());
        assert!(Dimension::new("x", "A", f64::NAN, 1.0, 10).is_err());
    }

    #[test]
    fn test_inverse_volume() {
        let extents = [Extent::new(0.0, 2.0), Extent::new(-1.0, 1.0)];
        assert_relative_eq!(inverse_volume(&extents), 0.25);
        assert_relative_eq!(inverse_volume(&[Extent::new(1.0, 1.0)]), 0.0);
    }

    #[test]
    fn test_extent_is_half_open() {
        let extent = Extent::new(0.0, 1.0);
        assert!(extent.contains(0.0));
        assert!(!extent.contains(1.0));
    }
}
