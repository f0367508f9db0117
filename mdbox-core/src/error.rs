//! Error types for mdbox-core.

use thiserror::Error;

/// Result type alias for mdbox operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for mdbox operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Two splitters were combined with `+`; the destination of each interval is undefined.
    #[error(
        "cannot combine two splitters together, as the output is undefined; \
         split by the second splitter after the first split has been done"
    )]
    AmbiguousCombination,

    /// The OR of two intervals that do not overlap.
    #[error("cannot apply the OR (|) operator to non-overlapping splitting intervals")]
    NonOverlappingUnion,

    /// Dimension count does not match what the event type expects.
    #[error("invalid dimensions: expected {expected}, got {actual}")]
    InvalidDimensions { expected: usize, actual: usize },

    /// Extents with `min > max` or non-finite bounds.
    #[error("invalid extents in dimension {dim}: [{min}, {max}]")]
    InvalidExtents { dim: usize, min: f64, max: f64 },

    /// Operation on a box that does not support it (missing handle, not a leaf, ...).
    #[error("invalid box: {0}")]
    InvalidBox(String),

    /// A stored event row could not be decoded.
    #[error("cannot decode event row: {0}")]
    EventDecode(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
