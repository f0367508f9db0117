//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// HDF5 library error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// Descriptor (de)serialization error.
    #[error("descriptor error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Operation not allowed in the current state (e.g. update of a tree with no file).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A grid box whose children's ids are not contiguous and ascending.
    #[error("non-sequential child id under box {parent}: expected {expected}, found {found}")]
    NonSequentialChildId {
        parent: usize,
        expected: usize,
        found: usize,
    },

    /// A box id outside the range the controller handed out.
    #[error("unexpected box id {id}, which is >= max boxes ({max_boxes})")]
    BoxIdOutOfRange { id: usize, max_boxes: usize },

    /// Two boxes in the same tree carry the same id.
    #[error("box id {id} is used by more than one box")]
    DuplicateBoxId { id: usize },

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] mdbox_core::Error),
}

impl Error {
    /// True for errors that mean the in-memory tree itself is corrupt.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::NonSequentialChildId { .. }
                | Self::BoxIdOutOfRange { .. }
                | Self::DuplicateBoxId { .. }
        )
    }
}
