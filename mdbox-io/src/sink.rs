//! File collaborator contract: hierarchical groups of named, shaped datasets.
//!
//! [`FileSink`] is what the saver writes through and [`FileSource`] what the loader
//! reads through. Both navigate with [`FileGroup::open_group`]; all dataset names are
//! relative to the current group.

use crate::{Error, Result};

/// Element type of a numeric dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    I32,
    U64,
    F64,
}

/// Borrowed, flattened (row-major) dataset values.
#[derive(Debug, Clone, Copy)]
pub enum ArrayRef<'a> {
    I32(&'a [i32]),
    U64(&'a [u64]),
    F64(&'a [f64]),
}

impl ArrayRef<'_> {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::I32(v) => v.len(),
            Self::U64(v) => v.len(),
            Self::F64(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::I32(_) => ElementKind::I32,
            Self::U64(_) => ElementKind::U64,
            Self::F64(_) => ElementKind::F64,
        }
    }

    #[must_use]
    pub fn to_values(&self) -> ArrayValues {
        match *self {
            Self::I32(v) => ArrayValues::I32(v.to_vec()),
            Self::U64(v) => ArrayValues::U64(v.to_vec()),
            Self::F64(v) => ArrayValues::F64(v.to_vec()),
        }
    }
}

/// Owned, flattened (row-major) dataset values.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValues {
    I32(Vec<i32>),
    U64(Vec<u64>),
    F64(Vec<f64>),
}

impl ArrayValues {
    #[must_use]
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::I32(_) => ElementKind::I32,
            Self::U64(_) => ElementKind::U64,
            Self::F64(_) => ElementKind::F64,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::I32(v) => v.len(),
            Self::U64(v) => v.len(),
            Self::F64(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A dataset read back from a file.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayData {
    pub values: ArrayValues,
    pub shape: Vec<usize>,
}

impl ArrayData {
    /// Values as `i32`.
    ///
    /// # Errors
    /// Returns an error if the dataset holds another element type.
    pub fn into_i32(self) -> Result<Vec<i32>> {
        match self.values {
            ArrayValues::I32(v) => Ok(v),
            other => Err(kind_mismatch(ElementKind::I32, other.kind())),
        }
    }

    /// Values as `u64`.
    ///
    /// # Errors
    /// Returns an error if the dataset holds another element type.
    pub fn into_u64(self) -> Result<Vec<u64>> {
        match self.values {
            ArrayValues::U64(v) => Ok(v),
            other => Err(kind_mismatch(ElementKind::U64, other.kind())),
        }
    }

    /// Values as `f64`.
    ///
    /// # Errors
    /// Returns an error if the dataset holds another element type.
    pub fn into_f64(self) -> Result<Vec<f64>> {
        match self.values {
            ArrayValues::F64(v) => Ok(v),
            other => Err(kind_mismatch(ElementKind::F64, other.kind())),
        }
    }
}

fn kind_mismatch(expected: ElementKind, actual: ElementKind) -> Error {
    Error::InvalidFormat(format!("expected {expected:?} dataset, found {actual:?}"))
}

/// Group navigation shared by sinks and sources.
pub trait FileGroup {
    /// Opens a group. Paths starting with `/` are absolute, others are relative to the
    /// current group; `"/"` is the root.
    ///
    /// # Errors
    /// Returns an error if the group does not exist.
    fn open_group(&mut self, path: &str) -> Result<()>;
}

/// Writable side of the file collaborator.
pub trait FileSink: FileGroup {
    /// Creates a child group of the current group and tags it with an `NX_class`.
    ///
    /// # Errors
    /// Returns an error if the group exists or cannot be created.
    fn create_group(&mut self, name: &str, class: &str) -> Result<()>;

    /// Writes a scalar string dataset.
    ///
    /// # Errors
    /// Returns an error if the dataset cannot be written.
    fn write_string(&mut self, name: &str, value: &str) -> Result<()>;

    /// Creates (or overwrites) a dataset with `shape`.
    ///
    /// # Errors
    /// Returns an error if `data` does not match `shape` or the write fails.
    fn write_array(&mut self, name: &str, data: ArrayRef<'_>, shape: &[usize]) -> Result<()>;

    /// Rewrites an existing dataset in place, resizing it to `shape`.
    ///
    /// # Errors
    /// Returns an error if the dataset does not exist, has another element type or rank,
    /// or `data` does not match `shape`.
    fn write_extended(&mut self, name: &str, data: ArrayRef<'_>, shape: &[usize]) -> Result<()>;

    /// Creates an extendable `rows x columns` `f64` region for slab writes.
    ///
    /// # Errors
    /// Returns an error if the region cannot be created.
    fn prepare_region(&mut self, name: &str, rows: usize, columns: usize) -> Result<()>;

    /// Writes whole rows starting at `row`, growing the region if needed.
    ///
    /// # Errors
    /// Returns an error if the region does not exist, has another width, or `data` is
    /// not a whole number of rows.
    fn write_slab(&mut self, name: &str, row: u64, data: &[f64], columns: usize) -> Result<()>;

    /// Shape of a dataset in the current group, or `None` if absent.
    ///
    /// # Errors
    /// Returns an error if the file cannot be queried.
    fn dataset_shape(&mut self, name: &str) -> Result<Option<Vec<usize>>>;

    /// Flushes and closes the file. Further writes fail.
    ///
    /// # Errors
    /// Returns an error if flushing fails.
    fn close(&mut self) -> Result<()>;
}

/// Readable side of the file collaborator.
pub trait FileSource: FileGroup {
    /// Reads a scalar string dataset.
    ///
    /// # Errors
    /// Returns an error if the dataset is missing or not a string.
    fn read_string(&mut self, name: &str) -> Result<String>;

    /// Reads a whole numeric dataset.
    ///
    /// # Errors
    /// Returns an error if the dataset is missing or has another element type.
    fn read_array(&mut self, name: &str, kind: ElementKind) -> Result<ArrayData>;

    /// Reads `rows` rows of a 2-D `f64` region starting at `row`, flattened row-major.
    ///
    /// # Errors
    /// Returns an error if the region is missing or the rows are out of bounds.
    fn read_slab(&mut self, name: &str, row: u64, rows: u64) -> Result<Vec<f64>>;
}

/// Checks that a flattened buffer of `len` elements fills `shape`.
pub(crate) fn check_shape(name: &str, len: usize, shape: &[usize]) -> Result<()> {
    let expected: usize = shape.iter().product();
    if expected == len {
        Ok(())
    } else {
        Err(Error::InvalidFormat(format!(
            "dataset {name}: {len} values do not fill shape {shape:?}"
        )))
    }
}

/// Converts a row offset and count to a `usize` range.
pub(crate) fn row_range(row: u64, rows: u64) -> Result<std::ops::Range<usize>> {
    let start = usize::try_from(row)
        .map_err(|_| Error::InvalidFormat(format!("row {row} exceeds usize range")))?;
    let count = usize::try_from(rows)
        .map_err(|_| Error::InvalidFormat(format!("row count {rows} exceeds usize range")))?;
    let end = start
        .checked_add(count)
        .ok_or_else(|| Error::InvalidFormat("row range overflows".to_string()))?;
    Ok(start..end)
}

/// Number of rows in `len` elements of width `columns`.
pub(crate) fn whole_rows(name: &str, len: usize, columns: usize) -> Result<usize> {
    if columns == 0 || len % columns != 0 {
        return Err(Error::InvalidFormat(format!(
            "dataset {name}: {len} values are not whole rows of {columns}"
        )));
    }
    Ok(len / columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_shape() {
        assert!(check_shape("a", 6, &[3, 2]).is_ok());
        assert!(check_shape("a", 5, &[3, 2]).is_err());
        assert!(check_shape("a", 0, &[0, 2]).is_ok());
    }

    #[test]
    fn test_into_typed_checks_kind() {
        let data = ArrayData {
            values: ArrayValues::I32(vec![1, 2]),
            shape: vec![2],
        };
        assert_eq!(data.clone().into_i32().unwrap(), vec![1, 2]);
        assert!(matches!(data.into_f64(), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_whole_rows() {
        assert_eq!(whole_rows("e", 12, 4).unwrap(), 3);
        assert!(whole_rows("e", 10, 4).is_err());
        assert!(whole_rows("e", 0, 0).is_err());
    }
}
