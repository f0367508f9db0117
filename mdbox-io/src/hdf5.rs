//! HDF5/NeXus backend for the file collaborator.
//!
//! Numeric datasets are created chunked with unlimited extents so they can be resized in
//! place by the update path. Strings are scalar variable-length unicode datasets and
//! every group carries an `NX_class` attribute.

use crate::sink::{
    check_shape, row_range, whole_rows, ArrayData, ArrayRef, ArrayValues, ElementKind, FileGroup,
    FileSink, FileSource,
};
use crate::{Error, Result};
use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{Dataset, File, Group, SimpleExtents};
use ndarray::{s, ArrayView2};
use std::path::Path;
use std::str::FromStr;

const MAX_CHUNK_ROWS: usize = 16_384;

/// An HDF5 file opened for writing, reading, or both.
pub struct Hdf5File {
    file: Option<File>,
    current: Option<Group>,
}

impl Hdf5File {
    /// Creates (or truncates) a file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_file(File::create(path)?)
    }

    /// Opens an existing file read-only.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_file(File::open(path)?)
    }

    /// Opens an existing file for reading and writing.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub fn open_rw<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_file(File::open_rw(path)?)
    }

    fn from_file(file: File) -> Result<Self> {
        let root = file.group("/")?;
        Ok(Self {
            file: Some(file),
            current: Some(root),
        })
    }

    fn group(&self) -> Result<&Group> {
        self.current
            .as_ref()
            .ok_or_else(|| Error::InvalidState("file is closed".to_string()))
    }

    fn dataset(&self, name: &str) -> Result<Dataset> {
        let group = self.group()?;
        if !group.link_exists(name) {
            return Err(Error::InvalidFormat(format!("no such dataset: {name}")));
        }
        Ok(group.dataset(name)?)
    }

    fn remove_existing(&self, name: &str) -> Result<()> {
        let group = self.group()?;
        if group.link_exists(name) {
            group.unlink(name)?;
        }
        Ok(())
    }
}

impl FileGroup for Hdf5File {
    fn open_group(&mut self, path: &str) -> Result<()> {
        let next = if path.starts_with('/') {
            let file = self
                .file
                .as_ref()
                .ok_or_else(|| Error::InvalidState("file is closed".to_string()))?;
            file.group(path)?
        } else {
            self.group()?.group(path)?
        };
        self.current = Some(next);
        Ok(())
    }
}

impl FileSink for Hdf5File {
    fn create_group(&mut self, name: &str, class: &str) -> Result<()> {
        let group = self.group()?.create_group(name)?;
        set_attr_str_group(&group, "NX_class", class)
    }

    fn write_string(&mut self, name: &str, value: &str) -> Result<()> {
        self.remove_existing(name)?;
        let value = to_var_len_unicode(value)?;
        self.group()?
            .new_dataset::<VarLenUnicode>()
            .shape(())
            .create(name)?
            .write_scalar(&value)?;
        Ok(())
    }

    fn write_array(&mut self, name: &str, data: ArrayRef<'_>, shape: &[usize]) -> Result<()> {
        check_shape(name, data.len(), shape)?;
        self.remove_existing(name)?;
        let group = self.group()?;
        match data {
            ArrayRef::I32(values) => create_resizable(group, name, values, shape),
            ArrayRef::U64(values) => create_resizable(group, name, values, shape),
            ArrayRef::F64(values) => create_resizable(group, name, values, shape),
        }
    }

    fn write_extended(&mut self, name: &str, data: ArrayRef<'_>, shape: &[usize]) -> Result<()> {
        check_shape(name, data.len(), shape)?;
        let dataset = self.dataset(name)?;
        if dataset.ndim() != shape.len() {
            return Err(Error::InvalidFormat(format!(
                "cannot extend {name}: rank {} does not match {shape:?}",
                dataset.ndim()
            )));
        }
        match data {
            ArrayRef::I32(values) => overwrite_resized(&dataset, name, values, shape),
            ArrayRef::U64(values) => overwrite_resized(&dataset, name, values, shape),
            ArrayRef::F64(values) => overwrite_resized(&dataset, name, values, shape),
        }
    }

    fn prepare_region(&mut self, name: &str, rows: usize, columns: usize) -> Result<()> {
        self.remove_existing(name)?;
        let chunk = vec![rows.clamp(1, MAX_CHUNK_ROWS), columns.max(1)];
        self.group()?
            .new_dataset::<f64>()
            .shape(SimpleExtents::resizable(vec![rows, columns]))
            .chunk(chunk)
            .create(name)?;
        Ok(())
    }

    fn write_slab(&mut self, name: &str, row: u64, data: &[f64], columns: usize) -> Result<()> {
        let n_rows = whole_rows(name, data.len(), columns)?;
        let rows = row_range(row, n_rows as u64)?;
        let dataset = self.dataset(name)?;
        let shape = dataset.shape();
        if shape.len() != 2 || shape[1] != columns {
            return Err(Error::InvalidFormat(format!(
                "region {name} has shape {shape:?}, slab has {columns} columns"
            )));
        }
        if rows.is_empty() {
            return Ok(());
        }
        if rows.end > shape[0] {
            dataset.resize((rows.end, columns))?;
        }
        let view = ArrayView2::from_shape((n_rows, columns), data)
            .map_err(|e| Error::InvalidFormat(format!("slab shape mismatch: {e}")))?;
        dataset.write_slice(view, s![rows.start..rows.end, ..])?;
        Ok(())
    }

    fn dataset_shape(&mut self, name: &str) -> Result<Option<Vec<usize>>> {
        let group = self.group()?;
        if group.link_exists(name) {
            Ok(Some(group.dataset(name)?.shape()))
        } else {
            Ok(None)
        }
    }

    fn close(&mut self) -> Result<()> {
        self.current = None;
        if let Some(file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

impl FileSource for Hdf5File {
    fn read_string(&mut self, name: &str) -> Result<String> {
        let value: VarLenUnicode = self.dataset(name)?.read_scalar()?;
        Ok(value.to_string())
    }

    fn read_array(&mut self, name: &str, kind: ElementKind) -> Result<ArrayData> {
        let dataset = self.dataset(name)?;
        let shape = dataset.shape();
        let values = match kind {
            ElementKind::I32 => ArrayValues::I32(read_typed(&dataset, name)?),
            ElementKind::U64 => ArrayValues::U64(read_typed(&dataset, name)?),
            ElementKind::F64 => ArrayValues::F64(read_typed(&dataset, name)?),
        };
        Ok(ArrayData { values, shape })
    }

    fn read_slab(&mut self, name: &str, row: u64, rows: u64) -> Result<Vec<f64>> {
        let range = row_range(row, rows)?;
        let dataset = self.dataset(name)?;
        let shape = dataset.shape();
        if shape.len() != 2 || range.end > shape[0] {
            return Err(Error::InvalidFormat(format!(
                "rows {range:?} out of bounds for region {name} with shape {shape:?}"
            )));
        }
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let slab = dataset.read_slice_2d::<f64, _>(s![range.start..range.end, ..])?;
        Ok(slab.iter().copied().collect())
    }
}

fn create_resizable<T: H5Type>(group: &Group, name: &str, data: &[T], shape: &[usize]) -> Result<()> {
    let chunk: Vec<usize> = shape
        .iter()
        .enumerate()
        .map(|(axis, &len)| {
            if axis == 0 {
                len.clamp(1, MAX_CHUNK_ROWS)
            } else {
                len.max(1)
            }
        })
        .collect();
    let dataset = group
        .new_dataset::<T>()
        .shape(SimpleExtents::resizable(shape.to_vec()))
        .chunk(chunk)
        .create(name)?;
    if !data.is_empty() {
        dataset.write_raw(data)?;
    }
    Ok(())
}

fn overwrite_resized<T: H5Type>(
    dataset: &Dataset,
    name: &str,
    data: &[T],
    shape: &[usize],
) -> Result<()> {
    check_element_type::<T>(dataset, name)?;
    dataset.resize(shape.to_vec())?;
    if !data.is_empty() {
        dataset.write_raw(data)?;
    }
    Ok(())
}

fn read_typed<T: H5Type>(dataset: &Dataset, name: &str) -> Result<Vec<T>> {
    check_element_type::<T>(dataset, name)?;
    Ok(dataset.read_raw::<T>()?)
}

fn check_element_type<T: H5Type>(dataset: &Dataset, name: &str) -> Result<()> {
    let stored = dataset.dtype()?.to_descriptor()?;
    let expected = T::type_descriptor();
    if stored == expected {
        Ok(())
    } else {
        Err(Error::InvalidFormat(format!(
            "{name} holds {stored:?}, expected {expected:?}"
        )))
    }
}

fn set_attr_str_group(group: &Group, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    group
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 string: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_hdf5_groups_and_strings() {
        let tmp = NamedTempFile::new().unwrap();
        let mut file = Hdf5File::create(tmp.path()).unwrap();
        file.create_group("entry", "NXentry").unwrap();
        file.open_group("entry").unwrap();
        file.write_string("title", "first").unwrap();
        file.write_string("title", "second").unwrap();
        file.close().unwrap();

        let mut file = Hdf5File::open(tmp.path()).unwrap();
        file.open_group("/entry").unwrap();
        assert_eq!(file.read_string("title").unwrap(), "second");
        let entry = file.group().unwrap();
        let class: VarLenUnicode = entry.attr("NX_class").unwrap().read_scalar().unwrap();
        assert_eq!(class.as_str(), "NXentry");
    }

    #[test]
    fn test_hdf5_extend_in_place() {
        let tmp = NamedTempFile::new().unwrap();
        let mut file = Hdf5File::create(tmp.path()).unwrap();
        file.write_array("pairs", ArrayRef::U64(&[1, 2, 3, 4]), &[2, 2])
            .unwrap();
        file.write_extended("pairs", ArrayRef::U64(&[1, 2, 3, 4, 5, 6]), &[3, 2])
            .unwrap();
        assert_eq!(file.dataset_shape("pairs").unwrap(), Some(vec![3, 2]));
        assert!(file
            .write_extended("pairs", ArrayRef::F64(&[0.0, 0.0]), &[1, 2])
            .is_err());
        assert!(file
            .write_extended("missing", ArrayRef::I32(&[1]), &[1])
            .is_err());

        let data = file.read_array("pairs", ElementKind::U64).unwrap();
        assert_eq!(data.shape, vec![3, 2]);
        assert_eq!(data.into_u64().unwrap(), vec![1, 2, 3, 4, 5, 6]);
        assert!(file.read_array("pairs", ElementKind::I32).is_err());
    }

    #[test]
    fn test_hdf5_slabs_grow_region() {
        let tmp = NamedTempFile::new().unwrap();
        let mut file = Hdf5File::create(tmp.path()).unwrap();
        file.prepare_region("events", 2, 3).unwrap();
        file.write_slab("events", 0, &[1.0, 2.0, 3.0], 3).unwrap();
        file.write_slab("events", 2, &[7.0, 8.0, 9.0, 10.0, 11.0, 12.0], 3)
            .unwrap();
        assert_eq!(file.dataset_shape("events").unwrap(), Some(vec![4, 3]));
        assert_eq!(
            file.read_slab("events", 2, 2).unwrap(),
            vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]
        );
        assert!(file.read_slab("events", 3, 2).is_err());
        assert!(file.write_slab("events", 0, &[1.0, 2.0], 3).is_err());
    }

    #[test]
    fn test_hdf5_closed_file_rejects_writes() {
        let tmp = NamedTempFile::new().unwrap();
        let mut file = Hdf5File::create(tmp.path()).unwrap();
        file.close().unwrap();
        assert!(matches!(
            file.write_string("a", "b"),
            Err(Error::InvalidState(_))
        ));
    }
}
