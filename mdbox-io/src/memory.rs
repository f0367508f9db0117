//! In-memory implementation of the file collaborator.

use crate::sink::{
    check_shape, row_range, whole_rows, ArrayData, ArrayRef, ArrayValues, ElementKind, FileGroup,
    FileSink, FileSource,
};
use crate::{Error, Result};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Array(ArrayData),
    Text(String),
}

/// A hierarchical "file" held entirely in memory.
///
/// Groups and datasets are keyed by absolute path. Useful for tests and for staging a
/// tree before choosing a destination.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    groups: BTreeMap<String, String>,
    entries: BTreeMap<String, Entry>,
    current: String,
    closed: bool,
}

impl Default for MemoryFile {
    fn default() -> Self {
        let mut groups = BTreeMap::new();
        groups.insert("/".to_string(), String::new());
        Self {
            groups,
            entries: BTreeMap::new(),
            current: "/".to_string(),
            closed: false,
        }
    }
}

impl MemoryFile {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reopens a closed file, positioned at the root.
    pub fn reopen(&mut self) {
        self.closed = false;
        self.current = "/".to_string();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// `NX_class` of the group at an absolute path.
    #[must_use]
    pub fn group_class(&self, path: &str) -> Option<&str> {
        self.groups.get(path).map(String::as_str)
    }

    /// Numeric dataset at an absolute path.
    #[must_use]
    pub fn array(&self, path: &str) -> Option<&ArrayData> {
        match self.entries.get(path) {
            Some(Entry::Array(data)) => Some(data),
            _ => None,
        }
    }

    /// String dataset at an absolute path.
    #[must_use]
    pub fn string(&self, path: &str) -> Option<&str> {
        match self.entries.get(path) {
            Some(Entry::Text(text)) => Some(text),
            _ => None,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::InvalidState("file is closed".to_string()))
        } else {
            Ok(())
        }
    }

    fn path_of(&self, name: &str) -> String {
        join(&self.current, name)
    }

    fn region_mut(&mut self, name: &str) -> Result<(&mut Vec<f64>, &mut Vec<usize>)> {
        let path = self.path_of(name);
        match self.entries.get_mut(&path) {
            Some(Entry::Array(ArrayData {
                values: ArrayValues::F64(values),
                shape,
            })) if shape.len() == 2 => Ok((values, shape)),
            Some(_) => Err(Error::InvalidFormat(format!(
                "{path} is not a 2-D f64 region"
            ))),
            None => Err(Error::InvalidFormat(format!("no such dataset: {path}"))),
        }
    }
}

fn join(base: &str, name: &str) -> String {
    if name.starts_with('/') {
        return normalize(name);
    }
    if base == "/" {
        normalize(&format!("/{name}"))
    } else {
        normalize(&format!("{base}/{name}"))
    }
}

fn normalize(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

impl FileGroup for MemoryFile {
    fn open_group(&mut self, path: &str) -> Result<()> {
        self.ensure_open()?;
        let target = self.path_of(path);
        if !self.groups.contains_key(&target) {
            return Err(Error::InvalidFormat(format!("no such group: {target}")));
        }
        self.current = target;
        Ok(())
    }
}

impl FileSink for MemoryFile {
    fn create_group(&mut self, name: &str, class: &str) -> Result<()> {
        self.ensure_open()?;
        let path = self.path_of(name);
        if self.groups.contains_key(&path) || self.entries.contains_key(&path) {
            return Err(Error::InvalidFormat(format!("{path} already exists")));
        }
        self.groups.insert(path, class.to_string());
        Ok(())
    }

    fn write_string(&mut self, name: &str, value: &str) -> Result<()> {
        self.ensure_open()?;
        let path = self.path_of(name);
        self.entries.insert(path, Entry::Text(value.to_string()));
        Ok(())
    }

    fn write_array(&mut self, name: &str, data: ArrayRef<'_>, shape: &[usize]) -> Result<()> {
        self.ensure_open()?;
        check_shape(name, data.len(), shape)?;
        let path = self.path_of(name);
        self.entries.insert(
            path,
            Entry::Array(ArrayData {
                values: data.to_values(),
                shape: shape.to_vec(),
            }),
        );
        Ok(())
    }

    fn write_extended(&mut self, name: &str, data: ArrayRef<'_>, shape: &[usize]) -> Result<()> {
        self.ensure_open()?;
        check_shape(name, data.len(), shape)?;
        let path = self.path_of(name);
        let Some(Entry::Array(existing)) = self.entries.get_mut(&path) else {
            return Err(Error::InvalidFormat(format!(
                "cannot extend missing dataset {path}"
            )));
        };
        if existing.values.kind() != data.kind() || existing.shape.len() != shape.len() {
            return Err(Error::InvalidFormat(format!(
                "cannot extend {path}: {:?}{:?} does not match {:?}{:?}",
                existing.values.kind(),
                existing.shape,
                data.kind(),
                shape
            )));
        }
        if existing.shape[1..] != shape[1..] {
            return Err(Error::InvalidFormat(format!(
                "cannot extend {path}: only the first dimension may change"
            )));
        }
        existing.values = data.to_values();
        existing.shape = shape.to_vec();
        Ok(())
    }

    fn prepare_region(&mut self, name: &str, rows: usize, columns: usize) -> Result<()> {
        self.ensure_open()?;
        let path = self.path_of(name);
        self.entries.insert(
            path,
            Entry::Array(ArrayData {
                values: ArrayValues::F64(vec![0.0; rows * columns]),
                shape: vec![rows, columns],
            }),
        );
        Ok(())
    }

    fn write_slab(&mut self, name: &str, row: u64, data: &[f64], columns: usize) -> Result<()> {
        self.ensure_open()?;
        let n_rows = whole_rows(name, data.len(), columns)?;
        let rows = row_range(row, n_rows as u64)?;
        let (values, shape) = self.region_mut(name)?;
        if shape[1] != columns {
            return Err(Error::InvalidFormat(format!(
                "region {name} has {} columns, slab has {columns}",
                shape[1]
            )));
        }
        if rows.end > shape[0] {
            shape[0] = rows.end;
            values.resize(rows.end * columns, 0.0);
        }
        values[rows.start * columns..rows.end * columns].copy_from_slice(data);
        Ok(())
    }

    fn dataset_shape(&mut self, name: &str) -> Result<Option<Vec<usize>>> {
        let path = self.path_of(name);
        Ok(match self.entries.get(&path) {
            Some(Entry::Array(data)) => Some(data.shape.clone()),
            Some(Entry::Text(_)) => Some(Vec::new()),
            None => None,
        })
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

impl FileSource for MemoryFile {
    fn read_string(&mut self, name: &str) -> Result<String> {
        self.ensure_open()?;
        let path = self.path_of(name);
        self.string(&path)
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidFormat(format!("no such string dataset: {path}")))
    }

    fn read_array(&mut self, name: &str, kind: ElementKind) -> Result<ArrayData> {
        self.ensure_open()?;
        let path = self.path_of(name);
        let data = self
            .array(&path)
            .ok_or_else(|| Error::InvalidFormat(format!("no such dataset: {path}")))?;
        if data.values.kind() != kind {
            return Err(Error::InvalidFormat(format!(
                "{path} holds {:?}, expected {kind:?}",
                data.values.kind()
            )));
        }
        Ok(data.clone())
    }

    fn read_slab(&mut self, name: &str, row: u64, rows: u64) -> Result<Vec<f64>> {
        self.ensure_open()?;
        let range = row_range(row, rows)?;
        let (values, shape) = self.region_mut(name)?;
        if range.end > shape[0] {
            return Err(Error::InvalidFormat(format!(
                "rows {range:?} out of bounds for region {name} with {} rows",
                shape[0]
            )));
        }
        let columns = shape[1];
        Ok(values[range.start * columns..range.end * columns].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_and_paths() {
        let mut file = MemoryFile::new();
        file.create_group("entry", "NXentry").unwrap();
        file.open_group("entry").unwrap();
        file.create_group("data", "NXdata").unwrap();
        file.open_group("data").unwrap();
        file.write_string("title", "t").unwrap();
        assert_eq!(file.string("/entry/data/title"), Some("t"));
        assert_eq!(file.group_class("/entry/data"), Some("NXdata"));

        file.open_group("/").unwrap();
        assert!(file.open_group("missing").is_err());
        file.open_group("/entry/data").unwrap();
        assert_eq!(file.read_string("title").unwrap(), "t");
    }

    #[test]
    fn test_write_extended_requires_existing_dataset() {
        let mut file = MemoryFile::new();
        let err = file
            .write_extended("depth", ArrayRef::I32(&[1, 2]), &[2])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));

        file.write_array("depth", ArrayRef::I32(&[1, 2]), &[2]).unwrap();
        file.write_extended("depth", ArrayRef::I32(&[1, 2, 3]), &[3])
            .unwrap();
        assert_eq!(file.array("/depth").unwrap().shape, vec![3]);

        assert!(file
            .write_extended("depth", ArrayRef::F64(&[1.0]), &[1])
            .is_err());
    }

    #[test]
    fn test_slab_writes_grow_region() {
        let mut file = MemoryFile::new();
        file.prepare_region("event_data", 1, 2).unwrap();
        file.write_slab("event_data", 0, &[1.0, 2.0], 2).unwrap();
        file.write_slab("event_data", 2, &[5.0, 6.0], 2).unwrap();
        assert_eq!(file.array("/event_data").unwrap().shape, vec![3, 2]);
        assert_eq!(
            file.read_slab("event_data", 0, 3).unwrap(),
            vec![1.0, 2.0, 0.0, 0.0, 5.0, 6.0]
        );
        assert!(file.read_slab("event_data", 2, 2).is_err());
        assert!(file.write_slab("event_data", 0, &[1.0, 2.0, 3.0], 2).is_err());
    }

    #[test]
    fn test_closed_file_rejects_writes() {
        let mut file = MemoryFile::new();
        file.close().unwrap();
        assert!(file.write_string("a", "b").is_err());
        file.reopen();
        assert!(file.write_string("a", "b").is_ok());
    }
}
