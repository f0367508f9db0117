//! The columnar box index: parallel arrays indexed by box id.

use crate::sink::{ArrayData, ArrayRef, ElementKind, FileSink, FileSource};
use crate::{Error, Result};
use mdbox_core::{FileIndex, MdBox};

pub const BOX_TYPE: &str = "box_type";
pub const DEPTH: &str = "depth";
pub const INVERSE_VOLUME: &str = "inverse_volume";
pub const EXTENTS: &str = "extents";
pub const BOX_CHILDREN: &str = "box_children";
pub const BOX_SIGNAL_ERRORSQUARED: &str = "box_signal_errorsquared";
pub const BOX_EVENT_INDEX: &str = "box_event_index";

/// Stored kind of a box slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoxType {
    /// No box has this id.
    Empty,
    Leaf,
    Grid,
}

impl BoxType {
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Empty => 0,
            Self::Leaf => 1,
            Self::Grid => 2,
        }
    }

    /// Parses a stored code.
    ///
    /// # Errors
    /// Returns an error for codes other than 0, 1 and 2.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Self::Empty),
            1 => Ok(Self::Leaf),
            2 => Ok(Self::Grid),
            other => Err(Error::InvalidFormat(format!("unknown box type {other}"))),
        }
    }
}

/// Per-save parallel arrays describing every box slot `0..max_boxes`.
///
/// Unused slots have type [`BoxType::Empty`], depth -1 and zeros elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxIndex {
    nd: usize,
    max_boxes: usize,
    box_type: Vec<i32>,
    depth: Vec<i32>,
    inverse_volume: Vec<f64>,
    extents: Vec<f64>,
    box_children: Vec<i32>,
    signal_errorsquared: Vec<f64>,
    event_index: Vec<u64>,
}

impl BoxIndex {
    #[must_use]
    pub fn new(max_boxes: usize, nd: usize) -> Self {
        Self {
            nd,
            max_boxes,
            box_type: vec![0; max_boxes],
            depth: vec![-1; max_boxes],
            inverse_volume: vec![0.0; max_boxes],
            extents: vec![0.0; max_boxes * 2 * nd],
            box_children: vec![0; max_boxes * 2],
            signal_errorsquared: vec![0.0; max_boxes * 2],
            event_index: vec![0; max_boxes * 2],
        }
    }

    #[must_use]
    pub fn max_boxes(&self) -> usize {
        self.max_boxes
    }

    #[must_use]
    pub fn nd(&self) -> usize {
        self.nd
    }

    /// Records everything about a box except its event location.
    ///
    /// `children` is the inclusive `(first, last)` id range of a grid box.
    ///
    /// # Errors
    /// Returns [`Error::BoxIdOutOfRange`] if the id does not fit, or an error if a value
    /// does not fit the stored integer type.
    pub fn record<E>(&mut self, mdbox: &MdBox<E>, children: Option<(usize, usize)>) -> Result<()> {
        let id = self.slot(mdbox.id())?;
        let kind = if mdbox.is_leaf() {
            BoxType::Leaf
        } else {
            BoxType::Grid
        };
        self.box_type[id] = kind.code();
        self.depth[id] = to_i32(mdbox.depth(), "depth")?;
        self.inverse_volume[id] = mdbox.inverse_volume();
        let width = 2 * self.nd;
        for (pair, extent) in self.extents[id * width..(id + 1) * width]
            .chunks_exact_mut(2)
            .zip(mdbox.extents())
        {
            pair[0] = extent.min;
            pair[1] = extent.max;
        }
        let (first, last) = children.unwrap_or((0, 0));
        self.box_children[2 * id] = to_i32(first, "child id")?;
        self.box_children[2 * id + 1] = to_i32(last, "child id")?;
        self.signal_errorsquared[2 * id] = mdbox.signal();
        self.signal_errorsquared[2 * id + 1] = mdbox.error_squared();
        Ok(())
    }

    /// Records where a box's events live in the event region.
    ///
    /// # Errors
    /// Returns [`Error::BoxIdOutOfRange`] if the id does not fit.
    pub fn set_event_index(&mut self, id: usize, index: FileIndex) -> Result<()> {
        let id = self.slot(id)?;
        self.event_index[2 * id] = index.start;
        self.event_index[2 * id + 1] = index.count;
        Ok(())
    }

    /// Stored type of a slot; `None` past `max_boxes`.
    ///
    /// # Errors
    /// Returns an error if the stored code is unknown.
    pub fn box_type(&self, id: usize) -> Result<Option<BoxType>> {
        self.box_type
            .get(id)
            .map(|&code| BoxType::from_code(code))
            .transpose()
    }

    /// Stored depth; `None` for unset slots.
    #[must_use]
    pub fn depth(&self, id: usize) -> Option<usize> {
        self.depth
            .get(id)
            .and_then(|&depth| usize::try_from(depth).ok())
    }

    #[must_use]
    pub fn inverse_volume(&self, id: usize) -> f64 {
        self.inverse_volume.get(id).copied().unwrap_or(0.0)
    }

    /// Flattened `min, max` pairs of a slot.
    #[must_use]
    pub fn extents(&self, id: usize) -> &[f64] {
        let width = 2 * self.nd;
        self.extents
            .get(id * width..(id + 1) * width)
            .unwrap_or(&[])
    }

    /// Inclusive child id range of a grid slot.
    ///
    /// # Errors
    /// Returns an error if the stored range is negative or inverted.
    pub fn children(&self, id: usize) -> Result<Option<(usize, usize)>> {
        if self.box_type(id)? != Some(BoxType::Grid) {
            return Ok(None);
        }
        let first = self.box_children[2 * id];
        let last = self.box_children[2 * id + 1];
        match (usize::try_from(first), usize::try_from(last)) {
            (Ok(first), Ok(last)) if first <= last => Ok(Some((first, last))),
            _ => Err(Error::InvalidFormat(format!(
                "box {id} has invalid child range {first}..={last}"
            ))),
        }
    }

    /// Cached `(signal, error_squared)` of a slot.
    #[must_use]
    pub fn statistics(&self, id: usize) -> (f64, f64) {
        match self.signal_errorsquared.get(2 * id..2 * id + 2) {
            Some(pair) => (pair[0], pair[1]),
            None => (0.0, 0.0),
        }
    }

    #[must_use]
    pub fn event_index(&self, id: usize) -> FileIndex {
        match self.event_index.get(2 * id..2 * id + 2) {
            Some(pair) => FileIndex::new(pair[0], pair[1]),
            None => FileIndex::default(),
        }
    }

    /// Sum of all event counts.
    #[must_use]
    pub fn total_events(&self) -> u64 {
        self.event_index.iter().skip(1).step_by(2).sum()
    }

    /// Number of slots holding each type: `(empty, leaf, grid)`.
    #[must_use]
    pub fn type_counts(&self) -> (usize, usize, usize) {
        self.box_type
            .iter()
            .fold((0, 0, 0), |(empty, leaf, grid), &code| match code {
                1 => (empty, leaf + 1, grid),
                2 => (empty, leaf, grid + 1),
                _ => (empty + 1, leaf, grid),
            })
    }

    /// Writes the seven arrays into the current group.
    ///
    /// With `extend` the datasets must already exist and are resized and overwritten in
    /// place; otherwise they are created.
    ///
    /// # Errors
    /// Returns an error if any write fails.
    pub fn write<S: FileSink + ?Sized>(&self, sink: &mut S, extend: bool) -> Result<()> {
        let n = self.max_boxes;
        let arrays: [(&str, ArrayRef<'_>, Vec<usize>); 7] = [
            (BOX_TYPE, ArrayRef::I32(&self.box_type), vec![n]),
            (DEPTH, ArrayRef::I32(&self.depth), vec![n]),
            (INVERSE_VOLUME, ArrayRef::F64(&self.inverse_volume), vec![n]),
            (EXTENTS, ArrayRef::F64(&self.extents), vec![n, 2 * self.nd]),
            (BOX_CHILDREN, ArrayRef::I32(&self.box_children), vec![n, 2]),
            (
                BOX_SIGNAL_ERRORSQUARED,
                ArrayRef::F64(&self.signal_errorsquared),
                vec![n, 2],
            ),
            (BOX_EVENT_INDEX, ArrayRef::U64(&self.event_index), vec![n, 2]),
        ];
        for (name, data, shape) in arrays {
            if extend {
                sink.write_extended(name, data, &shape)?;
            } else {
                sink.write_array(name, data, &shape)?;
            }
        }
        Ok(())
    }

    /// Reads the seven arrays from the current group.
    ///
    /// # Errors
    /// Returns an error if an array is missing, has the wrong type, or the arrays
    /// disagree on the number of boxes.
    pub fn read<S: FileSource + ?Sized>(source: &mut S, nd: usize) -> Result<Self> {
        let box_type = source.read_array(BOX_TYPE, ElementKind::I32)?;
        let max_boxes = box_type.shape.first().copied().unwrap_or(0);

        let pairs = [max_boxes, 2];

        let depth = read_shaped(source, DEPTH, ElementKind::I32, &[max_boxes])?.into_i32()?;
        let inverse_volume =
            read_shaped(source, INVERSE_VOLUME, ElementKind::F64, &[max_boxes])?.into_f64()?;
        let extents =
            read_shaped(source, EXTENTS, ElementKind::F64, &[max_boxes, 2 * nd])?.into_f64()?;
        let box_children =
            read_shaped(source, BOX_CHILDREN, ElementKind::I32, &pairs)?.into_i32()?;
        let signal_errorsquared =
            read_shaped(source, BOX_SIGNAL_ERRORSQUARED, ElementKind::F64, &pairs)?.into_f64()?;
        let event_index =
            read_shaped(source, BOX_EVENT_INDEX, ElementKind::U64, &pairs)?.into_u64()?;

        Ok(Self {
            nd,
            max_boxes,
            box_type: box_type.into_i32()?,
            depth,
            inverse_volume,
            extents,
            box_children,
            signal_errorsquared,
            event_index,
        })
    }

    fn slot(&self, id: usize) -> Result<usize> {
        if id < self.max_boxes {
            Ok(id)
        } else {
            Err(Error::BoxIdOutOfRange {
                id,
                max_boxes: self.max_boxes,
            })
        }
    }
}

fn read_shaped<S: FileSource + ?Sized>(
    source: &mut S,
    name: &str,
    kind: ElementKind,
    expected: &[usize],
) -> Result<ArrayData> {
    let data = source.read_array(name, kind)?;
    if data.shape != expected {
        return Err(Error::InvalidFormat(format!(
            "{name} has shape {:?}, expected {expected:?}",
            data.shape
        )));
    }
    Ok(data)
}

fn to_i32(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| Error::InvalidFormat(format!("{what} {value} does not fit in int32")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFile;
    use mdbox_core::{Extent, MdLeanEvent};

    fn leaf(id: usize, depth: usize) -> MdBox<MdLeanEvent<2>> {
        MdBox::leaf(
            id,
            depth,
            vec![Extent::new(0.0, 1.0), Extent::new(-2.0, 2.0)],
        )
    }

    #[test]
    fn test_new_index_is_unset() {
        let index = BoxIndex::new(3, 2);
        assert_eq!(index.box_type(0).unwrap(), Some(BoxType::Empty));
        assert_eq!(index.box_type(3).unwrap(), None);
        assert_eq!(index.depth(1), None);
        assert_eq!(index.event_index(2), FileIndex::default());
        assert_eq!(index.type_counts(), (3, 0, 0));
    }

    #[test]
    fn test_record_leaf() {
        let mut index = BoxIndex::new(3, 2);
        index.record(&leaf(1, 1), None).unwrap();
        index.set_event_index(1, FileIndex::new(4, 3)).unwrap();

        assert_eq!(index.box_type(1).unwrap(), Some(BoxType::Leaf));
        assert_eq!(index.depth(1), Some(1));
        assert_eq!(index.extents(1), &[0.0, 1.0, -2.0, 2.0]);
        assert_eq!(index.children(1).unwrap(), None);
        assert_eq!(index.event_index(1), FileIndex::new(4, 3));
        assert_eq!(index.total_events(), 3);
    }

    #[test]
    fn test_out_of_range_id() {
        let mut index = BoxIndex::new(1, 2);
        let err = index.record(&leaf(1, 0), None).unwrap_err();
        assert!(matches!(
            err,
            Error::BoxIdOutOfRange {
                id: 1,
                max_boxes: 1
            }
        ));
        assert!(index.set_event_index(5, FileIndex::new(0, 1)).is_err());
    }

    #[test]
    fn test_write_then_read() {
        let mut index = BoxIndex::new(2, 2);
        index.record(&leaf(0, 0), None).unwrap();
        index.set_event_index(0, FileIndex::new(0, 7)).unwrap();

        let mut file = MemoryFile::new();
        index.write(&mut file, false).unwrap();
        assert_eq!(file.array("/extents").unwrap().shape, vec![2, 4]);
        assert_eq!(BoxIndex::read(&mut file, 2).unwrap(), index);
    }

    #[test]
    fn test_extend_requires_existing_arrays() {
        let index = BoxIndex::new(2, 1);
        let mut file = MemoryFile::new();
        assert!(index.write(&mut file, true).is_err());
        index.write(&mut file, false).unwrap();

        let grown = BoxIndex::new(4, 1);
        grown.write(&mut file, true).unwrap();
        assert_eq!(file.array("/box_event_index").unwrap().shape, vec![4, 2]);
    }

    #[test]
    fn test_read_rejects_mismatched_shapes() {
        let mut file = MemoryFile::new();
        BoxIndex::new(2, 1).write(&mut file, false).unwrap();
        file.write_array(DEPTH, ArrayRef::I32(&[0, 0, 0]), &[3])
            .unwrap();
        assert!(matches!(
            BoxIndex::read(&mut file, 1),
            Err(Error::InvalidFormat(_))
        ));
    }
}
