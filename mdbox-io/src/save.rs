//! Saving a box tree: descriptors, the event region, and the box index.

use crate::index::BoxIndex;
use crate::sink::{ArrayRef, FileSink};
use crate::{Error, Result};
use mdbox_core::{BoxRef, BoxTree, FileIndex, MdBox, MdEvent};

/// Name of the entry group at the file root.
pub const ENTRY_GROUP: &str = "MDEventWorkspace";
/// Name of the data group inside the entry.
pub const DATA_GROUP: &str = "data";
/// Name of the event region inside the data group.
pub const EVENT_DATA: &str = "event_data";
/// Value of the `definition` descriptor.
pub const DEFINITION: &str = "MDEventWorkspace";

/// Save configuration.
#[derive(Clone, Debug, Default)]
pub struct SaveOptions {
    /// Refresh the box index of an already file-backed tree instead of writing a new
    /// file. Descriptors and existing event rows are left alone.
    pub update: bool,
}

impl SaveOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for an update save.
    #[must_use]
    pub fn update() -> Self {
        Self { update: true }
    }

    #[must_use]
    pub fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }
}

/// Receives progress and diagnostics from [`save`].
pub trait SaveObserver {
    /// Called once per visited box.
    fn box_visited(&mut self, _visited: usize, _max_boxes: usize) {}

    /// Called once before the box index arrays are written.
    fn writing_index(&mut self, _max_boxes: usize) {}

    /// Called when the save is about to fail on an integrity problem.
    fn warning(&mut self, _message: &str) {}
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullObserver;

impl SaveObserver for NullObserver {}

/// Forwards to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogObserver;

impl SaveObserver for LogObserver {
    fn box_visited(&mut self, visited: usize, max_boxes: usize) {
        log::trace!("saved box {visited}/{max_boxes}");
    }

    fn writing_index(&mut self, max_boxes: usize) {
        log::debug!("writing box index for {max_boxes} boxes");
    }

    fn warning(&mut self, message: &str) {
        log::warn!("{message}");
    }
}

/// Outcome of a successful save.
#[derive(Clone, Debug)]
pub struct SaveReport {
    pub boxes_visited: usize,
    /// Event rows written by this save (zero for an update with no new events).
    pub events_written: u64,
    pub index: BoxIndex,
}

/// Saves `tree` through `sink`.
///
/// In normal mode this creates the `MDEventWorkspace` entry with its descriptors, the
/// `data` group, and an event region sized for every event in the tree, then writes
/// each resident leaf's events at a running cursor and releases them. In update mode
/// (`options.update`) the tree must already be file-backed; the existing groups are
/// reopened, leaves keep their recorded location, new resident events are appended to
/// the end of the region, and the box index is rewritten in place.
///
/// The tree is checked before anything is written: every id must be below the
/// controller's `max_id` and every grid's children must have contiguous ascending ids.
///
/// # Errors
/// - [`Error::InvalidState`] for an update of a tree that is not file-backed, or a
///   normal save of a tree whose events are not in memory.
/// - [`Error::BoxIdOutOfRange`] and [`Error::NonSequentialChildId`] for a corrupt tree.
/// - Any error from the sink.
pub fn save<E, S>(
    tree: &mut BoxTree<E>,
    sink: &mut S,
    options: &SaveOptions,
    observer: &mut dyn SaveObserver,
) -> Result<SaveReport>
where
    E: MdEvent,
    S: FileSink + ?Sized,
{
    if options.update && !tree.controller().is_file_backed() {
        return Err(Error::InvalidState(
            "update requested but the tree is not file-backed".to_string(),
        ));
    }

    let max_boxes = tree.controller().max_id();
    let child_ranges = check_structure(tree, max_boxes, options.update, observer)?;

    let mut cursor = if options.update {
        open_for_update::<E, S>(sink)?;
        append_cursor(tree)
    } else {
        write_header(tree, sink)?;
        0
    };

    let mut index = BoxIndex::new(max_boxes, E::NDIMS);
    let mut walker = tree.traversal();
    let mut visited = 0;
    let mut events_written = 0;
    let mut row = Vec::new();

    while let Some(handle) = walker.next(tree) {
        let Some(mdbox) = tree.get(handle) else {
            continue;
        };
        let id = mdbox.id();
        index.record(mdbox, child_ranges[handle.index()])?;

        if let Some(leaf) = mdbox.leaf_events() {
            let location = match leaf.file_index() {
                Some(existing) if options.update => Some(existing),
                _ if !leaf.events().is_empty() => {
                    let count = leaf.events().len() as u64;
                    row.clear();
                    for event in leaf.events() {
                        event.write_row(&mut row);
                    }
                    sink.write_slab(EVENT_DATA, cursor, &row, E::columns())?;
                    let written = FileIndex::new(cursor, count);
                    cursor += count;
                    events_written += count;
                    Some(written)
                }
                _ => None,
            };
            if let Some(location) = location {
                index.set_event_index(id, location)?;
                if let Some(leaf) = tree.get_mut(handle).and_then(|b| b.leaf_events_mut()) {
                    leaf.set_file_index(location);
                    leaf.release();
                }
            }
        }

        visited += 1;
        observer.box_visited(visited, max_boxes);
    }

    observer.writing_index(max_boxes);
    index.write(sink, options.update)?;
    log::debug!(
        "saved {visited} boxes, {events_written} new events (update: {})",
        options.update
    );

    Ok(SaveReport {
        boxes_visited: visited,
        events_written,
        index,
    })
}

/// Saves `tree` to an HDF5 file and marks it as backed by that file.
///
/// A normal save creates (or truncates) `path`; an update opens it read/write.
///
/// # Errors
/// See [`save`]; also fails if the file cannot be created or opened.
#[cfg(feature = "hdf5")]
pub fn save_to_path<E, P>(
    tree: &mut BoxTree<E>,
    path: P,
    options: &SaveOptions,
) -> Result<SaveReport>
where
    E: MdEvent,
    P: AsRef<std::path::Path>,
{
    use crate::hdf5::Hdf5File;

    let path = path.as_ref();
    if options.update && !tree.controller().is_file_backed() {
        return Err(Error::InvalidState(
            "update requested but the tree is not file-backed".to_string(),
        ));
    }
    let mut file = if options.update {
        Hdf5File::open_rw(path)?
    } else {
        Hdf5File::create(path)?
    };
    let report = save(tree, &mut file, options, &mut LogObserver)?;
    file.close()?;
    tree.controller_mut()
        .set_file_backend(Some(mdbox_core::FileBackend::new(path)));
    Ok(report)
}

/// Validates ids (in range, used once) and child ranges; returns the inclusive child id range of every grid,
/// indexed by arena position.
fn check_structure<E>(
    tree: &BoxTree<E>,
    max_boxes: usize,
    update: bool,
    observer: &mut dyn SaveObserver,
) -> Result<Vec<Option<(usize, usize)>>> {
    let mut ranges = vec![None; tree.len()];
    let mut seen = vec![false; max_boxes];
    for (handle, mdbox) in preorder_handles(tree) {
        let id = mdbox.id();
        if id >= max_boxes {
            observer.warning(&format!(
                "unexpected box id {id}, which is >= max boxes ({max_boxes})"
            ));
            return Err(Error::BoxIdOutOfRange { id, max_boxes });
        }
        if std::mem::replace(&mut seen[id], true) {
            observer.warning(&format!("box id {id} is used by more than one box"));
            return Err(Error::DuplicateBoxId { id });
        }

        let children = mdbox.children();
        if let Some((&first, rest)) = children.split_first() {
            let first_id = tree.get(first).map_or(0, MdBox::id);
            let mut expected = first_id;
            for &child in rest {
                expected += 1;
                let found = tree.get(child).map_or(usize::MAX, MdBox::id);
                if found != expected {
                    observer.warning(&format!(
                        "non-sequential child id under box {id}: expected {expected}, found {found}"
                    ));
                    return Err(Error::NonSequentialChildId {
                        parent: id,
                        expected,
                        found,
                    });
                }
            }
            ranges[handle.index()] = Some((first_id, expected));
        }

        if let Some(leaf) = mdbox.leaf_events() {
            if !update && !leaf.is_resident() && leaf.n_events() > 0 {
                return Err(Error::InvalidState(format!(
                    "events of box {id} are on disk; load them before saving to a new file"
                )));
            }
        }
    }
    Ok(ranges)
}

fn preorder_handles<E>(
    tree: &BoxTree<E>,
) -> impl Iterator<Item = (BoxRef, &MdBox<E>)> {
    let mut walker = tree.traversal();
    std::iter::from_fn(move || {
        let handle = walker.next(tree)?;
        tree.get(handle).map(|mdbox| (handle, mdbox))
    })
}

fn write_header<E, S>(tree: &BoxTree<E>, sink: &mut S) -> Result<()>
where
    E: MdEvent,
    S: FileSink + ?Sized,
{
    sink.open_group("/")?;
    sink.create_group(ENTRY_GROUP, "NXentry")?;
    sink.open_group(ENTRY_GROUP)?;

    sink.write_string("definition", DEFINITION)?;
    sink.write_string("title", tree.title())?;
    let nd = i32::try_from(E::NDIMS)
        .map_err(|_| Error::InvalidFormat(format!("{} dimensions", E::NDIMS)))?;
    sink.write_array("dimensions", ArrayRef::I32(&[nd]), &[1])?;
    sink.write_string("event_type", E::type_name())?;
    for (d, dimension) in tree.dimensions().iter().enumerate() {
        sink.write_string(&format!("dimension{d}"), &serde_json::to_string(dimension)?)?;
    }
    sink.write_string(
        "box_controller_json",
        &serde_json::to_string(tree.controller())?,
    )?;

    sink.create_group(DATA_GROUP, "NXdata")?;
    sink.open_group(DATA_GROUP)?;
    let rows = usize::try_from(tree.n_points())
        .map_err(|_| Error::InvalidFormat("event count exceeds usize".to_string()))?;
    sink.prepare_region(EVENT_DATA, rows.max(1), E::columns())?;
    Ok(())
}

fn open_for_update<E, S>(sink: &mut S) -> Result<()>
where
    E: MdEvent,
    S: FileSink + ?Sized,
{
    sink.open_group("/")?;
    sink.open_group(ENTRY_GROUP)?;
    sink.open_group(DATA_GROUP)?;
    match sink.dataset_shape(EVENT_DATA)? {
        Some(shape) if shape.len() == 2 && shape[1] == E::columns() => Ok(()),
        Some(shape) => Err(Error::InvalidFormat(format!(
            "event region has shape {shape:?}, expected {} columns",
            E::columns()
        ))),
        None => Err(Error::InvalidFormat("file has no event region".to_string())),
    }
}

/// First row past every location recorded in the tree.
fn append_cursor<E>(tree: &BoxTree<E>) -> u64 {
    tree.boxes()
        .filter_map(|mdbox| mdbox.leaf_events()?.file_index())
        .map(|index| index.start + index.count)
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFile;
    use mdbox_core::{BoxController, Dimension, MdLeanEvent};

    type Event = MdLeanEvent<1>;

    fn tree() -> BoxTree<Event> {
        let dims = vec![Dimension::new("x", "m", 0.0, 4.0, 4).unwrap()];
        let controller = BoxController::new(1).with_split_threshold(1);
        BoxTree::new(dims, controller).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        visited: usize,
        index_phases: usize,
        warnings: Vec<String>,
    }

    impl SaveObserver for Recorder {
        fn box_visited(&mut self, _visited: usize, _max_boxes: usize) {
            self.visited += 1;
        }

        fn writing_index(&mut self, _max_boxes: usize) {
            self.index_phases += 1;
        }

        fn warning(&mut self, message: &str) {
            self.warnings.push(message.to_string());
        }
    }

    #[test]
    fn test_observer_sees_every_box() {
        let mut tree = tree();
        tree.add_events([Event::new(1.0, 1.0, [0.5]), Event::new(1.0, 1.0, [3.5])])
            .unwrap();
        tree.split_all_if_needed().unwrap();

        let mut recorder = Recorder::default();
        let mut file = MemoryFile::new();
        let report = save(&mut tree, &mut file, &SaveOptions::new(), &mut recorder).unwrap();

        assert_eq!(report.boxes_visited, 3);
        assert_eq!(recorder.visited, 3);
        assert_eq!(recorder.index_phases, 1);
        assert!(recorder.warnings.is_empty());
    }

    #[test]
    fn test_empty_tree_gets_one_row_region() {
        let mut tree = tree();
        let mut file = MemoryFile::new();
        let report = save(&mut tree, &mut file, &SaveOptions::new(), &mut NullObserver).unwrap();

        assert_eq!(report.events_written, 0);
        assert_eq!(
            file.array("/MDEventWorkspace/data/event_data").unwrap().shape,
            vec![1, 3]
        );
    }

    #[test]
    fn test_descriptors() {
        let mut tree = tree();
        tree.set_title("run 42");
        let mut file = MemoryFile::new();
        save(&mut tree, &mut file, &SaveOptions::new(), &mut NullObserver).unwrap();

        assert_eq!(file.group_class("/MDEventWorkspace"), Some("NXentry"));
        assert_eq!(file.group_class("/MDEventWorkspace/data"), Some("NXdata"));
        assert_eq!(
            file.string("/MDEventWorkspace/definition"),
            Some("MDEventWorkspace")
        );
        assert_eq!(file.string("/MDEventWorkspace/title"), Some("run 42"));
        assert_eq!(
            file.string("/MDEventWorkspace/event_type"),
            Some("MDLeanEvent")
        );
        let dim: Dimension =
            serde_json::from_str(file.string("/MDEventWorkspace/dimension0").unwrap()).unwrap();
        assert_eq!(dim.name, "x");
        let controller: BoxController =
            serde_json::from_str(file.string("/MDEventWorkspace/box_controller_json").unwrap())
                .unwrap();
        assert_eq!(controller.split_threshold, 1);
    }

    #[test]
    fn test_leaf_events_released_after_write() {
        let mut tree = tree();
        tree.add_events([Event::new(2.0, 1.0, [1.5])]).unwrap();
        let mut file = MemoryFile::new();
        save(&mut tree, &mut file, &SaveOptions::new(), &mut NullObserver).unwrap();

        let root = tree.root().unwrap();
        let leaf = tree.get(root).unwrap().leaf_events().unwrap();
        assert!(!leaf.is_resident());
        assert_eq!(leaf.file_index(), Some(FileIndex::new(0, 1)));
        assert_eq!(tree.n_points(), 1);
    }

    #[test]
    fn test_released_tree_cannot_be_saved_to_new_file() {
        let mut tree = tree();
        tree.add_events([Event::new(2.0, 1.0, [1.5])]).unwrap();
        save(
            &mut tree,
            &mut MemoryFile::new(),
            &SaveOptions::new(),
            &mut NullObserver,
        )
        .unwrap();

        let mut file = MemoryFile::new();
        let err = save(&mut tree, &mut file, &SaveOptions::new(), &mut NullObserver).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert!(file.group_class("/MDEventWorkspace").is_none());
    }

    #[test]
    fn test_out_of_range_id_warns_and_fails() {
        let mut tree = tree();
        tree.controller_mut().set_max_id(0);
        let mut recorder = Recorder::default();
        let mut file = MemoryFile::new();
        let err = save(&mut tree, &mut file, &SaveOptions::new(), &mut recorder).unwrap_err();

        assert!(matches!(
            err,
            Error::BoxIdOutOfRange {
                id: 0,
                max_boxes: 0
            }
        ));
        assert_eq!(recorder.warnings.len(), 1);
        assert!(file.group_class("/MDEventWorkspace").is_none());
    }
}
