//! Loading a saved box tree, eagerly or file-backed.

use crate::index::{BoxIndex, BoxType};
use crate::save::{DATA_GROUP, DEFINITION, ENTRY_GROUP, EVENT_DATA};
use crate::sink::{ElementKind, FileSource};
use crate::{Error, Result};
use mdbox_core::{
    BoxContent, BoxController, BoxRef, BoxTree, Dimension, Extent, FileIndex, LeafEvents, MdBox,
    MdEvent,
};

/// Load configuration.
#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    /// Leave leaf events in the file; only their locations are kept. Load them later
    /// with [`load_leaf_events`].
    pub file_backed: bool,
}

impl LoadOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file_backed(mut self, file_backed: bool) -> Self {
        self.file_backed = file_backed;
        self
    }
}

/// Descriptors of a saved tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    pub title: String,
    pub event_type: String,
    pub dimensions: Vec<Dimension>,
    pub controller: BoxController,
}

/// Reads the entry descriptors without checking them against an event type.
///
/// # Errors
/// Returns an error if a descriptor is missing or malformed.
pub fn read_header<S: FileSource + ?Sized>(source: &mut S) -> Result<Header> {
    source.open_group("/")?;
    source.open_group(ENTRY_GROUP)?;

    let definition = source.read_string("definition")?;
    if definition != DEFINITION {
        return Err(Error::InvalidFormat(format!(
            "unexpected definition {definition:?}"
        )));
    }
    let title = source.read_string("title")?;
    let event_type = source.read_string("event_type")?;
    let nd = source
        .read_array("dimensions", ElementKind::I32)?
        .into_i32()?
        .first()
        .and_then(|&nd| usize::try_from(nd).ok())
        .ok_or_else(|| Error::InvalidFormat("invalid dimensions descriptor".to_string()))?;

    let dimensions = (0..nd)
        .map(|d| -> Result<Dimension> {
            let json = source.read_string(&format!("dimension{d}"))?;
            Ok(serde_json::from_str(&json)?)
        })
        .collect::<Result<Vec<_>>>()?;
    let controller = serde_json::from_str(&source.read_string("box_controller_json")?)?;

    Ok(Header {
        title,
        event_type,
        dimensions,
        controller,
    })
}

/// Loads a tree saved with [`crate::save`].
///
/// Boxes keep their stored ids, statistics and inverse volumes, and the controller's
/// id counter is restored to the number of stored slots.
///
/// # Errors
/// Returns [`Error::InvalidFormat`] if the file holds another event type or
/// dimensionality, or its box index is inconsistent.
pub fn load<E, S>(source: &mut S, options: &LoadOptions) -> Result<BoxTree<E>>
where
    E: MdEvent,
    S: FileSource + ?Sized,
{
    let header = read_header(source)?;
    if header.event_type != E::type_name() {
        return Err(Error::InvalidFormat(format!(
            "file holds {} events, expected {}",
            header.event_type,
            E::type_name()
        )));
    }
    if header.dimensions.len() != E::NDIMS {
        return Err(Error::InvalidFormat(format!(
            "file has {} dimensions, expected {}",
            header.dimensions.len(),
            E::NDIMS
        )));
    }

    source.open_group(DATA_GROUP)?;
    let index = BoxIndex::read(source, E::NDIMS)?;

    let mut controller = header.controller;
    controller.set_max_id(index.max_boxes());
    let mut tree = BoxTree::empty(header.dimensions, controller)?;
    tree.set_title(header.title);

    let mut handles: Vec<Option<BoxRef>> = vec![None; index.max_boxes()];
    let mut root = None;
    for id in 0..index.max_boxes() {
        let kind = index.box_type(id)?.unwrap_or(BoxType::Empty);
        if kind == BoxType::Empty {
            continue;
        }
        let depth = index
            .depth(id)
            .ok_or_else(|| Error::InvalidFormat(format!("box {id} has no depth")))?;
        let extents = index
            .extents(id)
            .chunks_exact(2)
            .map(|pair| Extent::new(pair[0], pair[1]))
            .collect();
        let location = index.event_index(id);
        let content = if kind == BoxType::Leaf && location.count > 0 {
            BoxContent::Leaf(LeafEvents::on_disk(location))
        } else {
            BoxContent::Leaf(LeafEvents::default())
        };

        let mut mdbox = MdBox::with_content(id, depth, extents, content);
        mdbox.set_inverse_volume(index.inverse_volume(id));
        let (signal, error_squared) = index.statistics(id);
        mdbox.set_statistics(signal, error_squared);
        let handle = tree.insert(mdbox)?;
        handles[id] = Some(handle);

        if depth == 0 {
            if root.is_some() {
                return Err(Error::InvalidFormat("more than one root box".to_string()));
            }
            root = Some(handle);
        }
    }

    for (id, &handle) in handles.iter().enumerate() {
        let Some(parent) = handle else { continue };
        let Some((first, last)) = index.children(id)? else {
            continue;
        };
        let children = (first..=last)
            .map(|child| {
                handles.get(child).copied().flatten().ok_or_else(|| {
                    Error::InvalidFormat(format!("box {id} lists missing child {child}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        tree.attach_children(parent, children)?;
    }

    let root = root.ok_or_else(|| Error::InvalidFormat("file has no root box".to_string()))?;
    tree.set_root(root)?;

    if !options.file_backed {
        let leaves: Vec<BoxRef> = handles.iter().flatten().copied().collect();
        for leaf in leaves {
            load_leaf_events(&mut tree, leaf, source)?;
        }
    }

    log::debug!(
        "loaded {} boxes, {} events ({})",
        tree.len(),
        tree.n_points(),
        if options.file_backed {
            "file-backed"
        } else {
            "in memory"
        }
    );
    Ok(tree)
}

/// Reads one leaf's events from the event region into memory.
///
/// Grids, empty leaves and leaves that are already resident are left alone.
///
/// # Errors
/// Returns an error if the handle is unknown or the rows cannot be read or decoded.
pub fn load_leaf_events<E, S>(tree: &mut BoxTree<E>, handle: BoxRef, source: &mut S) -> Result<()>
where
    E: MdEvent,
    S: FileSource + ?Sized,
{
    let mdbox = tree
        .get(handle)
        .ok_or_else(|| Error::InvalidState(format!("unknown box handle {}", handle.index())))?;
    let Some(leaf) = mdbox.leaf_events() else {
        return Ok(());
    };
    if leaf.is_resident() {
        return Ok(());
    }
    let Some(FileIndex { start, count }) = leaf.file_index() else {
        return Ok(());
    };

    source.open_group("/")?;
    source.open_group(ENTRY_GROUP)?;
    source.open_group(DATA_GROUP)?;
    let rows = source.read_slab(EVENT_DATA, start, count)?;
    let events = rows
        .chunks_exact(E::columns())
        .map(E::read_row)
        .collect::<mdbox_core::Result<Vec<E>>>()?;

    if let Some(leaf) = tree.get_mut(handle).and_then(MdBox::leaf_events_mut) {
        leaf.restore(events);
    }
    Ok(())
}

/// Loads a tree from an HDF5 file. With `options.file_backed` the tree records `path`
/// as its backing file.
///
/// # Errors
/// See [`load`]; also fails if the file cannot be opened.
#[cfg(feature = "hdf5")]
pub fn load_from_path<E, P>(path: P, options: &LoadOptions) -> Result<BoxTree<E>>
where
    E: MdEvent,
    P: AsRef<std::path::Path>,
{
    let path = path.as_ref();
    let mut file = crate::hdf5::Hdf5File::open(path)?;
    let mut tree = load(&mut file, options)?;
    if options.file_backed {
        tree.controller_mut()
            .set_file_backend(Some(mdbox_core::FileBackend::new(path)));
    }
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFile;
    use crate::save::{save, NullObserver, SaveOptions};
    use crate::sink::FileSink;
    use mdbox_core::{MdFullEvent, MdLeanEvent};

    fn saved() -> MemoryFile {
        let dims = vec![
            Dimension::new("x", "m", 0.0, 2.0, 2).unwrap(),
            Dimension::new("y", "m", 0.0, 2.0, 2).unwrap(),
        ];
        let mut tree: BoxTree<MdLeanEvent<2>> =
            BoxTree::new(dims, BoxController::new(2).with_split_threshold(2)).unwrap();
        tree.add_events([
            MdLeanEvent::new(1.0, 1.0, [0.5, 0.5]),
            MdLeanEvent::new(2.0, 1.0, [1.5, 0.5]),
            MdLeanEvent::new(3.0, 1.0, [1.5, 1.5]),
        ])
        .unwrap();
        tree.split_all_if_needed().unwrap();
        tree.refresh_cache();
        let mut file = MemoryFile::new();
        save(&mut tree, &mut file, &SaveOptions::new(), &mut NullObserver).unwrap();
        file
    }

    #[test]
    fn test_wrong_event_type_is_rejected() {
        let mut file = saved();
        let err = load::<MdFullEvent<2>, _>(&mut file, &LoadOptions::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn test_wrong_dimensionality_is_rejected() {
        let mut file = saved();
        let err = load::<MdLeanEvent<3>, _>(&mut file, &LoadOptions::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn test_controller_with_bad_split_factor_is_rejected() {
        let mut file = saved();
        let mut controller = read_header(&mut file).unwrap().controller;
        controller.split_into = vec![0, 2];
        file.write_string(
            "box_controller_json",
            &serde_json::to_string(&controller).unwrap(),
        )
        .unwrap();

        let err = load::<MdLeanEvent<2>, _>(&mut file, &LoadOptions::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::CoreError(mdbox_core::Error::Config(_))
        ));
    }

    #[test]
    fn test_file_backed_load_keeps_events_on_disk() {
        let mut file = saved();
        let mut tree =
            load::<MdLeanEvent<2>, _>(&mut file, &LoadOptions::new().with_file_backed(true))
                .unwrap();
        assert_eq!(tree.n_points(), 3);
        assert!(tree
            .boxes()
            .filter_map(MdBox::leaf_events)
            .all(|leaf| leaf.events().is_empty()));

        let leaf = tree
            .handles()
            .find(|&h| tree.get(h).is_some_and(|b| b.n_events() == 1))
            .unwrap();
        load_leaf_events(&mut tree, leaf, &mut file).unwrap();
        let events = tree.get(leaf).unwrap().leaf_events().unwrap();
        assert!(events.is_resident());
        assert_eq!(events.events().len(), 1);
    }

    #[test]
    fn test_header() {
        let mut file = saved();
        let header = read_header(&mut file).unwrap();
        assert_eq!(header.event_type, "MDLeanEvent");
        assert_eq!(header.dimensions.len(), 2);
        assert_eq!(header.controller.split_threshold, 2);
    }
}
