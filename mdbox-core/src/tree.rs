//! The box tree: a recursive spatial partition of MD events stored as an arena.
//!
//! Boxes live in one `Vec` and are addressed by [`BoxRef`] handles. A box is either a
//! leaf holding events or a grid whose children are listed by handle. Box *ids* are a
//! separate, externally assigned numbering (see [`BoxController`]) that the on-disk
//! layout is indexed by.

use crate::controller::BoxController;
use crate::dimension::{inverse_volume, Dimension, Extent};
use crate::event::MdEvent;
use crate::traversal::{Preorder, Traversal};
use crate::{Error, Result};
use rayon::prelude::*;

/// Handle of a box inside a [`BoxTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoxRef(usize);

impl BoxRef {
    /// Position in the arena.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Location of a leaf's events in the event region of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileIndex {
    /// First row in the event region.
    pub start: u64,
    /// Number of rows.
    pub count: u64,
}

impl FileIndex {
    #[must_use]
    pub fn new(start: u64, count: u64) -> Self {
        Self { start, count }
    }
}

/// Events owned by a leaf box.
///
/// A leaf is *resident* when `events` holds its complete payload. A leaf that has been
/// written to (or loaded lazily from) a file keeps its [`FileIndex`] and may drop the
/// in-memory buffer.
#[derive(Debug, Clone)]
pub struct LeafEvents<E> {
    events: Vec<E>,
    file_index: Option<FileIndex>,
    resident: bool,
}

impl<E> Default for LeafEvents<E> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            file_index: None,
            resident: true,
        }
    }
}

impl<E> LeafEvents<E> {
    /// Events that only exist on disk.
    #[must_use]
    pub fn on_disk(file_index: FileIndex) -> Self {
        Self {
            events: Vec::new(),
            file_index: Some(file_index),
            resident: false,
        }
    }

    /// Number of events, resident or not.
    #[must_use]
    pub fn n_events(&self) -> u64 {
        if self.resident {
            self.events.len() as u64
        } else {
            self.file_index.map_or(0, |index| index.count)
        }
    }

    #[must_use]
    pub fn is_resident(&self) -> bool {
        self.resident
    }

    /// Resident events. Empty when the payload is on disk only.
    #[must_use]
    pub fn events(&self) -> &[E] {
        &self.events
    }

    #[must_use]
    pub fn file_index(&self) -> Option<FileIndex> {
        self.file_index
    }

    /// Records where the payload was written.
    pub fn set_file_index(&mut self, index: FileIndex) {
        self.file_index = Some(index);
    }

    /// Drops the in-memory buffer of a leaf whose payload is on disk.
    ///
    /// Leaves without a file location keep their events, since dropping them would lose
    /// data.
    pub fn release(&mut self) {
        if self.file_index.is_some() {
            self.events = Vec::new();
            self.resident = false;
        }
    }

    /// Installs a payload read back from disk.
    pub fn restore(&mut self, events: Vec<E>) {
        self.events = events;
        self.resident = true;
    }

    fn push(&mut self, event: E) {
        // The on-disk copy no longer matches.
        self.file_index = None;
        self.events.push(event);
    }

    fn take(&mut self) -> Vec<E> {
        self.file_index = None;
        std::mem::take(&mut self.events)
    }
}

/// Content of a box: a leaf with events, or a grid of children.
#[derive(Debug, Clone)]
pub enum BoxContent<E> {
    Leaf(LeafEvents<E>),
    Grid(Vec<BoxRef>),
}

/// One node of the box tree.
#[derive(Debug, Clone)]
pub struct MdBox<E> {
    id: usize,
    depth: usize,
    extents: Vec<Extent>,
    inverse_volume: f64,
    signal: f64,
    error_squared: f64,
    parent: Option<BoxRef>,
    content: BoxContent<E>,
}

impl<E> MdBox<E> {
    /// Creates an empty leaf box.
    #[must_use]
    pub fn leaf(id: usize, depth: usize, extents: Vec<Extent>) -> Self {
        Self::with_content(id, depth, extents, BoxContent::Leaf(LeafEvents::default()))
    }

    /// Creates a box with the given content. Grid children are attached separately with
    /// [`BoxTree::attach_children`].
    #[must_use]
    pub fn with_content(
        id: usize,
        depth: usize,
        extents: Vec<Extent>,
        content: BoxContent<E>,
    ) -> Self {
        let inverse_volume = inverse_volume(&extents);
        Self {
            id,
            depth,
            extents,
            inverse_volume,
            signal: 0.0,
            error_squared: 0.0,
            parent: None,
            content,
        }
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    #[must_use]
    pub fn inverse_volume(&self) -> f64 {
        self.inverse_volume
    }

    pub fn set_inverse_volume(&mut self, value: f64) {
        self.inverse_volume = value;
    }

    /// Cached total signal.
    #[must_use]
    pub fn signal(&self) -> f64 {
        self.signal
    }

    /// Cached total squared error.
    #[must_use]
    pub fn error_squared(&self) -> f64 {
        self.error_squared
    }

    pub fn set_statistics(&mut self, signal: f64, error_squared: f64) {
        self.signal = signal;
        self.error_squared = error_squared;
    }

    #[must_use]
    pub fn parent(&self) -> Option<BoxRef> {
        self.parent
    }

    #[must_use]
    pub fn content(&self) -> &BoxContent<E> {
        &self.content
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self.content, BoxContent::Leaf(_))
    }

    /// Children handles; empty for leaves.
    #[must_use]
    pub fn children(&self) -> &[BoxRef] {
        match &self.content {
            BoxContent::Grid(children) => children,
            BoxContent::Leaf(_) => &[],
        }
    }

    #[must_use]
    pub fn num_children(&self) -> usize {
        self.children().len()
    }

    #[must_use]
    pub fn leaf_events(&self) -> Option<&LeafEvents<E>> {
        match &self.content {
            BoxContent::Leaf(leaf) => Some(leaf),
            BoxContent::Grid(_) => None,
        }
    }

    pub fn leaf_events_mut(&mut self) -> Option<&mut LeafEvents<E>> {
        match &mut self.content {
            BoxContent::Leaf(leaf) => Some(leaf),
            BoxContent::Grid(_) => None,
        }
    }

    /// Events held by this box itself (zero for grids).
    #[must_use]
    pub fn n_events(&self) -> u64 {
        self.leaf_events().map_or(0, LeafEvents::n_events)
    }

    fn contains(&self, center: &[f32]) -> bool {
        self.extents
            .iter()
            .zip(center)
            .all(|(extent, &c)| extent.contains(f64::from(c)))
    }
}

/// A box tree over events of type `E`.
#[derive(Debug, Clone)]
pub struct BoxTree<E> {
    boxes: Vec<MdBox<E>>,
    root: Option<BoxRef>,
    dimensions: Vec<Dimension>,
    controller: BoxController,
    title: String,
}

impl<E: MdEvent> BoxTree<E> {
    /// Creates a tree with a single empty leaf spanning all dimensions.
    ///
    /// # Errors
    /// Returns an error if the dimension or controller rank differs from `E::NDIMS`.
    pub fn new(dimensions: Vec<Dimension>, controller: BoxController) -> Result<Self> {
        let mut tree = Self::empty(dimensions, controller)?;
        let id = tree.controller.next_id();
        let extents = tree.dimensions.iter().map(Dimension::extent).collect();
        let root = tree.insert(MdBox::leaf(id, 0, extents))?;
        tree.root = Some(root);
        Ok(tree)
    }

    /// Creates a tree with no boxes, for assembly with [`Self::insert`],
    /// [`Self::attach_children`] and [`Self::set_root`].
    ///
    /// # Errors
    /// Returns an error if the dimension or controller rank differs from `E::NDIMS`, or
    /// the controller has a split factor below 2.
    pub fn empty(dimensions: Vec<Dimension>, controller: BoxController) -> Result<Self> {
        if dimensions.len() != E::NDIMS {
            return Err(Error::InvalidDimensions {
                expected: E::NDIMS,
                actual: dimensions.len(),
            });
        }
        if controller.nd() != E::NDIMS {
            return Err(Error::InvalidDimensions {
                expected: E::NDIMS,
                actual: controller.nd(),
            });
        }
        controller.validate()?;
        Ok(Self {
            boxes: Vec::new(),
            root: None,
            dimensions,
            controller,
            title: String::new(),
        })
    }

    /// Adds a detached box to the arena.
    ///
    /// # Errors
    /// Returns an error if the box has the wrong number of extents, an inverted extent,
    /// or grid content (children must go through [`Self::attach_children`]).
    pub fn insert(&mut self, mdbox: MdBox<E>) -> Result<BoxRef> {
        if mdbox.extents.len() != E::NDIMS {
            return Err(Error::InvalidDimensions {
                expected: E::NDIMS,
                actual: mdbox.extents.len(),
            });
        }
        for (dim, extent) in mdbox.extents.iter().enumerate() {
            if extent.min > extent.max || extent.min.is_nan() || extent.max.is_nan() {
                return Err(Error::InvalidExtents {
                    dim,
                    min: extent.min,
                    max: extent.max,
                });
            }
        }
        if !mdbox.children().is_empty() {
            return Err(Error::InvalidBox(format!(
                "box {} must be inserted without children",
                mdbox.id
            )));
        }
        let handle = BoxRef(self.boxes.len());
        self.boxes.push(mdbox);
        Ok(handle)
    }

    /// Turns `parent` into a grid box over `children`, in the given order.
    ///
    /// # Errors
    /// Returns an error if a handle is unknown, `parent` holds events, a child already
    /// has a parent, or the link would create a cycle.
    pub fn attach_children(&mut self, parent: BoxRef, children: Vec<BoxRef>) -> Result<()> {
        let parent_box = self.checked(parent)?;
        if parent_box.n_events() > 0 {
            return Err(Error::InvalidBox(format!(
                "box {} holds events and cannot become a grid",
                parent_box.id
            )));
        }
        for &child in &children {
            let child_box = self.checked(child)?;
            if child_box.parent.is_some() || Some(child) == self.root {
                return Err(Error::InvalidBox(format!(
                    "box {} already has a parent",
                    child_box.id
                )));
            }
            if self.is_ancestor_or_self(child, parent) {
                return Err(Error::InvalidBox(format!(
                    "linking box {} under box {} creates a cycle",
                    child_box.id, parent_box.id
                )));
            }
        }
        for &child in &children {
            self.boxes[child.0].parent = Some(parent);
        }
        self.boxes[parent.0].content = BoxContent::Grid(children);
        Ok(())
    }

    /// Sets the root box.
    ///
    /// # Errors
    /// Returns an error if the handle is unknown or the box has a parent.
    pub fn set_root(&mut self, root: BoxRef) -> Result<()> {
        let root_box = self.checked(root)?;
        if root_box.parent.is_some() {
            return Err(Error::InvalidBox(format!(
                "box {} has a parent and cannot be the root",
                root_box.id
            )));
        }
        self.root = Some(root);
        Ok(())
    }

    /// Adds an event to the leaf whose extents contain its center.
    ///
    /// Returns `false` (and drops the event) when no box contains the center.
    ///
    /// # Errors
    /// Returns an error if the target leaf's events are on disk and not loaded, or the
    /// event has the wrong dimensionality.
    pub fn add_event(&mut self, event: E) -> Result<bool> {
        let Some(leaf) = self.find_leaf(event.center())? else {
            return Ok(false);
        };
        let mdbox = &mut self.boxes[leaf.0];
        let id = mdbox.id;
        let Some(events) = mdbox.leaf_events_mut() else {
            return Ok(false);
        };
        if !events.is_resident() {
            return Err(Error::InvalidBox(format!(
                "events of box {id} are on disk; load them before adding"
            )));
        }
        events.push(event);
        Ok(true)
    }

    /// Adds many events; returns how many landed in a box.
    ///
    /// # Errors
    /// See [`Self::add_event`].
    pub fn add_events<I: IntoIterator<Item = E>>(&mut self, events: I) -> Result<usize> {
        let mut added = 0;
        for event in events {
            if self.add_event(event)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Splits a resident leaf into a grid of `num_split()` children.
    ///
    /// Children get one contiguous block of new ids, ordered with dimension 0 varying
    /// fastest, and the leaf's events are redistributed among them.
    ///
    /// # Errors
    /// Returns an error if the handle is unknown, the box is a grid, its events are
    /// not resident, or the controller has a split factor below 2.
    pub fn split_box(&mut self, handle: BoxRef) -> Result<()> {
        let mdbox = self.checked(handle)?;
        let id = mdbox.id;
        let depth = mdbox.depth;
        let parent_extents = mdbox.extents.clone();
        let Some(leaf) = mdbox.leaf_events() else {
            return Err(Error::InvalidBox(format!("box {id} is already split")));
        };
        if !leaf.is_resident() {
            return Err(Error::InvalidBox(format!(
                "events of box {id} are on disk; load them before splitting"
            )));
        }

        self.controller.validate()?;
        let split_into = self.controller.split_into.clone();
        let num_split = self.controller.num_split();
        let ids = self.controller.allocate_ids(num_split);

        let mut children = Vec::with_capacity(num_split);
        for (i, child_id) in ids.enumerate() {
            let mut stride = 1;
            let mut extents = Vec::with_capacity(E::NDIMS);
            for (extent, &n) in parent_extents.iter().zip(&split_into) {
                let slot = (i / stride) % n;
                stride *= n;
                extents.push(sub_extent(*extent, slot, n));
            }
            let child = self.insert(MdBox::leaf(child_id, depth + 1, extents))?;
            self.boxes[child.0].parent = Some(handle);
            children.push(child);
        }

        let events = self.boxes[handle.0]
            .leaf_events_mut()
            .map(LeafEvents::take)
            .unwrap_or_default();
        for event in events {
            let slot = child_slot(&parent_extents, &split_into, event.center());
            if let Some(events) = self.boxes[children[slot].0].leaf_events_mut() {
                events.push(event);
            }
        }

        self.boxes[handle.0].content = BoxContent::Grid(children);
        Ok(())
    }

    /// Splits every leaf above the controller's threshold until no leaf needs it or the
    /// maximum depth is reached. Returns the number of boxes split.
    ///
    /// # Errors
    /// See [`Self::split_box`].
    pub fn split_all_if_needed(&mut self) -> Result<usize> {
        let threshold = self.controller.split_threshold as u64;
        let max_depth = self.controller.max_depth;
        let mut pending: Vec<BoxRef> = self.root.into_iter().collect();
        let mut splits = 0;

        while let Some(handle) = pending.pop() {
            let mdbox = &self.boxes[handle.0];
            if mdbox.is_leaf() {
                let resident = mdbox.leaf_events().is_some_and(LeafEvents::is_resident);
                if resident && mdbox.n_events() > threshold && mdbox.depth < max_depth {
                    self.split_box(handle)?;
                    splits += 1;
                    pending.extend_from_slice(self.boxes[handle.0].children());
                }
            } else {
                pending.extend_from_slice(mdbox.children());
            }
        }
        if splits > 0 {
            log::debug!(
                "split {splits} boxes; {} ids allocated",
                self.controller.max_id()
            );
        }
        Ok(splits)
    }
}

impl<E: MdEvent> BoxTree<E> {
    /// Recomputes cached signal and squared error, bottom-up.
    ///
    /// Resident leaves sum their events; leaves whose events are on disk keep the values
    /// they were loaded with. Grids sum their children.
    pub fn refresh_cache(&mut self) {
        self.boxes.par_iter_mut().for_each(|mdbox| {
            if let BoxContent::Leaf(leaf) = &mdbox.content {
                if leaf.is_resident() {
                    let (signal, error_squared) =
                        leaf.events.iter().fold((0.0, 0.0), |(s, e), event| {
                            (
                                s + f64::from(event.signal()),
                                e + f64::from(event.error_squared()),
                            )
                        });
                    mdbox.signal = signal;
                    mdbox.error_squared = error_squared;
                }
            }
        });

        let mut grids: Vec<BoxRef> = (0..self.boxes.len())
            .map(BoxRef)
            .filter(|h| !self.boxes[h.0].is_leaf())
            .collect();
        grids.sort_by_key(|h| std::cmp::Reverse(self.boxes[h.0].depth));

        for grid in grids {
            let (signal, error_squared) = self.boxes[grid.0]
                .children()
                .iter()
                .map(|child| &self.boxes[child.0])
                .fold((0.0, 0.0), |(s, e), child| {
                    (s + child.signal, e + child.error_squared)
                });
            self.boxes[grid.0].set_statistics(signal, error_squared);
        }
    }

    /// Total number of events held by all leaves, resident or on disk.
    #[must_use]
    pub fn n_points(&self) -> u64 {
        self.boxes.par_iter().map(MdBox::n_events).sum()
    }
}

impl<E> BoxTree<E> {
    #[must_use]
    pub fn root(&self) -> Option<BoxRef> {
        self.root
    }

    #[must_use]
    pub fn get(&self, handle: BoxRef) -> Option<&MdBox<E>> {
        self.boxes.get(handle.0)
    }

    pub fn get_mut(&mut self, handle: BoxRef) -> Option<&mut MdBox<E>> {
        self.boxes.get_mut(handle.0)
    }

    /// Number of boxes in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// All boxes in arena order.
    pub fn boxes(&self) -> impl Iterator<Item = &MdBox<E>> {
        self.boxes.iter()
    }

    /// Handles of all boxes in arena order.
    pub fn handles(&self) -> impl Iterator<Item = BoxRef> {
        (0..self.boxes.len()).map(BoxRef)
    }

    /// Handle-based pre-order walker; see [`Traversal`].
    #[must_use]
    pub fn traversal(&self) -> Traversal {
        Traversal::new(self.root)
    }

    /// Borrowing pre-order iterator over the boxes reachable from the root.
    #[must_use]
    pub fn preorder(&self) -> Preorder<'_, E> {
        Preorder::new(self)
    }

    #[must_use]
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    #[must_use]
    pub fn controller(&self) -> &BoxController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut BoxController {
        &mut self.controller
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    fn checked(&self, handle: BoxRef) -> Result<&MdBox<E>> {
        self.boxes
            .get(handle.0)
            .ok_or_else(|| Error::InvalidBox(format!("unknown box handle {}", handle.0)))
    }

    fn is_ancestor_or_self(&self, candidate: BoxRef, mut node: BoxRef) -> bool {
        loop {
            if node == candidate {
                return true;
            }
            match self.boxes[node.0].parent {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    fn find_leaf(&self, center: &[f32]) -> Result<Option<BoxRef>> {
        if center.len() != self.dimensions.len() {
            return Err(Error::InvalidDimensions {
                expected: self.dimensions.len(),
                actual: center.len(),
            });
        }
        let Some(mut node) = self.root else {
            return Ok(None);
        };
        if !self.boxes[node.0].contains(center) {
            return Ok(None);
        }
        loop {
            let mdbox = &self.boxes[node.0];
            if mdbox.is_leaf() {
                return Ok(Some(node));
            }
            match mdbox
                .children()
                .iter()
                .find(|child| self.boxes[child.0].contains(center))
            {
                Some(&child) => node = child,
                None => return Ok(None),
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn sub_extent(parent: Extent, slot: usize, n: usize) -> Extent {
    let step = parent.size() / n as f64;
    let min = parent.min + step * slot as f64;
    let max = if slot + 1 == n {
        parent.max
    } else {
        parent.min + step * (slot + 1) as f64
    };
    Extent::new(min, max)
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn child_slot(extents: &[Extent], split_into: &[usize], center: &[f32]) -> usize {
    let mut slot = 0;
    let mut stride = 1;
    for ((extent, &n), &c) in extents.iter().zip(split_into).zip(center) {
        let fraction = (f64::from(c) - extent.min) / extent.size();
        let i = ((fraction * n as f64).floor().max(0.0) as usize).min(n - 1);
        slot += i * stride;
        stride *= n;
    }
    slot
}
