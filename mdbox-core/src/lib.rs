//! mdbox-core: Core types for multi-dimensional event data.
//!
//! This crate provides the box tree that spatially partitions MD events, the event
//! record types stored in it, and the splitting-interval algebra used to filter and
//! split events by time.
//!

pub mod controller;
pub mod dimension;
pub mod error;
pub mod event;
pub mod interval;
pub mod interval_set;
pub mod time;
pub mod traversal;
pub mod tree;

pub use controller::{BoxController, FileBackend};
pub use dimension::{Dimension, Extent};
pub use error::{Error, Result};
pub use event::{MdEvent, MdFullEvent, MdLeanEvent};
pub use interval::{SplittingInterval, UNSET_INDEX};
pub use interval_set::{remove_overlap, IntervalSet};
pub use time::DateAndTime;
pub use traversal::{Preorder, Traversal};
pub use tree::{BoxContent, BoxRef, BoxTree, FileIndex, LeafEvents, MdBox};
