//! mdbox-io: Box-tree persistence for mdbox.
//!
//! A box tree is saved as a columnar box index (seven parallel arrays indexed by box id)
//! next to a single append-only event region, inside an `MDEventWorkspace` entry group.
//! Files are reached through the [`FileSink`] / [`FileSource`] traits; [`MemoryFile`]
//! implements both in memory and `Hdf5File` (feature `hdf5`) on disk.
//!

mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod index;
pub mod load;
pub mod memory;
pub mod save;
pub mod sink;

pub use error::{Error, Result};
#[cfg(feature = "hdf5")]
pub use hdf5::Hdf5File;
pub use index::{BoxIndex, BoxType};
#[cfg(feature = "hdf5")]
pub use load::load_from_path;
pub use load::{load, load_leaf_events, read_header, Header, LoadOptions};
pub use memory::MemoryFile;
#[cfg(feature = "hdf5")]
pub use save::save_to_path;
pub use save::{save, LogObserver, NullObserver, SaveObserver, SaveOptions, SaveReport};
pub use sink::{ArrayData, ArrayRef, ArrayValues, ElementKind, FileGroup, FileSink, FileSource};
