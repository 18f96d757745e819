//! Tag tree engine for browsing an F-Spot photo collection as a filesystem.
//!
//! Directories are tags, files are links to the original photos. Creating a
//! file in a tag directory imports it into a managed collection directory and
//! tags it; removing a file drops the tag.
//!
//! # Layers
//!
//! - [`store`]: the [`PhotoStore`] seam, with SQLite and in-memory backends
//! - [`tree`]: cached listings of tags and photos per tag chain
//! - [`resolver`]: virtual path to [`Location`]
//! - [`projector`]: filesystem metadata for locations
//! - [`import`]: the write path, with compensation on failure
//! - [`vfs`]: one method per filesystem operation, for mount backends
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use fspotfs_core::{MemoryStore, StaticConfig, VfsCore, VfsOptions, VirtualPath};
//!
//! let store = MemoryStore::new();
//! store.insert_tag(1, "Vacation", None);
//! store.insert_tag(2, "Beach", Some(1));
//! store.insert_photo(10, "/photos/p1.jpg", &[2]);
//!
//! let vfs = VfsCore::new(
//!     Arc::new(store),
//!     Arc::new(StaticConfig::default()),
//!     VfsOptions::default(),
//! );
//! let names: Vec<String> = vfs
//!     .list(&VirtualPath::new("/Vacation"))
//!     .unwrap()
//!     .into_iter()
//!     .map(|e| e.name)
//!     .collect();
//! assert_eq!(names, vec!["Beach"]);
//! ```

pub mod config;
pub mod error;
pub mod import;
pub mod model;
pub mod naming;
pub mod path;
pub mod projector;
pub mod resolver;
pub mod store;
pub mod tree;
pub mod vfs;

pub use config::{ConfigError, ConfigProvider, Settings, StaticConfig};
pub use error::{ErrorKind, OpContext, TagFsError, TagFsResult};
pub use import::{ImportJob, ImportPipeline, ImportSource, PhotoRef};
pub use model::{Photo, PhotoId, Tag, TagChain, TagId};
pub use path::VirtualPath;
pub use projector::{DirEntry, EntryKind, EntryMetadata, EntryProjector};
pub use resolver::{Location, PathResolver, TreeView};
pub use store::{MemoryStore, PhotoStore, SqliteStore, StoreError, StoreResult};
pub use tree::{PhotoEntry, TagEntry, TagSnapshot, TagTree};
pub use vfs::{AccessMode, ImportedEntry, VfsCore, VfsOptions};
