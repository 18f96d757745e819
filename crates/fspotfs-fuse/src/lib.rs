//! FUSE filesystem for F-Spot photo collections.
//!
//! Mounts an F-Spot `photos.db` as a directory tree: every tag is a
//! directory, every photo a symlink to its original. On a read-write mount,
//! files copied into a tag directory are imported into the managed
//! collection and tagged.
//!
//! # Features
//!
//! - Tag directories can be created, renamed, moved and removed
//! - Deleting a photo entry removes the tag, never the original
//! - Symlinking an existing photo into a directory adds the tag
//! - Created files are staged in memory and imported on close
//!
//! # Usage
//!
//! ```ignore
//! use fspotfs_fuse::{mount, MountConfig, TagFs};
//!
//! let fs = TagFs::new(vfs, MountConfig::default());
//! let handle = mount(fs, mountpoint, &MountConfig::default())?;
//! ```

pub mod attr;
pub mod backend;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod handles;
pub mod inode;

pub use backend::{is_available, mount, mount_with_timeout, FuseMountHandle, MountError};
pub use config::MountConfig;
pub use error::{FuseError, FuseResult, ToErrno};
pub use filesystem::TagFs;
pub use handles::{FuseHandle, FuseHandleTable, StagedFiles, WriteBuffer};
pub use inode::{InodeEntry, InodeKind, InodeTable, ROOT_INODE};
