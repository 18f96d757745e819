//! Filesystem metadata for resolved locations.

use crate::model::Photo;
use crate::path::VirtualPath;
use crate::resolver::Location;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Permissions of directories that cannot be modified.
pub const READ_ONLY_DIR_PERM: u16 = 0o555;
/// Permissions of tag directories on a writable mount.
pub const WRITABLE_DIR_PERM: u16 = 0o755;
pub const LINK_PERM: u16 = 0o777;
/// Permissions of files still being written before import.
pub const STAGED_FILE_PERM: u16 = 0o644;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    Link,
    /// A file created through the mount that has not been imported yet.
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    pub kind: EntryKind,
    pub size: u64,
    pub mtime: SystemTime,
    pub perm: u16,
    /// On-disk original, for links.
    pub link_target: Option<PathBuf>,
    /// Set when a link's target no longer exists.
    pub broken: bool,
}

/// One listing entry.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub path: VirtualPath,
    pub location: Location,
    pub metadata: EntryMetadata,
}

/// Builds [`EntryMetadata`] for locations.
#[derive(Debug, Clone)]
pub struct EntryProjector {
    started_at: SystemTime,
    writable: bool,
}

impl EntryProjector {
    pub fn new(writable: bool) -> Self {
        Self {
            started_at: SystemTime::now(),
            writable,
        }
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// The root directory. It is never writable.
    pub fn root(&self) -> EntryMetadata {
        self.directory(READ_ONLY_DIR_PERM, self.started_at)
    }

    /// A tag directory whose mtime is the newest of `photos`, or mount time
    /// when it shows none.
    pub fn tag<'a>(&self, photos: impl IntoIterator<Item = &'a Photo>) -> EntryMetadata {
        let mtime = photos
            .into_iter()
            .filter_map(|photo| fs::metadata(&photo.path).and_then(|m| m.modified()).ok())
            .max()
            .unwrap_or(self.started_at);
        let perm = if self.writable {
            WRITABLE_DIR_PERM
        } else {
            READ_ONLY_DIR_PERM
        };
        self.directory(perm, mtime)
    }

    /// A photo link. A missing target still yields a link, flagged broken.
    pub fn photo(&self, photo: &Photo) -> EntryMetadata {
        let (size, mtime, broken) = match fs::metadata(&photo.path) {
            Ok(meta) => (meta.len(), meta.modified().unwrap_or(UNIX_EPOCH), false),
            Err(_) => (0, UNIX_EPOCH, true),
        };
        EntryMetadata {
            kind: EntryKind::Link,
            size,
            mtime,
            perm: LINK_PERM,
            link_target: Some(photo.path.clone()),
            broken,
        }
    }

    /// A file staged by the mount backend and not yet imported.
    pub fn staged(&self, size: u64) -> EntryMetadata {
        EntryMetadata {
            kind: EntryKind::File,
            size,
            mtime: SystemTime::now(),
            perm: STAGED_FILE_PERM,
            link_target: None,
            broken: false,
        }
    }

    fn directory(&self, perm: u16, mtime: SystemTime) -> EntryMetadata {
        EntryMetadata {
            kind: EntryKind::Directory,
            size: 0,
            mtime,
            perm,
            link_target: None,
            broken: false,
        }
    }

    /// Metadata for a location without listing its contents.
    ///
    /// Used for `Root` and `PhotoLeaf`; tag directories need their photos,
    /// which the caller passes to [`tag`](Self::tag).
    pub fn project_leaf(&self, location: &Location, photo: Option<&Photo>) -> Option<EntryMetadata> {
        match (location, photo) {
            (Location::Root, _) => Some(self.root()),
            (Location::PhotoLeaf { .. }, Some(photo)) => Some(self.photo(photo)),
            _ => None,
        }
    }
}
