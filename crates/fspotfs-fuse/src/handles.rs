//! Open file handles and staged files.
//!
//! Photo entries are symlinks, so the kernel never opens them; the only
//! regular files in the tree are the ones created through the mount. Each
//! lives as a [`StagedFile`] until its last handle is closed, at which point
//! it is imported or, if nothing was ever written, dropped.

use dashmap::DashMap;
use fspotfs_core::VirtualPath;

pub use fspotfs_mount::{HandleTable, WriteBuffer};

/// An open file handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuseHandle {
    /// The staged file this handle is open on.
    pub ino: u64,
    /// Opened for writing.
    pub writable: bool,
}

/// Maps 64-bit handle ids to their handles.
pub type FuseHandleTable = HandleTable<u64, FuseHandle>;

/// A created file that has not been imported yet.
#[derive(Debug)]
pub struct StagedFile {
    pub buffer: WriteBuffer,
    /// Handles still open on the file.
    pub open_handles: usize,
}

/// Staged files by inode.
#[derive(Debug, Default)]
pub struct StagedFiles {
    files: DashMap<u64, StagedFile>,
}

impl StagedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a new, empty file with one open handle.
    pub fn create(&self, ino: u64, target: VirtualPath) {
        self.files.insert(
            ino,
            StagedFile {
                buffer: WriteBuffer::new(target),
                open_handles: 1,
            },
        );
    }

    pub fn contains(&self, ino: u64) -> bool {
        self.files.contains_key(&ino)
    }

    /// Current size of a staged file.
    pub fn size(&self, ino: u64) -> Option<u64> {
        self.files.get(&ino).map(|f| f.buffer.len())
    }

    /// Run `f` on the buffer of a staged file.
    pub fn with_buffer<T>(&self, ino: u64, f: impl FnOnce(&mut WriteBuffer) -> T) -> Option<T> {
        self.files.get_mut(&ino).map(|mut file| f(&mut file.buffer))
    }

    pub fn add_handle(&self, ino: u64) -> bool {
        match self.files.get_mut(&ino) {
            Some(mut file) => {
                file.open_handles += 1;
                true
            }
            None => false,
        }
    }

    /// True if at most one handle is still open on the file.
    pub fn is_last_handle(&self, ino: u64) -> bool {
        self.files.get(&ino).is_some_and(|f| f.open_handles <= 1)
    }

    /// Close one handle. Returns the file once its last handle is closed.
    pub fn release_handle(&self, ino: u64) -> Option<StagedFile> {
        let last = {
            let mut file = self.files.get_mut(&ino)?;
            file.open_handles = file.open_handles.saturating_sub(1);
            file.open_handles == 0
        };
        if last { self.take(ino) } else { None }
    }

    /// Remove a staged file regardless of open handles.
    pub fn take(&self, ino: u64) -> Option<StagedFile> {
        self.files.remove(&ino).map(|(_, file)| file)
    }

    /// Staged files whose target is directly inside `dir`, as (inode, name, size).
    pub fn children_of(&self, dir: &VirtualPath) -> Vec<(u64, String, u64)> {
        self.files
            .iter()
            .filter_map(|entry| {
                let (parent, name) = entry.buffer.target().split()?;
                (parent == *dir).then(|| (*entry.key(), name.to_string(), entry.buffer.len()))
            })
            .collect()
    }

    /// The inode of the staged file at `path`, if any.
    pub fn find(&self, path: &VirtualPath) -> Option<u64> {
        self.files
            .iter()
            .find(|entry| entry.buffer.target() == path)
            .map(|entry| *entry.key())
    }

    /// Point a staged file at a new path after a rename.
    pub fn retarget(&self, ino: u64, target: VirtualPath) -> bool {
        self.with_buffer(ino, |buffer| buffer.retarget(target)).is_some()
    }

    /// Move staged files below a renamed directory. Returns how many moved.
    pub fn rebase(&self, from: &VirtualPath, to: &VirtualPath) -> usize {
        let mut moved = 0;
        for mut entry in self.files.iter_mut() {
            if let Some(path) = entry.buffer.target().rebase(from, to) {
                entry.buffer.retarget(path);
                moved += 1;
            }
        }
        moved
    }

    /// Remove every staged file, returning their targets.
    pub fn drain(&self) -> Vec<VirtualPath> {
        let inodes: Vec<u64> = self.files.iter().map(|e| *e.key()).collect();
        inodes
            .into_iter()
            .filter_map(|ino| self.take(ino))
            .map(|file| file.buffer.target().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
