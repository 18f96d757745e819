//! Inode management for the FUSE filesystem.
//!
//! Inodes map to virtual paths through [`PathTable`] from `fspotfs-mount`,
//! with FUSE `nlookup` counting added on top. An inode only remembers the
//! path it was handed out for; every request resolves that path again
//! against the current tag tree.

use dashmap::mapref::one::Ref;
use fspotfs_core::{EntryKind as MetadataKind, VirtualPath};
use fspotfs_mount::path_mapper::{EntryKind, PathTable};
use std::sync::atomic::{AtomicU64, Ordering};

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

pub type InodeKind = EntryKind;

/// Kind of the inode for an entry with the given metadata.
pub fn kind_of(kind: MetadataKind) -> InodeKind {
    match kind {
        MetadataKind::Directory => InodeKind::Directory,
        MetadataKind::Link => InodeKind::Link,
        MetadataKind::File => InodeKind::Staged,
    }
}

/// An entry in the inode table.
#[derive(Debug)]
pub struct InodeEntry {
    pub path: VirtualPath,
    pub kind: InodeKind,
    /// Kernel references, released through `forget`.
    nlookup: AtomicU64,
}

impl InodeEntry {
    fn new(path: VirtualPath, kind: InodeKind, nlookup: u64) -> Self {
        Self {
            path,
            kind,
            nlookup: AtomicU64::new(nlookup),
        }
    }

    pub fn inc_nlookup(&self) -> u64 {
        self.nlookup.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrements the lookup count by `count`. Returns `None` on underflow,
    /// leaving the count unchanged.
    pub fn dec_nlookup(&self, count: u64) -> Option<u64> {
        self.nlookup
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(count))
            .ok()
            .map(|old| old - count)
    }

    pub fn nlookup(&self) -> u64 {
        self.nlookup.load(Ordering::Relaxed)
    }
}

/// Thread-safe table mapping between inodes and virtual paths.
pub struct InodeTable {
    inner: PathTable<InodeEntry>,
}

impl InodeTable {
    /// Creates a table holding only the root directory.
    pub fn new() -> Self {
        Self {
            inner: PathTable::with_root(
                ROOT_INODE,
                ROOT_INODE + 1,
                InodeEntry::new(VirtualPath::root(), InodeKind::Root, 1),
            ),
        }
    }

    /// Inode for `path`, counting one kernel reference.
    ///
    /// An existing inode whose entry changed kind (a staged file that was
    /// imported, say) takes the new kind.
    pub fn get_or_insert(&self, path: &VirtualPath, kind: InodeKind) -> u64 {
        self.lookup_or_insert(path, kind, true)
    }

    /// Inode for `path` without counting a reference, for `readdir`.
    pub fn get_or_insert_no_lookup_inc(&self, path: &VirtualPath, kind: InodeKind) -> u64 {
        self.lookup_or_insert(path, kind, false)
    }

    fn lookup_or_insert(&self, path: &VirtualPath, kind: InodeKind, count: bool) -> u64 {
        if let Some(inode) = self.inner.get_id(path)
            && let Some(mut entry) = self.inner.get_mut(inode)
        {
            if entry.kind != kind && entry.kind != InodeKind::Root {
                entry.kind = kind;
            }
            if count {
                entry.inc_nlookup();
            }
            return inode;
        }

        let initial = u64::from(count);
        self.inner
            .get_or_insert_with(path.clone(), || InodeEntry::new(path.clone(), kind, initial))
    }

    pub fn get(&self, inode: u64) -> Option<Ref<'_, u64, InodeEntry>> {
        self.inner.get(inode)
    }

    /// Path and kind of `inode`, copied out of the table.
    pub fn resolve(&self, inode: u64) -> Option<(VirtualPath, InodeKind)> {
        self.inner.get(inode).map(|e| (e.path.clone(), e.kind))
    }

    pub fn get_inode(&self, path: &VirtualPath) -> Option<u64> {
        self.inner.get_id(path)
    }

    pub fn update_kind(&self, inode: u64, kind: InodeKind) -> bool {
        match self.inner.get_mut(inode) {
            Some(mut entry) => {
                entry.kind = kind;
                true
            }
            None => false,
        }
    }

    /// Releases `nlookup` kernel references. Returns `true` if the inode was
    /// evicted. The root is never evicted.
    pub fn forget(&self, inode: u64, nlookup: u64) -> bool {
        if inode == ROOT_INODE {
            return false;
        }

        let remaining = self
            .inner
            .get(inode)
            .and_then(|entry| entry.dec_nlookup(nlookup));
        remaining == Some(0) && self.inner.remove_by_id(inode).is_some()
    }

    /// Drop the path mapping of a removed entry. The inode itself lives until
    /// the kernel forgets it.
    pub fn invalidate_path(&self, path: &VirtualPath) {
        self.inner.invalidate_path(path);
    }

    /// Drop every path mapping but the root's, after the tree changed wholesale.
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all_paths();
    }

    /// Move an inode after a rename.
    pub fn update_path(&self, inode: u64, old_path: &VirtualPath, new_path: VirtualPath) {
        self.inner.update_path(inode, old_path, new_path, |entry, path| {
            entry.path = path;
        });
    }

    /// Move a renamed directory and everything known below it.
    pub fn rename_dir(&self, old_path: &VirtualPath, new_path: &VirtualPath) -> usize {
        self.inner.rename_prefix(old_path, new_path, |entry, path| {
            entry.path = path;
        })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the table only contains the root inode.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
