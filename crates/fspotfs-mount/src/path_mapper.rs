//! Path-to-id mapping for mount backends.
//!
//! Kernels address entries by number, the engine by [`VirtualPath`].
//! [`PathTable`] keeps both directions in `DashMap`s:
//!
//! - `path_to_id`: VirtualPath → id
//! - `id_to_entry`: id → entry
//!
//! A virtual path is transient. A cross-tagged photo has one path, and so
//! one id, per tag directory it appears in, and a path stops resolving once
//! the tag it runs through changes. The table only remembers which path an id
//! was handed out for; backends resolve that path again on every request.
//!
//! Reference counting (FUSE `nlookup`) is left to the backend's entry type.

use dashmap::mapref::one::{Ref, RefMut};
use dashmap::DashMap;
use fspotfs_core::VirtualPath;
use std::sync::atomic::{AtomicU64, Ordering};

/// What an id was handed out for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Root,
    /// A tag directory.
    Directory,
    /// A photo entry.
    Link,
    /// A created file whose content is still being written.
    Staged,
}

impl EntryKind {
    /// Returns true for the root and tag directories.
    pub fn is_directory(self) -> bool {
        matches!(self, EntryKind::Root | EntryKind::Directory)
    }
}

/// Thread-safe bidirectional mapping between virtual paths and ids.
///
/// # Example
///
/// ```
/// use fspotfs_core::VirtualPath;
/// use fspotfs_mount::path_mapper::PathTable;
///
/// let table: PathTable<&str> = PathTable::with_root(1, 2, "root");
/// let id = table.get_or_insert_with(VirtualPath::new("/Vacation"), || "Vacation");
///
/// assert!(id > 1);
/// assert_eq!(table.get_id(&VirtualPath::new("Vacation")), Some(id));
/// ```
pub struct PathTable<Entry> {
    path_to_id: DashMap<VirtualPath, u64>,
    id_to_entry: DashMap<u64, Entry>,
    next_id: AtomicU64,
    root_id: u64,
}

impl<Entry> PathTable<Entry>
where
    Entry: Send + Sync,
{
    /// Create a table holding only `root_entry` under `root_id`. New ids
    /// start at `first_id`.
    pub fn with_root(root_id: u64, first_id: u64, root_entry: Entry) -> Self {
        let table = Self {
            path_to_id: DashMap::new(),
            id_to_entry: DashMap::new(),
            next_id: AtomicU64::new(first_id),
            root_id,
        };
        table.path_to_id.insert(VirtualPath::root(), root_id);
        table.id_to_entry.insert(root_id, root_entry);
        table
    }

    #[inline]
    pub fn root_id(&self) -> u64 {
        self.root_id
    }

    #[inline]
    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// The id of `path`, allocating one with `make_entry` if it has none.
    pub fn get_or_insert_with<F>(&self, path: VirtualPath, make_entry: F) -> u64
    where
        F: FnOnce() -> Entry,
    {
        if let Some(id) = self.path_to_id.get(&path) {
            return *id;
        }

        // Entry API so two racing lookups agree on one id.
        let id = self.path_to_id.entry(path).or_insert_with(|| {
            let new_id = self.allocate_id();
            self.id_to_entry.insert(new_id, make_entry());
            new_id
        });
        *id
    }

    pub fn get_id(&self, path: &VirtualPath) -> Option<u64> {
        self.path_to_id.get(path).map(|r| *r)
    }

    pub fn get(&self, id: u64) -> Option<Ref<'_, u64, Entry>> {
        self.id_to_entry.get(&id)
    }

    pub fn get_mut(&self, id: u64) -> Option<RefMut<'_, u64, Entry>> {
        self.id_to_entry.get_mut(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.id_to_entry.contains_key(&id)
    }

    /// Remove an entry and any path still mapped to it. The root stays.
    pub fn remove_by_id(&self, id: u64) -> Option<Entry> {
        if id == self.root_id {
            return None;
        }
        let (_, entry) = self.id_to_entry.remove(&id)?;
        self.path_to_id.retain(|_, v| *v != id);
        Some(entry)
    }

    /// Forget which id `path` maps to, keeping the entry until it is
    /// explicitly removed.
    pub fn invalidate_path(&self, path: &VirtualPath) {
        if !path.is_root() {
            self.path_to_id.remove(path);
        }
    }

    /// Move `id` from `old_path` to `new_path`.
    ///
    /// Any id previously mapped at `new_path` loses its mapping.
    pub fn update_path<F>(&self, id: u64, old_path: &VirtualPath, new_path: VirtualPath, update_entry: F)
    where
        F: FnOnce(&mut Entry, VirtualPath),
    {
        self.path_to_id.remove(old_path);
        self.path_to_id.insert(new_path.clone(), id);

        if let Some(mut entry) = self.id_to_entry.get_mut(&id) {
            update_entry(&mut entry, new_path);
        }
    }

    /// Move every mapping at or below `from` to the same place below `to`,
    /// after a directory rename. Returns how many mappings moved.
    pub fn rename_prefix<F>(&self, from: &VirtualPath, to: &VirtualPath, mut update_entry: F) -> usize
    where
        F: FnMut(&mut Entry, VirtualPath),
    {
        if from.is_root() {
            return 0;
        }
        let moved: Vec<(VirtualPath, u64)> = self
            .path_to_id
            .iter()
            .filter(|e| e.key().starts_with(from))
            .map(|e| (e.key().clone(), *e.value()))
            .collect();

        for (old_path, id) in &moved {
            let Some(new_path) = old_path.rebase(from, to) else {
                continue;
            };
            self.path_to_id.remove(old_path);
            self.path_to_id.insert(new_path.clone(), *id);
            if let Some(mut entry) = self.id_to_entry.get_mut(id) {
                update_entry(&mut entry, new_path);
            }
        }
        moved.len()
    }

    /// Drop every mapping except the root's, keeping the entries.
    ///
    /// Used when the tree may have changed behind the mount's back.
    pub fn invalidate_all_paths(&self) {
        let root = self.root_id;
        self.path_to_id.retain(|_, v| *v == root);
    }

    pub fn len(&self) -> usize {
        self.id_to_entry.len()
    }

    /// Returns true if the table only contains the root entry.
    pub fn is_empty(&self) -> bool {
        self.id_to_entry.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Entry {
        path: VirtualPath,
        kind: EntryKind,
    }

    fn entry(path: &str, kind: EntryKind) -> Entry {
        Entry {
            path: VirtualPath::new(path),
            kind,
        }
    }

    fn table() -> PathTable<Entry> {
        PathTable::with_root(1, 2, entry("", EntryKind::Root))
    }

    fn insert(table: &PathTable<Entry>, path: &str, kind: EntryKind) -> u64 {
        table.get_or_insert_with(VirtualPath::new(path), || entry(path, kind))
    }

    #[test]
    fn test_root_exists() {
        let table = table();
        assert_eq!(table.root_id(), 1);
        assert!(table.get(1).unwrap().kind.is_directory());
        assert_eq!(table.get_id(&VirtualPath::root()), Some(1));
        assert!(table.is_empty());
    }

    #[test]
    fn test_get_or_insert_is_stable() {
        let table = table();
        let id = insert(&table, "/Vacation", EntryKind::Directory);
        assert_eq!(id, 2);
        assert_eq!(insert(&table, "Vacation", EntryKind::Link), id);
        assert_eq!(table.get(id).unwrap().kind, EntryKind::Directory);
    }

    #[test]
    fn test_cross_tagged_photo_gets_one_id_per_path() {
        let table = table();
        let a = insert(&table, "/Vacation/p1.jpg", EntryKind::Link);
        let b = insert(&table, "/Family/p1.jpg", EntryKind::Link);
        assert_ne!(a, b);
    }

    #[test]
    fn test_remove_by_id() {
        let table = table();
        let id = insert(&table, "/Vacation", EntryKind::Directory);
        assert!(table.remove_by_id(id).is_some());
        assert!(!table.contains(id));
        assert_eq!(table.get_id(&VirtualPath::new("Vacation")), None);
        assert!(table.remove_by_id(1).is_none());
    }

    #[test]
    fn test_invalidate_path_keeps_entry() {
        let table = table();
        let id = insert(&table, "/Vacation/p1.jpg", EntryKind::Link);
        table.invalidate_path(&VirtualPath::new("/Vacation/p1.jpg"));
        assert!(table.contains(id));
        assert_eq!(table.get_id(&VirtualPath::new("/Vacation/p1.jpg")), None);

        table.invalidate_path(&VirtualPath::root());
        assert_eq!(table.get_id(&VirtualPath::root()), Some(1));
    }

    #[test]
    fn test_update_path() {
        let table = table();
        let id = insert(&table, "/Vacation/p1.jpg", EntryKind::Link);
        table.update_path(
            id,
            &VirtualPath::new("/Vacation/p1.jpg"),
            VirtualPath::new("/Vacation/sunset.jpg"),
            |e, p| e.path = p,
        );
        assert_eq!(table.get_id(&VirtualPath::new("/Vacation/sunset.jpg")), Some(id));
        assert_eq!(table.get(id).unwrap().path.as_str(), "Vacation/sunset.jpg");
    }

    #[test]
    fn test_rename_prefix_moves_descendants() {
        let table = table();
        let dir = insert(&table, "/Vacation/Beach", EntryKind::Directory);
        let photo = insert(&table, "/Vacation/Beach/p1.jpg", EntryKind::Link);
        let sibling = insert(&table, "/Vacation/Beaches", EntryKind::Directory);

        let moved = table.rename_prefix(
            &VirtualPath::new("/Vacation/Beach"),
            &VirtualPath::new("/Family/Shore"),
            |e, p| e.path = p,
        );

        assert_eq!(moved, 2);
        assert_eq!(table.get_id(&VirtualPath::new("/Family/Shore")), Some(dir));
        assert_eq!(table.get_id(&VirtualPath::new("/Family/Shore/p1.jpg")), Some(photo));
        assert_eq!(table.get(photo).unwrap().path.as_str(), "Family/Shore/p1.jpg");
        assert_eq!(table.get_id(&VirtualPath::new("/Vacation/Beaches")), Some(sibling));
    }

    #[test]
    fn test_invalidate_all_paths() {
        let table = table();
        let id = insert(&table, "/Vacation", EntryKind::Directory);
        table.invalidate_all_paths();
        assert_eq!(table.get_id(&VirtualPath::new("Vacation")), None);
        assert!(table.contains(id));
        assert_eq!(table.get_id(&VirtualPath::root()), Some(1));
    }
}
