//! Thread-safe handle table for open files.
//!
//! Backed by `DashMap`, so handles opened on different FUSE worker threads
//! never contend on one lock. Ids are generated by the table and are never 0.

use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Concurrent map from generated handle ids to handle values.
///
/// # Example
///
/// ```
/// use fspotfs_mount::HandleTable;
///
/// let table: HandleTable<u64, String> = HandleTable::new_auto_id();
///
/// let id1 = table.insert_auto("p1.jpg".to_string());
/// let id2 = table.insert_auto("p2.jpg".to_string());
///
/// assert_ne!(id1, id2);
/// assert_eq!(table.remove(&id1), Some("p1.jpg".to_string()));
/// assert!(table.get(&id1).is_none());
/// ```
#[derive(Debug)]
pub struct HandleTable<K: Eq + std::hash::Hash, V> {
    handles: DashMap<K, V>,
    /// Next generated id. Zero is never handed out.
    next_id: AtomicU64,
}

impl<V> HandleTable<u64, V> {
    /// Create a handle table that generates ids starting at 1.
    pub fn new_auto_id() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Insert a value under a freshly generated id and return the id.
    ///
    /// Ids wrap around without ever producing 0 and skip ids still in use.
    pub fn insert_auto(&self, value: V) -> u64 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id == 0 {
                continue;
            }
            if let Entry::Vacant(entry) = self.handles.entry(id) {
                entry.insert(value);
                return id;
            }
        }
    }

    pub fn get(&self, id: &u64) -> Option<Ref<'_, u64, V>> {
        self.handles.get(id)
    }

    pub fn remove(&self, id: &u64) -> Option<V> {
        self.handles.remove(id).map(|(_, v)| v)
    }
}
