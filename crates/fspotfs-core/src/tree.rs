//! Cached, read-through view of the tag forest.
//!
//! Listings are materialized lazily per [`TagChain`] and kept in a cache that
//! carries an epoch counter. Every mutation bumps the epoch and drops the
//! cache; readers capture the epoch when they take a [`TagSnapshot`] and never
//! read or publish entries belonging to another epoch. The cache also expires
//! after `refresh_interval` so changes made by other programs become visible.

use crate::error::{OpContext, TagFsError, TagFsResult};
use crate::model::{Photo, TagChain, TagId};
use crate::naming::{disambiguate, sanitize};
use crate::store::PhotoStore;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Deepest tag chain that will be walked. Anything deeper is treated as a cycle.
pub const MAX_TAG_DEPTH: usize = 64;

/// A sub-tag as it appears in a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
    /// Visible (sanitized and disambiguated) name
    pub name: String,
    pub id: TagId,
}

/// A photo as it appears in a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoEntry {
    /// Visible (sanitized and disambiguated) name
    pub name: String,
    pub photo: Photo,
}

struct CacheState {
    epoch: u64,
    filled_at: Instant,
    children: HashMap<TagChain, Arc<[TagEntry]>>,
    photos: HashMap<TagChain, Arc<[PhotoEntry]>>,
}

impl CacheState {
    fn reset(&mut self) {
        self.epoch += 1;
        self.filled_at = Instant::now();
        self.children.clear();
        self.photos.clear();
    }
}

/// Lazily populated view over the store's tag table.
pub struct TagTree<S> {
    store: Arc<S>,
    repeated: bool,
    refresh_interval: Option<Duration>,
    cache: RwLock<CacheState>,
}

impl<S: PhotoStore> TagTree<S> {
    /// Create a tree over `store`.
    ///
    /// With `repeated` unset, a tag directory hides photos that also carry one
    /// of its descendant tags. `refresh_interval` of `None` keeps cached
    /// listings until the next mutation.
    pub fn new(store: Arc<S>, repeated: bool, refresh_interval: Option<Duration>) -> Self {
        Self {
            store,
            repeated,
            refresh_interval,
            cache: RwLock::new(CacheState {
                epoch: 0,
                filled_at: Instant::now(),
                children: HashMap::new(),
                photos: HashMap::new(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn is_repeated(&self) -> bool {
        self.repeated
    }

    pub fn epoch(&self) -> u64 {
        self.cache.read().epoch
    }

    /// Drop every cached listing and start a new epoch.
    pub fn invalidate(&self) {
        let mut cache = self.cache.write();
        cache.reset();
        debug!(epoch = cache.epoch, "Tag tree cache invalidated");
    }

    /// Pin the current epoch for one filesystem operation.
    pub fn snapshot(&self) -> TagSnapshot<'_, S> {
        if let Some(interval) = self.refresh_interval {
            let expired = self.cache.read().filled_at.elapsed() >= interval;
            if expired {
                let mut cache = self.cache.write();
                // Another reader may have refreshed it while we waited.
                if cache.filled_at.elapsed() >= interval {
                    cache.reset();
                    debug!(epoch = cache.epoch, "Tag tree cache expired");
                }
            }
        }
        TagSnapshot {
            tree: self,
            epoch: self.epoch(),
        }
    }

    /// All tags below `tag`, excluding `tag` itself.
    ///
    /// The walk keeps a visited set and stops at [`MAX_TAG_DEPTH`], so a
    /// corrupted parent relation cannot loop forever.
    pub fn descendants(&self, tag: TagId) -> TagFsResult<HashSet<TagId>> {
        let mut visited = HashSet::from([tag]);
        let mut queue = VecDeque::from([(tag, 0usize)]);
        let mut found = HashSet::new();

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= MAX_TAG_DEPTH {
                warn!(tag = %tag, "Tag hierarchy deeper than {MAX_TAG_DEPTH}, truncating walk");
                continue;
            }
            let children = self
                .store
                .get_tag_children(Some(current))
                .map_err(|e| TagFsError::store(e, OpContext::new().with_tag(current)))?;
            for child in children {
                if visited.insert(child.id) {
                    found.insert(child.id);
                    queue.push_back((child.id, depth + 1));
                } else {
                    warn!(tag = %child.id, parent = %current, "Tag cycle detected, skipping");
                }
            }
        }
        Ok(found)
    }

    fn load_children(&self, chain: &TagChain) -> TagFsResult<Vec<TagEntry>> {
        if chain.len() >= MAX_TAG_DEPTH {
            warn!(chain = %chain, "Tag chain exceeds maximum depth, listing no sub-tags");
            return Ok(Vec::new());
        }

        let tags = self.store.get_tag_children(chain.last()).map_err(|e| {
            let ctx = match chain.last() {
                Some(tag) => OpContext::new().with_tag(tag),
                None => OpContext::new(),
            };
            TagFsError::store(e, ctx)
        })?;

        let items: Vec<(String, TagId)> = tags
            .into_iter()
            .filter(|tag| {
                if chain.contains(tag.id) {
                    warn!(chain = %chain, tag = %tag.id, "Tag cycle detected, hiding sub-tag");
                    false
                } else {
                    true
                }
            })
            .map(|tag| (sanitize(&tag.name), tag.id))
            .collect();

        Ok(disambiguate(items, &HashSet::new(), false)
            .into_iter()
            .map(|(name, id)| TagEntry { name, id })
            .collect())
    }

    fn load_photos(&self, chain: &TagChain, taken: &HashSet<String>) -> TagFsResult<Vec<PhotoEntry>> {
        let Some(tag) = chain.last() else {
            return Ok(Vec::new());
        };

        let mut photos = self
            .store
            .get_photos_for_tag(tag)
            .map_err(|e| TagFsError::store(e, OpContext::new().with_tag(tag)))?;

        if !self.repeated {
            let deeper = self.descendants(tag)?;
            if !deeper.is_empty() {
                photos.retain(|p| p.tags.iter().all(|t| !deeper.contains(t)));
            }
        }

        let mut by_id = HashMap::with_capacity(photos.len());
        let mut items = Vec::with_capacity(photos.len());
        for photo in photos {
            let Some(name) = photo.file_name().map(sanitize) else {
                error!(photo = %photo.id, path = %photo.path.display(), "Inconsistent photo record: no usable file name");
                continue;
            };
            items.push((name, photo.id));
            by_id.insert(photo.id, photo);
        }

        Ok(disambiguate(items, taken, true)
            .into_iter()
            .filter_map(|(name, id)| by_id.remove(&id).map(|photo| PhotoEntry { name, photo }))
            .collect())
    }

    fn cached<T>(
        &self,
        epoch: u64,
        pick: impl FnOnce(&CacheState) -> Option<T>,
    ) -> Option<T> {
        let cache = self.cache.read();
        if cache.epoch == epoch { pick(&cache) } else { None }
    }

    fn publish(&self, epoch: u64, put: impl FnOnce(&mut CacheState)) {
        let mut cache = self.cache.write();
        if cache.epoch == epoch {
            put(&mut cache);
        }
    }
}

/// Listings pinned to one cache epoch.
///
/// Results computed for a stale epoch are returned to the caller but never
/// written back into the cache.
pub struct TagSnapshot<'a, S> {
    tree: &'a TagTree<S>,
    epoch: u64,
}

impl<S: PhotoStore> TagSnapshot<'_, S> {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Sub-tags of the chain's terminal tag (top-level tags for the root), by name.
    pub fn children(&self, chain: &TagChain) -> TagFsResult<Arc<[TagEntry]>> {
        if let Some(hit) = self.tree.cached(self.epoch, |c| c.children.get(chain).cloned()) {
            debug!(chain = %chain, "Tag children cache hit");
            return Ok(hit);
        }

        debug!(chain = %chain, "Tag children cache miss");
        let entries: Arc<[TagEntry]> = self.tree.load_children(chain)?.into();
        self.tree.publish(self.epoch, |c| {
            c.children.insert(chain.clone(), Arc::clone(&entries));
        });
        Ok(entries)
    }

    /// Photos shown in the chain's directory, by name. The root has none.
    pub fn photos(&self, chain: &TagChain) -> TagFsResult<Arc<[PhotoEntry]>> {
        if let Some(hit) = self.tree.cached(self.epoch, |c| c.photos.get(chain).cloned()) {
            debug!(chain = %chain, "Tag photos cache hit");
            return Ok(hit);
        }

        debug!(chain = %chain, "Tag photos cache miss");
        let taken: HashSet<String> = self
            .children(chain)?
            .iter()
            .map(|entry| entry.name.clone())
            .collect();
        let entries: Arc<[PhotoEntry]> = self.tree.load_photos(chain, &taken)?.into();
        self.tree.publish(self.epoch, |c| {
            c.photos.insert(chain.clone(), Arc::clone(&entries));
        });
        Ok(entries)
    }
}
