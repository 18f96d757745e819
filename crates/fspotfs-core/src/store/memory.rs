//! In-memory [`PhotoStore`] with failure injection.

use super::{PhotoStore, StoreError, StoreResult};
use crate::model::{Photo, PhotoId, Tag, TagId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
struct State {
    tags: BTreeMap<TagId, Tag>,
    photos: BTreeMap<PhotoId, Photo>,
    next_tag: i64,
    next_photo: i64,
}

impl State {
    fn tag_exists(&self, id: TagId) -> StoreResult<()> {
        if self.tags.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::UnknownTag(id))
        }
    }
}

/// Store that keeps the whole collection in memory.
///
/// `fail_next_creates` and `set_unavailable` make the store reject writes so
/// callers can observe how partial imports are rolled back.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    failing_creates: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tag with a fixed id, replacing any tag with that id.
    pub fn insert_tag(&self, id: i64, name: &str, parent: Option<i64>) -> TagId {
        let id = TagId::new(id);
        let mut state = self.state.lock();
        state.next_tag = state.next_tag.max(id.get());
        state.tags.insert(
            id,
            Tag {
                id,
                name: name.to_string(),
                parent: parent.map(TagId::new),
            },
        );
        id
    }

    /// Insert a photo with a fixed id. Tag ids are not checked, so tests can
    /// build dangling associations.
    pub fn insert_photo(&self, id: i64, path: impl AsRef<Path>, tags: &[i64]) -> PhotoId {
        let id = PhotoId::new(id);
        let mut state = self.state.lock();
        state.next_photo = state.next_photo.max(id.get());
        state.photos.insert(
            id,
            Photo {
                id,
                path: path.as_ref().to_path_buf(),
                imported_at: 0,
                tags: tags.iter().copied().map(TagId::new).collect(),
            },
        );
        id
    }

    /// Make the next `count` calls to `create_photo` fail.
    pub fn fail_next_creates(&self, count: usize) {
        self.failing_creates.store(count, Ordering::SeqCst);
    }

    /// Reject every mutating call while `unavailable` is set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn photo_count(&self) -> usize {
        self.state.lock().photos.len()
    }

    pub fn tag_count(&self) -> usize {
        self.state.lock().tags.len()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl PhotoStore for MemoryStore {
    fn get_tag_children(&self, parent: Option<TagId>) -> StoreResult<Vec<Tag>> {
        let state = self.state.lock();
        Ok(state
            .tags
            .values()
            .filter(|t| t.parent == parent)
            .cloned()
            .collect())
    }

    fn get_tag(&self, id: TagId) -> StoreResult<Tag> {
        self.state
            .lock()
            .tags
            .get(&id)
            .cloned()
            .ok_or(StoreError::UnknownTag(id))
    }

    fn get_photos_for_tag(&self, tag: TagId) -> StoreResult<Vec<Photo>> {
        let state = self.state.lock();
        Ok(state
            .photos
            .values()
            .filter(|p| p.tags.contains(&tag))
            .cloned()
            .collect())
    }

    fn get_photo(&self, id: PhotoId) -> StoreResult<Photo> {
        self.state
            .lock()
            .photos
            .get(&id)
            .cloned()
            .ok_or(StoreError::UnknownPhoto(id))
    }

    fn find_photo_by_path(&self, path: &Path) -> StoreResult<Option<Photo>> {
        let state = self.state.lock();
        Ok(state.photos.values().find(|p| p.path == path).cloned())
    }

    fn create_photo(&self, path: &Path, tags: &[TagId]) -> StoreResult<Photo> {
        self.check_available()?;
        if self.take_injected_failure() {
            return Err(StoreError::Unavailable("injected create failure".to_string()));
        }

        let mut state = self.state.lock();
        for tag in tags {
            state.tag_exists(*tag)?;
        }
        state.next_photo += 1;
        let photo = Photo {
            id: PhotoId::new(state.next_photo),
            path: path.to_path_buf(),
            imported_at: chrono::Utc::now().timestamp(),
            tags: tags.iter().copied().collect::<BTreeSet<_>>(),
        };
        state.photos.insert(photo.id, photo.clone());
        Ok(photo)
    }

    fn add_tag(&self, photo: PhotoId, tag: TagId) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.lock();
        state.tag_exists(tag)?;
        let record = state
            .photos
            .get_mut(&photo)
            .ok_or(StoreError::UnknownPhoto(photo))?;
        record.tags.insert(tag);
        Ok(())
    }

    fn remove_tag(&self, photo: PhotoId, tag: TagId) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.lock();
        let record = state
            .photos
            .get_mut(&photo)
            .ok_or(StoreError::UnknownPhoto(photo))?;
        if record.tags.remove(&tag) {
            Ok(())
        } else {
            Err(StoreError::UnknownPhoto(photo))
        }
    }

    fn retag(&self, photo: PhotoId, from: TagId, to: TagId) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.lock();
        state.tag_exists(to)?;
        let record = state
            .photos
            .get_mut(&photo)
            .ok_or(StoreError::UnknownPhoto(photo))?;
        if !record.tags.contains(&from) {
            return Err(StoreError::UnknownPhoto(photo));
        }
        record.tags.remove(&from);
        record.tags.insert(to);
        Ok(())
    }

    fn rename_photo_file(&self, photo: PhotoId, new_path: &Path) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.lock();
        let record = state
            .photos
            .get_mut(&photo)
            .ok_or(StoreError::UnknownPhoto(photo))?;
        record.path = new_path.to_path_buf();
        Ok(())
    }

    fn delete_photo(&self, photo: PhotoId) -> StoreResult<()> {
        self.check_available()?;
        self.state
            .lock()
            .photos
            .remove(&photo)
            .map(|_| ())
            .ok_or(StoreError::UnknownPhoto(photo))
    }

    fn create_tag(&self, name: &str, parent: Option<TagId>) -> StoreResult<Tag> {
        self.check_available()?;
        let mut state = self.state.lock();
        if let Some(parent) = parent {
            state.tag_exists(parent)?;
        }
        state.next_tag += 1;
        let tag = Tag {
            id: TagId::new(state.next_tag),
            name: name.to_string(),
            parent,
        };
        state.tags.insert(tag.id, tag.clone());
        Ok(tag)
    }

    fn update_tag(&self, id: TagId, name: &str, parent: Option<TagId>) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.lock();
        if let Some(parent) = parent {
            state.tag_exists(parent)?;
        }
        let tag = state.tags.get_mut(&id).ok_or(StoreError::UnknownTag(id))?;
        tag.name = name.to_string();
        tag.parent = parent;
        Ok(())
    }

    fn delete_tag(&self, id: TagId) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.lock();
        if state.tags.remove(&id).is_none() {
            return Err(StoreError::UnknownTag(id));
        }
        for photo in state.photos.values_mut() {
            photo.tags.remove(&id);
        }
        Ok(())
    }
}
