//! The write path.
//!
//! [`ImportPipeline`] is the only component that writes into the managed
//! collection directory or calls the store's mutating methods. Every method
//! either completes (files and records both updated, tree cache invalidated)
//! or undoes its on-disk changes before returning the error.

use crate::config::ConfigProvider;
use crate::error::{OpContext, TagFsError, TagFsResult};
use crate::model::{Photo, PhotoId, Tag, TagChain, TagId};
use crate::naming::{is_valid_entry_name, suffixed};
use crate::store::{PhotoStore, StoreResult};
use crate::tree::TagTree;
use chrono::Local;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Give up choosing a free name after this many suffixes.
const MAX_NAME_ATTEMPTS: usize = 10_000;

/// Where the bytes of an import come from.
#[derive(Debug, Clone, Copy)]
pub enum ImportSource<'a> {
    Bytes(&'a [u8]),
    /// An existing file, copied (never moved) into the collection.
    Path(&'a Path),
}

/// A pending import. Consumed by [`ImportPipeline::import_file`].
#[derive(Debug, Clone)]
pub struct ImportJob<'a> {
    pub source: ImportSource<'a>,
    /// Directory the new photo is created in. Its terminal tag is attached.
    pub chain: TagChain,
    pub suggested_name: &'a str,
}

/// A photo registered by an import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRef {
    pub id: PhotoId,
    /// Final location inside the managed collection.
    pub path: PathBuf,
}

pub struct ImportPipeline<S> {
    store: Arc<S>,
    tree: Arc<TagTree<S>>,
    config: Arc<dyn ConfigProvider>,
    collection_root: RwLock<Option<PathBuf>>,
    delete_orphans: bool,
}

impl<S: PhotoStore> ImportPipeline<S> {
    /// Create a pipeline.
    ///
    /// With `delete_orphans` set, removing the last tag of a photo whose file
    /// lies in the managed collection also deletes the record and the file.
    pub fn new(tree: Arc<TagTree<S>>, config: Arc<dyn ConfigProvider>, delete_orphans: bool) -> Self {
        Self {
            store: Arc::clone(tree.store()),
            tree,
            config,
            collection_root: RwLock::new(None),
            delete_orphans,
        }
    }

    /// The managed collection directory, read from the config once and cached.
    pub fn collection_root(&self) -> TagFsResult<PathBuf> {
        if let Some(root) = self.collection_root.read().as_ref() {
            return Ok(root.clone());
        }
        let root = self.config.collection_root()?;
        debug!(root = %root.display(), "Collection root resolved");
        *self.collection_root.write() = Some(root.clone());
        Ok(root)
    }

    /// Forget the cached collection root so the next call re-reads the config.
    pub fn invalidate_config(&self) {
        *self.collection_root.write() = None;
    }

    /// Copy new content into the collection and register it under the job's tag.
    pub fn import_file(&self, job: ImportJob<'_>) -> TagFsResult<PhotoRef> {
        let ctx = || OpContext::new().with_virtual_path(job.suggested_name);

        let Some(tag) = job.chain.last() else {
            return Err(TagFsError::permission_denied("root is not writable", ctx()));
        };
        if !is_valid_entry_name(job.suggested_name) {
            return Err(TagFsError::invalid_argument("invalid file name", ctx()));
        }

        let root = self.collection_root()?;
        let dest_dir = if self.config.dated_subdirectories() {
            let today = Local::now();
            root.join(today.format("%Y").to_string())
                .join(today.format("%m").to_string())
                .join(today.format("%d").to_string())
        } else {
            root
        };

        let mut created_dirs = Vec::new();
        if let Err(e) = ensure_dir(&dest_dir, &mut created_dirs) {
            remove_created_dirs(&created_dirs);
            return Err(TagFsError::io(e, ctx().with_disk_path(&dest_dir)));
        }

        let (path, file) = match claim_name(&dest_dir, job.suggested_name) {
            Ok(claimed) => claimed,
            Err(e) => {
                remove_created_dirs(&created_dirs);
                return Err(TagFsError::io(e, ctx().with_disk_path(&dest_dir)));
            }
        };

        if let Err(e) = copy_into(file, job.source) {
            warn!(path = %path.display(), error = %e, "Copy failed, removing partial file");
            discard(&path, &created_dirs);
            return Err(TagFsError::io(e, ctx().with_disk_path(&path)));
        }

        let photo = match retry_once("register photo", || self.store.create_photo(&path, &[tag])) {
            Ok(photo) => photo,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Registration failed, removing copied file");
                discard(&path, &created_dirs);
                return Err(TagFsError::store(e, ctx().with_tag(tag).with_disk_path(&path)));
            }
        };

        self.tree.invalidate();
        info!(photo = %photo.id, tag = %tag, path = %path.display(), "Imported photo");
        Ok(PhotoRef {
            id: photo.id,
            path,
        })
    }

    /// Detach `tag` from `photo`.
    ///
    /// When this was the photo's last tag and its file was imported into the
    /// managed collection, the record and the file are deleted too. Files
    /// outside the collection are never touched.
    pub fn remove_association(&self, photo: PhotoId, tag: TagId) -> TagFsResult<()> {
        let ctx = || OpContext::new().with_photo(photo).with_tag(tag);
        let record = self
            .store
            .get_photo(photo)
            .map_err(|e| TagFsError::store(e, ctx()))?;
        if !record.tags.contains(&tag) {
            return Err(TagFsError::not_found(ctx()));
        }

        if record.tags.len() == 1 && self.delete_orphans && self.is_managed(&record.path) {
            self.store
                .delete_photo(photo)
                .map_err(|e| TagFsError::store(e, ctx()))?;
            match fs::remove_file(&record.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    error!(path = %record.path.display(), error = %e, "Failed to remove untagged collection file");
                }
            }
            info!(photo = %photo, path = %record.path.display(), "Removed last tag, deleted collection file");
        } else {
            self.store
                .remove_tag(photo, tag)
                .map_err(|e| TagFsError::store(e, ctx()))?;
            info!(photo = %photo, tag = %tag, "Removed tag association");
        }

        self.tree.invalidate();
        Ok(())
    }

    /// Rename the on-disk file of a photo inside the managed collection.
    pub fn rename_within_tag(&self, photo: PhotoId, new_name: &str) -> TagFsResult<PathBuf> {
        let ctx = || OpContext::new().with_photo(photo).with_virtual_path(new_name);
        if !is_valid_entry_name(new_name) {
            return Err(TagFsError::invalid_argument("invalid file name", ctx()));
        }

        let record = self
            .store
            .get_photo(photo)
            .map_err(|e| TagFsError::store(e, ctx()))?;
        if !self.is_managed(&record.path) {
            return Err(TagFsError::permission_denied(
                "photo lies outside the managed collection",
                ctx().with_disk_path(&record.path),
            ));
        }

        let new_path = record.path.with_file_name(new_name);
        if new_path == record.path {
            return Ok(new_path);
        }
        if fs::symlink_metadata(&new_path).is_ok() {
            return Err(TagFsError::already_exists(ctx().with_disk_path(&new_path)));
        }

        fs::rename(&record.path, &new_path)
            .map_err(|e| TagFsError::io(e, ctx().with_disk_path(&record.path)))?;

        if let Err(e) = retry_once("rename photo", || self.store.rename_photo_file(photo, &new_path)) {
            warn!(photo = %photo, error = %e, "Rename not recorded, moving file back");
            if let Err(undo) = fs::rename(&new_path, &record.path) {
                error!(from = %new_path.display(), to = %record.path.display(), error = %undo, "Failed to undo rename");
            }
            return Err(TagFsError::store(e, ctx().with_disk_path(&new_path)));
        }

        self.tree.invalidate();
        info!(photo = %photo, from = %record.path.display(), to = %new_path.display(), "Renamed photo");
        Ok(new_path)
    }

    /// Attach `tag` to an already registered photo.
    pub fn add_association(&self, photo: PhotoId, tag: TagId) -> TagFsResult<()> {
        self.store
            .add_tag(photo, tag)
            .map_err(|e| TagFsError::store(e, OpContext::new().with_photo(photo).with_tag(tag)))?;
        self.tree.invalidate();
        info!(photo = %photo, tag = %tag, "Added tag association");
        Ok(())
    }

    /// Move a photo from one tag to another in a single transaction.
    pub fn retag(&self, photo: PhotoId, from: TagId, to: TagId) -> TagFsResult<()> {
        self.store
            .retag(photo, from, to)
            .map_err(|e| TagFsError::store(e, OpContext::new().with_photo(photo).with_tag(from)))?;
        self.tree.invalidate();
        info!(photo = %photo, from = %from, to = %to, "Retagged photo");
        Ok(())
    }

    pub fn create_tag(&self, name: &str, parent: TagId) -> TagFsResult<Tag> {
        let ctx = || OpContext::new().with_virtual_path(name).with_tag(parent);
        if !is_valid_entry_name(name) {
            return Err(TagFsError::invalid_argument("invalid tag name", ctx()));
        }
        let tag = self
            .store
            .create_tag(name, Some(parent))
            .map_err(|e| TagFsError::store(e, ctx()))?;
        self.tree.invalidate();
        info!(tag = %tag.id, parent = %parent, name, "Created tag");
        Ok(tag)
    }

    /// Rename and/or re-parent a tag. Moving a tag below itself is rejected.
    pub fn rename_tag(&self, id: TagId, name: &str, parent: TagId) -> TagFsResult<()> {
        let ctx = || OpContext::new().with_virtual_path(name).with_tag(id);
        if !is_valid_entry_name(name) {
            return Err(TagFsError::invalid_argument("invalid tag name", ctx()));
        }
        if parent == id || self.tree.descendants(id)?.contains(&parent) {
            return Err(TagFsError::invalid_argument(
                "tag cannot move into its own subtree",
                ctx(),
            ));
        }
        self.store
            .update_tag(id, name, Some(parent))
            .map_err(|e| TagFsError::store(e, ctx()))?;
        self.tree.invalidate();
        info!(tag = %id, parent = %parent, name, "Updated tag");
        Ok(())
    }

    /// Delete a tag without sub-tags, dropping its photo associations.
    pub fn remove_tag(&self, id: TagId) -> TagFsResult<()> {
        let ctx = || OpContext::new().with_tag(id);
        let children = self
            .store
            .get_tag_children(Some(id))
            .map_err(|e| TagFsError::store(e, ctx()))?;
        if !children.is_empty() {
            return Err(TagFsError::NotEmpty {
                context: ctx().into_box(),
            });
        }
        self.store
            .delete_tag(id)
            .map_err(|e| TagFsError::store(e, ctx()))?;
        self.tree.invalidate();
        info!(tag = %id, "Removed tag");
        Ok(())
    }

    /// The registered photo whose original is `path`, if any.
    pub fn find_registered(&self, path: &Path) -> TagFsResult<Option<Photo>> {
        self.store
            .find_photo_by_path(path)
            .map_err(|e| TagFsError::store(e, OpContext::new().with_disk_path(path)))
    }

    /// Whether `path` lies inside the managed collection directory.
    pub fn is_managed(&self, path: &Path) -> bool {
        let Ok(root) = self.collection_root() else {
            return false;
        };
        let root = fs::canonicalize(&root).unwrap_or(root);
        canonical_location(path).starts_with(&root)
    }
}

/// Canonicalize through the parent so the file itself need not exist.
fn canonical_location(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .map_or_else(|_| path.to_path_buf(), |parent| parent.join(name)),
        _ => path.to_path_buf(),
    }
}

fn retry_once<T>(what: &str, mut op: impl FnMut() -> StoreResult<T>) -> StoreResult<T> {
    match op() {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(error = %e, "Store call '{what}' failed, retrying once");
            op()
        }
    }
}

/// Create `dir` and any missing ancestors, recording what was created.
fn ensure_dir(dir: &Path, created: &mut Vec<PathBuf>) -> io::Result<()> {
    let mut missing = Vec::new();
    let mut current = Some(dir);
    while let Some(path) = current {
        if path.is_dir() {
            break;
        }
        missing.push(path.to_path_buf());
        current = path.parent();
    }

    for path in missing.into_iter().rev() {
        match fs::create_dir(&path) {
            Ok(()) => created.push(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Atomically create a new file named `name`, or `name-2.ext`, `name-3.ext`, ...
fn claim_name(dir: &Path, name: &str) -> io::Result<(PathBuf, File)> {
    for n in 1..=MAX_NAME_ATTEMPTS {
        let candidate = if n == 1 {
            name.to_string()
        } else {
            suffixed(name, n, true)
        };
        let path = dir.join(&candidate);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for '{name}' after {MAX_NAME_ATTEMPTS} attempts"),
    ))
}

fn copy_into(mut file: File, source: ImportSource<'_>) -> io::Result<()> {
    match source {
        ImportSource::Bytes(bytes) => file.write_all(bytes)?,
        ImportSource::Path(path) => {
            let mut input = File::open(path)?;
            io::copy(&mut input, &mut file)?;
        }
    }
    file.sync_all()
}

/// Undo an import's on-disk effects.
fn discard(path: &Path, created_dirs: &[PathBuf]) {
    if let Err(e) = fs::remove_file(path) {
        error!(path = %path.display(), error = %e, "Failed to remove file of failed import");
    }
    remove_created_dirs(created_dirs);
}

fn remove_created_dirs(created_dirs: &[PathBuf]) {
    for dir in created_dirs.iter().rev() {
        if let Err(e) = fs::remove_dir(dir) {
            warn!(dir = %dir.display(), error = %e, "Failed to remove directory of failed import");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfig;
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        store: Arc<MemoryStore>,
        pipeline: ImportPipeline<MemoryStore>,
    }

    fn fixture(dated: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        store.insert_tag(1, "Vacation", None);
        store.insert_tag(2, "Beach", Some(1));
        let store = Arc::new(store);
        let tree = Arc::new(TagTree::new(Arc::clone(&store), false, None));
        let config = Arc::new(StaticConfig::new(dir.path().join("collection")).dated(dated));
        let pipeline = ImportPipeline::new(tree, config, true);
        Fixture {
            dir,
            store,
            pipeline,
        }
    }

    fn beach() -> TagChain {
        TagChain::from_ids([TagId::new(1), TagId::new(2)])
    }

    fn job<'a>(bytes: &'a [u8], name: &'a str) -> ImportJob<'a> {
        ImportJob {
            source: ImportSource::Bytes(bytes),
            chain: beach(),
            suggested_name: name,
        }
    }

    #[test]
    fn test_import_creates_file_and_record() {
        let f = fixture(false);
        let photo = f.pipeline.import_file(job(b"pixels", "p1.jpg")).unwrap();

        assert_eq!(photo.path, f.dir.path().join("collection").join("p1.jpg"));
        assert_eq!(fs::read(&photo.path).unwrap(), b"pixels");
        let record = f.store.get_photo(photo.id).unwrap();
        assert!(record.tags.contains(&TagId::new(2)));
    }

    #[test]
    fn test_dated_layout() {
        let f = fixture(true);
        let photo = f.pipeline.import_file(job(b"x", "p1.jpg")).unwrap();

        let rel = photo
            .path
            .strip_prefix(f.dir.path().join("collection"))
            .unwrap();
        assert_eq!(rel.components().count(), 4);
        assert_eq!(rel.file_name().unwrap(), "p1.jpg");
    }

    #[test]
    fn test_collision_gets_suffix() {
        let f = fixture(false);
        let first = f.pipeline.import_file(job(b"a", "p1.jpg")).unwrap();
        let second = f.pipeline.import_file(job(b"b", "p1.jpg")).unwrap();

        assert_eq!(first.path.file_name().unwrap(), "p1.jpg");
        assert_eq!(second.path.file_name().unwrap(), "p1-2.jpg");
        assert_eq!(fs::read(&first.path).unwrap(), b"a");
        assert_eq!(fs::read(&second.path).unwrap(), b"b");
    }

    #[test]
    fn test_transient_store_failure_is_retried() {
        let f = fixture(false);
        f.store.fail_next_creates(1);
        let photo = f.pipeline.import_file(job(b"x", "p1.jpg")).unwrap();
        assert!(photo.path.exists());
        assert_eq!(f.store.photo_count(), 1);
    }

    #[test]
    fn test_persistent_store_failure_removes_copy_and_dirs() {
        let f = fixture(true);
        f.store.fail_next_creates(2);

        let err = f.pipeline.import_file(job(b"x", "p1.jpg")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreFailure);
        assert!(!f.dir.path().join("collection").exists());
        assert_eq!(f.store.photo_count(), 0);
    }

    #[test]
    fn test_missing_source_aborts_before_store() {
        let f = fixture(false);
        let missing = f.dir.path().join("nope.jpg");
        let err = f
            .pipeline
            .import_file(ImportJob {
                source: ImportSource::Path(&missing),
                chain: beach(),
                suggested_name: "nope.jpg",
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(f.store.photo_count(), 0);
        assert!(!f.dir.path().join("collection").exists());
    }

    #[test]
    fn test_root_and_bad_names_rejected() {
        let f = fixture(false);
        let err = f
            .pipeline
            .import_file(ImportJob {
                chain: TagChain::root(),
                ..job(b"x", "p.jpg")
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        let err = f.pipeline.import_file(job(b"x", "..")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_removing_last_tag_deletes_managed_file() {
        let f = fixture(false);
        let photo = f.pipeline.import_file(job(b"x", "p1.jpg")).unwrap();

        f.pipeline.remove_association(photo.id, TagId::new(2)).unwrap();
        assert!(!photo.path.exists());
        assert_eq!(f.store.photo_count(), 0);
    }

    #[test]
    fn test_removing_tag_keeps_external_file() {
        let f = fixture(false);
        let external = f.dir.path().join("library.jpg");
        fs::write(&external, b"original").unwrap();
        let id = f.store.insert_photo(50, &external, &[2]);

        f.pipeline.remove_association(id, TagId::new(2)).unwrap();
        assert!(external.exists());
        assert!(f.store.get_photo(id).unwrap().tags.is_empty());
    }

    #[test]
    fn test_remove_unattached_tag_is_not_found() {
        let f = fixture(false);
        let photo = f.pipeline.import_file(job(b"x", "p1.jpg")).unwrap();
        let err = f
            .pipeline
            .remove_association(photo.id, TagId::new(1))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_rename_within_collection() {
        let f = fixture(false);
        let photo = f.pipeline.import_file(job(b"x", "p1.jpg")).unwrap();

        let renamed = f.pipeline.rename_within_tag(photo.id, "sunset.jpg").unwrap();
        assert!(!photo.path.exists());
        assert_eq!(fs::read(&renamed).unwrap(), b"x");
        assert_eq!(f.store.get_photo(photo.id).unwrap().path, renamed);
    }

    #[test]
    fn test_rename_refuses_external_and_existing() {
        let f = fixture(false);
        let external = f.dir.path().join("library.jpg");
        fs::write(&external, b"original").unwrap();
        let id = f.store.insert_photo(50, &external, &[2]);
        let err = f.pipeline.rename_within_tag(id, "x.jpg").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        let a = f.pipeline.import_file(job(b"a", "a.jpg")).unwrap();
        f.pipeline.import_file(job(b"b", "b.jpg")).unwrap();
        let err = f.pipeline.rename_within_tag(a.id, "b.jpg").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_tag_moves_are_cycle_checked() {
        let f = fixture(false);
        let err = f
            .pipeline
            .rename_tag(TagId::new(1), "Vacation", TagId::new(2))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = f.pipeline.remove_tag(TagId::new(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEmpty);
        f.pipeline.remove_tag(TagId::new(2)).unwrap();
        assert_eq!(f.store.tag_count(), 1);
    }

    #[test]
    fn test_collection_root_is_cached() {
        let f = fixture(false);
        let root = f.pipeline.collection_root().unwrap();
        assert_eq!(root, f.dir.path().join("collection"));
        f.pipeline.invalidate_config();
        assert_eq!(f.pipeline.collection_root().unwrap(), root);
    }
}
