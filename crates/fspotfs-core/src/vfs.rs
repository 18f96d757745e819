//! Operation dispatch for mount backends.
//!
//! [`VfsCore`] answers one method per filesystem operation. Reads run
//! concurrently under a shared gate, each against a snapshot of the tag tree
//! taken at entry. Mutations take the gate exclusively for the whole
//! file-and-database write plus the cache invalidation, so a reader never
//! sees a half-finished import.

use crate::config::ConfigProvider;
use crate::error::{ErrorKind, OpContext, TagFsError, TagFsResult};
use crate::import::{ImportJob, ImportPipeline, ImportSource, PhotoRef};
use crate::model::{Photo, PhotoId, TagChain, TagId};
use crate::naming::is_valid_entry_name;
use crate::path::VirtualPath;
use crate::projector::{DirEntry, EntryMetadata, EntryProjector};
use crate::resolver::{Location, PathResolver};
use crate::store::PhotoStore;
use crate::tree::{TagSnapshot, TagTree};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone)]
pub struct VfsOptions {
    pub mode: AccessMode,
    /// Show a photo in every tag directory it is tagged with.
    pub repeated: bool,
    /// Drop cached listings after this long. `None` waits for the next mutation.
    pub refresh_interval: Option<Duration>,
    /// Delete imported files once their last tag is removed.
    pub delete_orphaned_imports: bool,
}

impl Default for VfsOptions {
    fn default() -> Self {
        Self {
            mode: AccessMode::ReadWrite,
            repeated: false,
            refresh_interval: Some(crate::config::DEFAULT_REFRESH_INTERVAL),
            delete_orphaned_imports: true,
        }
    }
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedEntry {
    pub photo: PhotoRef,
    /// Where the new photo is visible in the tree.
    pub path: VirtualPath,
}

pub struct VfsCore<S> {
    tree: Arc<TagTree<S>>,
    projector: EntryProjector,
    pipeline: Option<ImportPipeline<S>>,
    gate: RwLock<()>,
}

impl<S: PhotoStore> VfsCore<S> {
    /// Build the engine. In read-only mode no import pipeline exists and every
    /// write is rejected.
    pub fn new(store: Arc<S>, config: Arc<dyn ConfigProvider>, options: VfsOptions) -> Self {
        let tree = Arc::new(TagTree::new(store, options.repeated, options.refresh_interval));
        let writable = options.mode == AccessMode::ReadWrite;
        let pipeline = writable.then(|| {
            ImportPipeline::new(Arc::clone(&tree), config, options.delete_orphaned_imports)
        });
        Self {
            tree,
            projector: EntryProjector::new(writable),
            pipeline,
            gate: RwLock::new(()),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.pipeline.is_none()
    }

    pub fn tree(&self) -> &TagTree<S> {
        &self.tree
    }

    /// The managed collection directory, when writable and configured.
    pub fn collection_root(&self) -> Option<PathBuf> {
        self.pipeline.as_ref()?.collection_root().ok()
    }

    /// Metadata for a file a backend is still buffering.
    pub fn staged_metadata(&self, size: u64) -> EntryMetadata {
        self.projector.staged(size)
    }

    /// Drop cached listings and the cached collection root.
    pub fn refresh(&self) {
        let _guard = self.gate.write();
        self.tree.invalidate();
        if let Some(pipeline) = &self.pipeline {
            pipeline.invalidate_config();
        }
        info!("Refreshed tag tree and configuration");
    }

    pub fn resolve(&self, path: &VirtualPath) -> TagFsResult<Location> {
        let _guard = self.gate.read();
        let snap = self.tree.snapshot();
        surface(PathResolver::resolve(&snap, path))
    }

    pub fn stat(&self, path: &VirtualPath) -> TagFsResult<EntryMetadata> {
        let _guard = self.gate.read();
        let snap = self.tree.snapshot();
        surface(self.stat_in(&snap, path))
    }

    /// Entries of a directory, sorted by name.
    pub fn list(&self, path: &VirtualPath) -> TagFsResult<Vec<DirEntry>> {
        let _guard = self.gate.read();
        let snap = self.tree.snapshot();
        surface(self.list_in(&snap, path))
    }

    /// The on-disk original a photo entry points at.
    pub fn read_link(&self, path: &VirtualPath) -> TagFsResult<PathBuf> {
        let _guard = self.gate.read();
        let snap = self.tree.snapshot();
        surface(Self::read_link_in(&snap, path))
    }

    /// Check that a new file may be created at `path`.
    ///
    /// Nothing is written; the bytes arrive later through [`write`](Self::write).
    pub fn create(&self, path: &VirtualPath) -> TagFsResult<()> {
        self.pipeline(path)?;
        let _guard = self.gate.read();
        let snap = self.tree.snapshot();
        surface(self.new_entry_target(&snap, path).map(|_| ()))
    }

    /// Import `source` as a new photo in the directory containing `path`.
    pub fn write(&self, path: &VirtualPath, source: ImportSource<'_>) -> TagFsResult<ImportedEntry> {
        let pipeline = self.pipeline(path)?;
        let _guard = self.gate.write();
        let (chain, name) = {
            let snap = self.tree.snapshot();
            let (chain, name) = surface(self.writable_target(&snap, path))?;
            (chain, name.to_string())
        };

        let photo = pipeline.import_file(ImportJob {
            source,
            chain: chain.clone(),
            suggested_name: &name,
        })?;

        let visible = self.visible_path(path, &chain, photo.id);
        Ok(ImportedEntry {
            photo,
            path: visible,
        })
    }

    /// Remove a photo entry, which drops the directory's tag from the photo.
    pub fn unlink(&self, path: &VirtualPath) -> TagFsResult<()> {
        let pipeline = self.pipeline(path)?;
        let _guard = self.gate.write();
        let location = {
            let snap = self.tree.snapshot();
            surface(PathResolver::resolve(&snap, path))?
        };
        match location {
            Location::PhotoLeaf { chain, photo } => {
                let tag = terminal(&chain, path)?;
                surface(pipeline.remove_association(photo, tag))
            }
            Location::TagNode(_) => Err(TagFsError::IsDirectory {
                context: OpContext::new().with_virtual_path(path).into_box(),
            }),
            Location::Root => Err(root_denied(path)),
        }
    }

    /// Rename or move an entry.
    ///
    /// Inside one directory a photo's file is renamed. Between directories the
    /// photo is re-tagged, renaming its file first if the name changes. Tag
    /// directories are renamed or re-parented.
    pub fn rename(&self, from: &VirtualPath, to: &VirtualPath) -> TagFsResult<()> {
        let pipeline = self.pipeline(from)?;
        let _guard = self.gate.write();
        let (source, source_photo, target_chain, target_name) = {
            let snap = self.tree.snapshot();
            let source = surface(PathResolver::resolve(&snap, from))?;
            if from == to {
                return Ok(());
            }
            let source_photo = match &source {
                Location::PhotoLeaf { chain, photo } => Some(surface(find_photo(&snap, chain, *photo, from))?),
                _ => None,
            };
            let (target_chain, target_name) = surface(self.new_entry_target(&snap, to))?;
            (source, source_photo, target_chain, target_name.to_string())
        };
        let source_name = from.file_name().unwrap_or_default();

        match source {
            Location::Root => Err(root_denied(from)),
            Location::TagNode(chain) => {
                if chain.len() == 1 {
                    return Err(TagFsError::permission_denied(
                        "top-level tags are part of the root",
                        OpContext::new().with_virtual_path(from),
                    ));
                }
                let id = terminal(&chain, from)?;
                let parent = terminal(&target_chain, to)?;
                surface(pipeline.rename_tag(id, &target_name, parent))
            }
            Location::PhotoLeaf { chain, photo } => {
                let from_tag = terminal(&chain, from)?;
                let to_tag = terminal(&target_chain, to)?;

                if chain == target_chain {
                    return surface(pipeline.rename_within_tag(photo, &target_name).map(|_| ()));
                }

                if let Some(record) = &source_photo {
                    self.ensure_shown_under(record, Some(from_tag), to_tag, to)?;
                }
                let original_name = source_photo.as_ref().and_then(Photo::file_name);

                let renamed = target_name != source_name;
                if renamed {
                    pipeline.rename_within_tag(photo, &target_name)?;
                }

                if let Err(e) = pipeline.retag(photo, from_tag, to_tag) {
                    if let (true, Some(original)) = (renamed, original_name) {
                        warn!(photo = %photo, "Retag failed, restoring file name");
                        if let Err(undo) = pipeline.rename_within_tag(photo, original) {
                            error!(photo = %photo, error = %undo, "Failed to restore file name");
                        }
                    }
                    return surface(Err(e));
                }
                Ok(())
            }
        }
    }

    /// Create a sub-tag.
    pub fn mkdir(&self, path: &VirtualPath) -> TagFsResult<Location> {
        let pipeline = self.pipeline(path)?;
        let _guard = self.gate.write();
        let (chain, name) = {
            let snap = self.tree.snapshot();
            let (chain, name) = surface(self.new_entry_target(&snap, path))?;
            (chain, name.to_string())
        };
        let parent = terminal(&chain, path)?;
        let tag = pipeline.create_tag(&name, parent)?;
        Ok(Location::TagNode(chain.child(tag.id)))
    }

    /// Remove a tag without sub-tags.
    pub fn rmdir(&self, path: &VirtualPath) -> TagFsResult<()> {
        let pipeline = self.pipeline(path)?;
        let _guard = self.gate.write();
        let location = {
            let snap = self.tree.snapshot();
            surface(PathResolver::resolve(&snap, path))?
        };
        match location {
            Location::Root => Err(root_denied(path)),
            Location::PhotoLeaf { .. } => Err(TagFsError::NotDirectory {
                context: OpContext::new().with_virtual_path(path).into_box(),
            }),
            Location::TagNode(chain) if chain.len() == 1 => Err(TagFsError::permission_denied(
                "top-level tags are part of the root",
                OpContext::new().with_virtual_path(path),
            )),
            Location::TagNode(chain) => surface(pipeline.remove_tag(terminal(&chain, path)?)),
        }
    }

    /// Link an on-disk file into a tag directory.
    ///
    /// A registered photo gains the directory's tag; an unregistered regular
    /// file is imported.
    pub fn symlink(&self, target: &Path, link: &VirtualPath) -> TagFsResult<Location> {
        let pipeline = self.pipeline(link)?;
        let _guard = self.gate.write();
        let (chain, name) = {
            let snap = self.tree.snapshot();
            let (chain, name) = surface(self.new_entry_target(&snap, link))?;
            (chain, name.to_string())
        };
        let tag = terminal(&chain, link)?;
        let ctx = || OpContext::new().with_virtual_path(link).with_disk_path(target);

        if !target.is_absolute() {
            return Err(TagFsError::NotSupported {
                reason: "link target must be absolute",
                context: ctx().into_box(),
            });
        }

        if let Some(photo) = pipeline.find_registered(target)? {
            self.ensure_shown_under(&photo, None, tag, link)?;
            pipeline.add_association(photo.id, tag)?;
            return Ok(Location::PhotoLeaf {
                chain,
                photo: photo.id,
            });
        }

        if !target.is_file() {
            return Err(TagFsError::NotSupported {
                reason: "link target is not a regular file",
                context: ctx().into_box(),
            });
        }

        let photo = pipeline.import_file(ImportJob {
            source: ImportSource::Path(target),
            chain: chain.clone(),
            suggested_name: &name,
        })?;
        Ok(Location::PhotoLeaf {
            chain,
            photo: photo.id,
        })
    }

    /// Fail if giving `photo` the tag `to` (and dropping `dropped`) would still
    /// leave it hidden by one of `to`'s sub-tags.
    fn ensure_shown_under(
        &self,
        photo: &Photo,
        dropped: Option<TagId>,
        to: TagId,
        path: &VirtualPath,
    ) -> TagFsResult<()> {
        if self.tree.is_repeated() {
            return Ok(());
        }
        let deeper = self.tree.descendants(to)?;
        if photo.tags.iter().any(|t| Some(*t) != dropped && deeper.contains(t)) {
            debug!(photo = %photo.id, tag = %to, "Photo would stay hidden below the target tag");
            return Err(TagFsError::invalid_argument(
                "photo is already shown in a sub-tag of the target directory",
                OpContext::new().with_virtual_path(path).with_photo(photo.id),
            ));
        }
        Ok(())
    }

    fn pipeline(&self, path: &VirtualPath) -> TagFsResult<&ImportPipeline<S>> {
        self.pipeline.as_ref().ok_or_else(|| TagFsError::ReadOnly {
            context: OpContext::new().with_virtual_path(path).into_box(),
        })
    }

    fn read_link_in(snap: &TagSnapshot<'_, S>, path: &VirtualPath) -> TagFsResult<PathBuf> {
        match PathResolver::resolve(snap, path)? {
            Location::PhotoLeaf { chain, photo } => Ok(find_photo(snap, &chain, photo, path)?.path),
            _ => Err(TagFsError::invalid_argument(
                "not a link",
                OpContext::new().with_virtual_path(path),
            )),
        }
    }

    fn stat_in(&self, snap: &TagSnapshot<'_, S>, path: &VirtualPath) -> TagFsResult<EntryMetadata> {
        match PathResolver::resolve(snap, path)? {
            Location::Root => Ok(self.projector.root()),
            Location::TagNode(chain) => {
                let photos = snap.photos(&chain)?;
                Ok(self.projector.tag(photos.iter().map(|e| &e.photo)))
            }
            Location::PhotoLeaf { chain, photo } => {
                Ok(self.projector.photo(&find_photo(snap, &chain, photo, path)?))
            }
        }
    }

    fn list_in(&self, snap: &TagSnapshot<'_, S>, path: &VirtualPath) -> TagFsResult<Vec<DirEntry>> {
        let chain = match PathResolver::resolve(snap, path)? {
            Location::Root => TagChain::root(),
            Location::TagNode(chain) => chain,
            Location::PhotoLeaf { .. } => {
                return Err(TagFsError::NotDirectory {
                    context: OpContext::new().with_virtual_path(path).into_box(),
                });
            }
        };

        let children = snap.children(&chain)?;
        let photos = snap.photos(&chain)?;
        let mut entries = Vec::with_capacity(children.len() + photos.len());

        for child in children.iter() {
            let child_chain = chain.child(child.id);
            let child_photos = snap.photos(&child_chain)?;
            entries.push(DirEntry {
                name: child.name.clone(),
                path: path.join(&child.name),
                metadata: self.projector.tag(child_photos.iter().map(|e| &e.photo)),
                location: Location::TagNode(child_chain),
            });
        }
        for entry in photos.iter() {
            entries.push(DirEntry {
                name: entry.name.clone(),
                path: path.join(&entry.name),
                metadata: self.projector.photo(&entry.photo),
                location: Location::PhotoLeaf {
                    chain: chain.clone(),
                    photo: entry.photo.id,
                },
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(path = %path, count = entries.len(), "Listed directory");
        Ok(entries)
    }

    /// Parent chain and name for an entry that must not exist yet.
    fn new_entry_target<'p>(
        &self,
        snap: &TagSnapshot<'_, S>,
        path: &'p VirtualPath,
    ) -> TagFsResult<(TagChain, &'p str)> {
        let (chain, name) = self.writable_target(snap, path)?;
        let exists = snap.children(&chain)?.iter().any(|e| e.name == name)
            || snap.photos(&chain)?.iter().any(|e| e.name == name);
        if exists {
            return Err(TagFsError::already_exists(
                OpContext::new().with_virtual_path(path),
            ));
        }
        Ok((chain, name))
    }

    /// Parent chain and name of `path`, requiring the parent to be a tag directory.
    fn writable_target<'p>(
        &self,
        snap: &TagSnapshot<'_, S>,
        path: &'p VirtualPath,
    ) -> TagFsResult<(TagChain, &'p str)> {
        let Some((parent, name)) = path.split() else {
            return Err(root_denied(path));
        };
        if !is_valid_entry_name(name) {
            return Err(TagFsError::invalid_argument(
                "invalid entry name",
                OpContext::new().with_virtual_path(path),
            ));
        }
        match PathResolver::resolve(snap, &parent)? {
            Location::Root => Err(root_denied(path)),
            Location::PhotoLeaf { .. } => Err(TagFsError::NotDirectory {
                context: OpContext::new().with_virtual_path(&parent).into_box(),
            }),
            Location::TagNode(chain) => Ok((chain, name)),
        }
    }

    /// Where a freshly imported photo shows up, falling back to the requested path.
    fn visible_path(&self, requested: &VirtualPath, chain: &TagChain, photo: PhotoId) -> VirtualPath {
        let snap = self.tree.snapshot();
        let parent = requested.parent().unwrap_or_else(VirtualPath::root);
        snap.photos(chain)
            .ok()
            .and_then(|photos| {
                photos
                    .iter()
                    .find(|e| e.photo.id == photo)
                    .map(|e| parent.join(&e.name))
            })
            .unwrap_or_else(|| requested.clone())
    }
}

fn find_photo<S: PhotoStore>(
    snap: &TagSnapshot<'_, S>,
    chain: &TagChain,
    photo: PhotoId,
    path: &VirtualPath,
) -> TagFsResult<Photo> {
    snap.photos(chain)?
        .iter()
        .find(|e| e.photo.id == photo)
        .map(|e| e.photo.clone())
        .ok_or_else(|| TagFsError::not_found(OpContext::new().with_virtual_path(path).with_photo(photo)))
}

fn terminal(chain: &TagChain, path: &VirtualPath) -> TagFsResult<TagId> {
    chain.last().ok_or_else(|| root_denied(path))
}

fn root_denied(path: &VirtualPath) -> TagFsError {
    TagFsError::permission_denied("root is not writable", OpContext::new().with_virtual_path(path))
}

/// Report invariant violations to the operator and as NotFound to the caller.
fn surface<T>(result: TagFsResult<T>) -> TagFsResult<T> {
    match result {
        Err(e) if e.kind() == ErrorKind::Inconsistent => {
            error!(error = %e, "Inconsistent collection state");
            let context = e.context().cloned().unwrap_or_default();
            Err(TagFsError::not_found(context))
        }
        other => other,
    }
}
