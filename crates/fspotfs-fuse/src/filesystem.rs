//! FUSE filesystem over the tag tree.
//!
//! This module implements the fuser `Filesystem` trait for mounting an F-Spot
//! photo database as a directory tree: tags become directories and photos
//! become symlinks to the originals.
//!
//! # Operations
//!
//! | Operation | Notes |
//! |-----------|-------|
//! | lookup/forget | `lookup` counts a reference, `forget` evicts at 0 |
//! | getattr/setattr | `setattr` only truncates files still being written |
//! | readlink | Absolute path of the original |
//! | readdir | Uses `get_or_insert_no_lookup_inc`, resumes by name hash |
//! | create/write/read | Bytes are staged in memory, imported on close |
//! | flush/release | The last close imports the staged bytes |
//! | unlink | Drops the directory's tag from the photo |
//! | mkdir/rmdir | Create or remove a tag |
//! | symlink | Tags a registered photo, imports an unregistered file |
//! | rename | Retags photos, renames or moves tags. Never replaces |
//! | statfs | Statistics of the collection directory's filesystem |
//!
//! Every inode keeps only the virtual path it was handed out for. Requests
//! resolve that path again, so a stale inode answers `ENOENT` and the kernel
//! looks the entry up afresh.

use crate::attr::{entry_attr, file_type, BLOCK_SIZE};
use crate::config::MountConfig;
use crate::error::{FuseError, FuseResult};
use crate::handles::{FuseHandle, FuseHandleTable, StagedFile, StagedFiles};
use crate::inode::{kind_of, InodeKind, InodeTable, ROOT_INODE};
use fspotfs_core::{
    EntryKind, EntryMetadata, ImportSource, OpContext, PhotoStore, TagFsError, VfsCore, VirtualPath,
};
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, Notifier, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;
use tracing::{debug, error, info, trace, warn};

/// FUSE filesystem for an F-Spot photo database.
pub struct TagFs<S: PhotoStore> {
    vfs: Arc<VfsCore<S>>,
    inodes: InodeTable,
    handles: FuseHandleTable,
    /// Created files not imported yet.
    staged: StagedFiles,
    config: MountConfig,
    /// Kernel notifier for cache invalidation, set by the backend after mounting.
    notifier: Arc<OnceLock<Notifier>>,
}

impl<S: PhotoStore> TagFs<S> {
    pub fn new(vfs: Arc<VfsCore<S>>, config: MountConfig) -> Self {
        Self {
            vfs,
            inodes: InodeTable::new(),
            handles: FuseHandleTable::new_auto_id(),
            staged: StagedFiles::new(),
            config,
            notifier: Arc::new(OnceLock::new()),
        }
    }

    /// Cell the backend fills with the session's notifier once mounted.
    pub fn notifier_cell(&self) -> Arc<OnceLock<Notifier>> {
        Arc::clone(&self.notifier)
    }

    pub fn vfs(&self) -> &Arc<VfsCore<S>> {
        &self.vfs
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    /// Stable readdir cookie for an entry name.
    ///
    /// Positions shift when entries come and go between two `readdir` calls,
    /// so the cookie identifies the last returned entry by name instead. The
    /// sign bit is cleared and 0 is reserved for "start from the beginning".
    fn name_to_offset(name: &str) -> i64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        let masked = hasher.finish() & 0x7FFF_FFFF_FFFF_FFFF;
        let offset = i64::from_ne_bytes(masked.to_ne_bytes());

        if offset == 0 { 1 } else { offset }
    }

    fn attr(&self, ino: u64, metadata: &EntryMetadata) -> FileAttr {
        entry_attr(ino, metadata, self.config.uid, self.config.gid)
    }

    fn resolve_inode(&self, ino: u64) -> FuseResult<(VirtualPath, InodeKind)> {
        self.inodes.resolve(ino).ok_or(FuseError::InvalidInode(ino))
    }

    /// Path of `name` inside directory inode `parent`.
    fn child_path(&self, parent: u64, name: &OsStr) -> FuseResult<VirtualPath> {
        let (dir, kind) = self.resolve_inode(parent)?;
        if !kind.is_directory() {
            return Err(TagFsError::NotDirectory {
                context: OpContext::new().with_virtual_path(&dir).into_box(),
            }
            .into());
        }
        let Some(name) = name.to_str() else {
            return Err(TagFsError::invalid_argument(
                "name is not valid UTF-8",
                OpContext::new().with_virtual_path(&dir),
            )
            .into());
        };
        Ok(dir.join(name))
    }

    /// Current metadata of an inode.
    fn metadata(&self, ino: u64) -> FuseResult<EntryMetadata> {
        if let Some(size) = self.staged.size(ino) {
            return Ok(self.vfs.staged_metadata(size));
        }
        let (path, _) = self.resolve_inode(ino)?;
        Ok(self.vfs.stat(&path)?)
    }

    fn getattr_inode(&self, ino: u64) -> FuseResult<FileAttr> {
        let metadata = self.metadata(ino)?;
        Ok(self.attr(ino, &metadata))
    }

    /// Looks up `name` in `parent`, counting one kernel reference.
    fn lookup_child(&self, parent: u64, name: &OsStr) -> FuseResult<FileAttr> {
        let path = self.child_path(parent, name)?;

        if let Some(ino) = self.staged.find(&path) {
            self.inodes.get_or_insert(&path, InodeKind::Staged);
            return self.getattr_inode(ino);
        }

        let metadata = self.vfs.stat(&path)?;
        let ino = self.inodes.get_or_insert(&path, kind_of(metadata.kind));
        Ok(self.attr(ino, &metadata))
    }

    /// Directory entries of `ino`, "." and ".." first, then sorted by name.
    fn list_directory(&self, ino: u64) -> FuseResult<Vec<(u64, FileType, String)>> {
        let (path, kind) = self.resolve_inode(ino)?;
        if !kind.is_directory() {
            return Err(TagFsError::NotDirectory {
                context: OpContext::new().with_virtual_path(&path).into_box(),
            }
            .into());
        }

        let parent_ino = path
            .parent()
            .and_then(|parent| self.inodes.get_inode(&parent))
            .unwrap_or(ROOT_INODE);

        let mut children: Vec<(u64, FileType, String)> = self
            .vfs
            .list(&path)?
            .into_iter()
            .map(|entry| {
                let child = self
                    .inodes
                    .get_or_insert_no_lookup_inc(&entry.path, kind_of(entry.metadata.kind));
                (child, file_type(entry.metadata.kind), entry.name)
            })
            .collect();

        for (child, name, _) in self.staged.children_of(&path) {
            if !children.iter().any(|(_, _, existing)| *existing == name) {
                children.push((child, FileType::RegularFile, name));
            }
        }
        children.sort_by(|a, b| a.2.cmp(&b.2));

        let mut entries = Vec::with_capacity(children.len() + 2);
        entries.push((ino, FileType::Directory, ".".to_string()));
        entries.push((parent_ino, FileType::Directory, "..".to_string()));
        entries.extend(children);
        Ok(entries)
    }

    /// Stages a new file and opens a handle on it.
    fn create_staged(&self, parent: u64, name: &OsStr, flags: i32) -> FuseResult<(FileAttr, u64)> {
        let path = self.child_path(parent, name)?;
        if self.staged.find(&path).is_some() {
            return Err(TagFsError::already_exists(OpContext::new().with_virtual_path(&path)).into());
        }
        self.vfs.create(&path)?;

        // A stale inode may still carry this path from a removed entry
        self.inodes.invalidate_path(&path);
        let ino = self.inodes.get_or_insert(&path, InodeKind::Staged);
        self.staged.create(ino, path.clone());

        let fh = self.handles.insert_auto(FuseHandle {
            ino,
            writable: is_writable(flags),
        });
        debug!(path = %path, inode = ino, fh, "Staged new file");
        Ok((self.attr(ino, &self.vfs.staged_metadata(0)), fh))
    }

    fn open_inode(&self, ino: u64, flags: i32) -> FuseResult<u64> {
        let (path, kind) = self.resolve_inode(ino)?;
        if self.staged.add_handle(ino) {
            let writable = is_writable(flags);
            if writable && flags & libc::O_TRUNC != 0 {
                self.staged.with_buffer(ino, |buffer| buffer.truncate(0)).transpose()?;
            }
            return Ok(self.handles.insert_auto(FuseHandle { ino, writable }));
        }

        let kind = match kind {
            InodeKind::Staged => kind_of(self.vfs.stat(&path)?.kind),
            other => other,
        };
        Err(match kind {
            InodeKind::Root | InodeKind::Directory => TagFsError::IsDirectory {
                context: OpContext::new().with_virtual_path(&path).into_box(),
            }
            .into(),
            InodeKind::Link => FuseError::Io(std::io::Error::from_raw_os_error(libc::ELOOP)),
            InodeKind::Staged => FuseError::InvalidInode(ino),
        })
    }

    fn handle(&self, fh: u64) -> FuseResult<FuseHandle> {
        self.handles.get(&fh).map(|h| *h).ok_or(FuseError::InvalidHandle(fh))
    }

    fn read_staged(&self, ino: u64, fh: u64, offset: i64, size: u32) -> FuseResult<Vec<u8>> {
        self.handle(fh)?;
        let offset = u64::try_from(offset).map_err(|_| invalid_offset())?;
        self.staged
            .with_buffer(ino, |buffer| buffer.read(offset, size as usize).to_vec())
            .ok_or(FuseError::InvalidHandle(fh))
    }

    fn write_staged(&self, ino: u64, fh: u64, offset: i64, data: &[u8]) -> FuseResult<usize> {
        let handle = self.handle(fh)?;
        if !handle.writable {
            return Err(FuseError::WrongHandleType);
        }
        let offset = u64::try_from(offset).map_err(|_| invalid_offset())?;
        let written = self
            .staged
            .with_buffer(ino, |buffer| buffer.write(offset, data))
            .ok_or(FuseError::InvalidHandle(fh))??;
        Ok(written)
    }

    /// Imports a staged file, or drops it if nothing was written.
    ///
    /// Either way the staged inode is retired: the imported photo is a link
    /// and gets a fresh inode on its next lookup.
    fn commit(&self, ino: u64, file: StagedFile) -> FuseResult<()> {
        let target = file.buffer.target().clone();
        self.inodes.invalidate_path(&target);
        self.invalidate_kernel_entry(&target);

        if !file.buffer.is_dirty() {
            debug!(path = %target, inode = ino, "Dropping file that was never written");
            return Ok(());
        }

        let content = file.buffer.into_content();
        match self.vfs.write(&target, ImportSource::Bytes(&content)) {
            Ok(imported) => {
                info!(
                    path = %imported.path,
                    photo = %imported.photo.id,
                    bytes = content.len(),
                    "Imported photo"
                );
                Ok(())
            }
            Err(e) => {
                error!(path = %target, inode = ino, error = %e, "Import failed");
                Err(e.into())
            }
        }
    }

    /// Drops the kernel's cached dentry for `path`.
    ///
    /// Sent from a separate thread: the kernel takes the parent directory
    /// lock, which a lookup waiting on this session may hold.
    fn invalidate_kernel_entry(&self, path: &VirtualPath) {
        let Some(notifier) = self.notifier.get().cloned() else {
            return;
        };
        let Some((parent, name)) = path.split() else {
            return;
        };
        let Some(parent_ino) = self.inodes.get_inode(&parent) else {
            return;
        };
        let name = name.to_string();
        std::thread::spawn(move || {
            if let Err(e) = notifier.inval_entry(parent_ino, OsStr::new(&name)) {
                debug!(parent = parent_ino, name, error = %e, "Kernel entry invalidation failed");
            }
        });
    }

    /// Imports on the close of the last handle, so `close()` sees the error.
    fn flush_inode(&self, ino: u64) -> FuseResult<()> {
        let dirty = self.staged.with_buffer(ino, |buffer| buffer.is_dirty()).unwrap_or(false);
        if !dirty || !self.staged.is_last_handle(ino) {
            return Ok(());
        }
        match self.staged.take(ino) {
            Some(file) => self.commit(ino, file),
            None => Ok(()),
        }
    }

    fn release_handle(&self, ino: u64, fh: u64) -> FuseResult<()> {
        if self.handles.remove(&fh).is_none() {
            return Err(FuseError::InvalidHandle(fh));
        }
        match self.staged.release_handle(ino) {
            Some(file) => self.commit(ino, file),
            None => Ok(()),
        }
    }

    /// Truncates a staged file. Size changes on photo links are ignored.
    fn truncate(&self, ino: u64, size: u64) -> FuseResult<()> {
        if let Some(result) = self.staged.with_buffer(ino, |buffer| buffer.truncate(size)) {
            return Ok(result?);
        }
        if self.metadata(ino)?.kind == EntryKind::Directory {
            let (path, _) = self.resolve_inode(ino)?;
            return Err(TagFsError::IsDirectory {
                context: OpContext::new().with_virtual_path(&path).into_box(),
            }
            .into());
        }
        Ok(())
    }

    fn unlink_entry(&self, parent: u64, name: &OsStr) -> FuseResult<()> {
        let path = self.child_path(parent, name)?;
        if let Some(ino) = self.staged.find(&path) {
            self.staged.take(ino);
            self.inodes.invalidate_path(&path);
            debug!(path = %path, "Discarded staged file");
            return Ok(());
        }
        self.vfs.unlink(&path)?;
        self.inodes.invalidate_path(&path);
        Ok(())
    }

    fn mkdir_entry(&self, parent: u64, name: &OsStr) -> FuseResult<FileAttr> {
        let path = self.child_path(parent, name)?;
        self.vfs.mkdir(&path)?;
        let metadata = self.vfs.stat(&path)?;
        let ino = self.inodes.get_or_insert(&path, InodeKind::Directory);
        Ok(self.attr(ino, &metadata))
    }

    fn rmdir_entry(&self, parent: u64, name: &OsStr) -> FuseResult<()> {
        let path = self.child_path(parent, name)?;
        self.vfs.rmdir(&path)?;
        self.inodes.invalidate_path(&path);
        Ok(())
    }

    /// Links `target` into `parent`. The entry may become visible under a
    /// different name than requested when another photo already holds it.
    fn symlink_entry(&self, parent: u64, name: &OsStr, target: &Path) -> FuseResult<FileAttr> {
        let path = self.child_path(parent, name)?;
        let location = self.vfs.symlink(target, &path)?;

        let dir = path.parent().unwrap_or_else(VirtualPath::root);
        let visible = self
            .vfs
            .list(&dir)?
            .into_iter()
            .find(|entry| entry.location == location)
            .map(|entry| (entry.path, entry.metadata));
        let (visible_path, metadata) = match visible {
            Some(found) => found,
            None => {
                let metadata = self.vfs.stat(&path)?;
                (path, metadata)
            }
        };

        let ino = self.inodes.get_or_insert(&visible_path, InodeKind::Link);
        Ok(self.attr(ino, &metadata))
    }

    fn rename_entry(
        &self,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
    ) -> FuseResult<()> {
        #[cfg(target_os = "linux")]
        if flags & libc::RENAME_EXCHANGE != 0 {
            return Err(TagFsError::invalid_argument(
                "exchanging entries is not supported",
                OpContext::new(),
            )
            .into());
        }
        #[cfg(not(target_os = "linux"))]
        let _ = flags;

        let from = self.child_path(parent, name)?;
        let to = self.child_path(newparent, newname)?;

        if let Some(ino) = self.staged.find(&from) {
            if from == to {
                return Ok(());
            }
            self.vfs.create(&to)?;
            self.staged.retarget(ino, to.clone());
            self.inodes.update_path(ino, &from, to);
            return Ok(());
        }

        let kind = self.vfs.stat(&from)?.kind;
        self.vfs.rename(&from, &to)?;

        if kind == EntryKind::Directory {
            let moved = self.inodes.rename_dir(&from, &to);
            let staged = self.staged.rebase(&from, &to);
            debug!(from = %from, to = %to, inodes = moved, staged, "Renamed tag directory");
        } else if let Some(ino) = self.inodes.get_inode(&from) {
            self.inodes.update_path(ino, &from, to);
        }
        Ok(())
    }
}

fn is_writable(flags: i32) -> bool {
    flags & libc::O_ACCMODE != libc::O_RDONLY
}

fn invalid_offset() -> FuseError {
    TagFsError::invalid_argument("negative offset", OpContext::new()).into()
}

impl<S: PhotoStore> Filesystem for TagFs<S> {
    fn init(&mut self, _req: &Request<'_>, config: &mut KernelConfig) -> Result<(), c_int> {
        info!(
            read_only = self.vfs.is_read_only(),
            "FUSE filesystem initialized"
        );
        config.add_capabilities(fuser::consts::FUSE_ASYNC_READ).ok();
        Ok(())
    }

    fn destroy(&mut self) {
        let discarded = self.staged.drain();
        if !discarded.is_empty() {
            warn!(
                count = discarded.len(),
                "Discarding files that were still open at unmount"
            );
        }
        info!("FUSE filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        trace!(parent, name = ?name, "lookup");
        match self.lookup_child(parent, name) {
            Ok(attr) => reply.entry(&self.config.attr_ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(inode = ino, nlookup, "forget");
        self.inodes.forget(ino, nlookup);
    }

    fn batch_forget(&mut self, _req: &Request<'_>, nodes: &[fuser::fuse_forget_one]) {
        trace!(count = nodes.len(), "batch_forget");
        for node in nodes {
            self.inodes.forget(node.nodeid, node.nlookup);
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(inode = ino, "getattr");
        match self.getattr_inode(ino) {
            Ok(attr) => reply.attr(&self.config.attr_ttl, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        trace!(inode = ino, "readlink");
        let result = self
            .resolve_inode(ino)
            .and_then(|(path, _)| Ok(self.vfs.read_link(&path)?));
        match result {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, flags, "open");
        match self.open_inode(ino, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(inode = ino, fh, offset, size, "read");
        match self.read_staged(ino, fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(inode = ino, fh, offset, len = data.len(), "write");
        match self.write_staged(ino, fh, offset, data) {
            Ok(written) => reply.written(u32::try_from(written).unwrap_or(u32::MAX)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        trace!(inode = ino, fh, "flush");
        match self.flush_inode(ino) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(inode = ino, fh, "release");
        match self.release_handle(ino, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        trace!(inode = ino, offset, "readdir");
        let entries = match self.list_directory(ino) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        let start = if offset == 0 {
            0
        } else {
            match entries
                .iter()
                .position(|(_, _, name)| Self::name_to_offset(name) == offset)
            {
                Some(pos) => pos + 1,
                None => {
                    warn!(inode = ino, offset, "readdir offset not found, restarting listing");
                    0
                }
            }
        };

        for (child, kind, name) in entries.iter().skip(start) {
            if reply.add(*child, Self::name_to_offset(name), *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        trace!(inode = ino, mask, "access");
        if self.inodes.resolve(ino).is_none() {
            reply.error(libc::ENOENT);
        } else if mask & libc::W_OK != 0 && self.vfs.is_read_only() {
            reply.error(libc::EROFS);
        } else {
            reply.ok();
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        trace!(inode = ino, size = ?size, "setattr");
        // Ownership, mode and times are synthetic; only size changes stick
        let result = match size {
            Some(size) => self.truncate(ino, size),
            None => Ok(()),
        }
        .and_then(|()| self.getattr_inode(ino));

        match result {
            Ok(attr) => reply.attr(&self.config.attr_ttl, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        #[cfg(target_os = "linux")]
        const DEFAULT_NAMELEN: u32 = 254;
        #[cfg(not(target_os = "linux"))]
        const DEFAULT_NAMELEN: u32 = 255;

        let stat = self
            .vfs
            .collection_root()
            .and_then(|root| nix::sys::statvfs::statvfs(&root).ok());

        match stat {
            Some(stat) => {
                #[allow(clippy::cast_possible_truncation)]
                let name_max = (stat.name_max() as u32).min(DEFAULT_NAMELEN);
                #[allow(clippy::cast_possible_truncation)]
                let fragment_size = stat.fragment_size() as u32;

                reply.statfs(
                    u64::from(stat.blocks()),
                    u64::from(stat.blocks_free()),
                    u64::from(stat.blocks_available()),
                    u64::from(stat.files()),
                    u64::from(stat.files_free()),
                    fragment_size,
                    name_max,
                    fragment_size,
                );
            }
            None => {
                debug!("No collection directory to report statistics for");
                reply.statfs(0, 0, 0, 0, 0, BLOCK_SIZE, DEFAULT_NAMELEN, BLOCK_SIZE);
            }
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        trace!(parent, name = ?name, flags, "create");
        match self.create_staged(parent, name, flags) {
            Ok((attr, fh)) => reply.created(&self.config.attr_ttl, &attr, 0, fh, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        trace!(parent, name = ?name, "mkdir");
        match self.mkdir_entry(parent, name) {
            Ok(attr) => reply.entry(&self.config.attr_ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, name = ?name, "unlink");
        match self.unlink_entry(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, name = ?name, "rmdir");
        match self.rmdir_entry(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        trace!(parent, name = ?link_name, target = %target.display(), "symlink");
        match self.symlink_entry(parent, link_name, target) {
            Ok(attr) => reply.entry(&self.config.attr_ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        trace!(parent, name = ?name, newparent, newname = ?newname, flags, "rename");
        match self.rename_entry(parent, name, newparent, newname, flags) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fspotfs_core::{AccessMode, MemoryStore, StaticConfig, VfsOptions};
    use std::ffi::OsString;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        store: Arc<MemoryStore>,
        fs: TagFs<MemoryStore>,
    }

    impl Fixture {
        fn new(mode: AccessMode) -> Self {
            let temp = TempDir::new().expect("Failed to create temp dir");
            let store = Arc::new(MemoryStore::new());
            store.insert_tag(1, "Vacation", None);
            store.insert_tag(2, "Beach", Some(1));
            store.insert_photo(10, temp.path().join("p1.jpg"), &[2]);

            let config = StaticConfig::new(temp.path().join("collection")).dated(false);
            let vfs = VfsCore::new(
                Arc::clone(&store),
                Arc::new(config),
                VfsOptions {
                    mode,
                    refresh_interval: None,
                    ..VfsOptions::default()
                },
            );
            let fs = TagFs::new(Arc::new(vfs), MountConfig::default().uid(1000).gid(100));
            Self { temp, store, fs }
        }

        fn lookup(&self, parent: u64, name: &str) -> FuseResult<FileAttr> {
            self.fs.lookup_child(parent, &OsString::from(name))
        }

        fn names(&self, ino: u64) -> Vec<String> {
            self.fs
                .list_directory(ino)
                .unwrap()
                .into_iter()
                .map(|(_, _, name)| name)
                .collect()
        }
    }

    fn os(s: &str) -> OsString {
        OsString::from(s)
    }

    #[test]
    fn test_name_to_offset_never_zero_or_negative() {
        for name in ["", ".", "..", "p1.jpg", "Vacation", "a-very-long-name.jpeg"] {
            let offset = TagFs::<MemoryStore>::name_to_offset(name);
            assert!(offset > 0, "offset for {name:?} is {offset}");
        }
        assert_eq!(
            TagFs::<MemoryStore>::name_to_offset("p1.jpg"),
            TagFs::<MemoryStore>::name_to_offset("p1.jpg")
        );
    }

    #[test]
    fn test_lookup_directories_and_links() {
        let fixture = Fixture::new(AccessMode::ReadOnly);
        let vacation = fixture.lookup(ROOT_INODE, "Vacation").unwrap();
        assert_eq!(vacation.kind, FileType::Directory);
        assert_eq!((vacation.uid, vacation.gid), (1000, 100));

        let beach = fixture.lookup(vacation.ino, "Beach").unwrap();
        let photo = fixture.lookup(beach.ino, "p1.jpg").unwrap();
        assert_eq!(photo.kind, FileType::Symlink);

        let err = fixture.lookup(beach.ino, "missing.jpg").unwrap_err();
        assert_eq!(err.to_errno(), libc::ENOENT);
        let err = fixture.lookup(photo.ino, "x").unwrap_err();
        assert_eq!(err.to_errno(), libc::ENOTDIR);
    }

    #[test]
    fn test_readdir_lists_dot_entries_first() {
        let fixture = Fixture::new(AccessMode::ReadOnly);
        let vacation = fixture.lookup(ROOT_INODE, "Vacation").unwrap();
        assert_eq!(fixture.names(vacation.ino), vec![".", "..", "Beach"]);

        let entries = fixture.fs.list_directory(vacation.ino).unwrap();
        assert_eq!(entries[1].0, ROOT_INODE);
        assert!(fixture.fs.list_directory(999).is_err());
    }

    #[test]
    fn test_read_only_mount_rejects_create() {
        let fixture = Fixture::new(AccessMode::ReadOnly);
        let vacation = fixture.lookup(ROOT_INODE, "Vacation").unwrap();
        let err = fixture
            .fs
            .create_staged(vacation.ino, &os("new.jpg"), libc::O_WRONLY)
            .unwrap_err();
        assert_eq!(err.to_errno(), libc::EROFS);
    }

    #[test]
    fn test_create_write_release_imports() {
        let fixture = Fixture::new(AccessMode::ReadWrite);
        let vacation = fixture.lookup(ROOT_INODE, "Vacation").unwrap();

        let (attr, fh) = fixture
            .fs
            .create_staged(vacation.ino, &os("new.jpg"), libc::O_WRONLY)
            .unwrap();
        assert_eq!(attr.kind, FileType::RegularFile);
        assert!(fixture.names(vacation.ino).contains(&"new.jpg".to_string()));

        assert_eq!(fixture.fs.write_staged(attr.ino, fh, 0, b"jpeg").unwrap(), 4);
        assert_eq!(fixture.fs.getattr_inode(attr.ino).unwrap().size, 4);

        fixture.fs.flush_inode(attr.ino).unwrap();
        fixture.fs.release_handle(attr.ino, fh).unwrap();

        let photo = fixture.lookup(vacation.ino, "new.jpg").unwrap();
        assert_eq!(photo.kind, FileType::Symlink);
        assert_ne!(photo.ino, attr.ino);
        assert!(fixture.fs.notifier_cell().get().is_none());
        assert_eq!(fixture.store.photo_count(), 2);

        let target = fixture.fs.vfs().read_link(&VirtualPath::new("/Vacation/new.jpg")).unwrap();
        assert!(target.starts_with(fixture.temp.path().join("collection")));
        assert_eq!(std::fs::read(target).unwrap(), b"jpeg");
    }

    #[test]
    fn test_unwritten_file_is_dropped() {
        let fixture = Fixture::new(AccessMode::ReadWrite);
        let vacation = fixture.lookup(ROOT_INODE, "Vacation").unwrap();
        let (attr, fh) = fixture
            .fs
            .create_staged(vacation.ino, &os("empty.jpg"), libc::O_WRONLY)
            .unwrap();
        fixture.fs.release_handle(attr.ino, fh).unwrap();

        assert_eq!(fixture.store.photo_count(), 1);
        assert!(fixture.lookup(vacation.ino, "empty.jpg").is_err());
    }

    #[test]
    fn test_duplicate_create_is_rejected() {
        let fixture = Fixture::new(AccessMode::ReadWrite);
        let vacation = fixture.lookup(ROOT_INODE, "Vacation").unwrap();
        fixture
            .fs
            .create_staged(vacation.ino, &os("new.jpg"), libc::O_WRONLY)
            .unwrap();
        let err = fixture
            .fs
            .create_staged(vacation.ino, &os("new.jpg"), libc::O_WRONLY)
            .unwrap_err();
        assert_eq!(err.to_errno(), libc::EEXIST);

        let err = fixture
            .fs
            .create_staged(vacation.ino, &os("Beach"), libc::O_WRONLY)
            .unwrap_err();
        assert_eq!(err.to_errno(), libc::EEXIST);
    }

    #[test]
    fn test_read_only_handle_cannot_write() {
        let fixture = Fixture::new(AccessMode::ReadWrite);
        let vacation = fixture.lookup(ROOT_INODE, "Vacation").unwrap();
        let (attr, fh) = fixture
            .fs
            .create_staged(vacation.ino, &os("new.jpg"), libc::O_RDWR)
            .unwrap();
        fixture.fs.write_staged(attr.ino, fh, 0, b"abc").unwrap();

        let reader = fixture.fs.open_inode(attr.ino, libc::O_RDONLY).unwrap();
        let err = fixture.fs.write_staged(attr.ino, reader, 0, b"x").unwrap_err();
        assert_eq!(err.to_errno(), libc::EBADF);
        assert_eq!(fixture.fs.read_staged(attr.ino, reader, 1, 10).unwrap(), b"bc");

        // Closing the reader leaves the writer's file staged
        fixture.fs.release_handle(attr.ino, reader).unwrap();
        assert_eq!(fixture.store.photo_count(), 1);
        fixture.fs.release_handle(attr.ino, fh).unwrap();
        assert_eq!(fixture.store.photo_count(), 2);
    }

    #[test]
    fn test_negative_offset_is_invalid() {
        let fixture = Fixture::new(AccessMode::ReadWrite);
        let vacation = fixture.lookup(ROOT_INODE, "Vacation").unwrap();
        let (attr, fh) = fixture
            .fs
            .create_staged(vacation.ino, &os("new.jpg"), libc::O_WRONLY)
            .unwrap();
        let err = fixture.fs.write_staged(attr.ino, fh, -1, b"x").unwrap_err();
        assert_eq!(err.to_errno(), libc::EINVAL);
    }

    #[test]
    fn test_open_photo_link_is_refused() {
        let fixture = Fixture::new(AccessMode::ReadOnly);
        let vacation = fixture.lookup(ROOT_INODE, "Vacation").unwrap();
        let beach = fixture.lookup(vacation.ino, "Beach").unwrap();
        let photo = fixture.lookup(beach.ino, "p1.jpg").unwrap();

        assert_eq!(fixture.fs.open_inode(photo.ino, libc::O_RDONLY).unwrap_err().to_errno(), libc::ELOOP);
        assert_eq!(fixture.fs.open_inode(beach.ino, libc::O_RDONLY).unwrap_err().to_errno(), libc::EISDIR);
    }

    #[test]
    fn test_unlink_staged_file_discards_it() {
        let fixture = Fixture::new(AccessMode::ReadWrite);
        let vacation = fixture.lookup(ROOT_INODE, "Vacation").unwrap();
        let (attr, fh) = fixture
            .fs
            .create_staged(vacation.ino, &os("new.jpg"), libc::O_WRONLY)
            .unwrap();
        fixture.fs.write_staged(attr.ino, fh, 0, b"jpeg").unwrap();

        fixture.fs.unlink_entry(vacation.ino, &os("new.jpg")).unwrap();
        assert!(fixture.fs.release_handle(attr.ino, fh).is_ok());
        assert_eq!(fixture.store.photo_count(), 1);
    }

    #[test]
    fn test_unlink_photo_removes_tag() {
        let fixture = Fixture::new(AccessMode::ReadWrite);
        let vacation = fixture.lookup(ROOT_INODE, "Vacation").unwrap();
        let beach = fixture.lookup(vacation.ino, "Beach").unwrap();

        fixture.fs.unlink_entry(beach.ino, &os("p1.jpg")).unwrap();
        assert_eq!(fixture.names(beach.ino), vec![".", ".."]);
        assert_eq!(
            fixture.fs.unlink_entry(vacation.ino, &os("Beach")).unwrap_err().to_errno(),
            libc::EISDIR
        );
    }

    #[test]
    fn test_symlink_hidden_by_subtag_is_invalid() {
        let fixture = Fixture::new(AccessMode::ReadWrite);
        let vacation = fixture.lookup(ROOT_INODE, "Vacation").unwrap();
        let original = fixture.temp.path().join("p1.jpg");

        let err = fixture
            .fs
            .symlink_entry(vacation.ino, &os("p1.jpg"), &original)
            .unwrap_err();
        assert_eq!(err.to_errno(), libc::EINVAL);
        assert_eq!(fixture.names(vacation.ino), vec![".", "..", "Beach"]);
        let tags = fixture.store.get_photo(fspotfs_core::PhotoId::new(10)).unwrap().tags;
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn test_mkdir_and_rmdir() {
        let fixture = Fixture::new(AccessMode::ReadWrite);
        let vacation = fixture.lookup(ROOT_INODE, "Vacation").unwrap();

        let mountains = fixture.fs.mkdir_entry(vacation.ino, &os("Mountains")).unwrap();
        assert_eq!(mountains.kind, FileType::Directory);
        assert_eq!(fixture.names(vacation.ino), vec![".", "..", "Beach", "Mountains"]);

        fixture.fs.rmdir_entry(vacation.ino, &os("Mountains")).unwrap();
        assert_eq!(fixture.names(vacation.ino), vec![".", "..", "Beach"]);
    }

    #[test]
    fn test_rename_tag_directory_moves_inodes() {
        let fixture = Fixture::new(AccessMode::ReadWrite);
        let vacation = fixture.lookup(ROOT_INODE, "Vacation").unwrap();
        let beach = fixture.lookup(vacation.ino, "Beach").unwrap();
        let photo = fixture.lookup(beach.ino, "p1.jpg").unwrap();

        fixture
            .fs
            .rename_entry(vacation.ino, &os("Beach"), vacation.ino, &os("Shore"), 0)
            .unwrap();

        let shore = fixture.lookup(vacation.ino, "Shore").unwrap();
        assert_eq!(shore.ino, beach.ino);
        assert_eq!(fixture.fs.getattr_inode(photo.ino).unwrap().kind, FileType::Symlink);
    }

    #[test]
    fn test_rename_staged_file() {
        let fixture = Fixture::new(AccessMode::ReadWrite);
        let vacation = fixture.lookup(ROOT_INODE, "Vacation").unwrap();
        let beach = fixture.lookup(vacation.ino, "Beach").unwrap();
        let (attr, fh) = fixture
            .fs
            .create_staged(vacation.ino, &os("draft.jpg"), libc::O_WRONLY)
            .unwrap();
        fixture.fs.write_staged(attr.ino, fh, 0, b"jpeg").unwrap();

        fixture
            .fs
            .rename_entry(vacation.ino, &os("draft.jpg"), beach.ino, &os("final.jpg"), 0)
            .unwrap();
        fixture.fs.release_handle(attr.ino, fh).unwrap();

        let photo = fixture.lookup(beach.ino, "final.jpg").unwrap();
        assert_eq!(photo.kind, FileType::Symlink);
    }

    #[test]
    fn test_truncate_rules() {
        let fixture = Fixture::new(AccessMode::ReadWrite);
        let vacation = fixture.lookup(ROOT_INODE, "Vacation").unwrap();
        let (attr, fh) = fixture
            .fs
            .create_staged(vacation.ino, &os("new.jpg"), libc::O_WRONLY)
            .unwrap();
        fixture.fs.write_staged(attr.ino, fh, 0, b"jpeg").unwrap();

        fixture.fs.truncate(attr.ino, 2).unwrap();
        assert_eq!(fixture.fs.getattr_inode(attr.ino).unwrap().size, 2);
        assert_eq!(fixture.fs.truncate(vacation.ino, 0).unwrap_err().to_errno(), libc::EISDIR);

        let beach = fixture.lookup(vacation.ino, "Beach").unwrap();
        let photo = fixture.lookup(beach.ino, "p1.jpg").unwrap();
        fixture.fs.truncate(photo.ino, 0).unwrap();
    }
}
