//! Conversion of entry metadata into FUSE attributes.

use fspotfs_core::{EntryKind, EntryMetadata};
use fuser::{FileAttr, FileType};

/// Block size reported in attributes and filesystem statistics.
pub const BLOCK_SIZE: u32 = 4096;

/// FUSE file type of an entry.
pub fn file_type(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::Directory => FileType::Directory,
        EntryKind::Link => FileType::Symlink,
        EntryKind::File => FileType::RegularFile,
    }
}

/// Builds the attributes of inode `ino`, owned by `uid`/`gid`.
///
/// Tag directories report `nlink = 2`; sub-tags are not counted.
pub fn entry_attr(ino: u64, metadata: &EntryMetadata, uid: u32, gid: u32) -> FileAttr {
    let kind = file_type(metadata.kind);
    let (size, nlink) = match metadata.kind {
        EntryKind::Directory => (0, 2),
        EntryKind::Link | EntryKind::File => (metadata.size, 1),
    };
    let time = metadata.mtime;

    FileAttr {
        ino,
        size,
        blocks: size.div_ceil(u64::from(BLOCK_SIZE)),
        atime: time,
        mtime: time,
        ctime: time,
        crtime: time,
        kind,
        perm: metadata.perm,
        nlink,
        uid,
        gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}
