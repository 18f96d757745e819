//! Error handling and errno mapping for the FUSE filesystem.
//!
//! Engine errors are classified through the shared
//! [`ErrorCategory`](fspotfs_mount::ErrorCategory), so every backend reports
//! the same condition with the same errno.

use fspotfs_core::TagFsError;
use fspotfs_mount::{io_error_to_errno, ErrorCategory};
use std::io;
use thiserror::Error;

/// FUSE-specific errors that can occur during filesystem operations.
#[derive(Debug, Error)]
pub enum FuseError {
    /// Engine error (boxed to reduce enum size).
    #[error("Tag tree operation failed: {0}")]
    Core(Box<TagFsError>),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid inode: {0}")]
    InvalidInode(u64),

    #[error("Invalid file handle: {0}")]
    InvalidHandle(u64),

    /// E.g. a write through a handle opened read-only.
    #[error("Wrong handle type for operation")]
    WrongHandleType,

    #[error("Operation not supported")]
    NotSupported,
}

impl FuseError {
    /// Converts this error to a libc error code for FUSE.
    pub fn to_errno(&self) -> i32 {
        match self {
            FuseError::Core(e) => ErrorCategory::from(e.as_ref()).to_errno(),
            FuseError::Io(e) => io_error_to_errno(e),
            FuseError::InvalidInode(_) => libc::ENOENT,
            FuseError::InvalidHandle(_) | FuseError::WrongHandleType => libc::EBADF,
            FuseError::NotSupported => libc::ENOSYS,
        }
    }
}

impl From<TagFsError> for FuseError {
    fn from(e: TagFsError) -> Self {
        FuseError::Core(Box::new(e))
    }
}

/// Result type for FUSE operations.
pub type FuseResult<T> = Result<T, FuseError>;

/// Extension trait to convert errors to errno.
pub trait ToErrno {
    fn to_errno(&self) -> i32;
}

impl ToErrno for TagFsError {
    fn to_errno(&self) -> i32 {
        ErrorCategory::from(self).to_errno()
    }
}

impl ToErrno for io::Error {
    fn to_errno(&self) -> i32 {
        io_error_to_errno(self)
    }
}

impl ToErrno for FuseError {
    fn to_errno(&self) -> i32 {
        FuseError::to_errno(self)
    }
}
