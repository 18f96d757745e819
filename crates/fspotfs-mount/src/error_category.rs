//! Error category mapping for engine errors.
//!
//! Mount backends report failures as POSIX errno values. [`ErrorCategory`]
//! sits between [`TagFsError`] and the errno, so every backend maps the same
//! engine condition to the same code.

use fspotfs_core::{ErrorKind, TagFsError};
use std::io;

/// Semantic category of a failed filesystem operation.
///
/// # Example
///
/// ```
/// use fspotfs_core::{OpContext, TagFsError};
/// use fspotfs_mount::ErrorCategory;
///
/// let err = TagFsError::not_found(OpContext::new().with_virtual_path("/Vacation/p1.jpg"));
/// let category = ErrorCategory::from(&err);
///
/// assert_eq!(category, ErrorCategory::NotFound);
/// assert_eq!(category.to_errno(), libc::ENOENT);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Entry does not exist (ENOENT)
    NotFound,
    /// Entry already exists (EEXIST)
    AlreadyExists,
    /// Tag still has sub-tags (ENOTEMPTY)
    NotEmpty,
    /// File operation on a tag directory (EISDIR)
    IsDirectory,
    /// Directory operation on a photo entry (ENOTDIR)
    NotDirectory,
    /// Unacceptable name or move target (EINVAL)
    InvalidArgument,
    /// Failed file operation, with the OS error when one is known
    Io(i32),
    /// Database failure (EIO)
    StoreFailure,
    /// Write refused on a writable mount (EACCES)
    PermissionDenied,
    /// Write refused because the mount is read-only (EROFS)
    ReadOnly,
    /// Operation the tree cannot express (ENOSYS)
    NotSupported,
}

impl ErrorCategory {
    /// Converts this category to a POSIX errno value.
    #[inline]
    pub fn to_errno(self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::AlreadyExists => libc::EEXIST,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::IsDirectory => libc::EISDIR,
            Self::NotDirectory => libc::ENOTDIR,
            Self::InvalidArgument => libc::EINVAL,
            Self::Io(errno) => errno,
            Self::StoreFailure => libc::EIO,
            Self::PermissionDenied => libc::EACCES,
            Self::ReadOnly => libc::EROFS,
            Self::NotSupported => libc::ENOSYS,
        }
    }

    /// Returns a human-readable name for this category.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::AlreadyExists => "AlreadyExists",
            Self::NotEmpty => "NotEmpty",
            Self::IsDirectory => "IsDirectory",
            Self::NotDirectory => "NotDirectory",
            Self::InvalidArgument => "InvalidArgument",
            Self::Io(_) => "IoError",
            Self::StoreFailure => "StoreFailure",
            Self::PermissionDenied => "PermissionDenied",
            Self::ReadOnly => "ReadOnly",
            Self::NotSupported => "NotSupported",
        }
    }
}

impl From<&TagFsError> for ErrorCategory {
    fn from(e: &TagFsError) -> Self {
        match e {
            TagFsError::ReadOnly { .. } => Self::ReadOnly,
            TagFsError::Io { source, .. } => io_error_category(source),
            _ => match e.kind() {
                // Inconsistent state is only ever reported as a missing entry.
                ErrorKind::NotFound | ErrorKind::Inconsistent => Self::NotFound,
                ErrorKind::AlreadyExists => Self::AlreadyExists,
                ErrorKind::PermissionDenied => Self::PermissionDenied,
                ErrorKind::IoFailure => Self::Io(libc::EIO),
                ErrorKind::StoreFailure => Self::StoreFailure,
                ErrorKind::NotEmpty => Self::NotEmpty,
                ErrorKind::InvalidArgument => Self::InvalidArgument,
                ErrorKind::NotDirectory => Self::NotDirectory,
                ErrorKind::IsDirectory => Self::IsDirectory,
                ErrorKind::NotSupported => Self::NotSupported,
            },
        }
    }
}

impl From<TagFsError> for ErrorCategory {
    fn from(e: TagFsError) -> Self {
        Self::from(&e)
    }
}

impl From<&io::Error> for ErrorCategory {
    fn from(e: &io::Error) -> Self {
        io_error_category(e)
    }
}

fn io_error_category(e: &io::Error) -> ErrorCategory {
    match e.kind() {
        io::ErrorKind::NotFound => ErrorCategory::NotFound,
        io::ErrorKind::AlreadyExists => ErrorCategory::AlreadyExists,
        io::ErrorKind::PermissionDenied => ErrorCategory::PermissionDenied,
        io::ErrorKind::InvalidInput => ErrorCategory::InvalidArgument,
        _ => ErrorCategory::Io(io_error_to_errno(e)),
    }
}

/// Converts an I/O error to a POSIX errno value.
///
/// This extracts the raw OS error if available, otherwise returns `EIO`.
#[inline]
pub fn io_error_to_errno(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}
