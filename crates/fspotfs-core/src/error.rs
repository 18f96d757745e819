//! Error types for tag tree operations.
//!
//! Every fallible operation in this crate returns [`TagFsError`]. Each error
//! carries an [`OpContext`] describing what was being touched, and classifies
//! itself through [`TagFsError::kind`] so that mount backends can translate it
//! into their own error convention.

use crate::config::ConfigError;
use crate::model::{PhotoId, TagId};
use crate::store::StoreError;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Context for tag tree operations, providing debugging information.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    /// The virtual path being operated on
    pub virtual_path: Option<String>,
    /// The tag the operation targets
    pub tag: Option<TagId>,
    /// The photo the operation targets
    pub photo: Option<PhotoId>,
    /// The on-disk path involved (collection file or original)
    pub disk_path: Option<PathBuf>,
}

impl OpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_virtual_path(mut self, path: impl fmt::Display) -> Self {
        self.virtual_path = Some(path.to_string());
        self
    }

    pub fn with_tag(mut self, tag: TagId) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn with_photo(mut self, photo: PhotoId) -> Self {
        self.photo = Some(photo);
        self
    }

    pub fn with_disk_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.disk_path = Some(path.into());
        self
    }

    #[inline]
    pub fn into_box(self) -> Box<Self> {
        Box::new(self)
    }
}

impl fmt::Display for OpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(ref path) = self.virtual_path {
            parts.push(format!("path '{path}'"));
        }
        if let Some(tag) = self.tag {
            parts.push(tag.to_string());
        }
        if let Some(photo) = self.photo {
            parts.push(photo.to_string());
        }
        if let Some(ref disk) = self.disk_path {
            parts.push(format!("at {:?}", disk.display()));
        }

        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Semantic classification of a [`TagFsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The path does not resolve.
    NotFound,
    /// Name collision where overwriting is not permitted.
    AlreadyExists,
    /// Write attempted in read-only mode or against the root.
    PermissionDenied,
    /// Underlying file copy or read failed.
    IoFailure,
    /// Database unavailable or transaction failure.
    StoreFailure,
    /// Invariant violation detected while walking the collection.
    Inconsistent,
    /// Tag still has sub-tags.
    NotEmpty,
    /// Name or move target is not acceptable.
    InvalidArgument,
    /// Directory operation on a photo entry.
    NotDirectory,
    /// File operation on a tag directory.
    IsDirectory,
    NotSupported,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::AlreadyExists => "AlreadyExists",
            Self::PermissionDenied => "PermissionDenied",
            Self::IoFailure => "IOFailure",
            Self::StoreFailure => "StoreFailure",
            Self::Inconsistent => "Inconsistent",
            Self::NotEmpty => "NotEmpty",
            Self::InvalidArgument => "InvalidArgument",
            Self::NotDirectory => "NotDirectory",
            Self::IsDirectory => "IsDirectory",
            Self::NotSupported => "NotSupported",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum TagFsError {
    #[error("Not found: {context}")]
    NotFound { context: Box<OpContext> },

    #[error("Already exists: {context}")]
    AlreadyExists { context: Box<OpContext> },

    #[error("Read-only mount: {context}")]
    ReadOnly { context: Box<OpContext> },

    #[error("Permission denied ({reason}): {context}")]
    PermissionDenied {
        reason: &'static str,
        context: Box<OpContext>,
    },

    #[error("IO error for {context}: {source}")]
    Io {
        #[source]
        source: io::Error,
        context: Box<OpContext>,
    },

    #[error("Store error for {context}: {source}")]
    Store {
        #[source]
        source: StoreError,
        context: Box<OpContext>,
    },

    #[error("Inconsistent collection state ({detail}): {context}")]
    Inconsistent {
        detail: String,
        context: Box<OpContext>,
    },

    #[error("Tag has sub-tags: {context}")]
    NotEmpty { context: Box<OpContext> },

    #[error("Invalid argument ({reason}): {context}")]
    InvalidArgument {
        reason: &'static str,
        context: Box<OpContext>,
    },

    #[error("Not a directory: {context}")]
    NotDirectory { context: Box<OpContext> },

    #[error("Is a directory: {context}")]
    IsDirectory { context: Box<OpContext> },

    #[error("Not supported ({reason}): {context}")]
    NotSupported {
        reason: &'static str,
        context: Box<OpContext>,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl TagFsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::ReadOnly { .. } | Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Io { source, .. } => match source.kind() {
                io::ErrorKind::NotFound => ErrorKind::NotFound,
                io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
                io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                _ => ErrorKind::IoFailure,
            },
            Self::Store { source, .. } => source.kind(),
            Self::Inconsistent { .. } => ErrorKind::Inconsistent,
            Self::NotEmpty { .. } => ErrorKind::NotEmpty,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::NotDirectory { .. } => ErrorKind::NotDirectory,
            Self::IsDirectory { .. } => ErrorKind::IsDirectory,
            Self::NotSupported { .. } => ErrorKind::NotSupported,
            Self::Config(_) => ErrorKind::IoFailure,
        }
    }

    /// The context attached to this error, if any.
    pub fn context(&self) -> Option<&OpContext> {
        match self {
            Self::NotFound { context }
            | Self::AlreadyExists { context }
            | Self::ReadOnly { context }
            | Self::PermissionDenied { context, .. }
            | Self::Io { context, .. }
            | Self::Store { context, .. }
            | Self::Inconsistent { context, .. }
            | Self::NotEmpty { context }
            | Self::InvalidArgument { context, .. }
            | Self::NotDirectory { context }
            | Self::IsDirectory { context }
            | Self::NotSupported { context, .. } => Some(context),
            Self::Config(_) => None,
        }
    }

    pub fn not_found(context: OpContext) -> Self {
        Self::NotFound {
            context: context.into_box(),
        }
    }

    pub fn already_exists(context: OpContext) -> Self {
        Self::AlreadyExists {
            context: context.into_box(),
        }
    }

    pub fn permission_denied(reason: &'static str, context: OpContext) -> Self {
        Self::PermissionDenied {
            reason,
            context: context.into_box(),
        }
    }

    pub fn io(source: io::Error, context: OpContext) -> Self {
        Self::Io {
            source,
            context: context.into_box(),
        }
    }

    pub fn store(source: StoreError, context: OpContext) -> Self {
        Self::Store {
            source,
            context: context.into_box(),
        }
    }

    pub fn inconsistent(detail: impl Into<String>, context: OpContext) -> Self {
        Self::Inconsistent {
            detail: detail.into(),
            context: context.into_box(),
        }
    }

    pub fn invalid_argument(reason: &'static str, context: OpContext) -> Self {
        Self::InvalidArgument {
            reason,
            context: context.into_box(),
        }
    }
}

impl From<StoreError> for TagFsError {
    fn from(source: StoreError) -> Self {
        Self::store(source, OpContext::new())
    }
}

/// Result type for tag tree operations.
pub type TagFsResult<T> = Result<T, TagFsError>;
