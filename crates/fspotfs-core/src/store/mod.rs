//! Persistent photo and tag records.
//!
//! [`PhotoStore`] is the seam between the tag tree engine and the database.
//! Two implementations ship with the crate:
//!
//! - [`SqliteStore`] reads and writes an F-Spot `photos.db` (schema v17)
//! - [`MemoryStore`] keeps everything in memory and can inject failures,
//!   which the integration tests use to exercise compensating actions
//!
//! Each mutating method is its own transaction: it either commits completely
//! or leaves the store untouched.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, DEFAULT_BUSY_TIMEOUT, DEFAULT_DB_VERSION, DB_VERSION_KEY};

use crate::error::ErrorKind;
use crate::model::{Photo, PhotoId, Tag, TagId};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Unknown tag {0}")]
    UnknownTag(TagId),

    #[error("Unknown photo {0}")]
    UnknownPhoto(PhotoId),

    #[error("Invalid photo location '{uri}': {reason}")]
    InvalidLocation { uri: String, reason: String },

    #[error("Database version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: String, expected: String },

    #[error("Database unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTag(_) | Self::UnknownPhoto(_) => ErrorKind::NotFound,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ErrorKind::AlreadyExists
            }
            Self::InvalidLocation { .. } => ErrorKind::Inconsistent,
            _ => ErrorKind::StoreFailure,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Access to the tag forest and the photos it classifies.
///
/// Implementations must be safe to share between the filesystem worker threads.
pub trait PhotoStore: Send + Sync {
    /// Tags directly under `parent`, or the top-level tags for `None`, ordered by id.
    fn get_tag_children(&self, parent: Option<TagId>) -> StoreResult<Vec<Tag>>;

    fn get_tag(&self, id: TagId) -> StoreResult<Tag>;

    /// Photos associated with `tag`, ordered by id.
    fn get_photos_for_tag(&self, tag: TagId) -> StoreResult<Vec<Photo>>;

    fn get_photo(&self, id: PhotoId) -> StoreResult<Photo>;

    /// The photo whose original file is `path`, if one is registered.
    fn find_photo_by_path(&self, path: &Path) -> StoreResult<Option<Photo>>;

    /// Register a new photo and attach `tags`, atomically.
    fn create_photo(&self, path: &Path, tags: &[TagId]) -> StoreResult<Photo>;

    /// Attach `tag` to `photo`. Attaching an existing association is a no-op.
    fn add_tag(&self, photo: PhotoId, tag: TagId) -> StoreResult<()>;

    fn remove_tag(&self, photo: PhotoId, tag: TagId) -> StoreResult<()>;

    /// Replace the `from` association of `photo` with `to`, atomically.
    fn retag(&self, photo: PhotoId, from: TagId, to: TagId) -> StoreResult<()>;

    fn rename_photo_file(&self, photo: PhotoId, new_path: &Path) -> StoreResult<()>;

    /// Drop a photo row together with all of its associations.
    fn delete_photo(&self, photo: PhotoId) -> StoreResult<()>;

    fn create_tag(&self, name: &str, parent: Option<TagId>) -> StoreResult<Tag>;

    /// Rename and/or re-parent a tag.
    fn update_tag(&self, id: TagId, name: &str, parent: Option<TagId>) -> StoreResult<()>;

    /// Drop a tag and every photo association that references it.
    fn delete_tag(&self, id: TagId) -> StoreResult<()>;
}
