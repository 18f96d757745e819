//! Records of the photo collection: tags, photos and tag chains.
//!
//! These are owned by the [`PhotoStore`](crate::store::PhotoStore); the rest of
//! the crate only holds read-through copies.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Identifier of a tag row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(i64);

impl TagId {
    #[inline]
    pub const fn new(raw: i64) -> Self {
        TagId(raw)
    }

    #[inline]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag#{}", self.0)
    }
}

/// Identifier of a photo row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhotoId(i64);

impl PhotoId {
    #[inline]
    pub const fn new(raw: i64) -> Self {
        PhotoId(raw)
    }

    #[inline]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "photo#{}", self.0)
    }
}

/// A named node of the classification forest.
///
/// Tags without a parent are top-level and appear directly under the mount root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub parent: Option<TagId>,
}

/// A photo record: an original file on disk plus its tag associations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photo {
    pub id: PhotoId,
    /// Absolute path of the original file.
    pub path: PathBuf,
    /// When the photo was registered, in seconds since the Unix epoch.
    pub imported_at: i64,
    pub tags: BTreeSet<TagId>,
}

impl Photo {
    /// The on-disk file name, used as the entry name inside tag directories.
    ///
    /// Returns `None` when the stored path has no UTF-8 file name.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name()?.to_str()
    }

    pub fn imported_time(&self) -> SystemTime {
        u64::try_from(self.imported_at)
            .map_or(UNIX_EPOCH, |secs| UNIX_EPOCH + Duration::from_secs(secs))
    }
}

/// The sequence of tag ids walked from the root to reach a tag directory.
///
/// The empty chain is the mount root. Chains are the cache key for tag tree
/// listings because the same tag may only be reached one way, but a corrupt
/// forest could offer several.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagChain(Vec<TagId>);

impl TagChain {
    #[inline]
    pub fn root() -> Self {
        TagChain(Vec::new())
    }

    pub fn from_ids(ids: impl IntoIterator<Item = TagId>) -> Self {
        TagChain(ids.into_iter().collect())
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The terminal tag, or `None` for the root.
    #[inline]
    pub fn last(&self) -> Option<TagId> {
        self.0.last().copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: TagId) -> bool {
        self.0.contains(&id)
    }

    /// A new chain extended by `id`.
    #[must_use]
    pub fn child(&self, id: TagId) -> Self {
        let mut ids = self.0.clone();
        ids.push(id);
        TagChain(ids)
    }

    /// The chain without its terminal tag, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.0.split_last()?;
        Some(TagChain(rest.to_vec()))
    }

    pub fn ids(&self) -> &[TagId] {
        &self.0
    }
}

impl fmt::Display for TagChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        let parts: Vec<String> = self.0.iter().map(|id| id.get().to_string()).collect();
        write!(f, "{}", parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_navigation() {
        let chain = TagChain::root().child(TagId::new(1)).child(TagId::new(2));
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.last(), Some(TagId::new(2)));
        assert!(chain.contains(TagId::new(1)));
        assert_eq!(chain.parent().unwrap().last(), Some(TagId::new(1)));
        assert!(TagChain::root().parent().is_none());
        assert_eq!(chain.to_string(), "1/2");
        assert_eq!(TagChain::root().to_string(), "<root>");
    }

    #[test]
    fn test_photo_file_name() {
        let photo = Photo {
            id: PhotoId::new(7),
            path: PathBuf::from("/photos/2010/01/02/p1.jpg"),
            imported_at: 1_262_390_400,
            tags: BTreeSet::new(),
        };
        assert_eq!(photo.file_name(), Some("p1.jpg"));
        assert_eq!(
            photo.imported_time(),
            UNIX_EPOCH + Duration::from_secs(1_262_390_400)
        );
    }

    #[test]
    fn test_negative_import_time_clamps_to_epoch() {
        let photo = Photo {
            id: PhotoId::new(1),
            path: PathBuf::from("/p.jpg"),
            imported_at: -5,
            tags: BTreeSet::new(),
        };
        assert_eq!(photo.imported_time(), UNIX_EPOCH);
    }
}
