//! Type-safe virtual paths for the exposed tag tree.
//!
//! A [`VirtualPath`] is what the filesystem user sees ("/Vacation/Beach/p1.jpg").
//! It is transient: it is never persisted and two different paths may name
//! the same photo when that photo is cross-tagged.

use relative_path::{RelativePath, RelativePathBuf};
use std::fmt;

/// User-facing path inside the mounted tag tree.
///
/// Paths use `/` as the separator regardless of the host OS. The leading
/// slash is stripped, so `"/Vacation"` and `"Vacation"` compare equal.
///
/// # Examples
///
/// ```
/// use fspotfs_core::VirtualPath;
///
/// let path = VirtualPath::new("/Vacation/Beach/p1.jpg");
/// assert_eq!(path.file_name(), Some("p1.jpg"));
/// assert_eq!(path.parent().unwrap().as_str(), "Vacation/Beach");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualPath(RelativePathBuf);

impl VirtualPath {
    /// The root path (empty).
    #[inline]
    pub fn root() -> Self {
        VirtualPath(RelativePathBuf::new())
    }

    /// Create a virtual path from a string, stripping leading and trailing slashes.
    pub fn new(path: impl AsRef<str>) -> Self {
        let s = path.as_ref().trim_matches('/');
        VirtualPath(RelativePathBuf::from(s))
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.as_str().is_empty()
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Get the underlying `RelativePath`.
    #[inline]
    pub fn as_relative_path(&self) -> &RelativePath {
        &self.0
    }

    /// Join this path with a single entry name.
    pub fn join(&self, name: impl AsRef<str>) -> Self {
        VirtualPath(self.0.join(name.as_ref()))
    }

    /// Get the parent path, or `None` for the root.
    pub fn parent(&self) -> Option<VirtualPath> {
        if self.is_root() {
            return None;
        }
        self.0.parent().map(|p| VirtualPath(p.to_relative_path_buf()))
    }

    /// Final component of the path, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name()
    }

    /// Iterate over the non-empty segments of this path.
    ///
    /// ```
    /// use fspotfs_core::VirtualPath;
    ///
    /// let path = VirtualPath::new("Vacation//Beach/p1.jpg");
    /// let segments: Vec<_> = path.segments().collect();
    /// assert_eq!(segments, vec!["Vacation", "Beach", "p1.jpg"]);
    /// ```
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0
            .components()
            .map(|c| c.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Number of segments (0 for the root).
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Split this path into its parent directory path and final name.
    ///
    /// Returns `None` for the root path.
    pub fn split(&self) -> Option<(VirtualPath, &str)> {
        let parent = self.parent()?;
        let name = self.file_name()?;
        Some((parent, name))
    }

    /// True when `self` equals `ancestor` or lies beneath it.
    pub fn starts_with(&self, ancestor: &VirtualPath) -> bool {
        if ancestor.is_root() {
            return true;
        }
        self.0.starts_with(&ancestor.0)
    }

    /// Re-root `self` from under `from` to under `to`.
    ///
    /// Returns `None` if `self` is not beneath `from`.
    pub fn rebase(&self, from: &VirtualPath, to: &VirtualPath) -> Option<VirtualPath> {
        if !self.starts_with(from) {
            return None;
        }
        let rest: Vec<&str> = self.segments().skip(from.depth()).collect();
        Some(rest.into_iter().fold(to.clone(), |acc, s| acc.join(s)))
    }
}

impl AsRef<str> for VirtualPath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl From<&str> for VirtualPath {
    fn from(s: &str) -> Self {
        VirtualPath::new(s)
    }
}

impl From<String> for VirtualPath {
    fn from(s: String) -> Self {
        VirtualPath::new(s)
    }
}
