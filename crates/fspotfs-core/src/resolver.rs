//! Classification of virtual paths.

use crate::error::{OpContext, TagFsError, TagFsResult};
use crate::model::{PhotoId, TagChain};
use crate::path::VirtualPath;
use crate::store::PhotoStore;
use crate::tree::{MAX_TAG_DEPTH, PhotoEntry, TagEntry, TagSnapshot};
use std::sync::Arc;

/// What a virtual path points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Root,
    TagNode(TagChain),
    PhotoLeaf { chain: TagChain, photo: PhotoId },
}

impl Location {
    /// The tag chain of a directory, or of the directory containing a photo.
    pub fn chain(&self) -> TagChain {
        match self {
            Location::Root => TagChain::root(),
            Location::TagNode(chain) | Location::PhotoLeaf { chain, .. } => chain.clone(),
        }
    }

    pub fn is_dir(&self) -> bool {
        !matches!(self, Location::PhotoLeaf { .. })
    }
}

/// Listing source the resolver walks.
///
/// [`TagSnapshot`] is the production implementation; tests can supply a fixed
/// forest.
pub trait TreeView {
    fn children(&self, chain: &TagChain) -> TagFsResult<Arc<[TagEntry]>>;
    fn photos(&self, chain: &TagChain) -> TagFsResult<Arc<[PhotoEntry]>>;
}

impl<S: PhotoStore> TreeView for TagSnapshot<'_, S> {
    fn children(&self, chain: &TagChain) -> TagFsResult<Arc<[TagEntry]>> {
        TagSnapshot::children(self, chain)
    }

    fn photos(&self, chain: &TagChain) -> TagFsResult<Arc<[PhotoEntry]>> {
        TagSnapshot::photos(self, chain)
    }
}

/// Maps virtual paths to [`Location`]s using visible names only.
pub struct PathResolver;

impl PathResolver {
    /// Resolve `path` against `view`.
    ///
    /// Each segment is matched against the visible sub-tag names first; a
    /// final segment that names no sub-tag may name a photo of the terminal
    /// tag. Since the view yields disambiguated names, every match is unique.
    pub fn resolve<V: TreeView + ?Sized>(view: &V, path: &VirtualPath) -> TagFsResult<Location> {
        let segments: Vec<&str> = path.segments().collect();
        if segments.is_empty() {
            return Ok(Location::Root);
        }

        let mut chain = TagChain::root();
        let last = segments.len() - 1;

        for (i, segment) in segments.iter().enumerate() {
            let children = view.children(&chain)?;
            if let Some(entry) = children.iter().find(|e| e.name == *segment) {
                if chain.contains(entry.id) || chain.len() >= MAX_TAG_DEPTH {
                    return Err(TagFsError::inconsistent(
                        format!("tag chain {chain} revisits {}", entry.id),
                        OpContext::new().with_virtual_path(path).with_tag(entry.id),
                    ));
                }
                chain = chain.child(entry.id);
                continue;
            }

            if i == last && !chain.is_root() {
                let photos = view.photos(&chain)?;
                if let Some(entry) = photos.iter().find(|e| e.name == *segment) {
                    return Ok(Location::PhotoLeaf {
                        chain,
                        photo: entry.photo.id,
                    });
                }
            }

            return Err(TagFsError::not_found(
                OpContext::new().with_virtual_path(path),
            ));
        }

        Ok(Location::TagNode(chain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::{Photo, TagId};
    use std::collections::{BTreeSet, HashMap};
    use std::path::PathBuf;

    #[derive(Default)]
    struct FixedView {
        children: HashMap<TagChain, Vec<TagEntry>>,
        photos: HashMap<TagChain, Vec<PhotoEntry>>,
    }

    impl FixedView {
        fn tag(mut self, parent: &[i64], name: &str, id: i64) -> Self {
            self.children
                .entry(chain(parent))
                .or_default()
                .push(TagEntry {
                    name: name.to_string(),
                    id: TagId::new(id),
                });
            self
        }

        fn photo(mut self, parent: &[i64], name: &str, id: i64) -> Self {
            self.photos.entry(chain(parent)).or_default().push(PhotoEntry {
                name: name.to_string(),
                photo: Photo {
                    id: PhotoId::new(id),
                    path: PathBuf::from("/photos").join(name),
                    imported_at: 0,
                    tags: BTreeSet::new(),
                },
            });
            self
        }
    }

    impl TreeView for FixedView {
        fn children(&self, chain: &TagChain) -> TagFsResult<Arc<[TagEntry]>> {
            Ok(self.children.get(chain).cloned().unwrap_or_default().into())
        }

        fn photos(&self, chain: &TagChain) -> TagFsResult<Arc<[PhotoEntry]>> {
            Ok(self.photos.get(chain).cloned().unwrap_or_default().into())
        }
    }

    fn chain(ids: &[i64]) -> TagChain {
        TagChain::from_ids(ids.iter().copied().map(TagId::new))
    }

    fn vacation() -> FixedView {
        FixedView::default()
            .tag(&[], "Vacation", 1)
            .tag(&[1], "Beach", 2)
            .photo(&[1, 2], "p1.jpg", 10)
    }

    #[test]
    fn test_resolve_root() {
        let loc = PathResolver::resolve(&vacation(), &VirtualPath::new("/")).unwrap();
        assert_eq!(loc, Location::Root);
    }

    #[test]
    fn test_resolve_tags_and_photos() {
        let view = vacation();
        assert_eq!(
            PathResolver::resolve(&view, &VirtualPath::new("/Vacation/Beach")).unwrap(),
            Location::TagNode(chain(&[1, 2]))
        );
        assert_eq!(
            PathResolver::resolve(&view, &VirtualPath::new("/Vacation/Beach/p1.jpg")).unwrap(),
            Location::PhotoLeaf {
                chain: chain(&[1, 2]),
                photo: PhotoId::new(10)
            }
        );
    }

    #[test]
    fn test_photo_is_not_a_directory() {
        let err = PathResolver::resolve(&vacation(), &VirtualPath::new("/Vacation/Beach/p1.jpg/x"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_unknown_segments() {
        let view = vacation();
        for path in ["/Nope", "/Vacation/Nope", "/p1.jpg", "/Vacation/p1.jpg"] {
            let err = PathResolver::resolve(&view, &VirtualPath::new(path)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound, "{path}");
        }
    }

    #[test]
    fn test_subtag_wins_over_photo_of_same_name() {
        let view = vacation().photo(&[1], "Beach", 11);
        assert_eq!(
            PathResolver::resolve(&view, &VirtualPath::new("/Vacation/Beach")).unwrap(),
            Location::TagNode(chain(&[1, 2]))
        );
    }

    #[test]
    fn test_revisited_tag_is_inconsistent() {
        let view = FixedView::default()
            .tag(&[], "A", 1)
            .tag(&[1], "B", 2)
            .tag(&[1, 2], "A", 1);
        let err = PathResolver::resolve(&view, &VirtualPath::new("/A/B/A")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Inconsistent);
    }
}
