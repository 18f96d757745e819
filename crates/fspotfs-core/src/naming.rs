//! Visible names for directory entries.
//!
//! The database allows two sibling tags, or two photos under one tag, to share
//! a name. Listings must still be unambiguous, so the entry with the smallest
//! id keeps the real name and the others are suffixed `-2`, `-3`, ... in id
//! order. Photo names keep their extension after the suffix (`p1-2.jpg`).

use std::collections::HashSet;

/// Split `name` at its last dot. A leading dot does not start an extension.
///
/// ```
/// use fspotfs_core::naming::split_extension;
///
/// assert_eq!(split_extension("p1.jpg"), ("p1", Some("jpg")));
/// assert_eq!(split_extension(".hidden"), (".hidden", None));
/// assert_eq!(split_extension("README"), ("README", None));
/// ```
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(0) | None => (name, None),
        Some(idx) => (&name[..idx], Some(&name[idx + 1..])),
    }
}

/// `name` with the numeric suffix `n` inserted before the extension (if kept).
pub fn suffixed(name: &str, n: usize, keep_extension: bool) -> String {
    if keep_extension {
        match split_extension(name) {
            (stem, Some(ext)) => format!("{stem}-{n}.{ext}"),
            (stem, None) => format!("{stem}-{n}"),
        }
    } else {
        format!("{name}-{n}")
    }
}

/// Whether `name` can be a single path segment.
pub fn is_valid_entry_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\0'])
}

/// Map a stored name to something usable as a path segment.
pub fn sanitize(name: &str) -> String {
    if name.is_empty() || name == "." || name == ".." {
        return "_".repeat(name.len().max(1));
    }
    name.replace(['/', '\0'], "_")
}

/// Assign unique visible names to `items`.
///
/// Names in `taken` are never handed out. Returns the entries sorted by their
/// visible name.
pub fn disambiguate<K: Ord + Copy>(
    mut items: Vec<(String, K)>,
    taken: &HashSet<String>,
    keep_extension: bool,
) -> Vec<(String, K)> {
    items.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut used: HashSet<String> = HashSet::with_capacity(items.len());
    let mut named: Vec<(String, K)> = Vec::with_capacity(items.len());
    let mut leftovers: Vec<(String, K)> = Vec::new();

    // Pass 1: the first id of each name keeps the real name.
    for (name, id) in items {
        if !taken.contains(&name) && !used.contains(&name) {
            used.insert(name.clone());
            named.push((name, id));
        } else {
            leftovers.push((name, id));
        }
    }

    // Pass 2: everyone else gets the next free suffix, in id order per name.
    for (name, id) in leftovers {
        let mut n = 2;
        let visible = loop {
            let candidate = suffixed(&name, n, keep_extension);
            if !taken.contains(&candidate) && !used.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };
        used.insert(visible.clone());
        named.push((visible, id));
    }

    named.sort_by(|a, b| a.0.cmp(&b.0));
    named
}
