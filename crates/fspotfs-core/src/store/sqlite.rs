//! [`PhotoStore`] backed by an F-Spot SQLite database.
//!
//! F-Spot records a photo's location as a `file://` base URI plus a
//! percent-encoded filename, on the photo row and again on each of its
//! versions. The default version wins when present.

use super::{PhotoStore, StoreError, StoreResult};
use crate::model::{Photo, PhotoId, Tag, TagId};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

/// Key of the schema version row in the `meta` table.
pub const DB_VERSION_KEY: &str = "F-Spot Database Version";

/// Schema version this crate reads and writes.
pub const DEFAULT_DB_VERSION: &str = "17";

/// How long a statement waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// The subset of the F-Spot v17 schema this crate touches.
///
/// Only used to initialise fresh databases; existing F-Spot databases are
/// opened as they are.
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS meta (
    id          INTEGER PRIMARY KEY NOT NULL,
    name        TEXT UNIQUE NOT NULL,
    data        TEXT
);

CREATE TABLE IF NOT EXISTS rolls (
    id          INTEGER PRIMARY KEY NOT NULL,
    time        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tags (
    id              INTEGER PRIMARY KEY NOT NULL,
    name            TEXT,
    category_id     INTEGER,
    is_category     BOOLEAN,
    sort_priority   INTEGER,
    icon            TEXT
);

CREATE TABLE IF NOT EXISTS photos (
    id                  INTEGER PRIMARY KEY NOT NULL,
    time                INTEGER NOT NULL,
    base_uri            STRING NOT NULL,
    filename            STRING NOT NULL,
    description         TEXT NOT NULL,
    roll_id             INTEGER NOT NULL,
    default_version_id  INTEGER NOT NULL,
    rating              INTEGER NULL,
    md5_sum             TEXT NULL
);

CREATE TABLE IF NOT EXISTS photo_tags (
    photo_id    INTEGER,
    tag_id      INTEGER,
    UNIQUE (photo_id, tag_id)
);

CREATE TABLE IF NOT EXISTS photo_versions (
    photo_id    INTEGER,
    version_id  INTEGER,
    name        STRING,
    base_uri    STRING NOT NULL,
    filename    STRING NOT NULL,
    md5_sum     TEXT NULL,
    protected   BOOLEAN,
    UNIQUE (photo_id, version_id)
);

CREATE INDEX IF NOT EXISTS idx_photo_tags_tag ON photo_tags(tag_id);
CREATE INDEX IF NOT EXISTS idx_tags_category ON tags(category_id);
";

/// Columns shared by every photo query: id, time, location parts, tag list.
const PHOTO_COLUMNS: &str = "
    p.id,
    p.time,
    ifnull(v.base_uri, p.base_uri),
    ifnull(v.filename, p.filename),
    (SELECT group_concat(t.tag_id) FROM photo_tags t WHERE t.photo_id = p.id)";

const PHOTO_VERSION_JOIN: &str = "
    LEFT JOIN photo_versions v
        ON v.photo_id = p.id AND v.version_id = p.default_version_id";

/// F-Spot SQLite store.
///
/// The connection is serialized behind a mutex; SQLite itself serializes
/// writers, and the tag tree engine already batches reads through its cache.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open an existing F-Spot database without modifying its schema.
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        Self::configure(&conn, busy_timeout)?;
        debug!(path = %path.display(), "Opened F-Spot database");
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open (or create) a database and make sure the schema and version row exist.
    pub fn create<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let store = Self::open(path, DEFAULT_BUSY_TIMEOUT)?;
        store.initialize()?;
        Ok(store)
    }

    /// Create an initialised in-memory database.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn, DEFAULT_BUSY_TIMEOUT)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    fn configure(conn: &Connection, busy_timeout: Duration) -> StoreResult<()> {
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        Ok(())
    }

    fn initialize(&self) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT OR IGNORE INTO meta (name, data) VALUES (?1, ?2)",
            params![DB_VERSION_KEY, DEFAULT_DB_VERSION],
        )?;
        Ok(())
    }

    /// Path of the database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The schema version recorded in the `meta` table.
    pub fn version(&self) -> StoreResult<String> {
        let conn = self.conn.lock();
        let version: Option<String> = conn
            .query_row(
                "SELECT data FROM meta WHERE name = ?1 LIMIT 1",
                params![DB_VERSION_KEY],
                |row| row.get(0),
            )
            .optional()?;
        version.ok_or_else(|| StoreError::VersionMismatch {
            found: "<none>".to_string(),
            expected: DEFAULT_DB_VERSION.to_string(),
        })
    }

    /// Check that the recorded schema version starts with `expected`.
    ///
    /// Versions are compared component-wise on `.`, so `"17"` accepts a
    /// database at `"17.2"` but `"17.2"` rejects one at `"17"`.
    pub fn check_version(&self, expected: &str) -> StoreResult<()> {
        let found = self.version()?;
        if version_matches(&found, expected) {
            info!(version = %found, "F-Spot database version accepted");
            Ok(())
        } else {
            Err(StoreError::VersionMismatch {
                found,
                expected: expected.to_string(),
            })
        }
    }

    fn photo_from_row(row: &Row<'_>) -> rusqlite::Result<RawPhoto> {
        Ok(RawPhoto {
            id: row.get(0)?,
            time: row.get(1)?,
            base_uri: row.get(2)?,
            filename: row.get(3)?,
            tags: row.get(4)?,
        })
    }

    fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
        let category: Option<i64> = row.get(2)?;
        Ok(Tag {
            id: TagId::new(row.get(0)?),
            name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            parent: category.filter(|c| *c != 0).map(TagId::new),
        })
    }

    fn ensure_tag(conn: &Connection, id: TagId) -> StoreResult<()> {
        let exists: Option<i64> = conn
            .query_row("SELECT id FROM tags WHERE id = ?1", params![id.get()], |row| {
                row.get(0)
            })
            .optional()?;
        exists.map(|_| ()).ok_or(StoreError::UnknownTag(id))
    }
}

/// A photo row before its location has been decoded.
struct RawPhoto {
    id: i64,
    time: i64,
    base_uri: String,
    filename: String,
    tags: Option<String>,
}

impl RawPhoto {
    fn into_photo(self) -> StoreResult<Photo> {
        let path = decode_location(&self.base_uri, &self.filename)?;
        let tags: BTreeSet<TagId> = self
            .tags
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter_map(|s| s.trim().parse::<i64>().ok())
            .map(TagId::new)
            .collect();
        Ok(Photo {
            id: PhotoId::new(self.id),
            path,
            imported_at: self.time,
            tags,
        })
    }
}

/// Compare dot-separated version strings, `expected` being a prefix.
pub(crate) fn version_matches(found: &str, expected: &str) -> bool {
    let found: Vec<&str> = found.trim().split('.').collect();
    let expected: Vec<&str> = expected.trim().split('.').collect();
    found.len() >= expected.len() && found.iter().zip(&expected).all(|(f, e)| f == e)
}

/// Turn an F-Spot base URI and encoded filename into a local path.
pub(crate) fn decode_location(base_uri: &str, filename: &str) -> StoreResult<PathBuf> {
    let mut joined = base_uri.to_string();
    if !joined.ends_with('/') {
        joined.push('/');
    }
    joined.push_str(filename);

    let url = Url::parse(&joined).map_err(|e| StoreError::InvalidLocation {
        uri: joined.clone(),
        reason: e.to_string(),
    })?;
    if filename.is_empty() {
        return Err(StoreError::InvalidLocation {
            uri: joined,
            reason: "empty filename".to_string(),
        });
    }
    url.to_file_path().map_err(|()| StoreError::InvalidLocation {
        uri: joined,
        reason: "not a local file URI".to_string(),
    })
}

/// Split a local path into an F-Spot base URI (with trailing slash) and encoded filename.
pub(crate) fn encode_location(path: &Path) -> StoreResult<(String, String)> {
    let url = Url::from_file_path(path).map_err(|()| StoreError::InvalidLocation {
        uri: path.display().to_string(),
        reason: "path is not absolute".to_string(),
    })?;
    let full = url.as_str();
    match full.rfind('/') {
        Some(idx) if idx + 1 < full.len() => {
            Ok((full[..=idx].to_string(), full[idx + 1..].to_string()))
        }
        _ => Err(StoreError::InvalidLocation {
            uri: full.to_string(),
            reason: "path has no file name".to_string(),
        }),
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

impl PhotoStore for SqliteStore {
    fn get_tag_children(&self, parent: Option<TagId>) -> StoreResult<Vec<Tag>> {
        let conn = self.conn.lock();
        let tags = match parent {
            Some(parent) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, name, category_id FROM tags WHERE category_id = ?1 ORDER BY id",
                )?;
                stmt.query_map(params![parent.get()], Self::tag_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, name, category_id FROM tags
                     WHERE category_id IS NULL OR category_id = 0
                     ORDER BY id",
                )?;
                stmt.query_map([], Self::tag_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(tags)
    }

    fn get_tag(&self, id: TagId) -> StoreResult<Tag> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, name, category_id FROM tags WHERE id = ?1",
            params![id.get()],
            Self::tag_from_row,
        )
        .optional()?
        .ok_or(StoreError::UnknownTag(id))
    }

    fn get_photos_for_tag(&self, tag: TagId) -> StoreResult<Vec<Photo>> {
        let raw = {
            let conn = self.conn.lock();
            let sql = format!(
                "SELECT {PHOTO_COLUMNS}
                 FROM photo_tags pt
                 JOIN photos p ON p.id = pt.photo_id
                 {PHOTO_VERSION_JOIN}
                 WHERE pt.tag_id = ?1
                 ORDER BY p.id"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            stmt.query_map(params![tag.get()], Self::photo_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut photos = Vec::with_capacity(raw.len());
        for row in raw {
            let id = row.id;
            match row.into_photo() {
                Ok(photo) => photos.push(photo),
                Err(e) => {
                    error!(photo = id, tag = tag.get(), error = %e, "Skipping photo row with unusable location");
                }
            }
        }
        Ok(photos)
    }

    fn get_photo(&self, id: PhotoId) -> StoreResult<Photo> {
        let raw = {
            let conn = self.conn.lock();
            let sql = format!(
                "SELECT {PHOTO_COLUMNS}
                 FROM photos p
                 {PHOTO_VERSION_JOIN}
                 WHERE p.id = ?1"
            );
            conn.query_row(&sql, params![id.get()], Self::photo_from_row)
                .optional()?
        };
        raw.ok_or(StoreError::UnknownPhoto(id))?.into_photo()
    }

    fn find_photo_by_path(&self, path: &Path) -> StoreResult<Option<Photo>> {
        let (base_uri, filename) = encode_location(path)?;
        let raw = {
            let conn = self.conn.lock();
            let sql = format!(
                "SELECT {PHOTO_COLUMNS}
                 FROM photos p
                 {PHOTO_VERSION_JOIN}
                 WHERE ifnull(v.base_uri, p.base_uri) = ?1
                   AND ifnull(v.filename, p.filename) = ?2
                 ORDER BY p.id
                 LIMIT 1"
            );
            conn.query_row(&sql, params![base_uri, filename], Self::photo_from_row)
                .optional()?
        };
        raw.map(RawPhoto::into_photo).transpose()
    }

    fn create_photo(&self, path: &Path, tags: &[TagId]) -> StoreResult<Photo> {
        let (base_uri, filename) = encode_location(path)?;
        let time = now_secs();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for tag in tags {
            Self::ensure_tag(&tx, *tag)?;
        }

        tx.execute("INSERT INTO rolls (time) VALUES (?1)", params![time])?;
        let roll_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO photos (time, base_uri, filename, description,
                                 roll_id, default_version_id, rating, md5_sum)
             VALUES (?1, ?2, ?3, '', ?4, 1, 0, NULL)",
            params![time, base_uri, filename, roll_id],
        )?;
        let photo_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO photo_versions (photo_id, version_id, name, base_uri,
                                         filename, md5_sum, protected)
             VALUES (?1, 1, 'Original', ?2, ?3, NULL, 1)",
            params![photo_id, base_uri, filename],
        )?;

        for tag in tags {
            tx.execute(
                "INSERT OR IGNORE INTO photo_tags (photo_id, tag_id) VALUES (?1, ?2)",
                params![photo_id, tag.get()],
            )?;
        }
        tx.commit()?;

        debug!(photo = photo_id, path = %path.display(), "Registered photo");
        Ok(Photo {
            id: PhotoId::new(photo_id),
            path: path.to_path_buf(),
            imported_at: time,
            tags: tags.iter().copied().collect(),
        })
    }

    fn add_tag(&self, photo: PhotoId, tag: TagId) -> StoreResult<()> {
        let conn = self.conn.lock();
        Self::ensure_tag(&conn, tag)?;
        let exists: Option<i64> = conn
            .query_row("SELECT id FROM photos WHERE id = ?1", params![photo.get()], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::UnknownPhoto(photo));
        }
        conn.execute(
            "INSERT OR IGNORE INTO photo_tags (photo_id, tag_id) VALUES (?1, ?2)",
            params![photo.get(), tag.get()],
        )?;
        Ok(())
    }

    fn remove_tag(&self, photo: PhotoId, tag: TagId) -> StoreResult<()> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM photo_tags WHERE photo_id = ?1 AND tag_id = ?2",
            params![photo.get(), tag.get()],
        )?;
        if removed == 0 {
            return Err(StoreError::UnknownPhoto(photo));
        }
        Ok(())
    }

    fn retag(&self, photo: PhotoId, from: TagId, to: TagId) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        Self::ensure_tag(&tx, to)?;
        let removed = tx.execute(
            "DELETE FROM photo_tags WHERE photo_id = ?1 AND tag_id = ?2",
            params![photo.get(), from.get()],
        )?;
        if removed == 0 {
            return Err(StoreError::UnknownPhoto(photo));
        }
        tx.execute(
            "INSERT OR IGNORE INTO photo_tags (photo_id, tag_id) VALUES (?1, ?2)",
            params![photo.get(), to.get()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn rename_photo_file(&self, photo: PhotoId, new_path: &Path) -> StoreResult<()> {
        let (base_uri, filename) = encode_location(new_path)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE photos SET base_uri = ?1, filename = ?2 WHERE id = ?3",
            params![base_uri, filename, photo.get()],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownPhoto(photo));
        }
        tx.execute(
            "UPDATE photo_versions SET base_uri = ?1, filename = ?2
             WHERE photo_id = ?3
               AND version_id = (SELECT default_version_id FROM photos WHERE id = ?3)",
            params![base_uri, filename, photo.get()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn delete_photo(&self, photo: PhotoId) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM photo_tags WHERE photo_id = ?1", params![photo.get()])?;
        tx.execute(
            "DELETE FROM photo_versions WHERE photo_id = ?1",
            params![photo.get()],
        )?;
        let removed = tx.execute("DELETE FROM photos WHERE id = ?1", params![photo.get()])?;
        if removed == 0 {
            return Err(StoreError::UnknownPhoto(photo));
        }
        tx.commit()?;
        Ok(())
    }

    fn create_tag(&self, name: &str, parent: Option<TagId>) -> StoreResult<Tag> {
        let conn = self.conn.lock();
        if let Some(parent) = parent {
            Self::ensure_tag(&conn, parent)?;
        }
        conn.execute(
            "INSERT INTO tags (name, category_id, is_category, sort_priority, icon)
             VALUES (?1, ?2, 1, 0, NULL)",
            params![name, parent.map_or(0, TagId::get)],
        )?;
        Ok(Tag {
            id: TagId::new(conn.last_insert_rowid()),
            name: name.to_string(),
            parent,
        })
    }

    fn update_tag(&self, id: TagId, name: &str, parent: Option<TagId>) -> StoreResult<()> {
        let conn = self.conn.lock();
        if let Some(parent) = parent {
            Self::ensure_tag(&conn, parent)?;
        }
        let updated = conn.execute(
            "UPDATE tags SET name = ?1, category_id = ?2 WHERE id = ?3",
            params![name, parent.map_or(0, TagId::get), id.get()],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownTag(id));
        }
        Ok(())
    }

    fn delete_tag(&self, id: TagId) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM photo_tags WHERE tag_id = ?1", params![id.get()])?;
        let removed = tx.execute("DELETE FROM tags WHERE id = ?1", params![id.get()])?;
        if removed == 0 {
            return Err(StoreError::UnknownTag(id));
        }
        tx.commit()?;
        Ok(())
    }
}
