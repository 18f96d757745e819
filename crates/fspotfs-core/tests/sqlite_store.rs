//! The engine running on top of a real F-Spot database file.

use fspotfs_core::store::{DEFAULT_BUSY_TIMEOUT, DEFAULT_DB_VERSION};
use fspotfs_core::{
    AccessMode, EntryKind, ErrorKind, ImportSource, PhotoStore, SqliteStore, StaticConfig,
    StoreError, VfsCore, VfsOptions, VirtualPath,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn seeded_db(dir: &Path) -> std::path::PathBuf {
    let db = dir.join("photos.db");
    let store = SqliteStore::create(&db).expect("create database");
    let vacation = store.create_tag("Vacation", None).unwrap();
    let beach = store.create_tag("Beach", Some(vacation.id)).unwrap();

    let original = dir.join("library").join("p1.jpg");
    fs::create_dir_all(original.parent().unwrap()).unwrap();
    fs::write(&original, b"jpeg").unwrap();
    store.create_photo(&original, &[beach.id]).unwrap();
    db
}

fn open_vfs(dir: &Path, db: &Path, mode: AccessMode) -> VfsCore<SqliteStore> {
    let store = SqliteStore::open(db, DEFAULT_BUSY_TIMEOUT).expect("open database");
    store.check_version(DEFAULT_DB_VERSION).expect("version");
    VfsCore::new(
        Arc::new(store),
        Arc::new(StaticConfig::new(dir.join("collection"))),
        VfsOptions {
            mode,
            refresh_interval: None,
            ..VfsOptions::default()
        },
    )
}

#[test]
fn test_browse_existing_database() {
    let dir = TempDir::new().unwrap();
    let db = seeded_db(dir.path());
    let vfs = open_vfs(dir.path(), &db, AccessMode::ReadOnly);

    let root: Vec<String> = vfs
        .list(&VirtualPath::root())
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(root, vec!["Vacation"]);

    let beach = vfs.list(&VirtualPath::new("/Vacation/Beach")).unwrap();
    assert_eq!(beach.len(), 1);
    assert_eq!(beach[0].metadata.kind, EntryKind::Link);
    assert_eq!(
        beach[0].metadata.link_target.as_deref(),
        Some(dir.path().join("library/p1.jpg").as_path())
    );
}

#[test]
fn test_import_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let db = seeded_db(dir.path());

    {
        let vfs = open_vfs(dir.path(), &db, AccessMode::ReadWrite);
        let entry = vfs
            .write(
                &VirtualPath::new("/Vacation/Beach/new photo.jpg"),
                ImportSource::Bytes(b"fresh"),
            )
            .unwrap();
        assert_eq!(entry.photo.path, dir.path().join("collection/new photo.jpg"));
    }

    let vfs = open_vfs(dir.path(), &db, AccessMode::ReadOnly);
    let target = vfs
        .read_link(&VirtualPath::new("/Vacation/Beach/new photo.jpg"))
        .unwrap();
    assert_eq!(fs::read(target).unwrap(), b"fresh");
}

#[test]
fn test_duplicate_names_in_database_are_disambiguated() {
    let dir = TempDir::new().unwrap();
    let db = seeded_db(dir.path());
    {
        let store = SqliteStore::open(&db, DEFAULT_BUSY_TIMEOUT).unwrap();
        let vacation = store.get_tag_children(None).unwrap()[0].id;
        store.create_tag("Beach", Some(vacation)).unwrap();
        let other = dir.path().join("elsewhere/p1.jpg");
        store.create_photo(&other, &[vacation]).unwrap();
    }

    let vfs = open_vfs(dir.path(), &db, AccessMode::ReadOnly);
    let names: Vec<String> = vfs
        .list(&VirtualPath::new("/Vacation"))
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["Beach", "Beach-2", "p1.jpg"]);
}

#[test]
fn test_version_mismatch_is_reported() {
    let dir = TempDir::new().unwrap();
    let db = seeded_db(dir.path());
    let store = SqliteStore::open(&db, DEFAULT_BUSY_TIMEOUT).unwrap();

    let err = store.check_version("18").unwrap_err();
    assert!(matches!(err, StoreError::VersionMismatch { .. }));
    assert_eq!(err.kind(), ErrorKind::StoreFailure);
}

#[test]
fn test_unlink_keeps_library_original() {
    let dir = TempDir::new().unwrap();
    let db = seeded_db(dir.path());
    let vfs = open_vfs(dir.path(), &db, AccessMode::ReadWrite);

    vfs.unlink(&VirtualPath::new("/Vacation/Beach/p1.jpg")).unwrap();
    assert!(dir.path().join("library/p1.jpg").exists());
    assert!(
        vfs.list(&VirtualPath::new("/Vacation/Beach"))
            .unwrap()
            .is_empty()
    );
}
