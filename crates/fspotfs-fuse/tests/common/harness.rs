//! Test mount harness for FUSE integration tests.
//!
//! `TestMount` mounts a tag tree over an in-memory store with a temporary
//! collection directory, and unmounts on drop.

// Not all tests use all TestMount methods
#![allow(dead_code)]

use fspotfs_core::{AccessMode, MemoryStore, StaticConfig, VfsCore, VfsOptions};
use fspotfs_fuse::{FuseMountHandle, MountConfig, TagFs};
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// How long to wait for mount to become ready.
const MOUNT_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait between mount readiness checks.
const MOUNT_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// A mounted tag tree for testing.
pub struct TestMount {
    /// Unmounts on drop. Declared first so it drops before the temp dir.
    _handle: FuseMountHandle,
    pub mount_path: PathBuf,
    pub store: Arc<MemoryStore>,
    temp: TempDir,
}

impl TestMount {
    /// Read-write mount with the tags Vacation, Vacation/Beach and Family.
    pub fn with_sample_tags() -> Result<Self, String> {
        Self::with_mode(AccessMode::ReadWrite)
    }

    pub fn read_only() -> Result<Self, String> {
        Self::with_mode(AccessMode::ReadOnly)
    }

    fn with_mode(mode: AccessMode) -> Result<Self, String> {
        let temp = TempDir::new().map_err(|e| format!("Failed to create temp dir: {e}"))?;
        let mount_path = temp.path().join("mnt");
        fs::create_dir(&mount_path).map_err(|e| format!("Failed to create mount point: {e}"))?;

        let original = temp.path().join("originals").join("p1.jpg");
        fs::create_dir_all(original.parent().ok_or("no parent")?)
            .and_then(|()| fs::write(&original, b"original"))
            .map_err(|e| format!("Failed to create original: {e}"))?;

        let store = Arc::new(MemoryStore::new());
        store.insert_tag(1, "Vacation", None);
        store.insert_tag(2, "Beach", Some(1));
        store.insert_tag(3, "Family", None);
        store.insert_photo(10, &original, &[2]);

        let config = StaticConfig::new(temp.path().join("collection")).dated(false);
        let vfs = VfsCore::new(
            Arc::clone(&store),
            Arc::new(config),
            VfsOptions {
                mode,
                ..VfsOptions::default()
            },
        );

        // No kernel caching, so every check sees the tree as it is now
        let mount_config = MountConfig::default()
            .attr_ttl(Duration::ZERO)
            .fs_name("fspot:test")
            .read_only(mode == AccessMode::ReadOnly);
        let fs = TagFs::new(Arc::new(vfs), mount_config.clone());
        let handle = fspotfs_fuse::mount(fs, &mount_path, &mount_config)
            .map_err(|e| format!("Failed to mount: {e}"))?;

        Self::wait_for_mount(&mount_path)?;

        Ok(Self {
            _handle: handle,
            mount_path,
            store,
            temp,
        })
    }

    /// Wait until the mount point's device differs from its parent's.
    fn wait_for_mount(mount_path: &Path) -> Result<(), String> {
        use std::os::unix::fs::MetadataExt;

        let parent_path = mount_path.parent().ok_or("mount_path has no parent")?;
        let parent_dev = fs::metadata(parent_path)
            .map_err(|e| format!("Failed to stat parent: {e}"))?
            .dev();

        let deadline = Instant::now() + MOUNT_READY_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(mount_meta) = fs::metadata(mount_path)
                && mount_meta.dev() != parent_dev
            {
                return Ok(());
            }
            thread::sleep(MOUNT_CHECK_INTERVAL);
        }
        Err("Mount did not become ready in time (device ID unchanged)".to_string())
    }

    pub fn collection(&self) -> PathBuf {
        self.temp.path().join("collection")
    }

    pub fn original(&self) -> PathBuf {
        self.temp.path().join("originals").join("p1.jpg")
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.mount_path.join(relative)
    }

    /// Reads through the link into the original.
    pub fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let mut content = Vec::new();
        File::open(self.path(path))?.read_to_end(&mut content)?;
        Ok(content)
    }

    pub fn write(&self, path: &str, content: &[u8]) -> io::Result<()> {
        let mut file = File::create(self.path(path))?;
        file.write_all(content)?;
        Ok(())
    }

    pub fn mkdir(&self, path: &str) -> io::Result<()> {
        fs::create_dir(self.path(path))
    }

    pub fn remove(&self, path: &str) -> io::Result<()> {
        fs::remove_file(self.path(path))
    }

    pub fn rmdir(&self, path: &str) -> io::Result<()> {
        fs::remove_dir(self.path(path))
    }

    pub fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.path(from), self.path(to))
    }

    pub fn symlink(&self, target: &Path, link_path: &str) -> io::Result<()> {
        std::os::unix::fs::symlink(target, self.path(link_path))
    }

    pub fn read_link(&self, path: &str) -> io::Result<PathBuf> {
        fs::read_link(self.path(path))
    }

    pub fn symlink_metadata(&self, path: &str) -> io::Result<Metadata> {
        fs::symlink_metadata(self.path(path))
    }

    pub fn list(&self, path: &str) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(self.path(path))?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().to_string()))
            .collect::<io::Result<_>>()?;
        names.sort();
        Ok(names)
    }
}

/// Skip test if FUSE is not available.
#[macro_export]
macro_rules! skip_if_no_fuse {
    () => {
        if !fspotfs_fuse::is_available() {
            eprintln!("Skipping test: FUSE not available on this system");
            return;
        }
    };
}

/// Skip test if mounting fails (common in CI environments).
#[macro_export]
macro_rules! require_mount {
    ($mount_result:expr) => {
        match $mount_result {
            Ok(m) => m,
            Err(e) => {
                eprintln!("Skipping test: {}", e);
                return;
            }
        }
    };
}
