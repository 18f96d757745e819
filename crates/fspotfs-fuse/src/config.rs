//! Mount configuration for the FUSE filesystem.

use fuser::MountOption;
use std::time::Duration;

/// How long the kernel may cache attributes and entries.
///
/// Kept below the tag tree's own refresh interval so listings and attributes
/// go stale together.
pub const DEFAULT_ATTR_TTL: Duration = Duration::from_secs(1);

/// Filesystem subtype shown in the mount table.
pub const SUBTYPE: &str = "fspotfs";

/// Configuration options for the FUSE filesystem.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Time-to-live for attributes and entries handed to the kernel.
    pub attr_ttl: Duration,

    /// Mount read-only.
    pub read_only: bool,

    /// Owner reported for every entry.
    pub uid: u32,

    /// Group reported for every entry.
    pub gid: u32,

    /// Source name shown in the mount table, e.g. `fspot:photos.db`.
    pub fs_name: String,

    /// Unmount automatically when the process exits.
    pub auto_unmount: bool,
}

impl Default for MountConfig {
    /// Entries are owned by the mounting user.
    fn default() -> Self {
        Self {
            attr_ttl: DEFAULT_ATTR_TTL,
            read_only: false,
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
            fs_name: "fspot".to_string(),
            auto_unmount: true,
        }
    }
}

impl MountConfig {
    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[must_use]
    pub fn uid(mut self, uid: u32) -> Self {
        self.uid = uid;
        self
    }

    #[must_use]
    pub fn gid(mut self, gid: u32) -> Self {
        self.gid = gid;
        self
    }

    /// Sets the mount source name.
    #[must_use]
    pub fn fs_name(mut self, name: impl Into<String>) -> Self {
        self.fs_name = name.into();
        self
    }

    #[must_use]
    pub fn auto_unmount(mut self, auto_unmount: bool) -> Self {
        self.auto_unmount = auto_unmount;
        self
    }

    /// Options passed to `fuser` when mounting.
    pub fn mount_options(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName(self.fs_name.clone()),
            MountOption::Subtype(SUBTYPE.to_string()),
            // Let the kernel check the synthetic permissions itself
            MountOption::DefaultPermissions,
        ];

        if self.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }

        #[cfg(target_os = "macos")]
        options.push(MountOption::CUSTOM(format!("volname={}", self.fs_name)));

        options.push(if self.read_only {
            MountOption::RO
        } else {
            MountOption::RW
        });
        options
    }
}
