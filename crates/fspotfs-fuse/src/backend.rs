//! Mounting and unmounting a [`TagFs`] through fuser.

use crate::config::MountConfig;
use crate::filesystem::TagFs;
use fspotfs_core::PhotoStore;
use fuser::{BackgroundSession, MountOption};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Timeout for graceful session.join() before forcing unmount.
/// The join thread may leak on timeout rather than block shutdown.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time allowed for the mount syscall.
pub const DEFAULT_MOUNT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum MountError {
    #[error("FUSE is not available: {0}")]
    BackendUnavailable(String),

    #[error("Mount failed: {0}")]
    Mount(#[source] io::Error),
}

/// Whether the FUSE kernel side is installed on this machine.
pub fn is_available() -> bool {
    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Filesystems/macfuse.fs").exists()
    }
    #[cfg(target_os = "linux")]
    {
        Path::new("/dev/fuse").exists()
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        false
    }
}

/// Why FUSE is unavailable, or `None` if it is available.
pub fn unavailable_reason() -> Option<String> {
    if is_available() {
        return None;
    }

    #[cfg(target_os = "macos")]
    {
        Some("macFUSE is not installed. Download it from https://osxfuse.github.io/".to_string())
    }
    #[cfg(target_os = "linux")]
    {
        Some("FUSE is not available. Ensure the fuse kernel module is loaded.".to_string())
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        Some("FUSE is not supported on this platform.".to_string())
    }
}

/// Handle to a mounted tag tree. Dropping it unmounts.
pub struct FuseMountHandle {
    session: Option<BackgroundSession>,
    mountpoint: PathBuf,
}

impl FuseMountHandle {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Unmount and wait for the session to end. Blocks while files are open.
    pub fn unmount(mut self) {
        info!(mountpoint = %self.mountpoint.display(), "Unmounting FUSE filesystem");
        if let Some(session) = self.session.take() {
            session.join();
        }
        info!(mountpoint = %self.mountpoint.display(), "FUSE unmount successful");
    }

    fn force_unmount(&self) {
        if let Err(e) = fspotfs_mount::force_unmount(&self.mountpoint) {
            warn!(error = %e, "Force unmount failed");
        }
    }
}

impl Drop for FuseMountHandle {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        debug!(mountpoint = %self.mountpoint.display(), "Unmounting FUSE filesystem");

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            session.join();
            let _ = tx.send(());
        });

        match rx.recv_timeout(JOIN_TIMEOUT) {
            Ok(()) => {
                debug!(mountpoint = %self.mountpoint.display(), "Graceful unmount completed");
            }
            Err(_) => {
                warn!(
                    mountpoint = %self.mountpoint.display(),
                    timeout = ?JOIN_TIMEOUT,
                    "session.join() timed out, forcing unmount"
                );
                self.force_unmount();
            }
        }
    }
}

/// Mount `fs` at `mountpoint` in a background session.
pub fn mount<S: PhotoStore + 'static>(
    fs: TagFs<S>,
    mountpoint: &Path,
    config: &MountConfig,
) -> Result<FuseMountHandle, MountError> {
    mount_with_timeout(fs, mountpoint, config, DEFAULT_MOUNT_TIMEOUT)
}

/// Like [`mount`], giving up if the mount syscall blocks longer than
/// `timeout`, which happens on a stale mount at `mountpoint`.
pub fn mount_with_timeout<S: PhotoStore + 'static>(
    fs: TagFs<S>,
    mountpoint: &Path,
    config: &MountConfig,
    timeout: Duration,
) -> Result<FuseMountHandle, MountError> {
    if let Some(reason) = unavailable_reason() {
        return Err(MountError::BackendUnavailable(reason));
    }

    let options = config.mount_options();
    info!(
        mountpoint = %mountpoint.display(),
        read_only = config.read_only,
        "Mounting tag tree"
    );
    let notifier_cell = fs.notifier_cell();
    let session = spawn_mount_with_timeout(fs, mountpoint, options, timeout)?;
    if notifier_cell.set(session.notifier()).is_err() {
        warn!("Kernel notifier already set");
    } else {
        debug!("Injected kernel notifier for cache invalidation");
    }
    Ok(FuseMountHandle {
        session: Some(session),
        mountpoint: mountpoint.to_path_buf(),
    })
}

fn spawn_mount_with_timeout<S: PhotoStore + 'static>(
    fs: TagFs<S>,
    mountpoint: &Path,
    options: Vec<MountOption>,
    timeout: Duration,
) -> Result<BackgroundSession, MountError> {
    let mountpoint = mountpoint.to_path_buf();
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let result = fuser::spawn_mount2(fs, &mountpoint, &options);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(session)) => Ok(session),
        Ok(Err(e)) => Err(MountError::Mount(e)),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(MountError::Mount(io::Error::new(
            io::ErrorKind::TimedOut,
            "Mount operation timed out - the mountpoint may be on a stale FUSE mount",
        ))),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(MountError::Mount(io::Error::other(
            "Mount thread terminated unexpectedly",
        ))),
    }
}
