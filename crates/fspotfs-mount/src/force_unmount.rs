//! Detaching a mountpoint whose FUSE session did not shut down cleanly.
//!
//! Callers must only pass mountpoints they mounted themselves; the commands
//! run here detach whatever is mounted at the path.

use anyhow::{bail, Result};
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Unmount commands tried in order, most specific first.
#[cfg(target_os = "linux")]
const UNMOUNT_COMMANDS: &[(&str, &[&str])] = &[
    ("fusermount", &["-uz"]),
    ("umount", &["-l"]),
    ("umount", &["-f"]),
];

#[cfg(target_os = "macos")]
const UNMOUNT_COMMANDS: &[(&str, &[&str])] = &[("diskutil", &["unmount", "force"]), ("umount", &["-f"])];

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const UNMOUNT_COMMANDS: &[(&str, &[&str])] = &[];

/// Force-unmount the filesystem at `mountpoint`.
///
/// On Linux this is a lazy unmount, so handles still open inside the mount
/// keep working until closed.
pub fn force_unmount(mountpoint: &Path) -> Result<()> {
    let mut last_error = String::from("no unmount command available on this platform");

    for (program, args) in UNMOUNT_COMMANDS {
        match Command::new(program).args(*args).arg(mountpoint).output() {
            Ok(output) if output.status.success() => {
                debug!(mountpoint = %mountpoint.display(), program, "Force unmount succeeded");
                return Ok(());
            }
            Ok(output) => {
                last_error = String::from_utf8_lossy(&output.stderr).trim().to_string();
                debug!(program, error = %last_error, "Unmount attempt failed");
            }
            Err(e) => {
                last_error = format!("{program}: {e}");
                debug!(program, error = %e, "Unmount command not available");
            }
        }
    }

    bail!("Failed to force unmount {}: {}", mountpoint.display(), last_error)
}
