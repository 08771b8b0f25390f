//! Mount-table inspection on the local node.
//!
//! The mount itself is performed by the rclone container; the node service
//! only observes the host mount table to learn when the FUSE mount appears,
//! and cleans up stale mounts it finds on the target path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::CsiError;

/// Default mount table of the calling process.
pub const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Poll interval used while waiting for a mount.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Ceiling on how long to wait for a mount.
pub const DEFAULT_MOUNT_TIMEOUT: Duration = Duration::from_secs(60);

/// Detaches a mount point.
pub trait Unmounter: Send + Sync {
    fn unmount(&self, path: &Path) -> Result<(), CsiError>;
}

/// `umount(2)` on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemUnmounter;

impl Unmounter for SystemUnmounter {
    fn unmount(&self, path: &Path) -> Result<(), CsiError> {
        nix::mount::umount(path).map_err(|e| CsiError::UnmountFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

/// A `/proc/mounts`-formatted file, plus the way to detach what it lists.
#[derive(Clone)]
pub struct MountTable {
    path: PathBuf,
    unmounter: Arc<dyn Unmounter>,
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new(PROC_MOUNTS)
    }
}

impl MountTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            unmounter: Arc::new(SystemUnmounter),
        }
    }

    pub fn with_unmounter(mut self, unmounter: Arc<dyn Unmounter>) -> Self {
        self.unmounter = unmounter;
        self
    }

    /// Unmount `target`.
    pub fn unmount(&self, target: &Path) -> Result<(), CsiError> {
        debug!(path = %target.display(), "unmounting");
        self.unmounter.unmount(target)
    }

    /// Return `true` if `target` is listed as a mount point.
    ///
    /// Note: the mount table uses octal escapes (`\040` for space, etc.).
    /// CSI target paths must not contain whitespace, so comparing components
    /// directly is safe here.  An unreadable table counts as "not mounted".
    pub async fn is_mountpoint(&self, target: &Path) -> bool {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) => {
                debug!(table = %self.path.display(), error = %e, "mount table unreadable");
                return false;
            }
        };
        // Format: <device> <mountpoint> <fstype> <options> <dump> <pass>
        contents.lines().any(|line| {
            line.split_whitespace()
                .nth(1)
                .is_some_and(|mountpoint| Path::new(mountpoint) == target)
        })
    }

    /// Wait until `target` shows up in the mount table.
    ///
    /// Checks immediately and then every `poll_interval`.  Fails with
    /// [`CsiError::MountTimeout`] once `timeout` has elapsed.  Dropping the
    /// returned future stops the wait.
    pub async fn wait_until_mounted(
        &self,
        target: &Path,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<(), CsiError> {
        let poll = async {
            loop {
                if self.is_mountpoint(target).await {
                    return;
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| CsiError::MountTimeout {
                path: target.display().to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })
    }
}

/// Return `true` if the directory at `path` can be listed.
///
/// A FUSE mount whose serving process died fails here with `ENOTCONN`.
pub async fn is_reachable(path: &Path) -> bool {
    match tokio::fs::read_dir(path).await {
        Ok(_) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "mount point is not reachable");
            false
        }
    }
}
