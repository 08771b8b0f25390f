//! Out-of-band `rclone` invocations.
//!
//! Volume creation and deletion run `rclone` directly on the controller to
//! create or remove the volume's directory at the remote.  The config
//! material arrives as request secrets and is handed to rclone through a
//! temporary file that lives only for the duration of the call.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::CsiError;

/// Verb creating a directory at the remote.
pub const VERB_MKDIR: &str = "mkdir";
/// Verb removing empty directories under a path at the remote.
pub const VERB_RMDIRS: &str = "rmdirs";

/// An `rclone.conf` written to a private temporary file, removed on drop.
pub struct ConfigFile {
    file: NamedTempFile,
}

impl ConfigFile {
    pub fn write(contents: &str) -> Result<Self, CsiError> {
        let mut file = tempfile::Builder::new()
            .prefix("rclone.conf")
            .tempfile()
            .map_err(|e| CsiError::Internal(format!("create temp config: {e}")))?;
        file.write_all(contents.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| CsiError::Internal(format!("write temp config: {e}")))?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Runs `rclone <verb> <remote>:<path> [--flag=value]...`.
#[derive(Debug, Clone)]
pub struct RcloneCommand {
    program: PathBuf,
}

impl Default for RcloneCommand {
    fn default() -> Self {
        Self::new("rclone")
    }
}

impl RcloneCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Execute one rclone sub-command and wait for it to exit.
    ///
    /// A non-zero exit status becomes [`CsiError::CommandFailed`] carrying the
    /// verb, the `remote:path` argument and the combined output.
    pub async fn run(
        &self,
        verb: &str,
        remote: &str,
        path: &str,
        flags: &[(&str, &str)],
    ) -> Result<(), CsiError> {
        let target = format!("{remote}:{path}");
        let mut args = vec![verb.to_owned(), target.clone()];
        args.extend(flags.iter().map(|(k, v)| format!("--{k}={v}")));

        info!(%verb, %target, program = %self.program.display(), "executing rclone command");
        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CsiError::CommandFailed {
                verb: verb.to_owned(),
                target: target.clone(),
                output: format!("spawn: {e}"),
            })?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(CsiError::CommandFailed {
                verb: verb.to_owned(),
                target,
                output: combined,
            });
        }

        debug!(%verb, %target, "rclone command succeeded");
        Ok(())
    }

    /// `rclone mkdir <remote>:<path> --config=<config>`.
    pub async fn mkdir(&self, remote: &str, path: &str, config: &Path) -> Result<(), CsiError> {
        let config = config.to_string_lossy();
        self.run(VERB_MKDIR, remote, path, &[("config", config.as_ref())])
            .await
    }

    /// `rclone rmdirs <remote>:<path> --config=<config>`.
    pub async fn rmdirs(&self, remote: &str, path: &str, config: &Path) -> Result<(), CsiError> {
        let config = config.to_string_lossy();
        self.run(VERB_RMDIRS, remote, path, &[("config", config.as_ref())])
            .await
    }
}
