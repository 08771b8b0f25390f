//! rclone storage backend for CSI.
//!
//! [`RcloneBackend`] implements [`CsiIdentity`], [`CsiController`] and
//! [`CsiNode`].  The controller side creates and removes the volume's
//! directory at the remote with out-of-band `rclone` commands.  The node side
//! does not mount anything itself: publishing reconciles a config Secret and
//! a mount Deployment pinned to this node, then waits for the FUSE mount to
//! appear at the target path.
//!
//! # Volume context
//!
//! ```text
//! remote        = <rclone remote name>
//! path          = <path at the remote>/<volume name>
//! mount/<flag>  = <value>   # optional rclone mount flag override
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::cluster::ClusterStore;
use crate::command::{ConfigFile, RcloneCommand};
use crate::config::DriverConfig;
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::flags::mount_overrides;
use crate::identity::CsiIdentity;
use crate::locator;
use crate::mount::{self, MountTable};
use crate::node::CsiNode;
use crate::reconciler::Reconciler;
use crate::types::*;
use crate::volume::RcloneVolume;

/// Flag appended to the mount command for read-only publishes.
const READ_ONLY_FLAG: &str = "read-only";

/// CSI backend driving rclone remotes through per-volume mount workloads.
pub struct RcloneBackend {
    config: DriverConfig,
    store: Arc<dyn ClusterStore>,
    reconciler: Reconciler,
    rclone: RcloneCommand,
    mounts: MountTable,
}

impl RcloneBackend {
    pub fn new(config: DriverConfig, store: Arc<dyn ClusterStore>) -> Self {
        let reconciler = Reconciler::new(Arc::clone(&store), config.workload_settings());
        let rclone = RcloneCommand::new(config.rclone_binary.clone());
        Self {
            config,
            store,
            reconciler,
            rclone,
            mounts: MountTable::default(),
        }
    }

    /// Observe mounts through `mounts` instead of `/proc/self/mounts`.
    pub fn with_mount_table(mut self, mounts: MountTable) -> Self {
        self.mounts = mounts;
        self
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }
}

/// Fetch a non-empty entry of a request map.
fn required<'a>(
    map: &'a HashMap<String, String>,
    key: &str,
    kind: &str,
) -> Result<&'a str, CsiError> {
    map.get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| CsiError::invalid(format!("{kind} {key} missing in request")))
}

fn require_volume_id(volume_id: &VolumeId) -> Result<(), CsiError> {
    if volume_id.is_empty() {
        return Err(CsiError::invalid("volume id missing in request"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CsiIdentity
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiIdentity for RcloneBackend {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: self.config.driver_name.clone(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        Ok(true)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(vec![PluginCapability::ControllerService])
    }
}

// ---------------------------------------------------------------------------
// CsiController
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiController for RcloneBackend {
    #[instrument(skip(self, req), fields(name = %req.name))]
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        if req.name.is_empty() {
            return Err(CsiError::invalid("name missing in request"));
        }
        if req.volume_capabilities.is_empty() {
            return Err(CsiError::invalid("volume capabilities missing in request"));
        }
        let config = required(&req.secrets, SECRET_RCLONE_CONF, "secret")?;
        let remote = required(&req.parameters, PARAM_REMOTE, "parameter")?;
        let base_path = required(&req.parameters, PARAM_PATH, "parameter")?;
        let volume_path = format!("{base_path}/{}", req.name);

        let config_file = ConfigFile::write(config)?;
        self.rclone
            .mkdir(remote, &volume_path, config_file.path())
            .await?;

        let volume_id = VolumeId(uuid::Uuid::new_v4().to_string());
        info!(%volume_id, %remote, path = %volume_path, "volume created");
        Ok(Volume {
            volume_id,
            capacity_bytes: req.capacity_bytes,
            volume_context: HashMap::from([
                (PARAM_REMOTE.to_owned(), remote.to_owned()),
                (PARAM_PATH.to_owned(), volume_path),
            ]),
        })
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<(), CsiError> {
        require_volume_id(&req.volume_id)?;
        let config = required(&req.secrets, SECRET_RCLONE_CONF, "secret")?;

        let volume = locator::resolve(self.store.as_ref(), &req.volume_id).await?;
        let config_file = ConfigFile::write(config)?;
        self.rclone
            .rmdirs(&volume.remote, &volume.remote_path, config_file.path())
            .await?;

        info!(remote = %volume.remote, path = %volume.remote_path, "volume deleted");
        Ok(())
    }

    async fn validate_volume_capabilities(
        &self,
        req: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse, CsiError> {
        require_volume_id(&req.volume_id)?;
        if req.volume_capabilities.is_empty() {
            return Err(CsiError::invalid("volume capabilities missing in request"));
        }
        // Any access mode works on a FUSE mount of a remote.
        Ok(ValidateVolumeCapabilitiesResponse {
            confirmed: Some(ConfirmedCapabilities {
                volume_capabilities: req.volume_capabilities,
                volume_context: req.volume_context,
                parameters: req.parameters,
            }),
            message: String::new(),
        })
    }

    async fn controller_get_volume(&self, volume_id: &VolumeId) -> Result<Volume, CsiError> {
        Ok(Volume {
            volume_id: volume_id.clone(),
            ..Default::default()
        })
    }

    async fn controller_get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        Ok(vec![ControllerCapability::CreateDeleteVolume])
    }
}

// ---------------------------------------------------------------------------
// CsiNode
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiNode for RcloneBackend {
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, target_path = %req.target_path))]
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        require_volume_id(&req.volume_id)?;
        if req.target_path.is_empty() {
            return Err(CsiError::invalid("target path missing in request"));
        }
        if req.volume_capability.is_none() {
            return Err(CsiError::invalid("volume capability missing in request"));
        }
        let config = required(&req.secrets, SECRET_RCLONE_CONF, "secret")?;
        let remote = required(&req.volume_context, PARAM_REMOTE, "volume context")?;
        let remote_path = required(&req.volume_context, PARAM_PATH, "volume context")?;
        let target = Path::new(&req.target_path);

        if self.mounts.is_mountpoint(target).await {
            if mount::is_reachable(target).await {
                debug!("target already mounted, assuming idempotent retry");
                return Ok(());
            }
            warn!("stale mount at target, unmounting");
            self.mounts.unmount(target)?;
        }

        let volume = RcloneVolume::new(req.volume_id.clone(), remote, remote_path);
        let mut overrides = mount_overrides(&req.volume_context);
        if req.read_only {
            overrides
                .entry(READ_ONLY_FLAG.to_owned())
                .or_insert_with(String::new);
        }

        let outcome = self
            .reconciler
            .ensure_mounted(&volume, config, &overrides, target)
            .await?;
        debug!(?outcome, "waiting for mount");

        self.mounts
            .wait_until_mounted(
                target,
                self.config.mount_poll_interval,
                self.config.mount_timeout,
            )
            .await?;

        info!(source = %volume.mount_source(), "volume published");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError> {
        require_volume_id(volume_id)?;
        if target_path.is_empty() {
            return Err(CsiError::invalid("target path missing in request"));
        }

        let volume = locator::resolve(self.store.as_ref(), volume_id).await?;
        self.reconciler.tear_down(&volume).await?;

        let target = Path::new(target_path);
        if self.mounts.is_mountpoint(target).await
            && let Err(e) = self.mounts.unmount(target)
        {
            warn!(error = %e, "unmount after tear down failed");
        }
        match tokio::fs::remove_dir(target).await {
            Ok(()) => debug!("target directory removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "could not remove target directory"),
        }

        info!("volume unpublished");
        Ok(())
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.config.node_id.clone(),
            max_volumes: 0,
        })
    }
}
