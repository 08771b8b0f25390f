//! Driver configuration.
//!
//! Environment variables:
//! - `NODE_ID`: name of the node this process runs on; mount Deployments are
//!   pinned to it.
//! - `POD_NAMESPACE`: namespace in which config Secrets and mount
//!   Deployments are created.  Defaults to `default`.

use std::path::PathBuf;
use std::time::Duration;

use crate::mount::{DEFAULT_MOUNT_TIMEOUT, DEFAULT_POLL_INTERVAL};
use crate::workload::{DEFAULT_MOUNTER_IMAGE, WorkloadSettings};

pub const ENV_NODE_ID: &str = "NODE_ID";
pub const ENV_POD_NAMESPACE: &str = "POD_NAMESPACE";

pub const DEFAULT_DRIVER_NAME: &str = "csi-rclone";

/// Runtime settings of the rclone CSI driver.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Name reported by `GetPluginInfo`.
    pub driver_name: String,
    pub node_id: String,
    pub namespace: String,
    /// Image of the per-volume mount container.
    pub mounter_image: String,
    /// `rclone` executable used for controller-side commands.
    pub rclone_binary: PathBuf,
    pub mount_poll_interval: Duration,
    /// Ceiling on waiting for a published volume to appear in the mount table.
    pub mount_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            driver_name: DEFAULT_DRIVER_NAME.to_owned(),
            node_id: String::new(),
            namespace: "default".to_owned(),
            mounter_image: DEFAULT_MOUNTER_IMAGE.to_owned(),
            rclone_binary: PathBuf::from("rclone"),
            mount_poll_interval: DEFAULT_POLL_INTERVAL,
            mount_timeout: DEFAULT_MOUNT_TIMEOUT,
        }
    }
}

impl DriverConfig {
    /// Defaults overlaid with `NODE_ID` and `POD_NAMESPACE` when set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(node_id) = lookup(ENV_NODE_ID).filter(|v| !v.is_empty()) {
            config.node_id = node_id;
        }
        if let Some(namespace) = lookup(ENV_POD_NAMESPACE).filter(|v| !v.is_empty()) {
            config.namespace = namespace;
        }
        config
    }

    /// Settings applied to every mount Deployment.
    pub fn workload_settings(&self) -> WorkloadSettings {
        WorkloadSettings {
            namespace: self.namespace.clone(),
            node_name: self.node_id.clone(),
            image: self.mounter_image.clone(),
            ..Default::default()
        }
    }
}
