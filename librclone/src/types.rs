//! Request and response shapes of the driver's CSI surface.
//!
//! Everything here crosses the wire as JSON inside a
//! [`CsiMessage`](crate::message::CsiMessage), so field names are part of the
//! protocol contract and mirror the CSI RPC fields they stand for.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Secret key holding the raw `rclone.conf` text.
pub const SECRET_RCLONE_CONF: &str = "rclone.conf";
/// Parameter / volume-context key naming the rclone remote.
pub const PARAM_REMOTE: &str = "remote";
/// Parameter / volume-context key naming the path inside the remote.
pub const PARAM_PATH: &str = "path";
/// Prefix marking a volume-context key as an `rclone mount` flag override.
pub const PARAM_MOUNT_PREFIX: &str = "mount/";

// ----- Volume identity -------------------------------------------------------

/// Volume handle as issued by `CreateVolume` and recorded in the PV.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl VolumeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ----- Access mode & capabilities --------------------------------------------

/// Access mode requested by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    /// Single-node read-write.
    ReadWriteOnce,
    /// Multi-node read-only.
    ReadOnlyMany,
    /// Multi-node read-write.
    ReadWriteMany,
}

/// One capability the caller needs from a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Orchestrator mount options; rclone flags come from `mount/<flag>` instead.
    #[serde(default)]
    pub mount_flags: Vec<String>,
    /// Filesystem type; rclone mounts are FUSE based.
    #[serde(default = "default_fs_type")]
    pub fs_type: String,
}

fn default_fs_type() -> String {
    "fuse.rclone".to_owned()
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self {
            access_mode: AccessMode::ReadWriteOnce,
            mount_flags: Vec::new(),
            fs_type: default_fs_type(),
        }
    }
}

// ----- Volume metadata -------------------------------------------------------

/// Metadata for a provisioned volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Volume {
    /// Unique volume identifier.
    pub volume_id: VolumeId,
    /// Capacity echoed from the request; rclone remotes are not sized.
    pub capacity_bytes: u64,
    /// Opaque context passed from Controller to Node operations.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

// ----- Requests --------------------------------------------------------------

/// `CreateVolume` input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    /// Caller-chosen volume name; becomes a sub-directory of `path`.
    pub name: String,
    /// Desired capacity in bytes.
    #[serde(default)]
    pub capacity_bytes: u64,
    /// Required capabilities.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Storage-class parameters, `remote` and `path` are required.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Provisioner secrets, `rclone.conf` is required.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

/// Request to delete a volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteVolumeRequest {
    pub volume_id: VolumeId,
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

/// Request to check capabilities against an existing volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateVolumeCapabilitiesRequest {
    pub volume_id: VolumeId,
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// Capabilities confirmed by the controller, echoed back to the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmedCapabilities {
    pub volume_capabilities: Vec<VolumeCapability>,
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// Result of a capability validation; `confirmed` is `None` when rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateVolumeCapabilitiesResponse {
    pub confirmed: Option<ConfirmedCapabilities>,
    #[serde(default)]
    pub message: String,
}

/// Request to attach a volume to a node from the controller side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerPublishVolumeRequest {
    pub volume_id: VolumeId,
    pub node_id: String,
}

/// Request to grow a volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandVolumeRequest {
    pub volume_id: VolumeId,
    pub capacity_bytes: u64,
}

/// `NodeStageVolume` input; accepted on the wire, never served.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStageVolumeRequest {
    pub volume_id: VolumeId,
    pub staging_target_path: String,
    pub volume_capability: VolumeCapability,
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

/// Request to make a volume visible at `target_path` on this node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: VolumeId,
    /// Host path the pod will see, e.g.
    /// `/var/lib/kubelet/pods/<pod-uid>/volumes/<plugin>/<vol-name>/mount`.
    pub target_path: String,
    /// Requested capability; required.
    pub volume_capability: Option<VolumeCapability>,
    /// Context carried from `CreateVolume` or the persistent volume:
    /// `remote`, `path` and optional `mount/<flag>` overrides.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    /// Node-publish secrets, `rclone.conf` is required.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
    #[serde(default)]
    pub read_only: bool,
}

// ----- Plugin & node info ----------------------------------------------------

/// Answer to `GetPluginInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"csi-rclone"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// Services advertised through `GetPluginCapabilities`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
}

/// RPCs the Controller service supports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerCapability {
    CreateDeleteVolume,
}

/// Answer to `NodeGetInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node name, also used to pin mount workloads.
    pub node_id: String,
    /// Maximum number of volumes the node can host, `0` means unlimited.
    pub max_volumes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_id_display() {
        let id = VolumeId("vol-abc".into());
        assert_eq!(id.to_string(), "vol-abc");
    }

    #[test]
    fn publish_request_defaults() {
        let json = r#"{"volume_id":"v1","target_path":"/mnt/t","volume_capability":null}"#;
        let req: NodePublishVolumeRequest = serde_json::from_str(json).expect("deserialize");
        assert_eq!(req.volume_id.as_str(), "v1");
        assert!(req.volume_capability.is_none());
        assert!(req.secrets.is_empty());
        assert!(!req.read_only);
    }

    #[test]
    fn create_volume_request_default() {
        let req = CreateVolumeRequest::default();
        assert!(req.name.is_empty());
        assert_eq!(req.capacity_bytes, 0);
        assert!(req.volume_capabilities.is_empty());
    }

    #[test]
    fn volume_capability_default() {
        let cap = VolumeCapability::default();
        assert_eq!(cap.access_mode, AccessMode::ReadWriteOnce);
        assert_eq!(cap.fs_type, "fuse.rclone");
    }
}
