//! CSI Node service trait.
//!
//! The Node service runs on each worker node and makes a volume visible at
//! the kubelet-chosen target path:
//!
//! 1. **Publish** — start the volume's mount workload and wait for the mount.
//! 2. **Unpublish** — remove the mount workload and clean up the target.
//!
//! There is no staging step; stage, unstage and expand report
//! [`CsiError::Unimplemented`] by default.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{
    ExpandVolumeRequest, NodeInfo, NodePublishVolumeRequest, NodeStageVolumeRequest, VolumeId,
};

/// Node service — local mount / unmount operations.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Publish a volume at `req.target_path`.
    ///
    /// This is idempotent — calling it again for the same `target_path` while
    /// the mount is healthy succeeds without changes.
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError>;

    /// Unpublish a volume from `target_path`.
    ///
    /// This is idempotent.
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError>;

    /// Return information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, CsiError>;

    async fn stage_volume(&self, _req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("NodeStageVolume".into()))
    }

    async fn unstage_volume(
        &self,
        _volume_id: &VolumeId,
        _staging_target_path: &str,
    ) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("NodeUnstageVolume".into()))
    }

    async fn expand_volume(&self, _req: ExpandVolumeRequest) -> Result<u64, CsiError> {
        Err(CsiError::Unimplemented("NodeExpandVolume".into()))
    }
}
