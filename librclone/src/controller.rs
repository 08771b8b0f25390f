//! CSI Controller service trait.
//!
//! The Controller service manages the centralized volume lifecycle: creation,
//! deletion and capability validation.  Attach/detach, expansion and
//! capacity are not part of the rclone model; their default implementations
//! report [`CsiError::Unimplemented`].

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{
    ControllerCapability, ControllerPublishVolumeRequest, CreateVolumeRequest,
    DeleteVolumeRequest, ExpandVolumeRequest, ValidateVolumeCapabilitiesRequest,
    ValidateVolumeCapabilitiesResponse, Volume, VolumeId,
};

/// Controller service — centralized volume management.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Provision a new volume.
    ///
    /// The returned [`Volume`] contains the assigned `volume_id` and
    /// `volume_context` that must be forwarded to subsequent Node operations.
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError>;

    /// Delete a previously provisioned volume.
    async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<(), CsiError>;

    /// Check whether the given capabilities are compatible with the volume.
    async fn validate_volume_capabilities(
        &self,
        req: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse, CsiError>;

    /// Describe a single volume.
    async fn controller_get_volume(&self, volume_id: &VolumeId) -> Result<Volume, CsiError>;

    /// RPCs this controller implements.
    async fn controller_get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError>;

    async fn controller_publish_volume(
        &self,
        _req: ControllerPublishVolumeRequest,
    ) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("ControllerPublishVolume".into()))
    }

    async fn controller_unpublish_volume(
        &self,
        _req: ControllerPublishVolumeRequest,
    ) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("ControllerUnpublishVolume".into()))
    }

    async fn controller_expand_volume(
        &self,
        _req: ExpandVolumeRequest,
    ) -> Result<u64, CsiError> {
        Err(CsiError::Unimplemented("ControllerExpandVolume".into()))
    }
}
