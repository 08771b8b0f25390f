//! Resolve a volume handle back to its remote and path.
//!
//! Delete and unpublish requests only carry the volume handle, so the remote
//! location is recovered from the PersistentVolume that recorded it in its
//! CSI volume attributes.  This is a linear scan without caching; neither
//! caller sits on a hot path.

use k8s_openapi::api::core::v1::PersistentVolume;
use tracing::debug;

use crate::cluster::ClusterStore;
use crate::error::CsiError;
use crate::types::{PARAM_PATH, PARAM_REMOTE, VolumeId};
use crate::volume::RcloneVolume;

/// Find the first PersistentVolume whose CSI handle is `volume_id`.
pub fn find_volume(
    pvs: &[PersistentVolume],
    volume_id: &VolumeId,
) -> Result<RcloneVolume, CsiError> {
    let csi = pvs
        .iter()
        .filter_map(|pv| pv.spec.as_ref()?.csi.as_ref())
        .find(|csi| csi.volume_handle == volume_id.as_str())
        .ok_or_else(|| CsiError::VolumeNotFound(volume_id.to_string()))?;

    let attribute = |key: &str| {
        csi.volume_attributes
            .as_ref()
            .and_then(|attrs| attrs.get(key))
            .filter(|value| !value.is_empty())
            .cloned()
            .ok_or_else(|| CsiError::MissingVolumeAttribute {
                volume_id: volume_id.to_string(),
                attribute: key.to_owned(),
            })
    };

    Ok(RcloneVolume {
        id: volume_id.clone(),
        remote: attribute(PARAM_REMOTE)?,
        remote_path: attribute(PARAM_PATH)?,
    })
}

/// List every PersistentVolume and resolve `volume_id` among them.
pub async fn resolve(
    store: &dyn ClusterStore,
    volume_id: &VolumeId,
) -> Result<RcloneVolume, CsiError> {
    let pvs = store.list_persistent_volumes().await?;
    debug!(%volume_id, scanned = pvs.len(), "resolving volume handle");
    find_volume(&pvs, volume_id)
}
