//! Volume identity and the names and labels derived from it.
//!
//! An [`RcloneVolume`] names a remote, a path inside that remote and the
//! protocol-level volume handle.  Every cluster object the driver creates for
//! a volume is keyed by [`RcloneVolume::workload_name`] and labelled with
//! [`fingerprint_labels`], which is what drift detection compares against.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::VolumeId;

/// Kubernetes object names and label values are capped at 63 characters.
pub const MAX_NAME_LEN: usize = 63;

/// Prefix of the config Secret and mount Deployment names.
pub const WORKLOAD_NAME_PREFIX: &str = "rclone-mounter-";

/// Label carrying the volume handle.
pub const LABEL_VOLUME_ID: &str = "volumeid";
/// Label carrying the config fingerprint.
pub const LABEL_HASH: &str = "hash";

/// A volume backed by `<remote>:<remote_path>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RcloneVolume {
    pub id: VolumeId,
    pub remote: String,
    pub remote_path: String,
}

impl RcloneVolume {
    pub fn new(
        id: impl Into<VolumeId>,
        remote: impl Into<String>,
        remote_path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            remote: remote.into(),
            remote_path: remote_path.into(),
        }
    }

    /// Volume handle lower-cased with `:` separators replaced by `-`.
    pub fn normalized_id(&self) -> String {
        self.id.as_str().replace(':', "-").to_lowercase()
    }

    /// Name shared by the config Secret and the mount Deployment.
    ///
    /// Truncated to [`MAX_NAME_LEN`]: two long handles that share a prefix
    /// map to the same name.
    pub fn workload_name(&self) -> String {
        let name: String = format!("{WORKLOAD_NAME_PREFIX}{}", self.id)
            .chars()
            .take(MAX_NAME_LEN)
            .collect();
        name.to_lowercase()
    }

    /// The `remote:/path` source argument passed to `rclone mount`.
    pub fn mount_source(&self) -> String {
        format!("{}:/{}", self.remote, self.remote_path)
    }
}

/// Hex SHA-256 of the config text, truncated to fit a label value.
pub fn config_fingerprint(config: &str) -> String {
    let digest = Sha256::digest(config.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(MAX_NAME_LEN);
    hash
}

/// The `{volumeid, hash}` label pair that identifies one desired mount config.
pub fn fingerprint_labels(volume: &RcloneVolume, config: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_VOLUME_ID.to_owned(), volume.id.to_string()),
        (LABEL_HASH.to_owned(), config_fingerprint(config)),
    ])
}
