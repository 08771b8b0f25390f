//! Wire envelope of the driver protocol.
//!
//! A client writes one request variant per QUIC bi-stream and reads back the
//! matching response variant, or [`CsiMessage::Error`].

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::types::*;

/// Every request and response the driver speaks, JSON encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Requests --------------------------------------------------------
    /// Create a new volume (Controller).
    CreateVolume(CreateVolumeRequest),
    /// Delete a volume (Controller).
    DeleteVolume(DeleteVolumeRequest),
    /// Validate volume capabilities (Controller).
    ValidateVolumeCapabilities(ValidateVolumeCapabilitiesRequest),
    /// Describe a volume (Controller).
    ControllerGetVolume(VolumeId),
    /// Query controller RPC support (Controller).
    ControllerGetCapabilities,
    /// Attach a volume to a node (Controller, unsupported).
    ControllerPublishVolume(ControllerPublishVolumeRequest),
    /// Detach a volume from a node (Controller, unsupported).
    ControllerUnpublishVolume(ControllerPublishVolumeRequest),
    /// Grow a volume (Controller, unsupported).
    ControllerExpandVolume(ExpandVolumeRequest),

    /// Stage a volume at a global path (Node, unsupported).
    StageVolume(NodeStageVolumeRequest),
    /// Unstage a previously staged volume (Node, unsupported).
    UnstageVolume {
        volume_id: VolumeId,
        staging_target_path: String,
    },
    /// Publish a volume at a target path (Node).
    PublishVolume(NodePublishVolumeRequest),
    /// Unpublish a previously published volume (Node).
    UnpublishVolume {
        volume_id: VolumeId,
        target_path: String,
    },
    /// Grow a published volume's filesystem (Node, unsupported).
    NodeExpandVolume(ExpandVolumeRequest),

    /// Health probe (Identity).
    Probe,
    /// Query plugin info (Identity).
    GetPluginInfo,
    /// Query plugin capabilities (Identity).
    GetPluginCapabilities,
    /// Query node info (Node).
    GetNodeInfo,

    // ----- Responses -------------------------------------------------------
    /// A volume was successfully created, or described.
    VolumeCreated(Volume),
    /// Result of capability validation.
    CapabilitiesValidated(ValidateVolumeCapabilitiesResponse),
    /// Supported controller RPCs.
    ControllerCapabilitiesResponse(Vec<ControllerCapability>),
    /// New capacity after expansion.
    Capacity(u64),
    /// Plugin information.
    PluginInfoResponse(PluginInfo),
    /// Plugin capabilities.
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    /// Node information.
    NodeInfoResponse(NodeInfo),

    /// Success without payload.
    Ok,
    /// Probe result.
    ProbeResult(bool),
    /// Failure, classified by [`CsiError::code`].
    Error(CsiError),
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateVolume(req) => write!(f, "CreateVolume(name={})", req.name),
            Self::DeleteVolume(req) => write!(f, "DeleteVolume({})", req.volume_id),
            Self::ValidateVolumeCapabilities(req) => {
                write!(f, "ValidateVolumeCapabilities({})", req.volume_id)
            }
            Self::ControllerGetVolume(id) => write!(f, "ControllerGetVolume({})", id),
            Self::ControllerGetCapabilities => f.write_str("ControllerGetCapabilities"),
            Self::ControllerPublishVolume(req) => {
                write!(f, "ControllerPublishVolume({})", req.volume_id)
            }
            Self::ControllerUnpublishVolume(req) => {
                write!(f, "ControllerUnpublishVolume({})", req.volume_id)
            }
            Self::ControllerExpandVolume(req) => {
                write!(f, "ControllerExpandVolume({})", req.volume_id)
            }
            Self::StageVolume(req) => write!(f, "StageVolume({})", req.volume_id),
            Self::UnstageVolume { volume_id, .. } => write!(f, "UnstageVolume({})", volume_id),
            Self::PublishVolume(req) => write!(f, "PublishVolume({})", req.volume_id),
            Self::UnpublishVolume { volume_id, .. } => {
                write!(f, "UnpublishVolume({})", volume_id)
            }
            Self::NodeExpandVolume(req) => write!(f, "NodeExpandVolume({})", req.volume_id),
            Self::Probe => f.write_str("Probe"),
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::GetNodeInfo => f.write_str("GetNodeInfo"),
            Self::VolumeCreated(v) => write!(f, "VolumeCreated({})", v.volume_id),
            Self::CapabilitiesValidated(resp) => {
                write!(f, "CapabilitiesValidated({})", resp.confirmed.is_some())
            }
            Self::ControllerCapabilitiesResponse(caps) => {
                write!(f, "ControllerCapabilities(count={})", caps.len())
            }
            Self::Capacity(c) => write!(f, "Capacity({})", c),
            Self::PluginInfoResponse(info) => {
                write!(f, "PluginInfo(name={})", info.name)
            }
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::NodeInfoResponse(info) => write!(f, "NodeInfo({})", info.node_id),
            Self::Ok => f.write_str("Ok"),
            Self::ProbeResult(ok) => write!(f, "ProbeResult({})", ok),
            Self::Error(e) => write!(f, "Error({})", e),
        }
    }
}
