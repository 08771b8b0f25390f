//! CSI error types.
//!
//! All errors in the `librclone` crate are represented by the [`CsiError`]
//! enum, which derives [`thiserror::Error`] for ergonomic error handling and
//! also implements [`Serialize`]/[`Deserialize`] so errors can travel across
//! the QUIC transport layer.  [`CsiError::code`] classifies every error into
//! the status class reported back to the protocol caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for CSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum CsiError {
    /// The caller supplied an invalid or incomplete request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No persistent volume carries the requested volume handle.
    #[error("volume {0} not found")]
    VolumeNotFound(String),

    /// A persistent volume matched but lacks a required attribute.
    #[error("volume {volume_id} is missing the {attribute} volume attribute")]
    MissingVolumeAttribute {
        /// Volume handle that was resolved.
        volume_id: String,
        /// Name of the missing attribute.
        attribute: String,
    },

    /// The `rclone` process exited unsuccessfully or could not be spawned.
    #[error("{verb} failed: cmd: 'rclone' remote: '{target}' output: {output:?}")]
    CommandFailed {
        /// Sub-command, e.g. `mkdir`.
        verb: String,
        /// The `remote:path` argument.
        target: String,
        /// Combined stdout and stderr of the process.
        output: String,
    },

    /// The orchestrator API returned an error.
    #[error("cluster api error: {0}")]
    ClusterError(String),

    /// A mount operation failed.
    #[error("mount failed at {path}: {reason}")]
    MountFailed {
        /// Filesystem path where the mount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// An unmount operation failed.
    #[error("unmount failed at {path}: {reason}")]
    UnmountFailed {
        /// Filesystem path where the unmount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The target never showed up in the mount table.
    #[error("timed out after {timeout_ms}ms waiting for {path} to be mounted")]
    MountTimeout {
        /// Path that was being watched.
        path: String,
        /// Configured ceiling in milliseconds.
        timeout_ms: u64,
    },

    /// The requested operation is not supported by this driver.
    #[error("method {0} not implemented")]
    Unimplemented(String),

    /// A QUIC / transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Status class reported to the protocol caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatusCode {
    /// Caller fault; retrying the same request will not help.
    InvalidArgument,
    /// The referenced volume does not exist.
    NotFound,
    /// The driver does not implement the call.
    Unimplemented,
    /// The peer could not be reached.
    Unavailable,
    /// Server-side failure; the caller is expected to retry.
    Internal,
}

impl CsiError {
    /// Create a [`CsiError::ClusterError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn cluster<E: std::fmt::Display>(e: E) -> Self {
        Self::ClusterError(e.to_string())
    }

    /// Create a [`CsiError::TransportError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Create a [`CsiError::InvalidArgument`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Classify the error for the protocol caller.
    pub fn code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) | Self::MissingVolumeAttribute { .. } => {
                StatusCode::InvalidArgument
            }
            Self::VolumeNotFound(_) => StatusCode::NotFound,
            Self::Unimplemented(_) => StatusCode::Unimplemented,
            Self::TransportError(_) => StatusCode::Unavailable,
            Self::CommandFailed { .. }
            | Self::ClusterError(_)
            | Self::MountFailed { .. }
            | Self::UnmountFailed { .. }
            | Self::MountTimeout { .. }
            | Self::Internal(_) => StatusCode::Internal,
        }
    }
}
