//! # librclone — rclone-backed CSI over QUIC
//!
//! `librclone` provisions volumes on [rclone] remotes and makes them visible
//! to pods.  Each published volume is served by a dedicated mount Deployment
//! running `rclone mount` on the node, with its config material held in a
//! Secret.  Requests travel as JSON messages over QUIC (via [`quinn`]).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Requests, responses and the `VolumeId` handle. |
//! | [`error`] | [`CsiError`] and its protocol status class. |
//! | [`config`] | [`DriverConfig`](config::DriverConfig), defaults and environment. |
//! | [`volume`] | Volume identity, workload name and config fingerprint. |
//! | [`flags`] | `rclone mount` command line composition. |
//! | [`command`] | Out-of-band `rclone mkdir` / `rmdirs`. |
//! | [`cluster`] | Object store seam, backed by `kube`. |
//! | [`workload`] | Secret and Deployment manifests. |
//! | [`reconciler`] | Keeps the Secret and Deployment of a volume in shape. |
//! | [`mount`] | Mount table probing and waiting. |
//! | [`locator`] | Volume handle to remote lookup. |
//! | [`identity`], [`controller`], [`node`] | CSI service traits. |
//! | [`backend`] | [`RcloneBackend`](backend::RcloneBackend). |
//! | [`message`], [`transport`] | Wire envelope and QUIC client/server. |
//!
//! [rclone]: https://rclone.org

pub mod backend;
pub mod cluster;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod flags;
pub mod identity;
pub mod locator;
pub mod message;
pub mod mount;
pub mod node;
pub mod reconciler;
pub mod transport;
pub mod types;
pub mod volume;
pub mod workload;

#[cfg(test)]
mod test_support;

pub use backend::RcloneBackend;
pub use controller::CsiController;
pub use error::CsiError;
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use node::CsiNode;
pub use types::*;
