//! Access to the orchestrator's object store.
//!
//! [`ClusterStore`] is the only way the driver reads or writes cluster state:
//! the config Secret and mount Deployment of each volume (namespaced to the
//! driver's namespace) and the cluster-wide PersistentVolume list used to
//! resolve volume handles.  [`KubeStore`] implements it on top of `kube`.

mod kubernetes;

pub use self::kubernetes::KubeStore;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolume, Secret};

use crate::error::CsiError;

/// Object-store operations needed by the reconciler and the volume locator.
///
/// Deleting an object that does not exist must succeed; every other API
/// failure is returned as [`CsiError::ClusterError`].
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch a Secret by name, `None` when absent.
    async fn get_secret(&self, name: &str) -> Result<Option<Secret>, CsiError>;

    async fn create_secret(&self, secret: &Secret) -> Result<(), CsiError>;

    async fn delete_secret(&self, name: &str) -> Result<(), CsiError>;

    /// Fetch a Deployment by name, `None` when absent.
    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>, CsiError>;

    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), CsiError>;

    async fn delete_deployment(&self, name: &str) -> Result<(), CsiError>;

    /// All PersistentVolumes in the cluster.
    async fn list_persistent_volumes(&self) -> Result<Vec<PersistentVolume>, CsiError>;
}
