//! [`ClusterStore`] backed by the Kubernetes API server.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolume, Secret};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use tracing::debug;

use super::ClusterStore;
use crate::error::CsiError;

/// Kubernetes-backed store scoped to one namespace for driver-owned objects.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    namespace: String,
}

impl KubeStore {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_secret(&self, name: &str) -> Result<Option<Secret>, CsiError> {
        match self.secrets().get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(CsiError::cluster(e)),
        }
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), CsiError> {
        self.secrets()
            .create(&PostParams::default(), secret)
            .await
            .map_err(CsiError::cluster)?;
        Ok(())
    }

    async fn delete_secret(&self, name: &str) -> Result<(), CsiError> {
        match self.secrets().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(%name, namespace = %self.namespace, "secret already absent");
                Ok(())
            }
            Err(e) => Err(CsiError::cluster(e)),
        }
    }

    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>, CsiError> {
        match self.deployments().get(name).await {
            Ok(deployment) => Ok(Some(deployment)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(CsiError::cluster(e)),
        }
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), CsiError> {
        self.deployments()
            .create(&PostParams::default(), deployment)
            .await
            .map_err(CsiError::cluster)?;
        Ok(())
    }

    async fn delete_deployment(&self, name: &str) -> Result<(), CsiError> {
        // Background propagation: the object goes away at once and the
        // garbage collector removes its ReplicaSet and pod afterwards.
        match self
            .deployments()
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(%name, namespace = %self.namespace, "deployment already absent");
                Ok(())
            }
            Err(e) => Err(CsiError::cluster(e)),
        }
    }

    async fn list_persistent_volumes(&self) -> Result<Vec<PersistentVolume>, CsiError> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(CsiError::cluster)?;
        Ok(list.items)
    }
}
