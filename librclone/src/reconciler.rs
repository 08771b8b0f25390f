//! Reconciliation of the per-volume config Secret and mount Deployment.
//!
//! The desired state of a volume is the label pair from
//! [`fingerprint_labels`]; the observed state is whatever the cluster
//! currently holds under [`RcloneVolume::workload_name`].  [`plan`] compares
//! the two and the [`Reconciler`] applies the result.  Objects are never
//! updated in place: drift is repaired by deleting and creating again.  The
//! API server keeps a deleted object around while it terminates, so a
//! recreate waits for the name to be free before creating.
//!
//! The read-compare-act sequence for one workload name runs under an
//! in-process async lock, so concurrent publish and unpublish calls for the
//! same volume cannot interleave their deletes and creates.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument};

use crate::cluster::ClusterStore;
use crate::error::CsiError;
use crate::flags::compose_mount_args;
use crate::volume::{RcloneVolume, fingerprint_labels};
use crate::workload::{WorkloadSettings, config_secret, mount_deployment};

/// Poll interval while waiting for a deleted object to disappear.
pub const DEFAULT_DELETION_POLL: Duration = Duration::from_millis(200);
/// Ceiling on waiting for a deleted object to disappear.
pub const DEFAULT_DELETION_TIMEOUT: Duration = Duration::from_secs(60);

/// What to do with one cluster object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Present with the desired labels.
    NoOp,
    /// Absent.
    Create,
    /// Present with stale labels, or terminating: delete, wait, then create.
    Recreate,
}

/// Compare the desired label set with an observed object, if any.
pub fn plan(desired: &BTreeMap<String, String>, observed: Option<&ObjectMeta>) -> Action {
    match observed {
        None => Action::Create,
        Some(meta) if meta.deletion_timestamp.is_some() => Action::Recreate,
        Some(meta) if meta.labels.as_ref() == Some(desired) => Action::NoOp,
        Some(_) => Action::Recreate,
    }
}

/// Actions taken by one [`Reconciler::ensure_mounted`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub secret: Action,
    pub deployment: Action,
}

/// Owns the config Secret and mount Deployment of every volume.
pub struct Reconciler {
    store: Arc<dyn ClusterStore>,
    settings: WorkloadSettings,
    /// One lock per workload name.
    locks: DashMap<String, Arc<Mutex<()>>>,
    deletion_poll: Duration,
    deletion_timeout: Duration,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ClusterStore>, settings: WorkloadSettings) -> Self {
        Self {
            store,
            settings,
            locks: DashMap::new(),
            deletion_poll: DEFAULT_DELETION_POLL,
            deletion_timeout: DEFAULT_DELETION_TIMEOUT,
        }
    }

    /// Override how recreation waits for a deleted object to go away.
    pub fn with_deletion_wait(mut self, poll: Duration, timeout: Duration) -> Self {
        self.deletion_poll = poll;
        self.deletion_timeout = timeout;
        self
    }

    pub fn settings(&self) -> &WorkloadSettings {
        &self.settings
    }

    async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks.entry(name.to_owned()).or_default().value());
        lock.lock_owned().await
    }

    /// Drop the lock entry for `name` unless another task still holds it.
    fn release(&self, name: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);
        self.locks
            .remove_if(name, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Make sure exactly one config Secret and one mount Deployment exist for
    /// `volume`, both labelled for `config`.
    ///
    /// `target_path` is created if missing.  Changing only the target path
    /// does not alter the labels and therefore does not recreate anything.
    #[instrument(skip(self, volume, config, overrides), fields(volume_id = %volume.normalized_id()))]
    pub async fn ensure_mounted(
        &self,
        volume: &RcloneVolume,
        config: &str,
        overrides: &BTreeMap<String, String>,
        target_path: &Path,
    ) -> Result<ReconcileOutcome, CsiError> {
        let name = volume.workload_name();
        let guard = self.lock(&name).await;
        let result = self
            .apply(&name, volume, config, overrides, target_path)
            .await;
        self.release(&name, guard);
        result
    }

    async fn apply(
        &self,
        name: &str,
        volume: &RcloneVolume,
        config: &str,
        overrides: &BTreeMap<String, String>,
        target_path: &Path,
    ) -> Result<ReconcileOutcome, CsiError> {
        let labels = fingerprint_labels(volume, config);
        create_target_dir(target_path).await?;

        let observed = self.store.get_secret(name).await?;
        let secret = plan(&labels, observed.as_ref().map(|s| &s.metadata));
        if secret != Action::NoOp {
            if secret == Action::Recreate {
                self.store.delete_secret(name).await?;
                self.wait_deleted("secret", name, || self.store.get_secret(name))
                    .await?;
            }
            let manifest = config_secret(name, &self.settings.namespace, &labels, config);
            self.store.create_secret(&manifest).await?;
            info!(%name, action = ?secret, "config secret written");
        }

        let observed = self.store.get_deployment(name).await?;
        let deployment = plan(&labels, observed.as_ref().map(|d| &d.metadata));
        if deployment != Action::NoOp {
            if deployment == Action::Recreate {
                self.store.delete_deployment(name).await?;
                self.wait_deleted("deployment", name, || self.store.get_deployment(name))
                    .await?;
            }
            let args = compose_mount_args(volume, target_path, overrides);
            let manifest = mount_deployment(name, &self.settings, &labels, args, target_path);
            self.store.create_deployment(&manifest).await?;
            info!(%name, action = ?deployment, target_path = %target_path.display(), "mount deployment written");
        }

        debug!(%name, ?secret, ?deployment, "reconciled");
        Ok(ReconcileOutcome { secret, deployment })
    }

    /// Poll `get` until the object named `name` is gone.
    async fn wait_deleted<T, F, Fut>(&self, kind: &str, name: &str, get: F) -> Result<(), CsiError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>, CsiError>>,
    {
        let poll = async {
            loop {
                if get().await?.is_none() {
                    return Ok::<(), CsiError>(());
                }
                debug!(%kind, %name, "waiting for deletion to finish");
                tokio::time::sleep(self.deletion_poll).await;
            }
        };

        tokio::time::timeout(self.deletion_timeout, poll)
            .await
            .map_err(|_| {
                CsiError::cluster(format!(
                    "{kind} {name} still present {}ms after deletion",
                    self.deletion_timeout.as_millis()
                ))
            })?
    }

    /// Delete the mount Deployment, then the config Secret, of `volume`.
    ///
    /// Objects that are already gone are skipped.
    #[instrument(skip(self, volume), fields(volume_id = %volume.normalized_id()))]
    pub async fn tear_down(&self, volume: &RcloneVolume) -> Result<(), CsiError> {
        let name = volume.workload_name();
        let guard = self.lock(&name).await;

        let result = async {
            self.store.delete_deployment(&name).await?;
            self.store.delete_secret(&name).await
        }
        .await;

        self.release(&name, guard);
        result?;
        info!(%name, "mount deployment and config secret removed");
        Ok(())
    }
}

async fn create_target_dir(path: &Path) -> Result<(), CsiError> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true).mode(0o750);
    builder
        .create(path)
        .await
        .map_err(|e| CsiError::MountFailed {
            path: path.display().to_string(),
            reason: format!("create target dir: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStore;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn desired() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("volumeid".to_owned(), "v".to_owned()),
            ("hash".to_owned(), "h".to_owned()),
        ])
    }

    fn meta(labels: Option<BTreeMap<String, String>>) -> ObjectMeta {
        ObjectMeta {
            labels,
            ..Default::default()
        }
    }

    #[test]
    fn plan_decisions() {
        assert_eq!(plan(&desired(), None), Action::Create);
        assert_eq!(plan(&desired(), Some(&meta(Some(desired())))), Action::NoOp);
        assert_eq!(plan(&desired(), Some(&meta(None))), Action::Recreate);

        let mut stale = desired();
        stale.insert("hash".to_owned(), "old".to_owned());
        assert_eq!(plan(&desired(), Some(&meta(Some(stale)))), Action::Recreate);

        let mut extra = desired();
        extra.insert("app".to_owned(), "x".to_owned());
        assert_eq!(plan(&desired(), Some(&meta(Some(extra)))), Action::Recreate);

        let terminating = ObjectMeta {
            deletion_timestamp: Some(Time(k8s_openapi::chrono::Utc::now())),
            ..meta(Some(desired()))
        };
        assert_eq!(plan(&desired(), Some(&terminating)), Action::Recreate);
    }

    fn setup() -> (Arc<MemoryStore>, Reconciler, tempfile::TempDir) {
        let store = Arc::new(MemoryStore::default());
        let settings = WorkloadSettings {
            namespace: "csi".into(),
            node_name: "node-a".into(),
            ..Default::default()
        };
        let reconciler = Reconciler::new(store.clone(), settings)
            .with_deletion_wait(Duration::from_millis(1), Duration::from_secs(5));
        (store, reconciler, tempfile::tempdir().unwrap())
    }

    #[tokio::test]
    async fn first_pass_creates_both() {
        let (store, reconciler, tmp) = setup();
        let vol = RcloneVolume::new("vol-1", "s3", "bucket");
        let target = tmp.path().join("pods/uid/mount");

        let outcome = reconciler
            .ensure_mounted(&vol, "[s3]\n", &BTreeMap::new(), &target)
            .await
            .unwrap();

        assert_eq!(outcome.secret, Action::Create);
        assert_eq!(outcome.deployment, Action::Create);
        assert!(target.is_dir());
        assert_eq!(store.secret_count(), 1);
        assert_eq!(store.deployment_count(), 1);

        let name = vol.workload_name();
        let secret = store.get_secret(&name).await.unwrap().unwrap();
        assert_eq!(secret.metadata.labels, Some(fingerprint_labels(&vol, "[s3]\n")));
    }

    #[tokio::test]
    async fn second_identical_pass_is_noop() {
        let (store, reconciler, tmp) = setup();
        let vol = RcloneVolume::new("vol-1", "s3", "bucket");
        let target = tmp.path().join("t");

        reconciler
            .ensure_mounted(&vol, "cfg", &BTreeMap::new(), &target)
            .await
            .unwrap();
        let writes = store.writes();

        let outcome = reconciler
            .ensure_mounted(&vol, "cfg", &BTreeMap::new(), &target)
            .await
            .unwrap();

        assert_eq!(outcome.secret, Action::NoOp);
        assert_eq!(outcome.deployment, Action::NoOp);
        assert_eq!(store.writes(), writes);
        assert_eq!(store.secret_count(), 1);
        assert_eq!(store.deployment_count(), 1);
    }

    #[tokio::test]
    async fn config_change_recreates_both() {
        let (store, reconciler, tmp) = setup();
        let vol = RcloneVolume::new("vol-1", "s3", "bucket");
        let target = tmp.path().join("t");

        reconciler
            .ensure_mounted(&vol, "old", &BTreeMap::new(), &target)
            .await
            .unwrap();
        let outcome = reconciler
            .ensure_mounted(&vol, "new", &BTreeMap::new(), &target)
            .await
            .unwrap();

        assert_eq!(outcome.secret, Action::Recreate);
        assert_eq!(outcome.deployment, Action::Recreate);
        assert_eq!(store.secret_count(), 1);
        assert_eq!(store.deployment_count(), 1);

        let name = vol.workload_name();
        let secret = store.get_secret(&name).await.unwrap().unwrap();
        assert_eq!(secret.string_data.unwrap()["rclone.conf"], "new");
        let deploy = store.get_deployment(&name).await.unwrap().unwrap();
        assert_eq!(deploy.metadata.labels, Some(fingerprint_labels(&vol, "new")));
    }

    #[tokio::test]
    async fn target_path_change_keeps_objects() {
        let (store, reconciler, tmp) = setup();
        let vol = RcloneVolume::new("vol-1", "s3", "bucket");

        reconciler
            .ensure_mounted(&vol, "cfg", &BTreeMap::new(), &tmp.path().join("a"))
            .await
            .unwrap();
        let writes = store.writes();

        let outcome = reconciler
            .ensure_mounted(&vol, "cfg", &BTreeMap::new(), &tmp.path().join("b"))
            .await
            .unwrap();

        assert_eq!(outcome.secret, Action::NoOp);
        assert_eq!(outcome.deployment, Action::NoOp);
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn partial_state_is_repaired() {
        let (store, reconciler, tmp) = setup();
        let vol = RcloneVolume::new("vol-1", "s3", "bucket");
        let target = tmp.path().join("t");

        reconciler
            .ensure_mounted(&vol, "cfg", &BTreeMap::new(), &target)
            .await
            .unwrap();
        store.delete_deployment(&vol.workload_name()).await.unwrap();

        let outcome = reconciler
            .ensure_mounted(&vol, "cfg", &BTreeMap::new(), &target)
            .await
            .unwrap();
        assert_eq!(outcome.secret, Action::NoOp);
        assert_eq!(outcome.deployment, Action::Create);
        assert_eq!(store.deployment_count(), 1);
    }

    #[tokio::test]
    async fn tear_down_removes_both_even_if_one_missing() {
        let (store, reconciler, tmp) = setup();
        let vol = RcloneVolume::new("vol-1", "s3", "bucket");

        reconciler
            .ensure_mounted(&vol, "cfg", &BTreeMap::new(), &tmp.path().join("t"))
            .await
            .unwrap();
        store.delete_secret(&vol.workload_name()).await.unwrap();

        reconciler.tear_down(&vol).await.unwrap();
        assert_eq!(store.secret_count(), 0);
        assert_eq!(store.deployment_count(), 0);
        assert!(reconciler.locks.is_empty());

        // Nothing left: still succeeds.
        reconciler.tear_down(&vol).await.unwrap();
    }

    #[tokio::test]
    async fn tear_down_surfaces_api_failures() {
        let (store, reconciler, _tmp) = setup();
        store.fail_deletes(true);
        let vol = RcloneVolume::new("vol-1", "s3", "bucket");
        let err = reconciler.tear_down(&vol).await.unwrap_err();
        assert!(matches!(err, CsiError::ClusterError(_)));
    }

    #[tokio::test]
    async fn concurrent_passes_leave_single_pair() {
        let (store, reconciler, tmp) = setup();
        let reconciler = Arc::new(reconciler);
        let vol = RcloneVolume::new("vol-1", "s3", "bucket");
        let target = tmp.path().join("t");

        let mut tasks = Vec::new();
        for i in 0..8 {
            let reconciler = Arc::clone(&reconciler);
            let vol = vol.clone();
            let target = target.clone();
            tasks.push(tokio::spawn(async move {
                let config = if i % 2 == 0 { "even" } else { "odd" };
                reconciler
                    .ensure_mounted(&vol, config, &BTreeMap::new(), &target)
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.secret_count(), 1);
        assert_eq!(store.deployment_count(), 1);
        let name = vol.workload_name();
        let secret = store.get_secret(&name).await.unwrap().unwrap();
        let deploy = store.get_deployment(&name).await.unwrap().unwrap();
        assert_eq!(secret.metadata.labels, deploy.metadata.labels);
    }

    #[tokio::test]
    async fn recreate_waits_for_terminating_objects() {
        let (store, reconciler, tmp) = setup();
        store.linger_deletes(3);
        let vol = RcloneVolume::new("vol-1", "s3", "bucket");
        let target = tmp.path().join("t");

        reconciler
            .ensure_mounted(&vol, "old", &BTreeMap::new(), &target)
            .await
            .unwrap();
        let outcome = reconciler
            .ensure_mounted(&vol, "new", &BTreeMap::new(), &target)
            .await
            .unwrap();

        assert_eq!(outcome.secret, Action::Recreate);
        assert_eq!(outcome.deployment, Action::Recreate);
        let name = vol.workload_name();
        assert!(!store.secret_terminating(&name));
        assert!(!store.deployment_terminating(&name));
        let deploy = store.get_deployment(&name).await.unwrap().unwrap();
        assert_eq!(deploy.metadata.labels, Some(fingerprint_labels(&vol, "new")));
    }

    #[tokio::test]
    async fn ensure_after_tear_down_replaces_terminating_objects() {
        let (store, reconciler, tmp) = setup();
        store.linger_deletes(2);
        let vol = RcloneVolume::new("vol-1", "s3", "bucket");
        let target = tmp.path().join("t");

        reconciler
            .ensure_mounted(&vol, "cfg", &BTreeMap::new(), &target)
            .await
            .unwrap();
        reconciler.tear_down(&vol).await.unwrap();
        let name = vol.workload_name();
        assert!(store.deployment_terminating(&name));

        let outcome = reconciler
            .ensure_mounted(&vol, "cfg", &BTreeMap::new(), &target)
            .await
            .unwrap();

        assert_eq!(outcome.secret, Action::Recreate);
        assert_eq!(outcome.deployment, Action::Recreate);
        assert!(!store.secret_terminating(&name));
        assert!(!store.deployment_terminating(&name));
        assert_eq!(store.deployment_count(), 1);
    }

    #[tokio::test]
    async fn recreate_gives_up_when_deletion_never_finishes() {
        let store = Arc::new(MemoryStore::default());
        let reconciler = Reconciler::new(store.clone(), WorkloadSettings::default())
            .with_deletion_wait(Duration::from_millis(1), Duration::from_millis(50));
        let tmp = tempfile::tempdir().unwrap();
        let vol = RcloneVolume::new("vol-1", "s3", "bucket");
        let target = tmp.path().join("t");

        reconciler
            .ensure_mounted(&vol, "old", &BTreeMap::new(), &target)
            .await
            .unwrap();
        store.linger_deletes(u32::MAX);

        let err = reconciler
            .ensure_mounted(&vol, "new", &BTreeMap::new(), &target)
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::ClusterError(ref msg) if msg.contains("still present")));
        assert!(reconciler.locks.is_empty());
    }

    #[tokio::test]
    async fn ensure_releases_its_lock_entry() {
        let (_store, reconciler, tmp) = setup();
        for i in 0..4 {
            let vol = RcloneVolume::new(format!("vol-{i}"), "s3", "bucket");
            reconciler
                .ensure_mounted(&vol, "cfg", &BTreeMap::new(), &tmp.path().join("t"))
                .await
                .unwrap();
        }
        assert!(reconciler.locks.is_empty());
    }
}
