//! Shared fixtures for unit tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    CSIPersistentVolumeSource, HostPathVolumeSource, PersistentVolume, PersistentVolumeSpec,
    Secret,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::Resource;

use crate::cluster::ClusterStore;
use crate::error::CsiError;
use crate::mount::Unmounter;

struct Entry<K> {
    object: K,
    /// Reads left before a terminating object disappears.
    reads_left: Option<u32>,
}

/// Objects of one kind, keyed by name.
struct Bucket<K>(Mutex<BTreeMap<String, Entry<K>>>);

impl<K> Default for Bucket<K> {
    fn default() -> Self {
        Self(Mutex::new(BTreeMap::new()))
    }
}

impl<K: Resource + Clone> Bucket<K> {
    fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    fn get(&self, name: &str) -> Option<K> {
        let mut objects = self.0.lock().unwrap();
        let entry = objects.get_mut(name)?;
        match entry.reads_left.as_mut() {
            Some(0) => {
                objects.remove(name);
                None
            }
            Some(left) => {
                *left -= 1;
                Some(entry.object.clone())
            }
            None => Some(entry.object.clone()),
        }
    }

    fn create(&self, object: &K) -> Result<(), CsiError> {
        let name = object
            .meta()
            .name
            .clone()
            .ok_or_else(|| CsiError::cluster("object without a name"))?;
        let mut objects = self.0.lock().unwrap();
        if objects.contains_key(&name) {
            return Err(CsiError::cluster(format!("{name}: AlreadyExists (409)")));
        }
        objects.insert(
            name,
            Entry {
                object: object.clone(),
                reads_left: None,
            },
        );
        Ok(())
    }

    /// Remove `name`, or mark it terminating for `linger` more reads.
    fn delete(&self, name: &str, linger: u32) {
        let mut objects = self.0.lock().unwrap();
        if linger == 0 {
            objects.remove(name);
            return;
        }
        if let Some(entry) = objects.get_mut(name)
            && entry.reads_left.is_none()
        {
            entry.object.meta_mut().deletion_timestamp =
                Some(Time(k8s_openapi::chrono::Utc::now()));
            entry.reads_left = Some(linger);
        }
    }

    fn is_terminating(&self, name: &str) -> bool {
        self.0
            .lock()
            .unwrap()
            .get(name)
            .is_some_and(|entry| entry.reads_left.is_some())
    }
}

/// In-memory [`ClusterStore`] that counts mutating calls.
///
/// Creating a name that still exists fails the way the API server does, and
/// [`MemoryStore::linger_deletes`] makes deleted objects stay visible as
/// terminating for a number of reads.
#[derive(Default)]
pub struct MemoryStore {
    secrets: Bucket<Secret>,
    deployments: Bucket<Deployment>,
    pvs: Mutex<Vec<PersistentVolume>>,
    writes: AtomicU64,
    fail_deletes: AtomicBool,
    linger: AtomicU32,
}

impl MemoryStore {
    pub fn secret_count(&self) -> usize {
        self.secrets.len()
    }

    pub fn deployment_count(&self) -> usize {
        self.deployments.len()
    }

    /// Number of create and delete calls so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Keep deleted objects around, marked terminating, for `reads` gets.
    pub fn linger_deletes(&self, reads: u32) {
        self.linger.store(reads, Ordering::SeqCst);
    }

    pub fn deployment_terminating(&self, name: &str) -> bool {
        self.deployments.is_terminating(name)
    }

    pub fn secret_terminating(&self, name: &str) -> bool {
        self.secrets.is_terminating(name)
    }

    pub fn add_persistent_volume(&self, pv: PersistentVolume) {
        self.pvs.lock().unwrap().push(pv);
    }

    fn check_delete(&self) -> Result<u32, CsiError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(CsiError::cluster("injected delete failure"));
        }
        Ok(self.linger.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get_secret(&self, name: &str) -> Result<Option<Secret>, CsiError> {
        Ok(self.secrets.get(name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), CsiError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.secrets.create(secret)
    }

    async fn delete_secret(&self, name: &str) -> Result<(), CsiError> {
        let linger = self.check_delete()?;
        self.secrets.delete(name, linger);
        Ok(())
    }

    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>, CsiError> {
        Ok(self.deployments.get(name))
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), CsiError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.deployments.create(deployment)
    }

    async fn delete_deployment(&self, name: &str) -> Result<(), CsiError> {
        let linger = self.check_delete()?;
        self.deployments.delete(name, linger);
        Ok(())
    }

    async fn list_persistent_volumes(&self) -> Result<Vec<PersistentVolume>, CsiError> {
        Ok(self.pvs.lock().unwrap().clone())
    }
}

/// [`Unmounter`] that records its calls and drops the path from a mount table.
pub struct RecordingUnmounter {
    table: PathBuf,
    calls: Mutex<Vec<PathBuf>>,
}

impl RecordingUnmounter {
    pub fn new(table: impl Into<PathBuf>) -> Self {
        Self {
            table: table.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }
}

impl Unmounter for RecordingUnmounter {
    fn unmount(&self, path: &Path) -> Result<(), CsiError> {
        self.calls.lock().unwrap().push(path.to_path_buf());
        let contents = std::fs::read_to_string(&self.table).unwrap_or_default();
        let kept: String = contents
            .lines()
            .filter(|line| {
                line.split_whitespace()
                    .nth(1)
                    .is_none_or(|mountpoint| Path::new(mountpoint) != path)
            })
            .map(|line| format!("{line}\n"))
            .collect();
        std::fs::write(&self.table, kept).expect("rewrite mount table");
        Ok(())
    }
}

/// A PersistentVolume provisioned by this driver.
pub fn csi_pv(handle: &str, remote: &str, path: &str) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(format!("pv-{handle}")),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            csi: Some(CSIPersistentVolumeSource {
                driver: "csi-rclone".to_owned(),
                volume_handle: handle.to_owned(),
                volume_attributes: Some(BTreeMap::from([
                    ("remote".to_owned(), remote.to_owned()),
                    ("path".to_owned(), path.to_owned()),
                ])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A hostPath PersistentVolume with no CSI source.
pub fn plain_pv() -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some("pv-hostpath".to_owned()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            host_path: Some(HostPathVolumeSource {
                path: "/data".to_owned(),
                type_: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Write an executable shell script standing in for `rclone`.
///
/// The file is written by a short-lived `sh` child and moved into place, so
/// no descriptor open for writing ever lives in the test process. Otherwise a
/// fork on another test thread could inherit it and make the later exec fail
/// with `ETXTBSY`.
pub fn fake_rclone(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("rclone");
    let staging = dir.join(".rclone.partial");
    let status = std::process::Command::new("/bin/sh")
        .args([
            "-c",
            r#"printf '#!/bin/sh\n%s\n' "$3" > "$1" && chmod 755 "$1" && mv "$1" "$2""#,
            "sh",
        ])
        .arg(&staging)
        .arg(&path)
        .arg(body)
        .status()
        .expect("spawn sh");
    assert!(status.success(), "writing fake rclone failed: {status}");
    path
}

/// Write a `/proc/mounts`-style table listing `mountpoints`.
pub fn write_mount_table(path: &Path, mountpoints: &[&Path]) {
    let mut contents = String::from("proc /proc proc rw,nosuid 0 0\n");
    for mp in mountpoints {
        contents.push_str(&format!("rclone:/b {} fuse.rclone rw 0 0\n", mp.display()));
    }
    std::fs::write(path, contents).expect("write mount table");
}
