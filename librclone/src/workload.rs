//! Manifests for the per-volume config Secret and mount Deployment.
//!
//! Each published volume is served by a single privileged `rclone mount`
//! container pinned to the publishing node.  The container shares the host's
//! target directory with bidirectional mount propagation so the FUSE mount it
//! creates becomes visible to the kubelet and to the consuming pod.

use std::collections::BTreeMap;
use std::path::Path;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, ExecAction, HTTPGetAction, HostPathVolumeSource,
    KeyToPath, Lifecycle, LifecycleHandler, PodSpec, PodTemplateSpec, Probe, Secret,
    SecretVolumeSource, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::flags::RC_PORT;
use crate::types::SECRET_RCLONE_CONF;

/// Where rclone looks for `rclone.conf` inside the mounter image.
pub const CONFIG_DIR: &str = "/root/.config/rclone/";
pub const CONTAINER_NAME: &str = "rclone-mounter";
pub const DEFAULT_MOUNTER_IMAGE: &str = "rclone/rclone:1.59.2";

const VOLUME_MOUNT: &str = "mount";
const VOLUME_CONFIG: &str = "config";

/// Cluster-level settings shared by every mount Deployment.
#[derive(Debug, Clone)]
pub struct WorkloadSettings {
    /// Namespace holding the Secret and Deployment.
    pub namespace: String,
    /// Node the mount pod is pinned to.
    pub node_name: String,
    /// Image providing the `rclone` binary.
    pub image: String,
    pub priority_class: String,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            namespace: "default".to_owned(),
            node_name: String::new(),
            image: DEFAULT_MOUNTER_IMAGE.to_owned(),
            priority_class: "system-cluster-critical".to_owned(),
        }
    }
}

/// Opaque Secret holding `rclone.conf` for one volume.
pub fn config_secret(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    config: &str,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(namespace.to_owned()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        string_data: Some(BTreeMap::from([(
            SECRET_RCLONE_CONF.to_owned(),
            config.to_owned(),
        )])),
        type_: Some("Opaque".to_owned()),
        ..Default::default()
    }
}

fn probe_timings(probe: Probe) -> Probe {
    Probe {
        initial_delay_seconds: Some(1),
        timeout_seconds: Some(5),
        period_seconds: Some(10),
        success_threshold: Some(1),
        failure_threshold: Some(10),
        ..probe
    }
}

fn shell(command: String) -> ExecAction {
    ExecAction {
        command: Some(vec!["sh".to_owned(), "-c".to_owned(), command]),
    }
}

fn mounter_container(settings: &WorkloadSettings, args: Vec<String>, target: &str) -> Container {
    Container {
        name: CONTAINER_NAME.to_owned(),
        image: Some(settings.image.clone()),
        command: Some(vec!["rclone".to_owned()]),
        args: Some(args),
        ports: Some(vec![ContainerPort {
            name: Some("api".to_owned()),
            container_port: i32::from(RC_PORT),
            protocol: Some("TCP".to_owned()),
            ..Default::default()
        }]),
        lifecycle: Some(Lifecycle {
            pre_stop: Some(LifecycleHandler {
                exec: Some(shell(format!("umount {target}"))),
                ..Default::default()
            }),
            ..Default::default()
        }),
        volume_mounts: Some(vec![
            VolumeMount {
                name: VOLUME_CONFIG.to_owned(),
                mount_path: CONFIG_DIR.to_owned(),
                ..Default::default()
            },
            VolumeMount {
                name: VOLUME_MOUNT.to_owned(),
                mount_path: target.to_owned(),
                mount_propagation: Some("Bidirectional".to_owned()),
                ..Default::default()
            },
        ]),
        security_context: Some(SecurityContext {
            capabilities: Some(Capabilities {
                add: Some(vec!["SYS_ADMIN".to_owned()]),
                ..Default::default()
            }),
            privileged: Some(true),
            ..Default::default()
        }),
        liveness_probe: Some(probe_timings(Probe {
            exec: Some(shell(format!("ls -lah {target}"))),
            ..Default::default()
        })),
        readiness_probe: Some(probe_timings(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/metrics".to_owned()),
                port: IntOrString::Int(i32::from(RC_PORT)),
                ..Default::default()
            }),
            ..Default::default()
        })),
        ..Default::default()
    }
}

/// Single-replica Deployment running `rclone <args>` against `target_path`.
///
/// Uses the `Recreate` strategy: two pods must never mount the same host
/// path at once, which a rolling update would allow.
pub fn mount_deployment(
    name: &str,
    settings: &WorkloadSettings,
    labels: &BTreeMap<String, String>,
    args: Vec<String>,
    target_path: &Path,
) -> Deployment {
    let target = target_path.display().to_string();

    let volumes = vec![
        Volume {
            name: VOLUME_MOUNT.to_owned(),
            host_path: Some(HostPathVolumeSource {
                path: target.clone(),
                type_: Some("DirectoryOrCreate".to_owned()),
            }),
            ..Default::default()
        },
        Volume {
            name: VOLUME_CONFIG.to_owned(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(name.to_owned()),
                items: Some(vec![KeyToPath {
                    key: SECRET_RCLONE_CONF.to_owned(),
                    path: SECRET_RCLONE_CONF.to_owned(),
                    mode: Some(0o777),
                }]),
                optional: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(settings.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_owned()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    node_name: Some(settings.node_name.clone()).filter(|n| !n.is_empty()),
                    restart_policy: Some("Always".to_owned()),
                    priority_class_name: Some(settings.priority_class.clone()),
                    termination_grace_period_seconds: Some(10),
                    volumes: Some(volumes),
                    containers: vec![mounter_container(settings, args, &target)],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
