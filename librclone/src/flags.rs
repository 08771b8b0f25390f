//! Composition of the `rclone mount` command line.
//!
//! The mount process runs with a fixed set of defaults (remote control API on
//! port [`RC_PORT`] for the readiness probe, full VFS caching, ...).  Users
//! override any of them, or add new ones, through `mount/<flag>` keys in the
//! volume context.  Composition is purely textual: flag names and values are
//! never validated here, rclone rejects bad ones when the mount starts.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::types::PARAM_MOUNT_PREFIX;
use crate::volume::RcloneVolume;

/// Port of the rclone remote-control API inside the mount container.
pub const RC_PORT: u16 = 5572;

/// Default flags in emission order.  An empty value marks a boolean flag.
pub fn default_flags(volume: &RcloneVolume) -> Vec<(&'static str, String)> {
    let id = volume.id.to_string();
    vec![
        ("rc", String::new()),
        ("rc-addr", format!("0.0.0.0:{RC_PORT}")),
        ("rc-enable-metrics", String::new()),
        ("rc-web-gui", String::new()),
        ("rc-web-gui-no-open-browser", String::new()),
        ("rc-no-auth", String::new()),
        ("volname", id.clone()),
        ("devname", id),
        ("cache-info-age", "72h".to_owned()),
        ("cache-chunk-clean-interval", "15m".to_owned()),
        ("dir-cache-time", "60s".to_owned()),
        ("vfs-cache-mode", "full".to_owned()),
        ("vfs-write-back", "10s".to_owned()),
        ("vfs-cache-max-size", "1g".to_owned()),
        ("allow-other", "true".to_owned()),
        ("allow-non-empty", "true".to_owned()),
    ]
}

/// Collect `mount/<flag>` entries of a volume context, prefix stripped.
pub fn mount_overrides(volume_context: &HashMap<String, String>) -> BTreeMap<String, String> {
    volume_context
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(PARAM_MOUNT_PREFIX)
                .map(|flag| (flag.to_owned(), value.clone()))
        })
        .collect()
}

fn render_flag(name: &str, value: &str) -> String {
    if value.is_empty() {
        format!("--{name}")
    } else {
        format!("--{name}={value}")
    }
}

/// Build `mount <remote>:/<path> <target> [--flag[=value]]...`.
///
/// Defaults whose name appears in `overrides` are dropped; every override is
/// emitted, in key order.
pub fn compose_mount_args(
    volume: &RcloneVolume,
    target_path: &Path,
    overrides: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut args = vec![
        "mount".to_owned(),
        volume.mount_source(),
        target_path.display().to_string(),
    ];

    args.extend(
        default_flags(volume)
            .into_iter()
            .filter(|(name, _)| !overrides.contains_key(*name))
            .map(|(name, value)| render_flag(name, &value)),
    );
    args.extend(
        overrides
            .iter()
            .map(|(name, value)| render_flag(name, value)),
    );
    args
}
