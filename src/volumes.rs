//! Volume plugins and host-path materialization.
//!
//! A manifest's volume declarations become `VolumePlugin` values, each of
//! which contributes a host path. Host directories point at pre-existing
//! paths; empty directories are pod-scoped scratch space created under the
//! agent's root directory and keyed by the pod uid.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::pod::{Manifest, VolumeSource};

/// Directory kind segment used in ephemeral volume host paths.
const EMPTY_DIR_KIND: &str = "empty";

/// A materializable volume. Tagged variant rather than trait objects: the
/// set of kinds is closed and each only contributes a host path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumePlugin {
    /// A directory that already exists on the host.
    HostDirectory { path: PathBuf },

    /// Pod-lifetime scratch directory under `<root>/<pod-uid>/volumes/empty/<name>`.
    EmptyDirectory {
        name: String,
        pod_uid: String,
        root_dir: PathBuf,
    },
}

impl VolumePlugin {
    /// The host path this volume binds from.
    pub fn host_path(&self) -> PathBuf {
        match self {
            VolumePlugin::HostDirectory { path } => path.clone(),
            VolumePlugin::EmptyDirectory {
                name,
                pod_uid,
                root_dir,
            } => root_dir
                .join(pod_uid)
                .join("volumes")
                .join(EMPTY_DIR_KIND)
                .join(name),
        }
    }

    /// Make the host path usable. Host directories are taken as-is.
    pub fn set_up(&self) -> std::io::Result<()> {
        match self {
            VolumePlugin::HostDirectory { .. } => Ok(()),
            VolumePlugin::EmptyDirectory { .. } => std::fs::create_dir_all(self.host_path()),
        }
    }
}

/// Volume name to its materialized plugin.
pub type VolumeMap = HashMap<String, VolumePlugin>;

/// Materialize every declared volume of a manifest.
///
/// Declarations without a source are skipped with a warning; mounts that
/// reference them are later ignored rather than failing the pod.
pub fn mount_external_volumes(
    manifest: &Manifest,
    pod_uid: &str,
    root_dir: &Path,
) -> std::io::Result<VolumeMap> {
    let mut volumes = VolumeMap::new();
    for volume in &manifest.volumes {
        let plugin = match &volume.source {
            Some(VolumeSource::HostDirectory { path }) => VolumePlugin::HostDirectory {
                path: PathBuf::from(path),
            },
            Some(VolumeSource::EmptyDirectory {}) => VolumePlugin::EmptyDirectory {
                name: volume.name.clone(),
                pod_uid: pod_uid.to_string(),
                root_dir: root_dir.to_path_buf(),
            },
            None => {
                warn!(volume = %volume.name, "volume has no source, skipping");
                continue;
            }
        };
        plugin.set_up()?;
        volumes.insert(volume.name.clone(), plugin);
    }
    Ok(volumes)
}
