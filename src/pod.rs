//! Pod data model.
//!
//! A pod is the unit of deployment handed to the agent by its configuration
//! sources: a named group of containers that share a network sandbox, plus
//! the volumes they mount. Sources deliver pods as JSON, so everything here
//! derives serde.

use serde::{Deserialize, Serialize};

/// A deployment unit: co-scheduled containers sharing a network namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    /// Pod name, DNS-label-like. Sources that omit it fall back to the
    /// manifest id during normalization.
    #[serde(default)]
    pub name: String,

    /// Namespace; `"default"` when the source omits it.
    #[serde(default)]
    pub namespace: String,

    /// The desired container set.
    #[serde(default)]
    pub manifest: Manifest,
}

impl Pod {
    /// The node-local unique key for this pod: `"<name>.<namespace>"`.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.name, self.namespace)
    }
}

/// The container manifest carried by a pod.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest id; doubles as the pod name for sources that only set ids.
    #[serde(default)]
    pub id: String,

    /// Stable pod identifier, embedded in ephemeral volume paths and
    /// matched against container names that carry a uid segment.
    #[serde(default)]
    pub uuid: String,

    /// Ordered container specs.
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,

    /// Volume declarations referenced by container mounts.
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

/// A single container spec within a manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub env: Vec<EnvVar>,

    #[serde(default)]
    pub ports: Vec<PortSpec>,

    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,

    #[serde(default)]
    pub lifecycle: Option<Lifecycle>,

    #[serde(default)]
    pub liveness_probe: Option<LivenessProbe>,
}

/// An environment variable; rendered as `NAME=value` at container creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// A port exposed by a container. `host_port` 0 means unbound on the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
    #[serde(default)]
    pub container_port: u16,

    #[serde(default)]
    pub host_port: u16,

    #[serde(default)]
    pub host_ip: String,

    /// `tcp` or `udp`; anything else normalizes to `tcp`.
    #[serde(default)]
    pub protocol: String,
}

/// A container's reference to a declared volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub name: String,

    #[serde(default)]
    pub mount_path: String,

    #[serde(default)]
    pub read_only: bool,
}

/// A volume declaration at the manifest level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,

    /// Missing source means the volume is declared but not materializable;
    /// mounts referencing it are ignored.
    #[serde(default)]
    pub source: Option<VolumeSource>,
}

/// Where a volume's data lives on the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeSource {
    /// A pre-existing directory on the host.
    HostDirectory { path: String },

    /// A pod-scoped scratch directory created under the agent root.
    EmptyDirectory {},
}

/// Lifecycle hooks for a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lifecycle {
    #[serde(default)]
    pub post_start: Option<Handler>,

    #[serde(default)]
    pub pre_stop: Option<Handler>,
}

/// A lifecycle handler action. At most one of the variants is set; a handler
/// with neither is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Handler {
    #[serde(default)]
    pub http_get: Option<HttpGetAction>,

    #[serde(default)]
    pub exec: Option<ExecAction>,
}

/// `GET http://<host>:<port>/<path>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpGetAction {
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub port: u16,

    #[serde(default)]
    pub path: String,
}

/// A command run inside the container via the exec capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecAction {
    #[serde(default)]
    pub command: Vec<String>,
}

/// Liveness probe declaration. Kinds without a prober implementation are
/// reported as unknown health, which the sync engine treats as healthy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LivenessProbe {
    /// Probe kind, e.g. `"http"`.
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub http_get: Option<HttpGetAction>,
}

/// Observed pod-level state, captured from the network sandbox.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodStatus {
    /// IP address of the pod's network sandbox, if known.
    pub pod_ip: Option<String>,
}

/// Operation carried by a source update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOp {
    /// Replace everything previously delivered by this source.
    Set,
    /// Merge the listed pods into this source's set by pod identity.
    Update,
    /// Delete the listed pods from this source's set.
    Remove,
}

/// One update from a named configuration source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodUpdate {
    pub op: UpdateOp,
    pub source: String,
    #[serde(default)]
    pub pods: Vec<Pod>,
}
