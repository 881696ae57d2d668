//! Container runtime capability interface.
//!
//! The agent drives an opaque local container runtime through a small
//! async trait: list, inspect, create, start, stop. Image pulls go through a
//! separate `ImagePuller` capability so pull policy stays independent of the
//! runtime transport. Recording fakes for both live here and back the tests
//! as well as development wiring.
//!
//! `ContainerIndex` is the pod-scoped view over a listing: container names
//! are decoded once and the reconciler queries by (pod, uid, container).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::AgentError;
use crate::naming::{parse_container_name, ParsedContainerName};

/// A container as reported by the runtime listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeContainer {
    pub id: String,

    /// The identity-bearing name string.
    pub name: String,
}

impl RuntimeContainer {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Detail view of a single container, from `inspect`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerDetails {
    pub id: String,
    pub running: bool,

    /// IP address inside the container's network namespace. Meaningful for
    /// the sandbox, which owns the pod's network.
    pub ip_address: Option<String>,
}

/// Host-side binding for one exposed container port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortBinding {
    pub host_port: String,
    pub host_ip: String,
}

/// `"<containerPort>/<protocol>"` to its host bindings.
pub type PortBindingMap = HashMap<String, Vec<PortBinding>>;

/// Everything needed to create one container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerConfig {
    /// Encoded identity name (see `naming`).
    pub name: String,

    pub image: String,

    pub command: Vec<String>,

    /// `NAME=value` pairs in manifest order.
    pub env: Vec<String>,

    /// `host:mount[:ro]` bind strings.
    pub binds: Vec<String>,

    /// `"<port>/<protocol>"` keys exposed by this container.
    pub exposed_ports: Vec<String>,

    pub port_bindings: PortBindingMap,

    /// `container:<sandbox-id>` for application containers joining the
    /// pod's network sandbox; `None` for the sandbox itself.
    pub network_mode: Option<String>,
}

/// Image pull policy, honored by the injected puller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPolicy {
    #[default]
    IfNotPresent,
    Always,
    Never,
}

/// The local container runtime, injected into the agent.
///
/// All operations may fail with a transient I/O error; callers treat such
/// failures as per-container and keep reconciling the rest of the pod.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// All containers known to the runtime.
    async fn list(&self) -> Result<Vec<RuntimeContainer>, AgentError>;

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, AgentError>;

    /// Create a container and return its runtime id.
    async fn create(&self, config: &ContainerConfig) -> Result<String, AgentError>;

    async fn start(&self, id: &str) -> Result<(), AgentError>;

    /// Stop with a grace timeout. The only operation the reconciler ever
    /// applies to an existing container it did not just create.
    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), AgentError>;
}

/// Image fetch capability, separate from the runtime transport.
#[async_trait]
pub trait ImagePuller: Send + Sync {
    async fn pull(&self, image: &str, policy: PullPolicy) -> Result<(), AgentError>;
}

// =============================================================================
// Pod-scoped container index
// =============================================================================

/// A listing with every managed name decoded, queryable by pod.
///
/// Foreign containers (names that do not decode) are dropped at construction
/// and can never be returned from a lookup, which is what keeps them out of
/// reach of every stop path that goes through the index.
#[derive(Debug, Default)]
pub struct ContainerIndex {
    entries: Vec<(RuntimeContainer, ParsedContainerName)>,
}

impl ContainerIndex {
    pub fn new(containers: Vec<RuntimeContainer>) -> Self {
        let entries = containers
            .into_iter()
            .filter_map(|c| parse_container_name(&c.name).map(|parsed| (c, parsed)))
            .collect();
        Self { entries }
    }

    /// Find the container for `(pod_full_name, container_name)`, honoring the
    /// uid segment when both sides carry one. Returns the container and the
    /// hash embedded in its name. With duplicates present, the first listed
    /// container wins; the sync engine reaps the rest.
    pub fn find_pod_container(
        &self,
        pod_full_name: &str,
        uid: &str,
        container_name: &str,
    ) -> Option<(&RuntimeContainer, u64)> {
        self.entries
            .iter()
            .find(|(_, parsed)| {
                parsed.pod_full_name == pod_full_name
                    && parsed.container_name == container_name
                    && uid_matches(parsed, uid)
            })
            .map(|(container, parsed)| (container, parsed.hash))
    }

    /// All of a pod's containers, in listing order.
    pub fn pod_containers(
        &self,
        pod_full_name: &str,
        uid: &str,
    ) -> Vec<(&RuntimeContainer, &ParsedContainerName)> {
        self.entries
            .iter()
            .filter(|(_, parsed)| parsed.pod_full_name == pod_full_name && uid_matches(parsed, uid))
            .map(|(container, parsed)| (container, parsed))
            .collect()
    }

    /// Every managed container with its decoded identity.
    pub fn iter(&self) -> impl Iterator<Item = (&RuntimeContainer, &ParsedContainerName)> {
        self.entries.iter().map(|(c, p)| (c, p))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn uid_matches(parsed: &ParsedContainerName, uid: &str) -> bool {
    match (&parsed.pod_uid, uid) {
        (Some(parsed_uid), uid) if !uid.is_empty() => parsed_uid == uid,
        _ => true,
    }
}

// =============================================================================
// Fakes (testing and development)
// =============================================================================

#[derive(Debug, Default)]
struct FakeRuntimeState {
    containers: Vec<RuntimeContainer>,
    calls: Vec<String>,
    created: Vec<String>,
    stopped: Vec<String>,
    error: Option<String>,
    next_id: u64,
}

/// Recording in-memory runtime for tests and development.
///
/// `create` appends a running container to the listing, `stop` removes it;
/// every operation records its call so tests can assert exact sequences.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeRuntimeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fake pre-populated with a listing.
    pub fn with_containers(containers: Vec<RuntimeContainer>) -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().containers = containers;
        fake
    }

    /// Make every subsequent operation fail with `message`.
    pub fn set_error(&self, message: impl Into<String>) {
        self.state.lock().unwrap().error = Some(message.into());
    }

    pub fn clear_error(&self) {
        self.state.lock().unwrap().error = None;
    }

    /// Operations recorded so far, e.g. `["list", "create", "start"]`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Names passed to `create`, in order.
    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    /// Ids passed to `stop`, in order.
    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn containers(&self) -> Vec<RuntimeContainer> {
        self.state.lock().unwrap().containers.clone()
    }

    fn record(&self, call: &str) -> Result<(), AgentError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.to_string());
        match &state.error {
            Some(message) => Err(AgentError::Runtime(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list(&self) -> Result<Vec<RuntimeContainer>, AgentError> {
        self.record("list")?;
        Ok(self.state.lock().unwrap().containers.clone())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, AgentError> {
        self.record("inspect")?;
        let state = self.state.lock().unwrap();
        match state.containers.iter().find(|c| c.id == id) {
            Some(c) => Ok(ContainerDetails {
                id: c.id.clone(),
                running: true,
                ip_address: Some("10.88.0.2".to_string()),
            }),
            None => Err(AgentError::Runtime(format!("no container {id}"))),
        }
    }

    async fn create(&self, config: &ContainerConfig) -> Result<String, AgentError> {
        self.record("create")?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("fake{:04x}", state.next_id);
        state.created.push(config.name.clone());
        state
            .containers
            .push(RuntimeContainer::new(id.clone(), config.name.clone()));
        Ok(id)
    }

    async fn start(&self, _id: &str) -> Result<(), AgentError> {
        self.record("start")
    }

    async fn stop(&self, id: &str, _timeout: Duration) -> Result<(), AgentError> {
        let result = self.record("stop");
        let mut state = self.state.lock().unwrap();
        state.stopped.push(id.to_string());
        state.containers.retain(|c| c.id != id);
        result
    }
}

/// Recording puller that always succeeds unless an error is injected.
#[derive(Debug, Default)]
pub struct FakePuller {
    pulled: Mutex<Vec<String>>,
    error: Mutex<Option<String>>,
}

impl FakePuller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_error(&self, message: impl Into<String>) {
        *self.error.lock().unwrap() = Some(message.into());
    }

    pub fn pulled(&self) -> Vec<String> {
        self.pulled.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImagePuller for FakePuller {
    async fn pull(&self, image: &str, _policy: PullPolicy) -> Result<(), AgentError> {
        self.pulled.lock().unwrap().push(image.to_string());
        match &*self.error.lock().unwrap() {
            Some(message) => Err(AgentError::Pull {
                image: image.to_string(),
                reason: message.clone(),
            }),
            None => Ok(()),
        }
    }
}
