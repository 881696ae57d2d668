//! Per-pod sync engine.
//!
//! `PodSyncer` converges one pod: given the desired spec and a snapshot of
//! the pod's runtime containers, it ensures the network sandbox exists,
//! starts missing application containers inside the sandbox's namespace,
//! replaces containers whose spec hash or health disagrees, and reaps
//! anything left over (duplicates, containers dropped from the manifest).
//!
//! The syncer holds no per-pod state between calls; everything it needs
//! arrives as arguments or injected capabilities, so a single instance
//! serves every pod worker concurrently.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::AgentError;
use crate::health::{HealthChecker, HealthStatus};
use crate::hooks::{run_handler, CommandRunner, HttpGetter};
use crate::naming::{
    encode_container_name, hash_container_spec, random_attempt, SANDBOX_CONTAINER_NAME,
};
use crate::pod::{ContainerSpec, Pod, PodStatus, PortSpec};
use crate::runtime::{
    ContainerConfig, ContainerIndex, ContainerRuntime, ImagePuller, PortBinding, PortBindingMap,
    PullPolicy, RuntimeContainer,
};
use crate::volumes::{mount_external_volumes, VolumeMap};
use crate::workers::WorkHandler;

/// One unit of work for a pod worker: the desired pod plus the container
/// snapshot the enclosing snapshot sync was taken against.
pub struct PodWork {
    pub pod: Pod,
    pub containers: Arc<ContainerIndex>,
}

/// The per-pod reconciliation engine.
pub struct PodSyncer {
    runtime: Arc<dyn ContainerRuntime>,
    puller: Arc<dyn ImagePuller>,
    http: Arc<dyn HttpGetter>,
    runner: Arc<dyn CommandRunner>,
    health: Arc<dyn HealthChecker>,
    root_dir: PathBuf,
    stop_grace: Duration,
    sandbox_image: String,
    pull_policy: PullPolicy,
}

impl PodSyncer {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        puller: Arc<dyn ImagePuller>,
        http: Arc<dyn HttpGetter>,
        runner: Arc<dyn CommandRunner>,
        health: Arc<dyn HealthChecker>,
        config: &Config,
    ) -> Self {
        Self {
            runtime,
            puller,
            http,
            runner,
            health,
            root_dir: config.root_dir.clone(),
            stop_grace: config.stop_grace(),
            sandbox_image: config.sandbox_image.clone(),
            pull_policy: config.pull_policy,
        }
    }

    /// Converge one pod against a container snapshot.
    ///
    /// Failures on individual containers are collected and returned as an
    /// aggregate; they never stop the remaining containers from being
    /// processed. Only sandbox creation and volume setup abort the pass,
    /// since nothing downstream can proceed without them.
    pub async fn sync_pod(
        &self,
        pod: &Pod,
        containers: &ContainerIndex,
    ) -> Result<(), AgentError> {
        let full_name = pod.full_name();
        let uid = pod.manifest.uuid.clone();
        let mut keep: HashSet<String> = HashSet::new();
        let mut killed: HashSet<String> = HashSet::new();

        // Make sure the pod has a running network sandbox. Without one the
        // surviving containers hold a dead network namespace, so the whole
        // pod restarts: stop everything, then create a fresh sandbox.
        let mut refreshed: Option<ContainerIndex> = None;
        let sandbox_id = match containers.find_pod_container(&full_name, &uid, SANDBOX_CONTAINER_NAME)
        {
            Some((sandbox, _)) => sandbox.id.clone(),
            None => {
                info!(pod = %full_name, "network sandbox missing, restarting pod");
                let stopped = self.stop_pod_containers(pod, containers).await?;
                let sandbox_id = self.create_sandbox(pod).await?;
                if stopped > 0 {
                    // The snapshot no longer reflects reality; re-list.
                    refreshed = Some(ContainerIndex::new(self.runtime.list().await?));
                }
                sandbox_id
            }
        };
        let index = refreshed.as_ref().unwrap_or(containers);
        keep.insert(sandbox_id.clone());

        let volumes = mount_external_volumes(&pod.manifest, &uid, &self.root_dir)?;

        let status = self.pod_status(&full_name, &uid).await;

        let mut errors = Vec::new();
        for container in &pod.manifest.containers {
            let expected_hash = hash_container_spec(container);

            if let Some((existing, hash)) = index.find_pod_container(&full_name, &uid, &container.name)
            {
                let existing = existing.clone();
                // Only the sandbox may omit its hash segment; an application
                // container matches solely on exact hash equality, so a
                // hashless legacy name counts as spec drift too.
                if hash == expected_hash {
                    match self.health.health_check(&full_name, &status, container).await {
                        Ok(HealthStatus::Unhealthy) => {
                            info!(
                                pod = %full_name,
                                container = %container.name,
                                "container unhealthy, restarting"
                            );
                        }
                        Ok(_) => {
                            // Healthy, or unknown which must not trigger action.
                            keep.insert(existing.id);
                            continue;
                        }
                        Err(e) => {
                            warn!(
                                pod = %full_name,
                                container = %container.name,
                                error = %e,
                                "health check errored, keeping container"
                            );
                            keep.insert(existing.id);
                            continue;
                        }
                    }
                } else {
                    info!(
                        pod = %full_name,
                        container = %container.name,
                        "spec hash changed, replacing container"
                    );
                }

                if let Err(e) = self.kill_container(&full_name, &existing, Some(container)).await {
                    warn!(
                        pod = %full_name,
                        container = %container.name,
                        error = %e,
                        "failed to stop container"
                    );
                    errors.push(e);
                    continue;
                }
                killed.insert(existing.id);
            }

            match self
                .start_container(pod, container, &volumes, &sandbox_id)
                .await
            {
                Ok(id) => {
                    keep.insert(id);
                }
                Err(e) => {
                    warn!(
                        pod = %full_name,
                        container = %container.name,
                        error = %e,
                        "failed to start container"
                    );
                    errors.push(e);
                }
            }
        }

        // Reap whatever else runs under this pod: duplicates of desired
        // containers and containers no longer in the manifest.
        for (container, _) in index.pod_containers(&full_name, &uid) {
            if keep.contains(&container.id) || killed.contains(&container.id) {
                continue;
            }
            debug!(pod = %full_name, id = %container.id, "stopping unidentified pod container");
            if let Err(e) = self.runtime.stop(&container.id, self.stop_grace).await {
                warn!(pod = %full_name, id = %container.id, error = %e, "failed to stop container");
                errors.push(e);
            }
        }

        AgentError::aggregate(errors)
    }

    /// Stop every container of the pod present in the snapshot. Returns how
    /// many were stopped.
    async fn stop_pod_containers(
        &self,
        pod: &Pod,
        index: &ContainerIndex,
    ) -> Result<usize, AgentError> {
        let full_name = pod.full_name();
        let mut stopped = 0;
        for (container, _) in index.pod_containers(&full_name, &pod.manifest.uuid) {
            self.kill_container(&full_name, container, None).await?;
            stopped += 1;
        }
        Ok(stopped)
    }

    /// Create and start the pod's network sandbox. It exposes the union of
    /// the pod's host ports; application containers join its namespace.
    async fn create_sandbox(&self, pod: &Pod) -> Result<String, AgentError> {
        let full_name = pod.full_name();
        let all_ports: Vec<PortSpec> = pod
            .manifest
            .containers
            .iter()
            .flat_map(|c| c.ports.iter().cloned())
            .collect();
        let (exposed_ports, port_bindings) = make_ports_and_bindings(&all_ports);

        self.puller.pull(&self.sandbox_image, self.pull_policy).await?;

        let config = ContainerConfig {
            name: encode_container_name(SANDBOX_CONTAINER_NAME, &full_name, 0, &random_attempt()),
            image: self.sandbox_image.clone(),
            exposed_ports,
            port_bindings,
            ..Default::default()
        };
        let id = self.runtime.create(&config).await?;
        self.runtime.start(&id).await?;
        info!(pod = %full_name, id = %id, "created network sandbox");
        Ok(id)
    }

    /// Pull, create and start one application container inside the sandbox
    /// namespace, then run its post-start hook. A failed hook stops the
    /// container just started and surfaces the failure.
    async fn start_container(
        &self,
        pod: &Pod,
        spec: &ContainerSpec,
        volumes: &VolumeMap,
        sandbox_id: &str,
    ) -> Result<String, AgentError> {
        let full_name = pod.full_name();
        let expected_hash = hash_container_spec(spec);

        self.puller.pull(&spec.image, self.pull_policy).await?;

        // The snapshot this sync started from may be stale by now (the
        // sandbox restart above, or an earlier pass, may have landed since).
        // Re-check the live set before creating another copy.
        let live = ContainerIndex::new(self.runtime.list().await?);
        if let Some((existing, hash)) =
            live.find_pod_container(&full_name, &pod.manifest.uuid, &spec.name)
        {
            if hash == expected_hash {
                debug!(
                    pod = %full_name,
                    container = %spec.name,
                    id = %existing.id,
                    "container already present, skipping create"
                );
                return Ok(existing.id.clone());
            }
        }

        let (exposed_ports, port_bindings) = make_ports_and_bindings(&spec.ports);
        let config = ContainerConfig {
            name: encode_container_name(&spec.name, &full_name, expected_hash, &random_attempt()),
            image: spec.image.clone(),
            command: spec.command.clone(),
            env: make_environment_variables(spec),
            binds: make_binds(spec, volumes),
            exposed_ports,
            port_bindings,
            network_mode: Some(format!("container:{sandbox_id}")),
        };
        let id = self.runtime.create(&config).await?;
        self.runtime.start(&id).await?;
        info!(pod = %full_name, container = %spec.name, id = %id, "started container");

        if let Some(handler) = spec.lifecycle.as_ref().and_then(|lc| lc.post_start.as_ref()) {
            if let Err(e) = run_handler(
                self.http.as_ref(),
                self.runner.as_ref(),
                &full_name,
                &id,
                spec,
                handler,
                "post-start",
            )
            .await
            {
                warn!(
                    pod = %full_name,
                    container = %spec.name,
                    error = %e,
                    "post-start handler failed, stopping container"
                );
                if let Err(stop_err) = self.runtime.stop(&id, self.stop_grace).await {
                    warn!(pod = %full_name, id = %id, error = %stop_err, "failed to stop container");
                }
                return Err(e);
            }
        }

        Ok(id)
    }

    /// Stop a container, running its pre-stop hook first when the spec
    /// declares one. Hook failure is logged; the stop still proceeds.
    async fn kill_container(
        &self,
        full_name: &str,
        container: &RuntimeContainer,
        spec: Option<&ContainerSpec>,
    ) -> Result<(), AgentError> {
        if let Some(spec) = spec {
            if let Some(handler) = spec.lifecycle.as_ref().and_then(|lc| lc.pre_stop.as_ref()) {
                if let Err(e) = run_handler(
                    self.http.as_ref(),
                    self.runner.as_ref(),
                    full_name,
                    &container.id,
                    spec,
                    handler,
                    "pre-stop",
                )
                .await
                {
                    warn!(
                        pod = %full_name,
                        container = %spec.name,
                        error = %e,
                        "pre-stop handler failed"
                    );
                }
            }
        }
        debug!(pod = %full_name, id = %container.id, "stopping container");
        self.runtime.stop(&container.id, self.stop_grace).await
    }

    /// Observe the pod's network state from its sandbox. Best-effort: on any
    /// failure health checks run without a pod IP.
    async fn pod_status(&self, full_name: &str, uid: &str) -> PodStatus {
        let list = match self.runtime.list().await {
            Ok(list) => list,
            Err(e) => {
                warn!(
                    pod = %full_name,
                    error = %e,
                    "failed to list containers, health checks may be incomplete"
                );
                return PodStatus::default();
            }
        };
        let index = ContainerIndex::new(list);
        if let Some((sandbox, _)) = index.find_pod_container(full_name, uid, SANDBOX_CONTAINER_NAME)
        {
            match self.runtime.inspect(&sandbox.id).await {
                Ok(details) => {
                    return PodStatus {
                        pod_ip: details.ip_address,
                    }
                }
                Err(e) => {
                    warn!(pod = %full_name, error = %e, "failed to inspect sandbox");
                }
            }
        }
        PodStatus::default()
    }
}

#[async_trait]
impl WorkHandler<PodWork> for PodSyncer {
    async fn handle(&self, full_name: &str, work: PodWork) {
        if let Err(e) = self.sync_pod(&work.pod, &work.containers).await {
            warn!(pod = %full_name, error = %e, "error syncing pod, skipping");
        }
    }
}

/// Render a container's environment as `NAME=value` pairs, in spec order.
pub fn make_environment_variables(spec: &ContainerSpec) -> Vec<String> {
    spec.env
        .iter()
        .map(|env| format!("{}={}", env.name, env.value))
        .collect()
}

/// Build bind strings for a container's volume mounts. Mounts referencing a
/// volume that was not materialized are skipped.
pub fn make_binds(spec: &ContainerSpec, volumes: &VolumeMap) -> Vec<String> {
    let mut binds = Vec::new();
    for mount in &spec.volume_mounts {
        let Some(volume) = volumes.get(&mount.name) else {
            continue;
        };
        let mut bind = format!("{}:{}", volume.host_path().display(), mount.mount_path);
        if mount.read_only {
            bind.push_str(":ro");
        }
        binds.push(bind);
    }
    binds
}

/// Exposed-port keys and host bindings for a port list. Unknown protocols
/// collapse to tcp; ports without a host port are exposed but not bound.
pub fn make_ports_and_bindings(ports: &[PortSpec]) -> (Vec<String>, PortBindingMap) {
    let mut exposed = Vec::new();
    let mut bindings = PortBindingMap::new();
    for port in ports {
        let key = format!("{}/{}", port.container_port, normalize_protocol(&port.protocol));
        if !exposed.contains(&key) {
            exposed.push(key.clone());
        }
        if port.host_port != 0 {
            bindings.entry(key).or_default().push(PortBinding {
                host_port: port.host_port.to_string(),
                host_ip: port.host_ip.clone(),
            });
        }
    }
    (exposed, bindings)
}

fn normalize_protocol(protocol: &str) -> &'static str {
    match protocol.to_ascii_lowercase().as_str() {
        "udp" => "udp",
        "tcp" | "" => "tcp",
        other => {
            warn!(protocol = other, "unknown protocol, defaulting to tcp");
            "tcp"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::hooks::{FakeCommandRunner, FakeHttpGetter};
    use crate::pod::{
        EnvVar, Handler, HttpGetAction, Lifecycle, Manifest, Volume, VolumeMount, VolumeSource,
    };
    use crate::runtime::{FakePuller, FakeRuntime};

    struct AlwaysUnhealthy;

    #[async_trait]
    impl HealthChecker for AlwaysUnhealthy {
        async fn health_check(
            &self,
            _pod_full_name: &str,
            _status: &PodStatus,
            _container: &ContainerSpec,
        ) -> Result<HealthStatus, AgentError> {
            Ok(HealthStatus::Unhealthy)
        }
    }

    struct AlwaysHealthy;

    #[async_trait]
    impl HealthChecker for AlwaysHealthy {
        async fn health_check(
            &self,
            _pod_full_name: &str,
            _status: &PodStatus,
            _container: &ContainerSpec,
        ) -> Result<HealthStatus, AgentError> {
            Ok(HealthStatus::Healthy)
        }
    }

    struct Fixture {
        runtime: Arc<FakeRuntime>,
        puller: Arc<FakePuller>,
        http: Arc<FakeHttpGetter>,
        runner: Arc<FakeCommandRunner>,
        syncer: PodSyncer,
    }

    fn fixture_with(http: FakeHttpGetter, health: Arc<dyn HealthChecker>) -> Fixture {
        let runtime = Arc::new(FakeRuntime::new());
        let puller = Arc::new(FakePuller::new());
        let http = Arc::new(http);
        let runner = Arc::new(FakeCommandRunner::new());
        let syncer = PodSyncer::new(
            runtime.clone(),
            puller.clone(),
            http.clone(),
            runner.clone(),
            health,
            &test_config(),
        );
        Fixture {
            runtime,
            puller,
            http,
            runner,
            syncer,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(FakeHttpGetter::new(), Arc::new(AlwaysHealthy))
    }

    fn pod(name: &str, namespace: &str, containers: Vec<ContainerSpec>) -> Pod {
        Pod {
            name: name.to_string(),
            namespace: namespace.to_string(),
            manifest: Manifest {
                id: name.to_string(),
                containers,
                ..Default::default()
            },
        }
    }

    fn container(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "busybox".to_string(),
            ..Default::default()
        }
    }

    fn snapshot(entries: &[(&str, &str)]) -> ContainerIndex {
        ContainerIndex::new(
            entries
                .iter()
                .map(|(id, name)| RuntimeContainer::new(*id, *name))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_sync_pod_replaces_on_hash_mismatch() {
        let fx = fixture();
        // "bar" exists with a stale hash; the sandbox is fine.
        let observed = snapshot(&[
            ("A", "/k8s--bar.1234--foo.test"),
            ("B", "/k8s--net--foo.test--"),
        ]);
        fx.syncer
            .sync_pod(&pod("foo", "test", vec![container("bar")]), &observed)
            .await
            .unwrap();

        assert_eq!(fx.runtime.calls(), vec!["list", "stop", "list", "create", "start"]);
        assert_eq!(fx.runtime.stopped(), vec!["A"]);
        let created = fx.runtime.created();
        assert_eq!(created.len(), 1);
        let hash = hash_container_spec(&container("bar"));
        assert!(created[0].starts_with(&format!("k8s_bar.{hash:x}_foo.test_")));
    }

    #[tokio::test]
    async fn test_sync_pod_restarts_unhealthy_container() {
        let fx = fixture_with(FakeHttpGetter::new(), Arc::new(AlwaysUnhealthy));
        // The hash matches, so ill health alone drives the restart.
        let bar = container("bar");
        let hash = hash_container_spec(&bar);
        let current_name = format!("/k8s--bar.{hash:x}--foo.test");
        let observed = snapshot(&[
            ("1234", current_name.as_str()),
            ("9876", "/k8s--net--foo.test--"),
        ]);
        fx.syncer
            .sync_pod(&pod("foo", "test", vec![bar]), &observed)
            .await
            .unwrap();

        assert_eq!(fx.runtime.calls(), vec!["list", "stop", "list", "create", "start"]);
        assert_eq!(fx.runtime.stopped(), vec!["1234"]);
    }

    #[tokio::test]
    async fn test_sync_pod_replaces_healthy_container_without_hash() {
        // A legacy name with no hash segment never matches a nonzero spec
        // hash, so the container is replaced even though it reports healthy.
        let fx = fixture();
        let observed = snapshot(&[
            ("1234", "/k8s--bar--foo.test"),
            ("9876", "/k8s--net--foo.test--"),
        ]);
        fx.syncer
            .sync_pod(&pod("foo", "test", vec![container("bar")]), &observed)
            .await
            .unwrap();

        assert_eq!(fx.runtime.calls(), vec!["list", "stop", "list", "create", "start"]);
        assert_eq!(fx.runtime.stopped(), vec!["1234"]);
        let created = fx.runtime.created();
        assert_eq!(created.len(), 1);
        let hash = hash_container_spec(&container("bar"));
        assert!(created[0].starts_with(&format!("k8s_bar.{hash:x}_foo.test_")));
    }

    #[tokio::test]
    async fn test_sync_pod_keeps_matching_healthy_container() {
        let fx = fixture();
        let bar = container("bar");
        let hash = hash_container_spec(&bar);
        let current_name = format!("/k8s--bar.{hash:x}--foo.test");
        let observed = snapshot(&[
            ("1234", current_name.as_str()),
            ("9876", "/k8s--net--foo.test--"),
        ]);
        fx.syncer
            .sync_pod(&pod("foo", "test", vec![bar]), &observed)
            .await
            .unwrap();

        assert_eq!(fx.runtime.calls(), vec!["list"]);
        assert!(fx.runtime.stopped().is_empty());
        assert!(fx.puller.pulled().is_empty());
    }

    #[tokio::test]
    async fn test_sync_pod_reaps_duplicates() {
        let fx = fixture();
        let foo = container("foo");
        let hash = hash_container_spec(&foo);
        let first = format!("/k8s--foo.{hash:x}--bar.test--1");
        let second = format!("/k8s--foo.{hash:x}--bar.test--2");
        let observed = snapshot(&[
            ("1234", first.as_str()),
            ("9876", "/k8s--net--bar.test--"),
            ("4567", second.as_str()),
            ("2304", "/k8s--baz--fiz.test--6"),
        ]);
        fx.syncer
            .sync_pod(&pod("bar", "test", vec![foo]), &observed)
            .await
            .unwrap();

        assert_eq!(fx.runtime.calls(), vec!["list", "stop"]);
        // Exactly one of the duplicates goes; the other pod's container is
        // untouched.
        let stopped = fx.runtime.stopped();
        assert_eq!(stopped.len(), 1);
        assert!(stopped[0] == "1234" || stopped[0] == "4567");
        assert_ne!(stopped[0], "2304");
    }

    #[tokio::test]
    async fn test_sync_pod_stops_container_when_post_start_fails() {
        let fx = fixture_with(FakeHttpGetter::failing("test error"), Arc::new(AlwaysHealthy));
        let observed = snapshot(&[("9876", "/k8s--net--foo.test--")]);
        let mut bar = container("bar");
        bar.lifecycle = Some(Lifecycle {
            post_start: Some(Handler {
                http_get: Some(HttpGetAction {
                    host: "does.no.exist".to_string(),
                    port: 8080,
                    path: "bar".to_string(),
                }),
                exec: None,
            }),
            pre_stop: None,
        });

        let err = fx
            .syncer
            .sync_pod(&pod("foo", "test", vec![bar]), &observed)
            .await
            .unwrap_err();

        assert_eq!(fx.runtime.calls(), vec!["list", "list", "create", "start", "stop"]);
        assert_eq!(fx.runtime.stopped().len(), 1);
        match err {
            AgentError::Aggregate(errors) => {
                assert_eq!(errors.len(), 1);
                assert!(matches!(errors[0], AgentError::Handler { hook: "post-start", .. }));
            }
            other => panic!("expected aggregate error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_sync_pod_runs_post_start_handler() {
        let fx = fixture();
        let observed = snapshot(&[("9876", "/k8s--net--foo.test--")]);
        let mut bar = container("bar");
        bar.lifecycle = Some(Lifecycle {
            post_start: Some(Handler {
                http_get: Some(HttpGetAction {
                    host: "foo".to_string(),
                    port: 8080,
                    path: "bar".to_string(),
                }),
                exec: None,
            }),
            pre_stop: None,
        });
        fx.syncer
            .sync_pod(&pod("foo", "test", vec![bar]), &observed)
            .await
            .unwrap();
        assert_eq!(fx.http.urls(), vec!["http://foo:8080/bar"]);
        assert!(fx.runtime.stopped().is_empty());
    }

    #[tokio::test]
    async fn test_sync_pod_runs_pre_stop_before_replacement() {
        let fx = fixture();
        let observed = snapshot(&[
            ("A", "/k8s--bar.1234--foo.test"),
            ("B", "/k8s--net--foo.test--"),
        ]);
        let mut bar = container("bar");
        bar.lifecycle = Some(Lifecycle {
            post_start: None,
            pre_stop: Some(Handler {
                http_get: None,
                exec: Some(crate::pod::ExecAction {
                    command: vec!["cleanup".to_string()],
                }),
            }),
        });
        fx.syncer
            .sync_pod(&pod("foo", "test", vec![bar]), &observed)
            .await
            .unwrap();

        let runs = fx.runner.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, "A");
        assert_eq!(fx.runtime.stopped(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_sync_pod_continues_past_failed_container() {
        // The first container's image pull fails; the second still starts.
        let fx = fixture();
        fx.puller.set_error("registry unavailable");
        let observed = snapshot(&[("9876", "/k8s--net--foo.test--")]);
        let err = fx
            .syncer
            .sync_pod(
                &pod("foo", "test", vec![container("bar"), container("baz")]),
                &observed,
            )
            .await
            .unwrap_err();

        match err {
            AgentError::Aggregate(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected aggregate error, got {other}"),
        }
        // Both containers were attempted.
        assert_eq!(fx.puller.pulled(), vec!["busybox", "busybox"]);
    }

    #[test]
    fn test_make_environment_variables() {
        let spec = ContainerSpec {
            env: vec![
                EnvVar {
                    name: "foo".to_string(),
                    value: "bar".to_string(),
                },
                EnvVar {
                    name: "baz".to_string(),
                    value: "blah".to_string(),
                },
            ],
            ..Default::default()
        };
        assert_eq!(make_environment_variables(&spec), vec!["foo=bar", "baz=blah"]);
    }

    #[test]
    fn test_make_binds() {
        let spec = ContainerSpec {
            volume_mounts: vec![
                VolumeMount {
                    name: "disk".to_string(),
                    mount_path: "/mnt/path".to_string(),
                    read_only: false,
                },
                VolumeMount {
                    name: "disk".to_string(),
                    mount_path: "/mnt/path3".to_string(),
                    read_only: true,
                },
                VolumeMount {
                    name: "disk4".to_string(),
                    mount_path: "/mnt/path4".to_string(),
                    read_only: false,
                },
                VolumeMount {
                    name: "disk5".to_string(),
                    mount_path: "/mnt/path5".to_string(),
                    read_only: false,
                },
            ],
            ..Default::default()
        };

        let mut volumes = VolumeMap::new();
        volumes.insert(
            "disk".to_string(),
            crate::volumes::VolumePlugin::HostDirectory {
                path: "/mnt/disk".into(),
            },
        );
        volumes.insert(
            "disk4".to_string(),
            crate::volumes::VolumePlugin::HostDirectory {
                path: "/mnt/host".into(),
            },
        );
        volumes.insert(
            "disk5".to_string(),
            crate::volumes::VolumePlugin::EmptyDirectory {
                name: "disk5".to_string(),
                pod_uid: "podID".to_string(),
                root_dir: "/var/lib/stevedore".into(),
            },
        );

        assert_eq!(
            make_binds(&spec, &volumes),
            vec![
                "/mnt/disk:/mnt/path",
                "/mnt/disk:/mnt/path3:ro",
                "/mnt/host:/mnt/path4",
                "/var/lib/stevedore/podID/volumes/empty/disk5:/mnt/path5",
            ]
        );
    }

    #[test]
    fn test_make_binds_skips_undeclared_volume() {
        let spec = ContainerSpec {
            volume_mounts: vec![VolumeMount {
                name: "missing".to_string(),
                mount_path: "/mnt/path".to_string(),
                read_only: false,
            }],
            ..Default::default()
        };
        assert!(make_binds(&spec, &VolumeMap::new()).is_empty());
    }

    #[test]
    fn test_make_ports_and_bindings() {
        let ports = vec![
            PortSpec {
                container_port: 80,
                host_port: 8080,
                host_ip: "127.0.0.1".to_string(),
                protocol: String::new(),
            },
            PortSpec {
                container_port: 443,
                host_port: 443,
                host_ip: String::new(),
                protocol: "tcp".to_string(),
            },
            PortSpec {
                container_port: 444,
                host_port: 444,
                host_ip: String::new(),
                protocol: "udp".to_string(),
            },
            PortSpec {
                container_port: 445,
                host_port: 445,
                host_ip: String::new(),
                protocol: "foobar".to_string(),
            },
        ];
        let (exposed, bindings) = make_ports_and_bindings(&ports);

        assert_eq!(exposed, vec!["80/tcp", "443/tcp", "444/udp", "445/tcp"]);
        assert_eq!(bindings.len(), 4);
        assert_eq!(
            bindings["80/tcp"],
            vec![PortBinding {
                host_port: "8080".to_string(),
                host_ip: "127.0.0.1".to_string(),
            }]
        );
        assert_eq!(bindings["444/udp"][0].host_port, "444");
        assert_eq!(bindings["445/tcp"][0].host_port, "445");
    }

    #[test]
    fn test_unbound_port_is_exposed_without_binding() {
        let ports = vec![PortSpec {
            container_port: 80,
            host_port: 0,
            host_ip: String::new(),
            protocol: String::new(),
        }];
        let (exposed, bindings) = make_ports_and_bindings(&ports);
        assert_eq!(exposed, vec!["80/tcp"]);
        assert!(bindings.is_empty());
    }

    #[tokio::test]
    async fn test_sync_pod_materializes_volume_binds() {
        let fx = fixture();
        let root = tempfile::tempdir().unwrap();
        let syncer = PodSyncer::new(
            fx.runtime.clone(),
            fx.puller.clone(),
            fx.http.clone(),
            fx.runner.clone(),
            Arc::new(AlwaysHealthy),
            &Config {
                root_dir: root.path().to_path_buf(),
                ..test_config()
            },
        );

        let mut bar = container("bar");
        bar.volume_mounts = vec![VolumeMount {
            name: "data".to_string(),
            mount_path: "/data".to_string(),
            read_only: false,
        }];
        let mut pod = pod("foo", "test", vec![bar]);
        pod.manifest.uuid = "pod-uid".to_string();
        pod.manifest.volumes = vec![Volume {
            name: "data".to_string(),
            source: Some(VolumeSource::EmptyDirectory {}),
        }];

        let observed = snapshot(&[("9876", "/k8s--net--foo.test--")]);
        syncer.sync_pod(&pod, &observed).await.unwrap();

        assert!(root.path().join("pod-uid/volumes/empty/data").is_dir());
    }
}
