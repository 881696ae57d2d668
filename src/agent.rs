//! Snapshot-level reconciliation and information endpoints.
//!
//! `NodeAgent` receives full pod-set snapshots from the source multiplexer
//! and converges the node: each admitted pod is dispatched to its worker
//! (which runs the `PodSyncer`), then managed containers belonging to no
//! desired pod are stopped. The agent also answers stats and exec requests
//! by resolving pod/container names to runtime containers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::AgentError;
use crate::health::HealthChecker;
use crate::hooks::{CommandRunner, HttpGetter};
use crate::naming::SANDBOX_CONTAINER_NAME;
use crate::pod::Pod;
use crate::runtime::{ContainerIndex, ContainerRuntime, ImagePuller, RuntimeContainer};
use crate::stats::{
    container_stats_path, ContainerStats, MachineStats, StatsProvider, StatsRequest,
    ROOT_STATS_PATH,
};
use crate::sync::{PodSyncer, PodWork};
use crate::workers::{PodWorkers, WorkHandler};

/// The node agent: converges local container state to desired pod sets.
pub struct NodeAgent {
    runtime: Arc<dyn ContainerRuntime>,
    runner: Arc<dyn CommandRunner>,
    stats: Option<Arc<dyn StatsProvider>>,
    workers: PodWorkers<PodWork>,
    stop_grace: Duration,
    sync_interval: Duration,
}

impl NodeAgent {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        puller: Arc<dyn ImagePuller>,
        http: Arc<dyn HttpGetter>,
        runner: Arc<dyn CommandRunner>,
        health: Arc<dyn HealthChecker>,
        stats: Option<Arc<dyn StatsProvider>>,
        config: &Config,
    ) -> Self {
        let syncer = Arc::new(PodSyncer::new(
            Arc::clone(&runtime),
            puller,
            http,
            Arc::clone(&runner),
            health,
            config,
        ));
        let workers = PodWorkers::new(syncer as Arc<dyn WorkHandler<PodWork>>);
        Self {
            runtime,
            runner,
            stats,
            workers,
            stop_grace: config.stop_grace(),
            sync_interval: config.sync_interval(),
        }
    }

    /// Converge the node to one desired pod-set snapshot.
    ///
    /// Pods losing the host-port admission filter are dropped from this
    /// snapshot only; sources will re-deliver them. Per-pod work runs on the
    /// worker pool, so this returns once dispatch and the orphan sweep are
    /// done, not once every pod has converged.
    pub async fn sync_pods(&self, desired: &[Pod]) -> Result<(), AgentError> {
        let desired = filter_host_port_conflicts(desired);
        debug!(pods = desired.len(), "syncing desired pod set");

        let index = Arc::new(ContainerIndex::new(self.runtime.list().await?));

        let mut desired_containers: HashSet<(String, String)> = HashSet::new();
        for pod in &desired {
            let full_name = pod.full_name();
            desired_containers.insert((full_name.clone(), SANDBOX_CONTAINER_NAME.to_string()));
            for container in &pod.manifest.containers {
                desired_containers.insert((full_name.clone(), container.name.clone()));
            }
            self.workers.update(
                &full_name,
                PodWork {
                    pod: pod.clone(),
                    containers: Arc::clone(&index),
                },
            );
        }

        // Stop managed containers that no desired pod accounts for. Foreign
        // containers never decode, so they never show up here.
        let current = ContainerIndex::new(self.runtime.list().await?);
        let mut victims: Vec<_> = current
            .iter()
            .filter(|(_, parsed)| {
                !desired_containers.contains(&(
                    parsed.pod_full_name.clone(),
                    parsed.container_name.clone(),
                ))
            })
            .collect();
        // Application containers go before the sandbox that holds their
        // network namespace.
        victims.sort_by_key(|(_, parsed)| parsed.is_sandbox());

        let mut errors = Vec::new();
        for (container, parsed) in victims {
            info!(
                pod = %parsed.pod_full_name,
                container = %parsed.container_name,
                id = %container.id,
                "stopping orphaned container"
            );
            if let Err(e) = self.runtime.stop(&container.id, self.stop_grace).await {
                warn!(id = %container.id, error = %e, "failed to stop container");
                errors.push(e);
            }
        }
        AgentError::aggregate(errors)
    }

    /// Run until shutdown: apply every snapshot from `updates` and re-apply
    /// the last one on the sync interval, then drain the worker pool.
    pub async fn run(&self, mut updates: mpsc::Receiver<Vec<Pod>>, mut shutdown: watch::Receiver<bool>) {
        info!(
            sync_interval_secs = self.sync_interval.as_secs(),
            "starting reconciliation loop"
        );
        let mut interval = tokio::time::interval(self.sync_interval);
        let mut last_snapshot: Vec<Pod> = Vec::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reconciliation loop received shutdown signal");
                        break;
                    }
                }

                snapshot = updates.recv() => {
                    match snapshot {
                        Some(snapshot) => {
                            last_snapshot = snapshot;
                            if let Err(e) = self.sync_pods(&last_snapshot).await {
                                error!(error = %e, "snapshot sync failed");
                            }
                        }
                        None => {
                            info!("snapshot channel closed, stopping");
                            break;
                        }
                    }
                }

                _ = interval.tick() => {
                    if let Err(e) = self.sync_pods(&last_snapshot).await {
                        error!(error = %e, "periodic re-sync failed");
                    }
                }
            }
        }

        info!("draining pod workers");
        self.workers.drain().await;
    }

    /// Wait for every in-flight pod worker to finish. For tests and shutdown.
    pub async fn drain_workers(&self) {
        self.workers.drain().await;
    }

    /// Resolve a pod's container to its runtime container.
    async fn find_container(
        &self,
        pod_full_name: &str,
        uid: &str,
        container_name: &str,
    ) -> Result<RuntimeContainer, AgentError> {
        let index = ContainerIndex::new(self.runtime.list().await?);
        index
            .find_pod_container(pod_full_name, uid, container_name)
            .map(|(container, _)| container.clone())
            .ok_or_else(|| AgentError::NotFound {
                pod: pod_full_name.to_string(),
                container: container_name.to_string(),
            })
    }

    /// Stats for one container of a resident pod. `Ok(None)` when no stats
    /// provider is configured; not-found when the container is not resident.
    pub async fn get_container_info(
        &self,
        pod_full_name: &str,
        uid: &str,
        container_name: &str,
        req: &StatsRequest,
    ) -> Result<Option<ContainerStats>, AgentError> {
        let Some(stats) = &self.stats else {
            debug!("no stats provider configured");
            return Ok(None);
        };
        let container = self.find_container(pod_full_name, uid, container_name).await?;
        let info = stats
            .container_info(&container_stats_path(&container.id), req)
            .await?;
        Ok(Some(info))
    }

    /// Machine-wide stats under the fixed root path.
    pub async fn get_root_info(&self, req: &StatsRequest) -> Result<Option<ContainerStats>, AgentError> {
        let Some(stats) = &self.stats else {
            return Ok(None);
        };
        let info = stats.container_info(ROOT_STATS_PATH, req).await?;
        Ok(Some(info))
    }

    pub async fn get_machine_info(&self) -> Result<Option<MachineStats>, AgentError> {
        let Some(stats) = &self.stats else {
            return Ok(None);
        };
        let info = stats.machine_info().await?;
        Ok(Some(info))
    }

    /// Run a command inside a resident pod's container.
    pub async fn run_in_container(
        &self,
        pod_full_name: &str,
        uid: &str,
        container_name: &str,
        command: &[String],
    ) -> Result<Vec<u8>, AgentError> {
        let container = self.find_container(pod_full_name, uid, container_name).await?;
        self.runner.run_in_container(&container.id, command).await
    }
}

/// Drop pods whose host ports collide with an earlier pod in the snapshot.
///
/// Earlier pods win; later conflicting pods are dropped until their sources
/// re-emit them. Unbound ports (host port 0) never conflict.
pub fn filter_host_port_conflicts(pods: &[Pod]) -> Vec<Pod> {
    let mut filtered = Vec::with_capacity(pods.len());
    let mut bound: HashSet<u16> = HashSet::new();
    for pod in pods {
        let ports: Vec<u16> = pod
            .manifest
            .containers
            .iter()
            .flat_map(|c| c.ports.iter())
            .map(|p| p.host_port)
            .filter(|p| *p != 0)
            .collect();
        if ports.iter().any(|p| bound.contains(p)) {
            warn!(pod = %pod.full_name(), "host port conflict, dropping pod from snapshot");
            continue;
        }
        bound.extend(ports);
        filtered.push(pod.clone());
    }
    filtered
}
