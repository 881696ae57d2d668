//! Configuration sources and the source multiplexer.
//!
//! Each named source delivers `PodUpdate` records over a channel; the
//! multiplexer keeps the last known pod list per source and emits the merged
//! union as a full snapshot after every mutation. Pods duplicated across
//! sources resolve by static source priority.
//!
//! The transport behind a source is its own business; `FileSource` is the
//! stock one, polling a JSON manifest file on disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::pod::{Pod, PodUpdate, UpdateOp};

/// Namespace assigned to pods whose source does not set one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Merges per-source pod lists into full snapshots.
pub struct SourceMux {
    updates: mpsc::Receiver<PodUpdate>,
    snapshots: mpsc::Sender<Vec<Pod>>,

    /// Last known pod list per source.
    sources: HashMap<String, Vec<Pod>>,

    /// Source names in priority order: configured names first, then others
    /// in order of first appearance.
    order: Vec<String>,
}

impl SourceMux {
    /// Build a multiplexer plus its input and output channel ends.
    pub fn new(
        priority: Vec<String>,
        capacity: usize,
    ) -> (mpsc::Sender<PodUpdate>, mpsc::Receiver<Vec<Pod>>, SourceMux) {
        let (updates_tx, updates_rx) = mpsc::channel(capacity);
        let (snapshots_tx, snapshots_rx) = mpsc::channel(capacity);
        let mux = SourceMux {
            updates: updates_rx,
            snapshots: snapshots_tx,
            sources: HashMap::new(),
            order: priority,
        };
        (updates_tx, snapshots_rx, mux)
    }

    /// Consume updates until every sender is dropped or the snapshot
    /// receiver goes away.
    pub async fn run(mut self) {
        while let Some(update) = self.updates.recv().await {
            self.apply(update);
            let snapshot = self.snapshot();
            debug!(pods = snapshot.len(), "emitting pod snapshot");
            if self.snapshots.send(snapshot).await.is_err() {
                info!("snapshot receiver dropped, stopping source mux");
                break;
            }
        }
    }

    fn apply(&mut self, update: PodUpdate) {
        if !self.order.iter().any(|s| s == &update.source) {
            self.order.push(update.source.clone());
        }
        let pods = normalize_pods(update.pods, &update.source);
        let slot = self.sources.entry(update.source.clone()).or_default();

        match update.op {
            UpdateOp::Set => {
                debug!(source = %update.source, pods = pods.len(), "source set");
                *slot = pods;
            }
            UpdateOp::Update => {
                debug!(source = %update.source, pods = pods.len(), "source update");
                for pod in pods {
                    match slot.iter_mut().find(|p| p.full_name() == pod.full_name()) {
                        Some(existing) => *existing = pod,
                        None => slot.push(pod),
                    }
                }
            }
            UpdateOp::Remove => {
                debug!(source = %update.source, pods = pods.len(), "source remove");
                for pod in pods {
                    slot.retain(|p| p.full_name() != pod.full_name());
                }
            }
        }
    }

    /// The merged union of all sources, higher-priority sources first.
    fn snapshot(&self) -> Vec<Pod> {
        let mut seen = std::collections::HashSet::new();
        let mut merged = Vec::new();
        for source in &self.order {
            let Some(pods) = self.sources.get(source) else {
                continue;
            };
            for pod in pods {
                if seen.insert(pod.full_name()) {
                    merged.push(pod.clone());
                } else {
                    warn!(
                        pod = %pod.full_name(),
                        source = %source,
                        "duplicate pod from lower-priority source, dropping"
                    );
                }
            }
        }
        merged
    }
}

/// Apply source-level defaults and drop pods without a usable identity.
fn normalize_pods(pods: Vec<Pod>, source: &str) -> Vec<Pod> {
    pods.into_iter()
        .filter_map(|mut pod| {
            if pod.name.is_empty() {
                pod.name = pod.manifest.id.clone();
            }
            if pod.name.is_empty() {
                warn!(source, "pod without name or manifest id, dropping");
                return None;
            }
            if pod.namespace.is_empty() {
                pod.namespace = DEFAULT_NAMESPACE.to_string();
            }
            Some(pod)
        })
        .collect()
}

/// Source that polls a JSON file of pod manifests.
///
/// The file holds a JSON array of pods. Every change (and the first read)
/// is delivered as a `Set` for this source; a missing file means an empty
/// pod set, while an unreadable one is skipped until it heals.
pub struct FileSource {
    name: String,
    path: PathBuf,
    poll_interval: Duration,
    updates: mpsc::Sender<PodUpdate>,
}

impl FileSource {
    pub fn new(
        name: impl Into<String>,
        path: PathBuf,
        poll_interval: Duration,
        updates: mpsc::Sender<PodUpdate>,
    ) -> Self {
        Self {
            name: name.into(),
            path,
            poll_interval,
            updates,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(source = %self.name, path = %self.path.display(), "starting file source");
        let mut interval = tokio::time::interval(self.poll_interval);
        let mut last_sent: Option<Vec<Pod>> = None;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(source = %self.name, "file source shutting down");
                        break;
                    }
                }

                _ = interval.tick() => {
                    let Some(pods) = self.read_manifests().await else {
                        continue;
                    };
                    if last_sent.as_ref() == Some(&pods) {
                        continue;
                    }
                    let update = PodUpdate {
                        op: UpdateOp::Set,
                        source: self.name.clone(),
                        pods: pods.clone(),
                    };
                    if self.updates.send(update).await.is_err() {
                        info!(source = %self.name, "update channel closed, stopping");
                        break;
                    }
                    last_sent = Some(pods);
                }
            }
        }
    }

    async fn read_manifests(&self) -> Option<Vec<Pod>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(pods) => Some(pods),
                Err(e) => {
                    warn!(
                        source = %self.name,
                        path = %self.path.display(),
                        error = %e,
                        "unparseable manifest file, skipping"
                    );
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Some(Vec::new()),
            Err(e) => {
                warn!(
                    source = %self.name,
                    path = %self.path.display(),
                    error = %e,
                    "failed to read manifest file, skipping"
                );
                None
            }
        }
    }
}
