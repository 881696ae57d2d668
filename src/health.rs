//! Container health checking.
//!
//! Health is a capability injected into the sync engine. The stock
//! implementation understands HTTP liveness probes; probe kinds it does not
//! recognize report `Unknown`, which the engine treats as healthy so that
//! an unconfigured prober can never restart-loop a pod.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::AgentError;
use crate::hooks::HttpGetter;
use crate::pod::{ContainerSpec, PodStatus};

/// Probe kind handled by `HttpProbeChecker`.
pub const PROBE_KIND_HTTP: &str = "http";

/// Outcome of one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// No verdict; callers must not act on it.
    Unknown,
}

/// Health check capability.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn health_check(
        &self,
        pod_full_name: &str,
        status: &PodStatus,
        container: &ContainerSpec,
    ) -> Result<HealthStatus, AgentError>;
}

/// Checker that probes HTTP liveness endpoints via the injected getter.
///
/// Containers without a liveness probe are healthy by definition. An HTTP
/// probe whose host is unset targets the pod IP learned from the sandbox.
pub struct HttpProbeChecker {
    http: Arc<dyn HttpGetter>,
}

impl HttpProbeChecker {
    pub fn new(http: Arc<dyn HttpGetter>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl HealthChecker for HttpProbeChecker {
    async fn health_check(
        &self,
        pod_full_name: &str,
        status: &PodStatus,
        container: &ContainerSpec,
    ) -> Result<HealthStatus, AgentError> {
        let Some(probe) = &container.liveness_probe else {
            return Ok(HealthStatus::Healthy);
        };
        if probe.kind != PROBE_KIND_HTTP {
            debug!(
                pod = %pod_full_name,
                container = %container.name,
                kind = %probe.kind,
                "no prober for probe kind"
            );
            return Ok(HealthStatus::Unknown);
        }
        let Some(action) = &probe.http_get else {
            return Ok(HealthStatus::Unknown);
        };

        let host = if action.host.is_empty() {
            match &status.pod_ip {
                Some(ip) => ip.clone(),
                None => return Ok(HealthStatus::Unknown),
            }
        } else {
            action.host.clone()
        };

        let url = format!("http://{}:{}/{}", host, action.port, action.path);
        match self.http.get(&url).await {
            Ok(code) if (200..400).contains(&code) => Ok(HealthStatus::Healthy),
            Ok(code) => {
                debug!(pod = %pod_full_name, container = %container.name, code, "liveness probe failed");
                Ok(HealthStatus::Unhealthy)
            }
            Err(e) => {
                debug!(
                    pod = %pod_full_name,
                    container = %container.name,
                    error = %e,
                    "liveness probe errored"
                );
                Ok(HealthStatus::Unhealthy)
            }
        }
    }
}
