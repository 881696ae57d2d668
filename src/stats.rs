//! Resource stats capability.
//!
//! Stats come from an external provider keyed on runtime container paths
//! (the agent only resolves pod/container names down to a runtime id). The
//! agent's information endpoints in `agent` are thin wrappers over this.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Parameters for a stats query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsRequest {
    /// Number of recent samples to return.
    pub num_samples: usize,
}

/// Usage samples for one container path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    /// Provider-side container path the samples belong to.
    pub path: String,

    #[serde(default)]
    pub samples: Vec<serde_json::Value>,
}

/// Machine capacity summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineStats {
    pub num_cores: u32,
    pub memory_capacity_bytes: u64,
}

/// External stats provider (cadvisor-style).
#[async_trait]
pub trait StatsProvider: Send + Sync {
    async fn container_info(
        &self,
        path: &str,
        req: &StatsRequest,
    ) -> Result<ContainerStats, AgentError>;

    async fn machine_info(&self) -> Result<MachineStats, AgentError>;
}

/// Provider path for a runtime container id.
pub fn container_stats_path(container_id: &str) -> String {
    format!("/containers/{container_id}")
}

/// Provider path covering the whole machine.
pub const ROOT_STATS_PATH: &str = "/";
