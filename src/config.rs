//! Agent configuration, loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::runtime::PullPolicy;

/// Default image for the network sandbox container.
const DEFAULT_SANDBOX_IMAGE: &str = "ghcr.io/stevedore/pause:0.1";

#[derive(Debug, Clone)]
pub struct Config {
    /// Root for agent-managed state (ephemeral volume directories).
    pub root_dir: PathBuf,

    /// Path the file source watches for pod manifests.
    pub manifest_path: PathBuf,

    /// Source names in priority order for duplicate-pod resolution.
    pub source_priority: Vec<String>,

    /// Seconds between full re-syncs of the last snapshot.
    pub sync_interval_secs: u64,

    /// Grace timeout passed to container stops, in seconds.
    pub stop_grace_secs: u64,

    /// Image used for network sandbox containers.
    pub sandbox_image: String,

    pub pull_policy: PullPolicy,

    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let root_dir = std::env::var("STEVEDORE_ROOT_DIR")
            .unwrap_or_else(|_| "/var/lib/stevedore".to_string())
            .into();

        let manifest_path = std::env::var("STEVEDORE_MANIFEST_PATH")
            .unwrap_or_else(|_| "/etc/stevedore/manifests.json".to_string())
            .into();

        let source_priority = std::env::var("STEVEDORE_SOURCE_PRIORITY")
            .unwrap_or_else(|_| "file".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let sync_interval_secs = std::env::var("STEVEDORE_SYNC_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let stop_grace_secs = std::env::var("STEVEDORE_STOP_GRACE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let sandbox_image = std::env::var("STEVEDORE_SANDBOX_IMAGE")
            .unwrap_or_else(|_| DEFAULT_SANDBOX_IMAGE.to_string());

        let pull_policy = match std::env::var("STEVEDORE_PULL_POLICY").as_deref() {
            Ok("always") => PullPolicy::Always,
            Ok("never") => PullPolicy::Never,
            _ => PullPolicy::IfNotPresent,
        };

        let log_level = std::env::var("STEVEDORE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            root_dir,
            manifest_path,
            source_priority,
            sync_interval_secs,
            stop_grace_secs,
            sandbox_image,
            pull_policy,
            log_level,
        })
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        root_dir: PathBuf::from("/var/lib/stevedore-test"),
        manifest_path: PathBuf::from("/etc/stevedore/manifests.json"),
        source_priority: vec!["file".to_string()],
        sync_interval_secs: 10,
        stop_grace_secs: 10,
        sandbox_image: DEFAULT_SANDBOX_IMAGE.to_string(),
        pull_policy: PullPolicy::IfNotPresent,
        log_level: "info".to_string(),
    }
}
