//! Error types for the node agent.
//!
//! Individual container failures never abort the enclosing pod sync, and
//! pod failures never abort the enclosing snapshot sync. Errors are collected
//! and surfaced as an aggregate summary instead.

use thiserror::Error;

/// Errors surfaced by the node agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Transient container runtime failure.
    #[error("runtime: {0}")]
    Runtime(String),

    /// HTTP capability failure (lifecycle hooks, probes).
    #[error("http: {0}")]
    Http(String),

    /// No runtime container matches the requested pod/container.
    #[error("container {container:?} not found in pod {pod:?}")]
    NotFound { pod: String, container: String },

    /// A lifecycle handler reported failure.
    #[error("{hook} handler for container {container:?} failed: {reason}")]
    Handler {
        hook: &'static str,
        container: String,
        reason: String,
    },

    /// Volume host paths could not be materialized.
    #[error("volume setup: {0}")]
    Volume(#[from] std::io::Error),

    /// Image pull failure.
    #[error("pull of {image:?} failed: {reason}")]
    Pull { image: String, reason: String },

    /// Several errors from one sync pass rolled into a summary.
    #[error("{} error(s) during sync: {}", .0.len(), summarize(.0))]
    Aggregate(Vec<AgentError>),
}

impl AgentError {
    /// Fold a list of errors into a single result. Empty list means success.
    pub fn aggregate(errors: Vec<AgentError>) -> Result<(), AgentError> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AgentError::Aggregate(errors))
        }
    }
}

fn summarize(errors: &[AgentError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
