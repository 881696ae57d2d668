//! Stevedore node agent library.
//!
//! The agent runs on each cluster worker and continuously converges the
//! local container runtime toward a declarative set of pod specifications
//! delivered by one or more configuration sources.
//!
//! ## Architecture
//!
//! ```text
//! FileSource ─┐
//! HTTP source ─┼─> SourceMux ──snapshots──> NodeAgent::run
//! etcd source ─┘                               │
//!                                   filter_host_port_conflicts
//!                                               │
//!                                          PodWorkers ──(per pod, coalesced)──> PodSyncer
//!                                               │                                  │
//!                                      ContainerRuntime <──── naming codec ────────┘
//! ```
//!
//! Identity lives in container names: the naming codec binds every runtime
//! container to a `(pod, container, spec-hash, attempt)` tuple, and every
//! matching decision in the reconciler goes through it. Containers whose
//! names do not decode are foreign and never touched.
//!
//! ## Modules
//!
//! - `naming`: container identity codec and spec fingerprint
//! - `runtime`: container runtime capability traits and the pod-scoped index
//! - `workers`: per-pod serializer with latest-wins coalescing
//! - `sync`: the per-pod reconciliation engine
//! - `agent`: snapshot-level sync, admission filter, information endpoints
//! - `sources`: source multiplexer and the file source

pub mod agent;
pub mod config;
pub mod error;
pub mod health;
pub mod hooks;
pub mod naming;
pub mod pod;
pub mod runtime;
pub mod sources;
pub mod stats;
pub mod sync;
pub mod volumes;
pub mod workers;

// Re-export commonly used types
pub use agent::{filter_host_port_conflicts, NodeAgent};
pub use config::Config;
pub use error::AgentError;
pub use pod::{Pod, PodUpdate, UpdateOp};
pub use runtime::{ContainerRuntime, FakePuller, FakeRuntime, ImagePuller};
pub use sources::{FileSource, SourceMux};
pub use sync::PodSyncer;
