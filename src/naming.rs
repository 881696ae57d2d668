//! Container naming codec.
//!
//! Every runtime container the agent owns carries its identity in its name:
//! which pod it belongs to, which container spec produced it, and a
//! fingerprint of that spec. The canonical emitted form is
//!
//! ```text
//! k8s_<container-name>.<hash>_<pod-full-name>_<attempt>
//! ```
//!
//! where `<hash>` is the lowercase-hex spec fingerprint (omitted for the
//! network sandbox) and `<attempt>` is a random token that keeps retries
//! distinct. The decoder additionally accepts the older dash-delimited form
//!
//! ```text
//! /k8s--<container-name>[.<hash>]--<pod-full-name>[--<uid>][--<attempt>]
//! ```
//!
//! Decoding is total: any name that does not parse belongs to a foreign
//! container and yields `None`. Foreign containers are invisible to
//! reconciliation and are never stopped.

use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::pod::ContainerSpec;

/// Prefix marking a container as managed by this agent.
pub const CONTAINER_NAME_PREFIX: &str = "k8s";

/// Reserved container name for the pod's network sandbox.
pub const SANDBOX_CONTAINER_NAME: &str = "net";

/// Alternate sandbox name accepted on decode.
const SANDBOX_CONTAINER_NAME_ALT: &str = "POD";

/// Identity decoded from a managed container name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedContainerName {
    pub container_name: String,
    pub pod_full_name: String,

    /// Spec fingerprint embedded in the name; 0 when the name carries none.
    pub hash: u64,

    /// Pod uid segment, present only in the five-segment legacy form.
    pub pod_uid: Option<String>,

    /// Random attempt token, when present.
    pub attempt: Option<String>,
}

impl ParsedContainerName {
    /// True when this name identifies the pod's network sandbox.
    pub fn is_sandbox(&self) -> bool {
        self.container_name == SANDBOX_CONTAINER_NAME
            || self.container_name == SANDBOX_CONTAINER_NAME_ALT
    }
}

/// Encode a container identity. A `hash` of 0 (the sandbox) omits the hash
/// segment. `attempt` is caller-supplied so retries stay distinct and tests
/// stay deterministic.
pub fn encode_container_name(
    container_name: &str,
    pod_full_name: &str,
    hash: u64,
    attempt: &str,
) -> String {
    if hash != 0 {
        format!("{CONTAINER_NAME_PREFIX}_{container_name}.{hash:x}_{pod_full_name}_{attempt}")
    } else {
        format!("{CONTAINER_NAME_PREFIX}_{container_name}_{pod_full_name}_{attempt}")
    }
}

/// Fresh random attempt token for an encoded name.
pub fn random_attempt() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Decode a runtime container name. Returns `None` for foreign containers.
pub fn parse_container_name(name: &str) -> Option<ParsedContainerName> {
    let name = name.strip_prefix('/').unwrap_or(name);

    let parts: Vec<&str> = if name.starts_with("k8s--") {
        name.split("--").collect()
    } else if name.starts_with("k8s_") {
        name.split('_').collect()
    } else {
        return None;
    };

    if parts.len() < 3 || parts[0] != CONTAINER_NAME_PREFIX {
        return None;
    }

    let (container_name, hash) = split_name_and_hash(parts[1]);
    if container_name.is_empty() || parts[2].is_empty() {
        return None;
    }

    let segment = |ix: usize| parts.get(ix).filter(|s| !s.is_empty()).map(|s| s.to_string());
    let (pod_uid, attempt) = if parts.len() >= 5 {
        (segment(3), segment(4))
    } else {
        (None, segment(3))
    };

    Some(ParsedContainerName {
        container_name,
        pod_full_name: parts[2].to_string(),
        hash,
        pod_uid,
        attempt,
    })
}

/// Split `name[.hash]` into its parts. Container names are DNS labels and
/// never contain a dot, so any dot introduces the hash segment.
fn split_name_and_hash(segment: &str) -> (String, u64) {
    match segment.split_once('.') {
        Some((name, hex)) => {
            let hash = u64::from_str_radix(hex, 16).unwrap_or_else(|_| {
                warn!(segment, "invalid hash in container name, treating as unhashed");
                0
            });
            (name.to_string(), hash)
        }
        None => (segment.to_string(), 0),
    }
}

/// Deterministic 64-bit fingerprint of a container spec.
///
/// Hashed over a canonical JSON rendering (sorted keys, no whitespace) so
/// that any semantic change to the spec changes the value, while field order
/// in the source document does not.
pub fn hash_container_spec(spec: &ContainerSpec) -> u64 {
    let value = serde_json::to_value(spec).expect("container spec serializes to JSON");
    let digest = Sha256::digest(canonical_json(&value).as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("sha256 digest is 32 bytes"))
}

fn canonical_json(value: &serde_json::Value) -> String {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        // Scalars already serialize canonically.
        other => other.to_string(),
    }
}
