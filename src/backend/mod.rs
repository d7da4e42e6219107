//! # Backend abstraction
//!
//! Where a task body actually executes. The runner only ever talks to a
//! backend through the narrow submit/wait/fetch contract below:
//!
//! | Backend | Use case | Selected by |
//! |---------|----------|-------------|
//! | `InProcessBackend` | pure data-plumbing bodies, tests | `--here` |
//! | `DockerBackend` | local container engine | `--localdocker` |
//! | `RemoteBackend` | job-submission server | default (`$CHEMFLOW_SERVER`) |
//!
//! At most one job is in flight at a time under the serial runner; backends
//! may still be queried for artifacts of earlier jobs during materialization.
//!
//! Job output convention: a body produces a JSON object; string values become
//! textual outputs, `{"$artifact": "<filename>"}` marks a file left in the
//! job's working directory, anything else stays structured JSON.

mod docker;
mod local;
mod remote;

pub use docker::DockerBackend;
pub use local::{BodyFn, BodyRegistry, InProcessBackend};
pub use remote::RemoteBackend;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChemflowError;
use crate::graph::{ArtifactRef, OutputBundle, OutputValue};

// ============================================================================
// JOB TYPES
// ============================================================================

/// Which execution substrate a backend represents.
///
/// Recorded in checkpoints: task outputs may be backend-specific artifact
/// handles that are not portable across kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    InProcess,
    Docker,
    Remote,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::InProcess => write!(f, "in-process"),
            BackendKind::Docker => write!(f, "docker"),
            BackendKind::Remote => write!(f, "remote"),
        }
    }
}

/// Everything a backend needs to run one task body
#[derive(Debug, Clone, Serialize)]
pub struct JobRequest {
    /// Task name, for diagnostics and job labeling
    pub task: String,
    /// Opaque body id resolved inside the target image (or registry)
    pub body: String,
    /// Container image the body lives in
    pub image: String,
    /// Resolved input values, keyed by parameter name
    pub inputs: BTreeMap<String, OutputValue>,
}

impl JobRequest {
    /// Inputs as a plain JSON object (what the body sees)
    pub fn inputs_json(&self) -> Value {
        Value::Object(
            self.inputs
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

/// Opaque handle to a submitted job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
}

// ============================================================================
// BACKEND TRAIT
// ============================================================================

/// The pluggable execution substrate.
///
/// Implementations never mutate runner state; they only return results. The
/// connection itself is live and is deliberately excluded from checkpoints -
/// a restored run re-attaches a freshly constructed backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Substrate identity, checked on restart
    fn kind(&self) -> BackendKind;

    /// Start a job; returns immediately with a handle
    async fn submit(&self, request: JobRequest) -> Result<JobHandle, ChemflowError>;

    /// Block until the job finishes and return its output bundle
    async fn wait(&self, handle: &JobHandle) -> Result<OutputBundle, ChemflowError>;

    /// Pull a job-side file straight to a local path
    async fn fetch_artifact(
        &self,
        artifact: &ArtifactRef,
        dest: &Path,
    ) -> Result<(), ChemflowError>;
}

/// Decode a body's raw JSON output object into an [`OutputBundle`]
pub(crate) fn decode_outputs(job_id: &str, raw: Value) -> Result<OutputBundle, ChemflowError> {
    let Value::Object(map) = raw else {
        return Err(ChemflowError::Backend(format!(
            "job {job_id} produced a non-object output: {raw}"
        )));
    };

    let mut bundle = OutputBundle::new();
    for (field, value) in map {
        let decoded = match artifact_name(&value) {
            Some(name) => OutputValue::Artifact(ArtifactRef {
                job_id: job_id.to_string(),
                name: name.to_string(),
            }),
            None => OutputValue::from_json(value),
        };
        bundle.insert(field, decoded);
    }
    Ok(bundle)
}

fn artifact_name(value: &Value) -> Option<&str> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.get("$artifact")?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_outputs_classifies_values() {
        let raw = serde_json::json!({
            "pdbstring": "ATOM 1",
            "results": {"vde": 1.5},
            "archive": {"$artifact": "minsteps.tar.gz"},
        });
        let bundle = decode_outputs("job7", raw).unwrap();

        assert_eq!(bundle["pdbstring"], OutputValue::Text("ATOM 1".into()));
        assert_eq!(
            bundle["results"],
            OutputValue::Json(serde_json::json!({"vde": 1.5}))
        );
        assert_eq!(
            bundle["archive"],
            OutputValue::Artifact(ArtifactRef {
                job_id: "job7".into(),
                name: "minsteps.tar.gz".into(),
            })
        );
    }

    #[test]
    fn decode_outputs_rejects_non_object() {
        assert!(decode_outputs("j", serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn multi_key_object_is_not_an_artifact() {
        let raw = serde_json::json!({"x": {"$artifact": "f", "extra": 1}});
        let bundle = decode_outputs("j", raw).unwrap();
        assert!(matches!(bundle["x"], OutputValue::Json(_)));
    }
}
