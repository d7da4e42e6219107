//! In-process backend - runs registered body closures directly
//!
//! This is the `--here` execution mode and the test seam: tests register
//! whatever bodies a scenario needs without touching a container engine.
//! Only data-plumbing bodies ship in-process; the chemistry bodies exist
//! solely inside their container images.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ChemflowError;
use crate::graph::{ArtifactRef, OutputBundle};

use super::{decode_outputs, Backend, BackendKind, JobHandle, JobRequest};

/// A body takes its resolved inputs as a JSON object and returns the raw
/// output object (see the module docs in [`super`] for the value convention).
pub type BodyFn = Box<dyn Fn(&Value) -> Result<Value, ChemflowError> + Send + Sync>;

/// Named collection of in-process task bodies
#[derive(Default)]
pub struct BodyRegistry {
    bodies: HashMap<String, BodyFn>,
}

impl BodyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, body: F)
    where
        F: Fn(&Value) -> Result<Value, ChemflowError> + Send + Sync + 'static,
    {
        self.bodies.insert(name.into(), Box::new(body));
    }

    pub fn get(&self, name: &str) -> Option<&BodyFn> {
        self.bodies.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bodies.contains_key(name)
    }
}

/// Backend that executes bodies on the calling thread
pub struct InProcessBackend {
    registry: BodyRegistry,
    /// Submitted-but-not-awaited requests, keyed by job id
    pending: Mutex<BTreeMap<String, JobRequest>>,
    next_id: AtomicU64,
}

impl InProcessBackend {
    pub fn new(registry: BodyRegistry) -> Self {
        Self {
            registry,
            pending: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Backend preloaded with the bundled data-plumbing bodies
    pub fn with_builtin_bodies() -> Self {
        Self::new(crate::apps::builtin_bodies())
    }
}

#[async_trait]
impl Backend for InProcessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::InProcess
    }

    async fn submit(&self, request: JobRequest) -> Result<JobHandle, ChemflowError> {
        if !self.registry.contains(&request.body) {
            return Err(ChemflowError::UnknownBody {
                body: request.body.clone(),
                task: request.task.clone(),
            });
        }
        let id = format!("local-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.pending
            .lock()
            .expect("pending jobs lock poisoned")
            .insert(id.clone(), request);
        Ok(JobHandle { id })
    }

    async fn wait(&self, handle: &JobHandle) -> Result<OutputBundle, ChemflowError> {
        let request = self
            .pending
            .lock()
            .expect("pending jobs lock poisoned")
            .remove(&handle.id)
            .ok_or_else(|| {
                ChemflowError::Backend(format!("unknown in-process job '{}'", handle.id))
            })?;

        let body = self
            .registry
            .get(&request.body)
            .expect("registry checked at submit");
        let raw = body(&request.inputs_json()).map_err(|e| match e {
            err @ ChemflowError::TaskExecution { .. } => err,
            other => ChemflowError::TaskExecution {
                task: request.task.clone(),
                details: other.to_string(),
            },
        })?;
        decode_outputs(&handle.id, raw)
    }

    async fn fetch_artifact(
        &self,
        artifact: &ArtifactRef,
        dest: &Path,
    ) -> Result<(), ChemflowError> {
        // In-process artifacts are plain host paths
        tokio::fs::copy(&artifact.name, dest).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_backend() -> InProcessBackend {
        let mut registry = BodyRegistry::new();
        registry.register("echo", |inputs| Ok(inputs.clone()));
        registry.register("boom", |_| {
            Err(ChemflowError::Backend("kernel exploded".into()))
        });
        InProcessBackend::new(registry)
    }

    fn request(body: &str) -> JobRequest {
        JobRequest {
            task: "t".into(),
            body: body.into(),
            image: "img".into(),
            inputs: BTreeMap::from([(
                "greeting".to_string(),
                crate::graph::OutputValue::Text("hi".into()),
            )]),
        }
    }

    #[tokio::test]
    async fn runs_registered_body() {
        let backend = echo_backend();
        let handle = backend.submit(request("echo")).await.unwrap();
        let outputs = backend.wait(&handle).await.unwrap();
        assert_eq!(
            outputs["greeting"],
            crate::graph::OutputValue::Text("hi".into())
        );
    }

    #[tokio::test]
    async fn unknown_body_rejected_at_submit() {
        let backend = echo_backend();
        let err = backend.submit(request("nope")).await.unwrap_err();
        assert!(matches!(err, ChemflowError::UnknownBody { .. }));
    }

    #[tokio::test]
    async fn body_failure_becomes_task_execution_error() {
        let backend = echo_backend();
        let handle = backend.submit(request("boom")).await.unwrap();
        let err = backend.wait(&handle).await.unwrap_err();
        match err {
            ChemflowError::TaskExecution { task, details } => {
                assert_eq!(task, "t");
                assert!(details.contains("kernel exploded"));
            }
            other => panic!("expected TaskExecution, got {other}"),
        }
    }
}
