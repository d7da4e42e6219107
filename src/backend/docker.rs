//! Local container backend - drives the docker CLI
//!
//! Each job gets a scratch directory mounted at `/workdir` inside the
//! container. The image's `runbody` entrypoint reads `/workdir/inputs.json`,
//! runs the named body, and writes `/workdir/outputs.json`. Scratch
//! directories are kept for the life of the backend so artifacts of finished
//! jobs stay fetchable during materialization.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

use crate::error::ChemflowError;
use crate::graph::{ArtifactRef, OutputBundle};

use super::{decode_outputs, Backend, BackendKind, JobHandle, JobRequest};

struct DockerJob {
    dir: TempDir,
    child: Option<tokio::process::Child>,
}

/// Backend that runs each body in a local container
pub struct DockerBackend {
    jobs: Mutex<HashMap<String, DockerJob>>,
    next_id: AtomicU64,
}

impl DockerBackend {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl Default for DockerBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for DockerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Docker
    }

    async fn submit(&self, request: JobRequest) -> Result<JobHandle, ChemflowError> {
        let id = format!("docker-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let dir = TempDir::new()?;

        let inputs = serde_json::to_vec_pretty(&request.inputs_json())?;
        tokio::fs::write(dir.path().join("inputs.json"), inputs).await?;

        debug!(job = %id, image = %request.image, body = %request.body, "submitting docker job");
        let child = Command::new("docker")
            .arg("run")
            .arg("--rm")
            .arg("-v")
            .arg(format!("{}:/workdir", dir.path().display()))
            .arg(&request.image)
            .arg("runbody")
            .arg(&request.body)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| ChemflowError::Backend(format!("failed to start docker: {e}")))?;

        self.jobs
            .lock()
            .expect("docker jobs lock poisoned")
            .insert(id.clone(), DockerJob { dir, child: Some(child) });
        Ok(JobHandle { id })
    }

    async fn wait(&self, handle: &JobHandle) -> Result<OutputBundle, ChemflowError> {
        let child = {
            let mut jobs = self.jobs.lock().expect("docker jobs lock poisoned");
            let job = jobs.get_mut(&handle.id).ok_or_else(|| {
                ChemflowError::Backend(format!("unknown docker job '{}'", handle.id))
            })?;
            job.child.take().ok_or_else(|| {
                ChemflowError::Backend(format!("docker job '{}' already waited", handle.id))
            })?
        };

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ChemflowError::Backend(format!("docker wait failed: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ChemflowError::Backend(format!(
                "container exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let outputs_path = {
            let jobs = self.jobs.lock().expect("docker jobs lock poisoned");
            jobs[&handle.id].dir.path().join("outputs.json")
        };
        let raw = tokio::fs::read(&outputs_path).await.map_err(|_| {
            ChemflowError::Backend(format!(
                "job '{}' finished without writing outputs.json",
                handle.id
            ))
        })?;
        decode_outputs(&handle.id, serde_json::from_slice(&raw)?)
    }

    async fn fetch_artifact(
        &self,
        artifact: &ArtifactRef,
        dest: &Path,
    ) -> Result<(), ChemflowError> {
        let src = {
            let jobs = self.jobs.lock().expect("docker jobs lock poisoned");
            let job = jobs.get(&artifact.job_id).ok_or_else(|| {
                ChemflowError::Backend(format!(
                    "artifact references unknown job '{}'",
                    artifact.job_id
                ))
            })?;
            job.dir.path().join(&artifact.name)
        };
        tokio::fs::copy(&src, dest).await?;
        Ok(())
    }
}
