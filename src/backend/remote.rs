//! Remote job-server backend
//!
//! Talks to a job-submission service over HTTP:
//! `POST /jobs` submits, `GET /jobs/{id}` polls, `GET /jobs/{id}/files/{name}`
//! streams artifacts. The server address comes from `$CHEMFLOW_SERVER`; when
//! unset, a documented default is used with a warning.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::ChemflowError;
use crate::graph::{ArtifactRef, OutputBundle};

use super::{decode_outputs, Backend, BackendKind, JobHandle, JobRequest};

/// Environment variable naming the job server
pub const SERVER_ENV: &str = "CHEMFLOW_SERVER";

/// Address used when `$CHEMFLOW_SERVER` is unset
pub const DEFAULT_SERVER: &str = "ccc.bionano.autodesk.com:9000";

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    outputs: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Backend that submits jobs to a remote compute service
pub struct RemoteBackend {
    client: reqwest::Client,
    base: Url,
}

impl RemoteBackend {
    /// Connect using `$CHEMFLOW_SERVER`, warning if the default is used
    pub fn from_env() -> Result<Self, ChemflowError> {
        let address = match std::env::var(SERVER_ENV) {
            Ok(addr) if !addr.is_empty() => addr,
            _ => {
                warn!(
                    "no job server set in ${SERVER_ENV}, using default '{DEFAULT_SERVER}'"
                );
                DEFAULT_SERVER.to_string()
            }
        };
        Self::new(&address)
    }

    pub fn new(address: &str) -> Result<Self, ChemflowError> {
        let with_scheme = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let base = Url::parse(&with_scheme)
            .map_err(|e| ChemflowError::Backend(format!("bad job server address: {e}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ChemflowError> {
        self.base
            .join(path)
            .map_err(|e| ChemflowError::Backend(format!("bad endpoint '{path}': {e}")))
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn submit(&self, request: JobRequest) -> Result<JobHandle, ChemflowError> {
        let payload = serde_json::json!({
            "task": request.task,
            "body": request.body,
            "image": request.image,
            "inputs": request.inputs_json(),
        });
        let response: SubmitResponse = self
            .client
            .post(self.endpoint("jobs")?)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(job = %response.id, task = %request.task, "submitted remote job");
        Ok(JobHandle { id: response.id })
    }

    async fn wait(&self, handle: &JobHandle) -> Result<OutputBundle, ChemflowError> {
        loop {
            let status: StatusResponse = self
                .client
                .get(self.endpoint(&format!("jobs/{}", handle.id))?)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            match status.status.as_str() {
                "finished" => {
                    let outputs = status.outputs.ok_or_else(|| {
                        ChemflowError::Backend(format!(
                            "job '{}' finished without outputs",
                            handle.id
                        ))
                    })?;
                    return decode_outputs(&handle.id, outputs);
                }
                "failed" => {
                    return Err(ChemflowError::Backend(format!(
                        "job '{}' failed: {}",
                        handle.id,
                        status.error.unwrap_or_else(|| "no error reported".into())
                    )));
                }
                "pending" | "running" => tokio::time::sleep(POLL_INTERVAL).await,
                other => {
                    return Err(ChemflowError::Backend(format!(
                        "job '{}' reported unknown status '{other}'",
                        handle.id
                    )));
                }
            }
        }
    }

    async fn fetch_artifact(
        &self,
        artifact: &ArtifactRef,
        dest: &Path,
    ) -> Result<(), ChemflowError> {
        let url = self.endpoint(&format!("jobs/{}/files/{}", artifact.job_id, artifact.name))?;
        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }
}
