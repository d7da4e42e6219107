//! Type-directed output materialization
//!
//! Turns a finished run's named outputs into files under the output
//! directory: textual values verbatim, structured values as `.json`,
//! backend-side artifacts fetched straight to the target path, raw bytes
//! under a `.bin` suffix. Archive-named files are expanded in place after
//! writing.
//!
//! One failing output never blocks the rest; failures are logged as warnings
//! and collected in the report.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::Backend;
use crate::error::ChemflowError;
use crate::graph::OutputValue;
use crate::runner::{Runner, TaskStatus};

const ARCHIVE_SUFFIXES: &[&str] = &[".tar.gz", ".tgz", ".tar"];

/// Per-run materialization summary
#[derive(Debug, Default)]
pub struct MaterializeReport {
    pub written: Vec<PathBuf>,
    pub failures: Vec<ChemflowError>,
}

impl MaterializeReport {
    pub fn all_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Writes output values into a directory through the backend
pub struct OutputMaterializer {
    outdir: PathBuf,
    backend: Arc<dyn Backend>,
}

impl OutputMaterializer {
    pub fn new(outdir: impl Into<PathBuf>, backend: Arc<dyn Backend>) -> Self {
        Self {
            outdir: outdir.into(),
            backend,
        }
    }

    /// Write every named output; failures are per-output and recovered
    pub async fn materialize_all(
        &self,
        outputs: &[(String, OutputValue)],
    ) -> MaterializeReport {
        let mut report = MaterializeReport::default();
        for (name, value) in outputs {
            match self.materialize(&self.outdir, name, value).await {
                Ok(path) => report.written.push(path),
                Err(e) => {
                    let err = ChemflowError::Materialization {
                        output: name.clone(),
                        details: e.to_string(),
                    };
                    warn!("{err}");
                    report.failures.push(err);
                }
            }
        }
        report
    }

    /// Additionally dump every finished task's outputs under `tasks/<name>/`
    pub async fn dump_tasks(&self, runner: &Runner) -> MaterializeReport {
        let mut report = MaterializeReport::default();
        for (task, state) in runner.states() {
            if state.status != TaskStatus::Finished {
                continue;
            }
            let dir = self.outdir.join("tasks").join(task);
            if let Err(e) = std::fs::create_dir_all(&dir) {
                report.failures.push(ChemflowError::Materialization {
                    output: task.clone(),
                    details: e.to_string(),
                });
                continue;
            }
            for (field, value) in &state.outputs {
                match self.materialize(&dir, field, value).await {
                    Ok(path) => report.written.push(path),
                    Err(e) => {
                        let err = ChemflowError::Materialization {
                            output: format!("{task}.{field}"),
                            details: e.to_string(),
                        };
                        warn!("{err}");
                        report.failures.push(err);
                    }
                }
            }
        }
        report
    }

    async fn materialize(
        &self,
        dir: &Path,
        name: &str,
        value: &OutputValue,
    ) -> Result<PathBuf, ChemflowError> {
        let path = match value {
            OutputValue::Text(text) => {
                let path = dir.join(name);
                tokio::fs::write(&path, text).await?;
                path
            }
            OutputValue::Json(json) => {
                let path = dir.join(format!("{name}.json"));
                tokio::fs::write(&path, serde_json::to_vec_pretty(json)?).await?;
                path
            }
            OutputValue::Artifact(artifact) => {
                let path = dir.join(name);
                self.backend.fetch_artifact(artifact, &path).await?;
                path
            }
            OutputValue::Bytes(bytes) => {
                let path = dir.join(format!("{name}.bin"));
                tokio::fs::write(&path, bytes).await?;
                path
            }
        };

        debug!(path = %path.display(), "output written");
        if is_archive(name) {
            expand_archive(&path, dir).await?;
        }
        Ok(path)
    }
}

fn is_archive(name: &str) -> bool {
    ARCHIVE_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Expand a written archive next to itself
async fn expand_archive(path: &Path, dir: &Path) -> Result<(), ChemflowError> {
    let status = tokio::process::Command::new("tar")
        .arg("xf")
        .arg(path)
        .arg("-C")
        .arg(dir)
        .status()
        .await
        .map_err(|e| ChemflowError::Backend(format!("failed to run tar: {e}")))?;
    if !status.success() {
        return Err(ChemflowError::Backend(format!(
            "tar exited with {status} expanding {}",
            path.display()
        )));
    }
    Ok(())
}
