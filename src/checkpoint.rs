//! Checkpoint / restart
//!
//! A checkpoint is a strictly data-only snapshot of a runner: task statuses,
//! the output payloads of settled tasks, and the bound workflow inputs. Live
//! backend handles are never serialized; a restored runner re-attaches a
//! freshly constructed backend, and the recorded backend kind is checked so
//! backend-specific artifact handles are never replayed against the wrong
//! substrate.
//!
//! Writes are best-effort: a failed checkpoint is logged and swallowed, it
//! must never abort an otherwise-successful run.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::backend::{Backend, BackendKind};
use crate::error::ChemflowError;
use crate::graph::{OutputBundle, WorkflowGraph};
use crate::runner::{Runner, TaskState, TaskStatus};

/// Checkpoint schema version understood by this build
pub const CHECKPOINT_VERSION: u32 = 1;

/// Default checkpoint filename within an output directory
pub const CHECKPOINT_FILENAME: &str = "workflow_state.json";

/// Snapshot of one task: settled tasks carry payloads, others only status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: OutputBundle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Serializable snapshot of a runner, sufficient to resume execution
#[derive(Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    /// Workflow the states belong to
    pub graph_name: String,
    /// Substrate the outputs were produced on
    pub backend_kind: BackendKind,
    pub task_states: BTreeMap<String, TaskSnapshot>,
    pub bound_inputs: BTreeMap<String, Value>,
}

impl Checkpoint {
    pub fn from_runner(runner: &Runner) -> Self {
        let task_states = runner
            .states()
            .iter()
            .map(|(name, state)| {
                let settled = matches!(state.status, TaskStatus::Finished | TaskStatus::Failed);
                let snapshot = TaskSnapshot {
                    status: state.status,
                    outputs: if settled {
                        state.outputs.clone()
                    } else {
                        OutputBundle::new()
                    },
                    error: state.error.clone(),
                };
                (name.clone(), snapshot)
            })
            .collect();

        Self {
            version: CHECKPOINT_VERSION,
            graph_name: runner.graph().name().to_string(),
            backend_kind: runner.backend().kind(),
            task_states,
            bound_inputs: runner.bound_inputs().clone(),
        }
    }

    /// Reconstruct a runner and re-attach a live backend.
    ///
    /// Tasks left RUNNING at snapshot time are reset to PENDING: a crash
    /// mid-task means the job must be resubmitted, not assumed complete.
    pub fn restore(
        self,
        graph: Arc<WorkflowGraph>,
        backend: Arc<dyn Backend>,
    ) -> Result<Runner, ChemflowError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(ChemflowError::CheckpointVersion {
                found: self.version,
                supported: CHECKPOINT_VERSION,
            });
        }
        if self.graph_name != graph.name() {
            return Err(ChemflowError::RestartMismatch {
                recorded: format!("workflow '{}'", self.graph_name),
                requested: format!("workflow '{}'", graph.name()),
            });
        }
        if self.backend_kind != backend.kind() {
            return Err(ChemflowError::RestartMismatch {
                recorded: format!("backend '{}'", self.backend_kind),
                requested: format!("backend '{}'", backend.kind()),
            });
        }

        let states = self
            .task_states
            .into_iter()
            .map(|(name, snap)| {
                let status = match snap.status {
                    TaskStatus::Running => TaskStatus::Pending,
                    other => other,
                };
                (
                    name,
                    TaskState {
                        status,
                        outputs: snap.outputs,
                        error: snap.error,
                    },
                )
            })
            .collect();

        Ok(Runner::resume(graph, backend, states, self.bound_inputs))
    }

    pub fn load(path: &Path) -> Result<Self, ChemflowError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write(&self, path: &Path) -> Result<(), ChemflowError> {
        let bytes =
            serde_json::to_vec_pretty(self).map_err(|e| ChemflowError::CheckpointWrite {
                details: e.to_string(),
            })?;
        std::fs::write(path, bytes).map_err(|e| ChemflowError::CheckpointWrite {
            details: format!("{}: {e}", path.display()),
        })
    }
}

/// Snapshot a runner to `<outdir>/workflow_state.json`, best-effort.
///
/// Returns the checkpoint path on success, `None` if the write was skipped.
pub fn write_checkpoint(runner: &Runner, outdir: &Path) -> Option<std::path::PathBuf> {
    let path = outdir.join(CHECKPOINT_FILENAME);
    match Checkpoint::from_runner(runner).write(&path) {
        Ok(()) => {
            info!(path = %path.display(), "checkpoint written");
            Some(path)
        }
        Err(e) => {
            warn!("checkpoint skipped, run continues: {e}");
            None
        }
    }
}
