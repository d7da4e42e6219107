//! Serial workflow runner
//!
//! Walks a finalized [`WorkflowGraph`] in topological order and dispatches one
//! task at a time to the backend. Strictly serial by design: backend job
//! bookkeeping and on-disk artifact naming are not built for concurrent
//! in-flight jobs under this runner, so correctness wins over throughput even
//! where the DAG would admit parallel branches.
//!
//! The runner is the sole mutator of its task states; the graph is shared and
//! read-only. An interactive task with no injected outputs is a first-class
//! suspend point, not an error.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::backend::{Backend, JobRequest};
use crate::error::ChemflowError;
use crate::graph::{Binding, OutputBundle, OutputValue, TaskSpec, WorkflowGraph};

// ============================================================================
// TASK STATE
// ============================================================================

/// Lifecycle of one task within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Finished,
    Failed,
}

/// Per-task record owned by the runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub status: TaskStatus,
    /// Populated once FINISHED (declared fields only)
    #[serde(default)]
    pub outputs: OutputBundle,
    /// Populated once FAILED
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskState {
    fn pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            outputs: OutputBundle::new(),
            error: None,
        }
    }

    fn finished(outputs: OutputBundle) -> Self {
        Self {
            status: TaskStatus::Finished,
            outputs,
            error: None,
        }
    }
}

// ============================================================================
// RUN MODES AND OUTCOMES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Execute everything the workflow outputs depend on
    Full,
    /// Stop right after the first preprocessor task in topological order
    PreprocessOnly,
}

/// How a run ended (failures are `Err`, not an outcome)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// All required tasks finished; workflow outputs are resolvable
    Completed,
    /// An interactive task needs externally supplied outputs
    Suspended { task: String },
    /// Preprocessing halt; that task's outputs are the emitted set
    Preprocessed { task: String },
}

// ============================================================================
// RUNNER
// ============================================================================

/// Executes one workflow against one backend, resumably
pub struct Runner {
    graph: Arc<WorkflowGraph>,
    backend: Arc<dyn Backend>,
    states: BTreeMap<String, TaskState>,
    bound_inputs: BTreeMap<String, Value>,
}

// Hand-written: the backend trait object has no Debug
impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("graph", &self.graph.name())
            .field("backend", &self.backend.kind())
            .field("states", &self.states)
            .finish_non_exhaustive()
    }
}

impl Runner {
    pub fn new(
        graph: Arc<WorkflowGraph>,
        backend: Arc<dyn Backend>,
        bound_inputs: BTreeMap<String, Value>,
    ) -> Self {
        let states = graph
            .tasks()
            .iter()
            .map(|t| (t.name.clone(), TaskState::pending()))
            .collect();
        Self {
            graph,
            backend,
            states,
            bound_inputs,
        }
    }

    /// Reconstruct a runner from previously captured state (checkpoint restore).
    ///
    /// Tasks missing from `states` start PENDING; the caller is responsible
    /// for having reset RUNNING entries already.
    pub fn resume(
        graph: Arc<WorkflowGraph>,
        backend: Arc<dyn Backend>,
        mut states: BTreeMap<String, TaskState>,
        bound_inputs: BTreeMap<String, Value>,
    ) -> Self {
        for task in graph.tasks() {
            states
                .entry(task.name.clone())
                .or_insert_with(TaskState::pending);
        }
        Self {
            graph,
            backend,
            states,
            bound_inputs,
        }
    }

    pub fn graph(&self) -> &Arc<WorkflowGraph> {
        &self.graph
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn task_state(&self, name: &str) -> Option<&TaskState> {
        self.states.get(name)
    }

    pub fn states(&self) -> &BTreeMap<String, TaskState> {
        &self.states
    }

    pub fn bound_inputs(&self) -> &BTreeMap<String, Value> {
        &self.bound_inputs
    }

    /// Install externally supplied outputs for an interactive task.
    ///
    /// The task is marked FINISHED with exactly these outputs and the backend
    /// is never invoked for it. This is how a human's out-of-band choice
    /// re-enters the graph.
    pub fn inject_outputs(
        &mut self,
        task: &str,
        outputs: OutputBundle,
    ) -> Result<(), ChemflowError> {
        let spec = self
            .graph
            .task(task)
            .ok_or_else(|| ChemflowError::UnknownTask { task: task.into() })?;
        if !spec.interactive {
            return Err(ChemflowError::NotInteractiveTask { task: task.into() });
        }

        // The declared outputs are a contract for injected bundles too;
        // catching a gap here beats a mid-run consistency error downstream.
        let missing: Vec<String> = spec
            .outputs
            .iter()
            .filter(|f| !outputs.contains_key(f.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ChemflowError::InjectionMismatch {
                task: task.into(),
                details: format!("missing declared field(s) {}", missing.join(", ")),
            });
        }
        let unknown: Vec<String> = outputs
            .keys()
            .filter(|k| !spec.outputs.contains(k.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(ChemflowError::InjectionMismatch {
                task: task.into(),
                details: format!("unknown field(s) {}", unknown.join(", ")),
            });
        }

        info!(task, "installing externally supplied outputs");
        self.states
            .insert(task.to_string(), TaskState::finished(outputs));
        Ok(())
    }

    /// Execute the workflow serially in topological order.
    ///
    /// FINISHED tasks are skipped, which is what makes checkpoint resume and
    /// interactive injection transparent to the loop.
    pub async fn run(&mut self, mode: RunMode) -> Result<RunOutcome, ChemflowError> {
        let (plan, stop_after) = self.plan(mode)?;
        let graph = Arc::clone(&self.graph);

        for idx in plan {
            let task = &graph.tasks()[idx];
            let name = task.name.clone();

            if self.states[&name].status == TaskStatus::Finished {
                debug!(task = %name, "already finished, skipping");
            } else if task.interactive {
                info!(task = %name, "interactive task has no outputs yet, suspending");
                return Ok(RunOutcome::Suspended { task: name });
            } else {
                self.execute(idx).await?;
            }

            if stop_after.as_deref() == Some(name.as_str()) {
                info!(task = %name, "preprocessing stop point reached");
                return Ok(RunOutcome::Preprocessed { task: name });
            }
        }

        match stop_after {
            // Preprocessor was already FINISHED before this run even started
            Some(task) => Ok(RunOutcome::Preprocessed { task }),
            None => Ok(RunOutcome::Completed),
        }
    }

    /// Resolve the workflow's named outputs after a completed run
    pub fn outputs(&self) -> Result<Vec<(String, OutputValue)>, ChemflowError> {
        self.graph
            .graph_outputs()
            .iter()
            .map(|(exposed, r)| {
                let state = self.states.get(&r.task).ok_or_else(|| {
                    ChemflowError::UnknownTask {
                        task: r.task.clone(),
                    }
                })?;
                if state.status != TaskStatus::Finished {
                    return Err(ChemflowError::InternalConsistency {
                        details: format!(
                            "output '{exposed}' needs task '{}' which is not finished",
                            r.task
                        ),
                    });
                }
                let value = state.outputs.get(&r.field).ok_or_else(|| {
                    ChemflowError::InternalConsistency {
                        details: format!("task '{}' finished without field '{}'", r.task, r.field),
                    }
                })?;
                Ok((exposed.clone(), value.clone()))
            })
            .collect()
    }

    /// Which tasks this run will visit, in topological order
    fn plan(&self, mode: RunMode) -> Result<(Vec<usize>, Option<String>), ChemflowError> {
        let (closure, stop_after) = match mode {
            RunMode::Full => (self.graph.output_closure(), None),
            RunMode::PreprocessOnly => {
                let prep = self.graph.first_preprocessor().ok_or_else(|| {
                    ChemflowError::InternalConsistency {
                        details: format!(
                            "workflow '{}' has no preprocessor task",
                            self.graph.name()
                        ),
                    }
                })?;
                let idx = self
                    .graph
                    .index_of(&prep.name)
                    .expect("preprocessor came from the graph");
                (self.graph.closure_of(idx), Some(prep.name.clone()))
            }
        };

        let plan = self
            .graph
            .topo_order()
            .iter()
            .copied()
            .filter(|i| closure.contains(i))
            .collect();
        Ok((plan, stop_after))
    }

    /// Run one task to completion through the backend
    async fn execute(&mut self, idx: usize) -> Result<(), ChemflowError> {
        let task = self.graph.tasks()[idx].clone();
        let inputs = self.resolve_inputs(&task)?;

        info!(task = %task.name, body = %task.body, "running task");
        self.set_status(&task.name, TaskStatus::Running);

        let request = JobRequest {
            task: task.name.clone(),
            body: task.body.clone(),
            image: task
                .image
                .clone()
                .unwrap_or_else(|| self.graph.default_image().to_string()),
            inputs,
        };

        let result = async {
            let handle = self.backend.submit(request).await?;
            self.backend.wait(&handle).await
        }
        .await
        .and_then(|bundle| declared_outputs(&task, bundle));

        match result {
            Ok(outputs) => {
                info!(task = %task.name, fields = outputs.len(), "task finished");
                self.states
                    .insert(task.name.clone(), TaskState::finished(outputs));
                Ok(())
            }
            Err(e) => {
                let state = self
                    .states
                    .get_mut(&task.name)
                    .expect("state exists for every task");
                state.status = TaskStatus::Failed;
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Gather resolved input values for a task.
    ///
    /// Topological order guarantees every producer is FINISHED; anything else
    /// is an internal consistency error, not a user-facing condition.
    fn resolve_inputs(
        &self,
        task: &TaskSpec,
    ) -> Result<BTreeMap<String, OutputValue>, ChemflowError> {
        let mut resolved = BTreeMap::new();
        for (param, binding) in &task.inputs {
            let value = match binding {
                Binding::Ref(r) => {
                    let producer = self.states.get(&r.task).ok_or_else(|| {
                        ChemflowError::UnknownTask {
                            task: r.task.clone(),
                        }
                    })?;
                    if producer.status != TaskStatus::Finished {
                        return Err(ChemflowError::InternalConsistency {
                            details: format!(
                                "task '{}' needs '{}.{}' but '{}' is not finished",
                                task.name, r.task, r.field, r.task
                            ),
                        });
                    }
                    producer.outputs.get(&r.field).cloned().ok_or_else(|| {
                        ChemflowError::InternalConsistency {
                            details: format!(
                                "task '{}' finished without declared field '{}'",
                                r.task, r.field
                            ),
                        }
                    })?
                }
                Binding::GraphInput(name) => {
                    let value = self.bound_inputs.get(name).ok_or_else(|| {
                        ChemflowError::UnboundGraphInput { name: name.clone() }
                    })?;
                    OutputValue::from_json(value.clone())
                }
                Binding::Literal(value) => OutputValue::from_json(value.clone()),
            };
            resolved.insert(param.clone(), value);
        }
        Ok(resolved)
    }

    fn set_status(&mut self, name: &str, status: TaskStatus) {
        if let Some(state) = self.states.get_mut(name) {
            state.status = status;
        }
    }
}

/// Keep exactly the declared output fields; a missing field is a broken
/// body contract and fails the task.
fn declared_outputs(task: &TaskSpec, mut bundle: OutputBundle) -> Result<OutputBundle, ChemflowError> {
    let mut outputs = OutputBundle::new();
    for field in &task.outputs {
        match bundle.remove(field) {
            Some(value) => {
                outputs.insert(field.clone(), value);
            }
            None => {
                return Err(ChemflowError::TaskExecution {
                    task: task.name.clone(),
                    details: format!("body did not produce declared output '{field}'"),
                });
            }
        }
    }
    Ok(outputs)
}
