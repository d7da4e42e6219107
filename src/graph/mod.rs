//! Workflow graph model - tasks, output references, and the builder
//!
//! A workflow is declared once as a DAG of [`TaskSpec`] nodes wired together
//! by [`OutputRef`] value objects, then frozen by [`WorkflowBuilder::finalize`]
//! into an immutable [`WorkflowGraph`] that is safe to share across runners.
//!
//! Dependency edges are never declared separately: they are derived from the
//! `OutputRef` bindings inside each task's inputs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChemflowError;

pub mod validate;

// ============================================================================
// OUTPUT VALUES
// ============================================================================

/// Reference to a file living on the backend side of a finished job.
///
/// Data only - the live backend connection is never part of this type, so an
/// artifact reference survives checkpointing and is re-fetched through
/// whichever backend the run resumes with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Backend job that produced the file
    pub job_id: String,
    /// Filename within the job's working directory
    pub name: String,
}

/// A single task-output payload.
///
/// Tagged serialization keeps checkpoint round-trips unambiguous (a JSON
/// string stays distinguishable from a textual payload).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum OutputValue {
    /// Textual content, materialized verbatim
    Text(String),
    /// Structured content, materialized as JSON
    Json(Value),
    /// Backend-side file, fetched on materialization
    Artifact(ArtifactRef),
    /// Raw bytes, materialized with a generic binary suffix
    Bytes(Vec<u8>),
}

impl OutputValue {
    /// Classify a plain JSON value: strings become `Text`, everything else `Json`
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(s) => OutputValue::Text(s),
            other => OutputValue::Json(other),
        }
    }

    /// View as a JSON value (for handing to task bodies)
    pub fn to_json(&self) -> Value {
        match self {
            OutputValue::Text(s) => Value::String(s.clone()),
            OutputValue::Json(v) => v.clone(),
            OutputValue::Artifact(a) => serde_json::json!({
                "job_id": a.job_id,
                "name": a.name,
            }),
            OutputValue::Bytes(b) => {
                Value::Array(b.iter().map(|byte| Value::from(*byte)).collect())
            }
        }
    }
}

/// Named outputs of one finished task (deterministic iteration order)
pub type OutputBundle = BTreeMap<String, OutputValue>;

/// Convert a JSON object into an [`OutputBundle`]
pub fn bundle_from_json(value: Value) -> Result<OutputBundle, ChemflowError> {
    match value {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, OutputValue::from_json(v)))
            .collect()),
        other => Err(ChemflowError::Backend(format!(
            "expected a JSON object of outputs, got {other}"
        ))),
    }
}

// ============================================================================
// WIRING
// ============================================================================

/// Typed handle naming one output field of one task - the unit of wiring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRef {
    pub task: String,
    pub field: String,
}

/// What a task parameter is bound to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Binding {
    /// Output field of another task (creates a dependency edge)
    Ref(OutputRef),
    /// Workflow-level input, bound at run time
    GraphInput(String),
    /// Constant baked into the graph
    Literal(Value),
}

/// Handle returned by [`WorkflowBuilder::add_task`] for wiring downstream tasks
#[derive(Debug, Clone)]
pub struct TaskHandle {
    name: String,
}

impl TaskHandle {
    /// Reference one of this task's declared output fields
    pub fn output(&self, field: &str) -> Binding {
        Binding::Ref(OutputRef {
            task: self.name.clone(),
            field: field.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// TASK SPEC
// ============================================================================

/// One node of the graph: an opaque body id plus its wiring and flags.
///
/// Immutable once the graph is finalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique within the graph
    pub name: String,
    /// Opaque callable id, resolved by the backend
    pub body: String,
    /// param name -> binding
    pub inputs: BTreeMap<String, Binding>,
    /// Declared output field names (the body's contract)
    pub outputs: BTreeSet<String>,
    /// Backend image override (falls back to the graph default)
    pub image: Option<String>,
    /// Outputs are supplied by a human/UI, never computed
    pub interactive: bool,
    /// Designated stopping point for a preprocessing-only run
    pub preprocessor: bool,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeSet::new(),
            image: None,
            interactive: false,
            preprocessor: false,
        }
    }

    /// Bind a parameter to another task's output or a graph input
    pub fn input(mut self, param: &str, binding: Binding) -> Self {
        self.inputs.insert(param.to_string(), binding);
        self
    }

    /// Bind a parameter to a constant
    pub fn literal(mut self, param: &str, value: impl Into<Value>) -> Self {
        self.inputs
            .insert(param.to_string(), Binding::Literal(value.into()));
        self
    }

    /// Declare the output field names this body produces
    pub fn outputs<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    pub fn preprocessor(mut self) -> Self {
        self.preprocessor = true;
        self
    }

    /// Dependency task names derived from this task's bindings (deduplicated)
    pub fn dependencies(&self) -> BTreeSet<&str> {
        self.inputs
            .values()
            .filter_map(|b| match b {
                Binding::Ref(r) => Some(r.task.as_str()),
                _ => None,
            })
            .collect()
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Accumulates tasks and wiring, then freezes them into a [`WorkflowGraph`]
pub struct WorkflowBuilder {
    name: String,
    default_image: String,
    tasks: Vec<TaskSpec>,
    graph_inputs: BTreeSet<String>,
    graph_outputs: Vec<(String, OutputRef)>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>, default_image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_image: default_image.into(),
            tasks: Vec::new(),
            graph_inputs: BTreeSet::new(),
            graph_outputs: Vec::new(),
        }
    }

    /// Declare a workflow-level input and get a binding for it
    pub fn input(&mut self, name: &str) -> Binding {
        self.graph_inputs.insert(name.to_string());
        Binding::GraphInput(name.to_string())
    }

    /// Add a task.
    ///
    /// Fails with `DuplicateTaskName` if the name is taken, and with
    /// `UnknownOutputRef` if a binding names a field that an already-declared
    /// task provably does not have. References to tasks that are not declared
    /// yet are allowed here and resolved at [`finalize`](Self::finalize).
    pub fn add_task(&mut self, spec: TaskSpec) -> Result<TaskHandle, ChemflowError> {
        if self.tasks.iter().any(|t| t.name == spec.name) {
            return Err(ChemflowError::DuplicateTaskName {
                name: spec.name,
                graph: self.name.clone(),
            });
        }

        for binding in spec.inputs.values() {
            if let Binding::Ref(r) = binding {
                if let Some(producer) = self.tasks.iter().find(|t| t.name == r.task) {
                    if !producer.outputs.contains(&r.field) {
                        return Err(ChemflowError::UnknownOutputRef {
                            task: r.task.clone(),
                            field: r.field.clone(),
                            referenced_by: spec.name.clone(),
                        });
                    }
                }
            }
        }

        let handle = TaskHandle {
            name: spec.name.clone(),
        };
        self.tasks.push(spec);
        Ok(handle)
    }

    /// Expose a task output under a workflow-level name
    pub fn set_output(&mut self, exposed_name: &str, binding: Binding) -> Result<(), ChemflowError> {
        match binding {
            Binding::Ref(r) => {
                self.graph_outputs.push((exposed_name.to_string(), r));
                Ok(())
            }
            _ => Err(ChemflowError::InternalConsistency {
                details: format!(
                    "workflow output '{exposed_name}' must be bound to a task output"
                ),
            }),
        }
    }

    /// Full validation pass: resolve every reference, check acyclicity, freeze.
    pub fn finalize(self) -> Result<WorkflowGraph, ChemflowError> {
        if self.graph_outputs.is_empty() {
            return Err(ChemflowError::NoGraphOutputs { graph: self.name });
        }

        let index: BTreeMap<String, usize> = self
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();

        // Every OutputRef must name a declared task and field
        for task in &self.tasks {
            for binding in task.inputs.values() {
                if let Binding::Ref(r) = binding {
                    resolve_ref(&self.tasks, &index, r, &task.name)?;
                }
            }
        }
        for (exposed, r) in &self.graph_outputs {
            resolve_ref(&self.tasks, &index, r, &format!("workflow output '{exposed}'"))?;
        }

        // Per-task dependency index lists
        let deps: Vec<Vec<usize>> = self
            .tasks
            .iter()
            .map(|t| t.dependencies().iter().map(|d| index[*d]).collect())
            .collect();

        let topo_order = validate::toposort(&self.tasks, &deps).map_err(|cycle| {
            ChemflowError::CyclicDependency {
                graph: self.name.clone(),
                cycle,
            }
        })?;

        Ok(WorkflowGraph {
            name: self.name,
            default_image: self.default_image,
            tasks: self.tasks,
            index,
            deps,
            topo_order,
            graph_inputs: self.graph_inputs,
            graph_outputs: self.graph_outputs,
        })
    }
}

fn resolve_ref(
    tasks: &[TaskSpec],
    index: &BTreeMap<String, usize>,
    r: &OutputRef,
    referenced_by: &str,
) -> Result<(), ChemflowError> {
    let err = || ChemflowError::UnknownOutputRef {
        task: r.task.clone(),
        field: r.field.clone(),
        referenced_by: referenced_by.to_string(),
    };
    let idx = index.get(&r.task).ok_or_else(err)?;
    if !tasks[*idx].outputs.contains(&r.field) {
        return Err(err());
    }
    Ok(())
}

// ============================================================================
// FINALIZED GRAPH
// ============================================================================

/// An immutable, validated workflow DAG.
///
/// Safe to share across concurrent runners - no runner mutates the graph.
#[derive(Debug)]
pub struct WorkflowGraph {
    name: String,
    default_image: String,
    tasks: Vec<TaskSpec>,
    index: BTreeMap<String, usize>,
    /// Per-task dependency indices (parallel to `tasks`)
    deps: Vec<Vec<usize>>,
    /// Kahn order with declaration-order tie-break
    topo_order: Vec<usize>,
    graph_inputs: BTreeSet<String>,
    graph_outputs: Vec<(String, OutputRef)>,
}

impl WorkflowGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_image(&self) -> &str {
        &self.default_image
    }

    pub fn tasks(&self) -> &[TaskSpec] {
        &self.tasks
    }

    pub fn task(&self, name: &str) -> Option<&TaskSpec> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Deterministic execution order for the whole graph
    pub fn topo_order(&self) -> &[usize] {
        &self.topo_order
    }

    pub fn dependencies_of(&self, idx: usize) -> &[usize] {
        &self.deps[idx]
    }

    pub fn graph_inputs(&self) -> &BTreeSet<String> {
        &self.graph_inputs
    }

    pub fn graph_outputs(&self) -> &[(String, OutputRef)] {
        &self.graph_outputs
    }

    /// First task flagged `preprocessor` in topological order
    pub fn first_preprocessor(&self) -> Option<&TaskSpec> {
        self.topo_order
            .iter()
            .map(|&i| &self.tasks[i])
            .find(|t| t.preprocessor)
    }

    /// Tasks (as indices) reachable backwards from the workflow outputs
    pub fn output_closure(&self) -> BTreeSet<usize> {
        let targets = self
            .graph_outputs
            .iter()
            .filter_map(|(_, r)| self.index_of(&r.task));
        validate::reachable(&self.deps, targets)
    }

    /// Tasks (as indices) reachable backwards from one task, inclusive
    pub fn closure_of(&self, idx: usize) -> BTreeSet<usize> {
        validate::reachable(&self.deps, std::iter::once(idx))
    }
}
