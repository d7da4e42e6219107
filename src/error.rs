//! Error taxonomy with fix suggestions
//!
//! Graph-definition errors (CWF-01x) are programming errors in a workflow
//! definition and are never retried. Execution errors (CWF-02x) abort the run
//! but leave a resumable checkpoint. Checkpoint-write and materialization
//! errors (CWF-03x/04x) are recovered locally and only logged.

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum ChemflowError {
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CWF-001: No workflow named '{name}' (available: {available})")]
    UnknownWorkflow { name: String, available: String },

    // ─────────────────────────────────────────────────────────────
    // Graph definition errors (CWF-010 to CWF-014)
    // ─────────────────────────────────────────────────────────────
    #[error("CWF-010: Duplicate task name '{name}' in workflow '{graph}'")]
    DuplicateTaskName { name: String, graph: String },

    #[error("CWF-011: '{referenced_by}' references unknown output '{task}.{field}'")]
    UnknownOutputRef {
        task: String,
        field: String,
        referenced_by: String,
    },

    #[error("CWF-012: Dependency cycle in workflow '{graph}': {cycle}")]
    CyclicDependency { graph: String, cycle: String },

    #[error("CWF-013: Workflow '{graph}' declares no outputs")]
    NoGraphOutputs { graph: String },

    #[error("CWF-014: Input '{name}' is not bound for this run")]
    UnboundGraphInput { name: String },

    // ─────────────────────────────────────────────────────────────
    // Execution errors (CWF-020 to CWF-026)
    // ─────────────────────────────────────────────────────────────
    #[error("CWF-020: Task '{task}' failed: {details}")]
    TaskExecution { task: String, details: String },

    #[error("CWF-021: No task body registered for '{body}' (task '{task}')")]
    UnknownBody { body: String, task: String },

    #[error("CWF-022: Task '{task}' is not marked interactive")]
    NotInteractiveTask { task: String },

    #[error("CWF-023: No task named '{task}' in this workflow")]
    UnknownTask { task: String },

    #[error("CWF-024: Internal consistency violation: {details}")]
    InternalConsistency { details: String },

    #[error("CWF-025: Injected outputs for task '{task}' do not match its declaration: {details}")]
    InjectionMismatch { task: String, details: String },

    #[error("CWF-026: Malformed --setoutput '{argument}': expected taskname=file.json")]
    SetOutputSpec { argument: String },

    // ─────────────────────────────────────────────────────────────
    // Checkpoint errors (CWF-030 to CWF-032)
    // ─────────────────────────────────────────────────────────────
    #[error("CWF-030: Failed to write checkpoint: {details}")]
    CheckpointWrite { details: String },

    #[error("CWF-031: Unsupported checkpoint version {found} (this build reads {supported})")]
    CheckpointVersion { found: u32, supported: u32 },

    #[error("CWF-032: Checkpoint was recorded for '{recorded}' but '{requested}' was requested")]
    RestartMismatch { recorded: String, requested: String },

    // ─────────────────────────────────────────────────────────────
    // Materialization / backend errors (CWF-040 to CWF-042)
    // ─────────────────────────────────────────────────────────────
    #[error("CWF-040: Failed to materialize output '{output}': {details}")]
    Materialization { output: String, details: String },

    #[error("CWF-041: Backend error: {0}")]
    Backend(String),

    #[error("CWF-042: Job server request failed: {0}")]
    JobServer(#[from] reqwest::Error),
}

impl FixSuggestion for ChemflowError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            ChemflowError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
            ChemflowError::Json(_) => Some("Ensure the payload is valid JSON (try parsing with jq)"),
            ChemflowError::Io(_) => Some("Check file path and permissions"),

            ChemflowError::UnknownWorkflow { .. } => {
                Some("Pick one of the listed workflow names")
            }

            ChemflowError::DuplicateTaskName { .. } => {
                Some("Use unique task names within a workflow")
            }
            ChemflowError::UnknownOutputRef { .. } => {
                Some("Verify the producing task exists and declares that output field")
            }
            ChemflowError::CyclicDependency { .. } => {
                Some("Remove the circular dependency - a task cannot depend on its own output")
            }
            ChemflowError::NoGraphOutputs { .. } => {
                Some("Declare at least one workflow output with set_output()")
            }
            ChemflowError::UnboundGraphInput { .. } => {
                Some("Pass a value for this input in the run payload")
            }

            ChemflowError::TaskExecution { .. } => {
                Some("Diagnose the failing task, then resume with --restart")
            }
            ChemflowError::UnknownBody { .. } => {
                Some("Run against a container backend, or register the body in-process")
            }
            ChemflowError::NotInteractiveTask { .. } => {
                Some("--setoutput only applies to tasks marked interactive")
            }
            ChemflowError::UnknownTask { .. } => {
                Some("Verify the task name exists in this workflow")
            }
            ChemflowError::InternalConsistency { .. } => None,
            ChemflowError::InjectionMismatch { .. } => {
                Some("Provide a JSON object with exactly the task's declared output fields")
            }
            ChemflowError::SetOutputSpec { .. } => {
                Some("Write --setoutput taskname=file.json, where the file holds the task's outputs as a JSON object")
            }

            ChemflowError::CheckpointWrite { .. } => {
                Some("Check the output directory is writable")
            }
            ChemflowError::CheckpointVersion { .. } => {
                Some("Re-run the workflow from scratch with this build")
            }
            ChemflowError::RestartMismatch { .. } => {
                Some("Restart with the same backend flags the checkpoint was created with")
            }

            ChemflowError::Materialization { .. } => {
                Some("Check the output directory is writable; other outputs were still written")
            }
            ChemflowError::Backend(_) => {
                Some("Check the backend is reachable (docker daemon or job server)")
            }
            ChemflowError::JobServer(_) => {
                Some("Check the job server address ($CHEMFLOW_SERVER) and that it is running")
            }
        }
    }
}
