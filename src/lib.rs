//! Chemflow - declarative task graphs for chemistry-simulation pipelines
//!
//! The engine is the interesting part, not the chemistry: workflows are
//! validated DAGs of opaque task bodies, executed strictly serially against a
//! pluggable backend, with checkpoint/restart, a preprocessing stop point,
//! and first-class human-in-the-loop suspension.

pub mod apps;
pub mod backend;
pub mod checkpoint;
pub mod error;
pub mod graph;
pub mod input;
pub mod interactive;
pub mod materialize;
pub mod runner;

pub use backend::{
    Backend, BackendKind, BodyRegistry, DockerBackend, InProcessBackend, JobHandle, JobRequest,
    RemoteBackend,
};
pub use checkpoint::{write_checkpoint, Checkpoint};
pub use error::{ChemflowError, FixSuggestion};
pub use graph::{
    ArtifactRef, Binding, OutputBundle, OutputRef, OutputValue, TaskSpec, WorkflowBuilder,
    WorkflowGraph,
};
pub use materialize::{MaterializeReport, OutputMaterializer};
pub use runner::{RunMode, RunOutcome, Runner, TaskState, TaskStatus};
