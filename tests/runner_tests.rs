//! End-to-end runner scenarios: failure + checkpoint restart, interactive
//! suspension resume, and the built-in apps against an in-process backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use chemflow::checkpoint::{write_checkpoint, Checkpoint, CHECKPOINT_FILENAME};
use chemflow::error::ChemflowError;
use chemflow::graph::{bundle_from_json, TaskSpec, WorkflowBuilder, WorkflowGraph};
use chemflow::interactive::{apply_overrides, parse_overrides};
use chemflow::runner::{RunMode, RunOutcome, Runner, TaskStatus};
use chemflow::{Backend, BodyRegistry, InProcessBackend};

/// read -> validate -> compute -> write, exposing write's report.
fn chain_graph() -> Arc<WorkflowGraph> {
    let mut b = WorkflowBuilder::new("chain", "img");
    let molecule_json = b.input("molecule_json");

    let read = b
        .add_task(
            TaskSpec::new("read", "read_body")
                .input("description", molecule_json)
                .outputs(["molecule"]),
        )
        .unwrap();
    let validate = b
        .add_task(
            TaskSpec::new("validate", "validate_body")
                .input("molecule", read.output("molecule"))
                .outputs(["checked"]),
        )
        .unwrap();
    let compute = b
        .add_task(
            TaskSpec::new("compute", "compute_body")
                .input("molecule", validate.output("checked"))
                .outputs(["result"]),
        )
        .unwrap();
    let write = b
        .add_task(
            TaskSpec::new("write", "write_body")
                .input("result", compute.output("result"))
                .outputs(["report"]),
        )
        .unwrap();
    b.set_output("report", write.output("report")).unwrap();
    Arc::new(b.finalize().unwrap())
}

struct ChainCounters {
    read: AtomicUsize,
    validate: AtomicUsize,
    compute: AtomicUsize,
}

/// Backend for the chain graph. `compute_ok` controls whether the compute
/// body succeeds; call counts accumulate across backends sharing `counters`.
fn chain_backend(counters: Arc<ChainCounters>, compute_ok: bool) -> Arc<InProcessBackend> {
    let mut registry = BodyRegistry::new();

    let c = Arc::clone(&counters);
    registry.register("read_body", move |_inputs| {
        c.read.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "molecule": "CCO" }))
    });

    let c = Arc::clone(&counters);
    registry.register("validate_body", move |inputs| {
        c.validate.fetch_add(1, Ordering::SeqCst);
        let molecule = inputs["molecule"].as_str().unwrap_or_default();
        Ok(json!({ "checked": molecule }))
    });

    let c = Arc::clone(&counters);
    registry.register("compute_body", move |inputs| {
        c.compute.fetch_add(1, Ordering::SeqCst);
        if !compute_ok {
            return Err(ChemflowError::Backend("SCF did not converge".into()));
        }
        let molecule = inputs["molecule"].as_str().unwrap_or_default();
        Ok(json!({ "result": format!("minimized {molecule}") }))
    });

    registry.register("write_body", |inputs| {
        let result = inputs["result"].as_str().unwrap_or_default();
        Ok(json!({ "report": format!("report: {result}") }))
    });

    Arc::new(InProcessBackend::new(registry))
}

fn chain_inputs() -> BTreeMap<String, Value> {
    BTreeMap::from([("molecule_json".to_string(), json!({ "smiles": "CCO" }))])
}

#[tokio::test]
async fn failure_checkpoints_then_restart_skips_finished_work() {
    let graph = chain_graph();
    let counters = Arc::new(ChainCounters {
        read: AtomicUsize::new(0),
        validate: AtomicUsize::new(0),
        compute: AtomicUsize::new(0),
    });
    let outdir = TempDir::new().unwrap();

    // First attempt: compute fails mid-chain.
    let backend = chain_backend(Arc::clone(&counters), false);
    let mut runner = Runner::new(
        Arc::clone(&graph),
        backend as Arc<dyn Backend>,
        chain_inputs(),
    );
    let err = runner.run(RunMode::Full).await.unwrap_err();
    assert!(matches!(err, ChemflowError::TaskExecution { .. }));

    assert_eq!(runner.task_state("read").unwrap().status, TaskStatus::Finished);
    assert_eq!(
        runner.task_state("validate").unwrap().status,
        TaskStatus::Finished
    );
    assert_eq!(
        runner.task_state("compute").unwrap().status,
        TaskStatus::Failed
    );
    assert_eq!(
        runner.task_state("write").unwrap().status,
        TaskStatus::Pending
    );

    let path = write_checkpoint(&runner, outdir.path()).unwrap();
    assert_eq!(path.file_name().unwrap(), CHECKPOINT_FILENAME);

    // Restart with a working compute body.
    let backend = chain_backend(Arc::clone(&counters), true);
    let mut resumed = Checkpoint::load(&path)
        .unwrap()
        .restore(Arc::clone(&graph), backend as Arc<dyn Backend>)
        .unwrap();
    let outcome = resumed.run(RunMode::Full).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed));

    // read and validate ran exactly once across both attempts.
    assert_eq!(counters.read.load(Ordering::SeqCst), 1);
    assert_eq!(counters.validate.load(Ordering::SeqCst), 1);
    assert_eq!(counters.compute.load(Ordering::SeqCst), 2);

    let outputs = resumed.outputs().unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].0, "report");
    assert_eq!(outputs[0].1.to_json(), json!("report: minimized CCO"));
}

/// Graph with an interactive selection between two computed stages.
fn selection_graph() -> Arc<WorkflowGraph> {
    let mut b = WorkflowBuilder::new("selection", "img");
    let molecule_json = b.input("molecule_json");

    let read = b
        .add_task(
            TaskSpec::new("read", "read_body")
                .input("description", molecule_json)
                .outputs(["molecule", "choices"]),
        )
        .unwrap();
    let select = b
        .add_task(
            TaskSpec::new("select_atoms", "select_atoms")
                .input("choices", read.output("choices"))
                .outputs(["ligandname", "atom_ids"])
                .interactive(),
        )
        .unwrap();
    let finish = b
        .add_task(
            TaskSpec::new("finish", "finish_body")
                .input("molecule", read.output("molecule"))
                .input("ligandname", select.output("ligandname"))
                .input("atom_ids", select.output("atom_ids"))
                .outputs(["summary"]),
        )
        .unwrap();
    b.set_output("summary", finish.output("summary")).unwrap();
    Arc::new(b.finalize().unwrap())
}

fn selection_backend() -> Arc<InProcessBackend> {
    let mut registry = BodyRegistry::new();
    registry.register("read_body", |_| {
        Ok(json!({ "molecule": "3AID", "choices": ["LIG1", "LIG2"] }))
    });
    // Interactive bodies never execute on any backend.
    registry.register("select_atoms", |_| {
        Err(ChemflowError::Backend("interactive body must not run".into()))
    });
    registry.register("finish_body", |inputs| {
        let name = inputs["ligandname"].as_str().unwrap_or_default();
        let count = inputs["atom_ids"].as_array().map(|a| a.len()).unwrap_or(0);
        Ok(json!({ "summary": format!("{name}: {count} atoms") }))
    });
    Arc::new(InProcessBackend::new(registry))
}

#[tokio::test]
async fn suspension_checkpoint_and_setoutput_resume() {
    let graph = selection_graph();
    let outdir = TempDir::new().unwrap();

    let mut runner = Runner::new(
        Arc::clone(&graph),
        selection_backend() as Arc<dyn Backend>,
        chain_inputs(),
    );
    let outcome = runner.run(RunMode::Full).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Suspended {
            task: "select_atoms".to_string()
        }
    );
    assert_eq!(
        runner.task_state("read").unwrap().status,
        TaskStatus::Finished
    );
    let path = write_checkpoint(&runner, outdir.path()).unwrap();

    // Write the user's answer and feed it through the --setoutput path.
    let answer = outdir.path().join("selection.json");
    std::fs::write(
        &answer,
        serde_json::to_vec(&json!({ "ligandname": "LIG2", "atom_ids": [3, 4, 5] })).unwrap(),
    )
    .unwrap();
    let overrides = parse_overrides(&[format!("select_atoms={}", answer.display())]).unwrap();

    let mut resumed = Checkpoint::load(&path)
        .unwrap()
        .restore(Arc::clone(&graph), selection_backend() as Arc<dyn Backend>)
        .unwrap();
    apply_overrides(&mut resumed, overrides).unwrap();
    let outcome = resumed.run(RunMode::Full).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed));

    let outputs = resumed.outputs().unwrap();
    assert_eq!(outputs[0].1.to_json(), json!("LIG2: 3 atoms"));
}

#[tokio::test]
async fn inject_without_checkpoint_also_completes() {
    let graph = selection_graph();
    let mut runner = Runner::new(
        Arc::clone(&graph),
        selection_backend() as Arc<dyn Backend>,
        chain_inputs(),
    );
    runner
        .inject_outputs(
            "select_atoms",
            bundle_from_json(json!({ "ligandname": "LIG1", "atom_ids": [9] })).unwrap(),
        )
        .unwrap();
    let outcome = runner.run(RunMode::Full).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed));
    assert_eq!(
        runner.outputs().unwrap()[0].1.to_json(),
        json!("LIG1: 1 atoms")
    );
}

#[tokio::test]
async fn preprocess_mode_checkpoint_resumes_into_full_run() {
    let mut b = WorkflowBuilder::new("prep", "img");
    let molecule_json = b.input("molecule_json");
    let read = b
        .add_task(
            TaskSpec::new("read", "read_body")
                .input("description", molecule_json)
                .outputs(["molecule"]),
        )
        .unwrap();
    let validate = b
        .add_task(
            TaskSpec::new("validate", "validate_body")
                .input("molecule", read.output("molecule"))
                .outputs(["success", "pdbstring"])
                .preprocessor(),
        )
        .unwrap();
    let minimize = b
        .add_task(
            TaskSpec::new("minimize", "minimize_body")
                .input("pdbstring", validate.output("pdbstring"))
                .outputs(["results"]),
        )
        .unwrap();
    b.set_output("results", minimize.output("results")).unwrap();
    let graph = Arc::new(b.finalize().unwrap());

    let backend = || {
        let mut registry = BodyRegistry::new();
        registry.register("read_body", |_| Ok(json!({ "molecule": "CCO" })));
        registry.register("validate_body", |_| {
            Ok(json!({ "success": true, "pdbstring": "ATOM      1  C" }))
        });
        registry.register("minimize_body", |_| Ok(json!({ "results": { "energy": -1.5 } })));
        Arc::new(InProcessBackend::new(registry)) as Arc<dyn Backend>
    };

    let outdir = TempDir::new().unwrap();
    let mut runner = Runner::new(Arc::clone(&graph), backend(), chain_inputs());
    let outcome = runner.run(RunMode::PreprocessOnly).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Preprocessed {
            task: "validate".to_string()
        }
    );
    assert_eq!(
        runner.task_state("minimize").unwrap().status,
        TaskStatus::Pending
    );
    let path = write_checkpoint(&runner, outdir.path()).unwrap();

    let mut resumed = Checkpoint::load(&path)
        .unwrap()
        .restore(Arc::clone(&graph), backend())
        .unwrap();
    let outcome = resumed.run(RunMode::Full).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed));
    assert_eq!(
        resumed.outputs().unwrap()[0].1.to_json(),
        json!({ "energy": -1.5 })
    );
}

#[tokio::test]
async fn restart_on_different_graph_is_rejected() {
    let graph = chain_graph();
    let counters = Arc::new(ChainCounters {
        read: AtomicUsize::new(0),
        validate: AtomicUsize::new(0),
        compute: AtomicUsize::new(0),
    });
    let runner = Runner::new(
        Arc::clone(&graph),
        chain_backend(counters, true) as Arc<dyn Backend>,
        chain_inputs(),
    );
    let outdir = TempDir::new().unwrap();
    let path = write_checkpoint(&runner, outdir.path()).unwrap();

    let err = Checkpoint::load(&path)
        .unwrap()
        .restore(selection_graph(), selection_backend() as Arc<dyn Backend>)
        .unwrap_err();
    assert!(matches!(err, ChemflowError::RestartMismatch { .. }));
}
