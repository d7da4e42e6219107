//! CLI-level tests driving the compiled binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn chemflow() -> Command {
    Command::cargo_bin("chemflow").unwrap()
}

#[test]
fn help_lists_run_flags() {
    chemflow()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--preprocess"))
        .stdout(predicate::str::contains("--setoutput"))
        .stdout(predicate::str::contains("--restart"));
}

#[test]
fn unknown_app_fails_with_available_list() {
    let outdir = TempDir::new().unwrap();
    chemflow()
        .arg("not_an_app")
        .arg("{\"smiles\": \"CCO\"}")
        .arg("--here")
        .arg("--outputdir")
        .arg(outdir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("CWF-001"))
        .stderr(predicate::str::contains("MMminimize"));
}

#[test]
fn missing_input_file_fails() {
    let outdir = TempDir::new().unwrap();
    chemflow()
        .arg("vde")
        .arg("definitely_not_here.json")
        .arg("--here")
        .arg("--outputdir")
        .arg(outdir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn malformed_setoutput_spec_fails() {
    let outdir = TempDir::new().unwrap();
    chemflow()
        .arg("MMminimize")
        .arg("{\"smiles\": \"CCO\"}")
        .arg("--here")
        .arg("--outputdir")
        .arg(outdir.path())
        .arg("--setoutput")
        .arg("no_separator_here")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

/// In-process mode only carries data-plumbing bodies. A preprocess run gets
/// through read_molecule, then fails on the first chemistry body; the partial
/// progress must still be checkpointed with a resume hint.
#[test]
fn here_mode_checkpoints_partial_progress_on_chemistry_body() {
    let outdir = TempDir::new().unwrap();
    chemflow()
        .arg("MMminimize")
        .arg("{\"smiles\": \"CCO\"}")
        .arg("--here")
        .arg("--preprocess")
        .arg("--outputdir")
        .arg(outdir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("CWF-021"))
        .stderr(predicate::str::contains("--restart"));
    assert!(outdir.path().join("workflow_state.json").exists());
}

#[test]
fn default_outdir_numbering_starts_at_zero() {
    let cwd = TempDir::new().unwrap();
    chemflow()
        .current_dir(cwd.path())
        .arg("MMminimize")
        .arg("{\"smiles\": \"CCO\"}")
        .arg("--here")
        .arg("--preprocess")
        .assert()
        .failure();
    assert!(cwd.path().join("MMminimize.out.0").exists());
}

#[test]
fn restart_from_garbage_checkpoint_fails() {
    let outdir = TempDir::new().unwrap();
    let bogus = outdir.path().join("workflow_state.json");
    std::fs::write(&bogus, b"not json at all").unwrap();
    chemflow()
        .arg("vde")
        .arg(&bogus)
        .arg("--here")
        .arg("--restart")
        .arg("--outputdir")
        .arg(outdir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}
