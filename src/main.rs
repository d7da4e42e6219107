//! Chemflow CLI - run chemistry-simulation workflow graphs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use serde_json::Value;

use chemflow::backend::{Backend, DockerBackend, InProcessBackend, RemoteBackend};
use chemflow::checkpoint::{write_checkpoint, Checkpoint, CHECKPOINT_FILENAME};
use chemflow::error::{ChemflowError, FixSuggestion};
use chemflow::graph::OutputValue;
use chemflow::input::process_input;
use chemflow::interactive::{apply_overrides, parse_overrides};
use chemflow::materialize::OutputMaterializer;
use chemflow::runner::{RunMode, RunOutcome, Runner};
use chemflow::{apps, WorkflowGraph};

#[derive(Parser)]
#[command(name = "chemflow")]
#[command(about = "Chemflow - declarative chemistry workflow runner")]
#[command(version)]
struct Cli {
    /// Workflow application name (see `chemflow --help` for the list)
    appname: String,

    /// Input file (.json/.yaml description, raw molecule file, or inline JSON).
    /// With --restart, a previous run's checkpoint file.
    inputfile: String,

    /// Output directory (default: auto-numbered <appname>.out.N)
    #[arg(long)]
    outputdir: Option<PathBuf>,

    /// Run task containers with a local docker daemon
    #[arg(long, conflicts_with = "here")]
    localdocker: bool,

    /// Run task bodies in-process, no containers
    #[arg(long)]
    here: bool,

    /// Stop after the preprocessing step and emit its outputs
    #[arg(long)]
    preprocess: bool,

    /// Resume from a checkpoint file instead of starting fresh
    #[arg(long)]
    restart: bool,

    /// Inject outputs for an interactive task: TASK=FILE (repeatable)
    #[arg(long = "setoutput", value_name = "TASK=FILE")]
    setoutput: Vec<String>,

    /// Also write every finished task's outputs under <outdir>/tasks/
    #[arg(long)]
    dumptasks: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run_app(&cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

async fn run_app(cli: &Cli) -> Result<(), ChemflowError> {
    let graph = apps::build(&cli.appname)?;
    let backend = select_backend(cli)?;

    let outdir = match &cli.outputdir {
        Some(dir) => dir.clone(),
        None => next_output_dir(&cli.appname),
    };
    std::fs::create_dir_all(&outdir)?;
    println!(
        "{} Writing outputs to {}",
        "→".cyan(),
        outdir.display().to_string().cyan()
    );

    let mut runner = if cli.restart {
        let checkpoint = Checkpoint::load(Path::new(&cli.inputfile))?;
        checkpoint.restore(Arc::clone(&graph), Arc::clone(&backend))?
    } else {
        let payload = process_input(&cli.inputfile)?;
        let inputs = bind_graph_inputs(&graph, payload)?;
        Runner::new(Arc::clone(&graph), Arc::clone(&backend), inputs)
    };

    let overrides = parse_overrides(&cli.setoutput)?;
    apply_overrides(&mut runner, overrides)?;

    let mode = if cli.preprocess {
        RunMode::PreprocessOnly
    } else {
        RunMode::Full
    };

    let outcome = match runner.run(mode).await {
        Ok(outcome) => outcome,
        Err(e) => {
            // Preserve finished work so the run can be resumed after a fix.
            if let Some(path) = write_checkpoint(&runner, &outdir) {
                eprintln!(
                    "{} Checkpoint saved; resume with: chemflow {} {} --restart",
                    "→".yellow(),
                    cli.appname,
                    path.display()
                );
            }
            return Err(e);
        }
    };

    let materializer = OutputMaterializer::new(outdir.clone(), Arc::clone(&backend));
    match outcome {
        RunOutcome::Completed => {
            let outputs = runner.outputs()?;
            let report = materializer.materialize_all(&outputs).await;
            if cli.dumptasks {
                materializer.dump_tasks(&runner).await;
            }
            write_checkpoint(&runner, &outdir);
            if report.all_ok() {
                println!("{} Workflow '{}' finished", "✓".green(), graph.name());
            } else {
                println!(
                    "{} Workflow '{}' finished; {} output(s) could not be written",
                    "!".yellow(),
                    graph.name(),
                    report.failures.len()
                );
            }
        }
        RunOutcome::Preprocessed { task } => {
            let outputs = preprocessed_outputs(&runner, &task)?;
            materializer.materialize_all(&outputs).await;
            write_checkpoint(&runner, &outdir);
            println!(
                "{} Preprocessing stopped after '{}'",
                "✓".green(),
                task.cyan()
            );
        }
        RunOutcome::Suspended { task } => {
            write_checkpoint(&runner, &outdir);
            println!(
                "{} Workflow suspended: task '{}' needs user-provided outputs",
                "⏸".yellow(),
                task.cyan()
            );
            println!(
                "  Resume with: chemflow {} {} --restart --setoutput {}=<file.json>",
                cli.appname,
                outdir.join(CHECKPOINT_FILENAME).display(),
                task
            );
        }
    }

    Ok(())
}

fn select_backend(cli: &Cli) -> Result<Arc<dyn Backend>, ChemflowError> {
    if cli.here {
        Ok(Arc::new(InProcessBackend::with_builtin_bodies()))
    } else if cli.localdocker {
        Ok(Arc::new(DockerBackend::new()))
    } else {
        Ok(Arc::new(RemoteBackend::from_env()?))
    }
}

/// Bind the CLI payload to the graph's declared inputs. A single declared
/// input gets the whole payload; multiple inputs require a JSON object keyed
/// by input name.
fn bind_graph_inputs(
    graph: &WorkflowGraph,
    payload: Value,
) -> Result<std::collections::BTreeMap<String, Value>, ChemflowError> {
    let declared = graph.graph_inputs();
    let mut bound = std::collections::BTreeMap::new();
    if declared.len() == 1 {
        let name = declared.iter().next().cloned().unwrap_or_default();
        bound.insert(name, payload);
        return Ok(bound);
    }
    let Value::Object(mut map) = payload else {
        let names: Vec<_> = declared.iter().cloned().collect();
        return Err(ChemflowError::UnboundGraphInput {
            name: names.join(", "),
        });
    };
    for name in declared {
        let value = map
            .remove(name)
            .ok_or_else(|| ChemflowError::UnboundGraphInput { name: name.clone() })?;
        bound.insert(name.clone(), value);
    }
    Ok(bound)
}

/// The preprocessing stop emits the stop task's own outputs, named by field.
fn preprocessed_outputs(
    runner: &Runner,
    task: &str,
) -> Result<Vec<(String, OutputValue)>, ChemflowError> {
    let state = runner
        .task_state(task)
        .ok_or_else(|| ChemflowError::UnknownTask {
            task: task.to_string(),
        })?;
    Ok(state
        .outputs
        .iter()
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect())
}

fn next_output_dir(appname: &str) -> PathBuf {
    let mut n = 0;
    loop {
        let candidate = PathBuf::from(format!("{appname}.out.{n}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
