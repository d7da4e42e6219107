//! Interactive-output overrides (`--setoutput`)
//!
//! Interactive tasks are a first-class suspend point: a run halts when it
//! reaches one, and a human's choice re-enters the graph on the next
//! invocation as `--setoutput taskname=file.json`, where the file holds the
//! task's output fields as a JSON object.

use std::collections::BTreeMap;

use crate::error::ChemflowError;
use crate::graph::{bundle_from_json, OutputBundle};
use crate::runner::Runner;

/// Parse `--setoutput name=file` arguments into output bundles
pub fn parse_overrides(
    specs: &[String],
) -> Result<BTreeMap<String, OutputBundle>, ChemflowError> {
    let mut overrides = BTreeMap::new();
    for spec in specs {
        let (task, file) = spec.split_once('=').ok_or_else(|| {
            ChemflowError::SetOutputSpec {
                argument: spec.clone(),
            }
        })?;
        let content = std::fs::read_to_string(file)?;
        let bundle = bundle_from_json(serde_json::from_str(&content)?).map_err(|e| {
            ChemflowError::InjectionMismatch {
                task: task.to_string(),
                details: e.to_string(),
            }
        })?;
        overrides.insert(task.to_string(), bundle);
    }
    Ok(overrides)
}

/// Install every override on the runner before running or resuming
pub fn apply_overrides(
    runner: &mut Runner,
    overrides: BTreeMap<String, OutputBundle>,
) -> Result<(), ChemflowError> {
    for (task, bundle) in overrides {
        runner.inject_outputs(&task, bundle)?;
    }
    Ok(())
}
