//! Built-in workflow applications
//!
//! These are instances of the engine, not part of it: each module declares
//! one task graph over opaque chemistry bodies that live in their container
//! images. Only the pure data-plumbing bodies are available in-process.

mod minimize;
mod vde;

use std::sync::Arc;

use serde_json::Value;

use crate::backend::BodyRegistry;
use crate::error::ChemflowError;
use crate::graph::WorkflowGraph;

/// Container image versions, pinned per app release
const VERSION: &str = "0.0.1b1";

pub(crate) fn mdt_image() -> String {
    format!("docker.io/avirshup/mst:mdt_subprocess-{VERSION}")
}

pub(crate) fn nwchem_image() -> String {
    format!("docker.io/avirshup/mst:mdt_nwchem-{VERSION}")
}

pub(crate) fn ambertools_image() -> String {
    format!("docker.io/avirshup/mst:mdt_ambertools-{VERSION}")
}

/// Names accepted as the CLI `appname` argument
pub const APP_NAMES: &[&str] = &["MMminimize", "vde"];

/// Build the named application graph
pub fn build(name: &str) -> Result<Arc<WorkflowGraph>, ChemflowError> {
    let graph = match name {
        "MMminimize" => minimize::build()?,
        "vde" => vde::build()?,
        _ => {
            return Err(ChemflowError::UnknownWorkflow {
                name: name.to_string(),
                available: APP_NAMES.join(", "),
            });
        }
    };
    Ok(Arc::new(graph))
}

/// Bodies runnable without a container image.
///
/// Chemistry bodies (force-field assignment, QM calls) are container-only;
/// registering them here would require the scientific toolchain in-process.
pub fn builtin_bodies() -> BodyRegistry {
    let mut registry = BodyRegistry::new();
    registry.register("read_molecule", |inputs| {
        let description = inputs.get("description").ok_or_else(|| {
            ChemflowError::Backend("read_molecule needs a 'description' input".into())
        })?;
        Ok(serde_json::json!({ "mol": normalize_description(description)? }))
    });
    registry
}

/// Normalize the molecule description into a `{source, data}` descriptor.
///
/// Bare `input` strings are disambiguated with the same heuristic as the
/// container body: a 4-character token with a leading digit is a PDB id.
fn normalize_description(description: &Value) -> Result<Value, ChemflowError> {
    let map = description.as_object().ok_or_else(|| {
        ChemflowError::Backend(format!("molecule description must be an object: {description}"))
    })?;

    for source in ["filename", "smiles", "iupac", "inchi", "pdb"] {
        if let Some(value) = map.get(source) {
            let mut descriptor = serde_json::json!({ "source": source, "data": value });
            if source == "filename" {
                descriptor["content"] = map.get("content").cloned().unwrap_or(Value::Null);
            }
            return Ok(descriptor);
        }
    }

    if let Some(data) = map.get("input").and_then(Value::as_str) {
        let source = if data.len() == 4 && data.as_bytes()[0].is_ascii_digit() {
            "pdb"
        } else {
            "smiles"
        };
        return Ok(serde_json::json!({ "source": source, "data": data }));
    }

    Err(ChemflowError::Backend(format!(
        "could not interpret molecule description: {description}"
    )))
}
