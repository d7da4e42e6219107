//! Workflow input payload resolution
//!
//! The `inputfile` argument is deliberately ambiguous and resolved in order:
//! first as inline JSON text, then by extension as a JSON/YAML file, and
//! finally as an arbitrary file whose raw bytes are wrapped as
//! `{filename, content}` so a body can sniff the format itself.

use std::path::Path;

use serde_json::Value;

use crate::error::ChemflowError;

const STRUCTURED_EXTENSIONS: &[&str] = &["js", "json", "yml", "yaml"];

/// Resolve the input argument to the workflow payload
pub fn process_input(argument: &str) -> Result<Value, ChemflowError> {
    if let Some(inline) = inline_json(argument) {
        return Ok(serde_json::from_str(inline)?);
    }

    let path = Path::new(argument);
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let content = std::fs::read_to_string(path)?;
    if STRUCTURED_EXTENSIONS.contains(&extension.as_str()) {
        // YAML is a JSON superset, one parser covers both
        Ok(serde_yaml::from_str(&content)?)
    } else {
        Ok(serde_json::json!({
            "filename": argument,
            "content": content,
        }))
    }
}

/// Accept the argument itself as JSON if it looks like a braced object,
/// tolerating one or more layers of shell quoting.
fn inline_json(argument: &str) -> Option<&str> {
    let mut s = argument.trim();
    while s.len() >= 2 {
        let bytes = s.as_bytes();
        let (first, last) = (bytes[0], bytes[s.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            s = s[1..s.len() - 1].trim();
        } else {
            break;
        }
    }
    if s.starts_with('{') && s.ends_with('}') {
        Some(s)
    } else {
        None
    }
}
