//! `{name}` placeholder substitution for request paths.

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::{Map as JsonMap, Value};

/// Names of the `{name}` placeholders in `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            break;
        };
        let name = &after[..end];
        if !name.is_empty() && !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
        rest = &after[end + 1..];
    }
    names
}

/// Fill placeholders from `variables`, percent-encoding each value.
///
/// Returns the resolved path and the variable names that were consumed.
/// Placeholders without a matching variable stay in the output unchanged.
pub fn fill_path_template(template: &str, variables: &JsonMap<String, Value>) -> (String, Vec<String>) {
    let mut path = template.to_string();
    let mut consumed = Vec::new();
    for name in placeholders(template) {
        let Some(value) = variables.get(&name) else {
            continue;
        };
        let raw = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        let encoded = utf8_percent_encode(&raw, NON_ALPHANUMERIC).to_string();
        path = path.replace(&format!("{{{name}}}"), &encoded);
        consumed.push(name);
    }
    (path, consumed)
}
