//! Field discovery for uploaded templates.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::application::template::tags::{BRACE_TAG, BRACKET_TAG};
use crate::domain::document::TemplateDocument;

/// Collect the trimmed, deduplicated keys referenced by either tag syntax.
pub fn scan_text(text: &str) -> BTreeSet<String> {
    [&*BRACKET_TAG, &*BRACE_TAG]
        .into_iter()
        .flat_map(|pattern| pattern.captures_iter(text))
        .filter_map(|captures| captures.get(1))
        .map(|key| key.as_str().trim())
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn scan_document(document: &TemplateDocument) -> BTreeSet<String> {
    scan_text(&document.text())
}

/// Initial mapping for a new template: every field maps to `"[field]"`.
pub fn mapping_skeleton(fields: &BTreeSet<String>) -> Value {
    let map: Map<String, Value> = fields
        .iter()
        .map(|field| (field.clone(), Value::String(format!("[{field}]"))))
        .collect();
    Value::Object(map)
}
