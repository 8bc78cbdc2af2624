//! Normalization phase: double-brace tags become bracketed tags when their
//! path resolves, so one resolver handles both syntaxes.

use serde_json::Value;

use crate::domain::document::TemplateDocument;

use super::{
    rewrite::{Decision, rewrite_document},
    tags::{BRACE_TAG, bracket_tag, invalid_tag_notice, is_legal_key, lookup_path},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NormalizeOutcome {
    pub(crate) rewritten: usize,
    pub(crate) unresolved: usize,
}

pub(crate) fn apply(document: &mut TemplateDocument, data: &Value, preserve: bool) -> NormalizeOutcome {
    let mut outcome = NormalizeOutcome::default();
    rewrite_document(document, &BRACE_TAG, |captures| {
        let key = captures.get(1).map_or("", |m| m.as_str()).trim();
        if !key.is_empty() && !is_legal_key(key) {
            let tag = captures.get(0).map_or("", |m| m.as_str());
            return Decision::Replace(invalid_tag_notice(tag));
        }
        if !key.is_empty() && lookup_path(data, key).is_some() {
            outcome.rewritten += 1;
            return Decision::Replace(bracket_tag(key));
        }
        outcome.unresolved += 1;
        if preserve {
            Decision::Skip
        } else {
            Decision::Remove
        }
    });
    outcome
}
