//! Sanitization phase: bracketed tags whose key the resolver cannot parse are
//! replaced by a visible, escaped notice.

use tracing::warn;

use crate::domain::document::TemplateDocument;

use super::{
    rewrite::{Decision, rewrite_document},
    tags::{BRACKET_TAG, invalid_tag_notice, is_legal_key},
};

pub(crate) fn apply(document: &mut TemplateDocument) -> usize {
    rewrite_document(document, &BRACKET_TAG, |captures| {
        let key = captures.get(1).map_or("", |m| m.as_str()).trim();
        if is_legal_key(key) {
            return Decision::Skip;
        }
        let tag = captures.get(0).map_or("", |m| m.as_str());
        warn!(
            target = "application::template::sanitize",
            tag = %tag,
            "replacing tag with illegal key"
        );
        Decision::Replace(invalid_tag_notice(tag))
    })
}
