//! Template substitution pipeline.
//!
//! Phases run in a fixed order, each over the whole document:
//! 1. images (token indirection), 2. sanitization of illegal bracketed tags,
//! 3. normalization of double-brace tags, 4. structured resolution.
//! Phases 1 to 3 are best-effort; a phase 4 failure aborts the render.

mod image;
mod normalize;
mod resolve;
mod rewrite;
mod sanitize;
pub(crate) mod tags;

use std::time::Instant;

use metrics::histogram;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::engine::EngineError;
use crate::domain::document::TemplateDocument;
use crate::domain::types::OutputFormat;

pub const METRIC_RENDER_MS: &str = "docflow_render_ms";

/// Caller options for a render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    /// Keep unresolved tags visible instead of removing them (interactive preview).
    #[serde(default)]
    pub preserve_placeholders: bool,
    #[serde(default)]
    pub output: OutputFormat,
}

impl RenderOptions {
    pub fn preview(output: OutputFormat) -> Self {
        Self {
            preserve_placeholders: true,
            output,
        }
    }

    pub fn final_render(output: OutputFormat) -> Self {
        Self {
            preserve_placeholders: false,
            output,
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template error: {0}")]
    Template(String),
    #[error("data error: {0}")]
    Data(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Run all four phases over `document`.
pub fn render_document(
    mut document: TemplateDocument,
    data: &Value,
    preserve_placeholders: bool,
) -> Result<TemplateDocument, RenderError> {
    let started_at = Instant::now();
    if !data.is_object() {
        warn!(
            target = "application::template",
            op = "template::render",
            "render data is not an object; only literal text will survive"
        );
    }

    let images = image::apply(&mut document, data);
    let sanitized = sanitize::apply(&mut document);
    let normalized = normalize::apply(&mut document, data, preserve_placeholders);

    let rendered = resolve::apply(document, data, preserve_placeholders).inspect_err(|err| {
        warn!(
            target = "application::template",
            op = "template::render",
            result = "error",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            error = %err,
            "structured resolution failed"
        );
    })?;

    let elapsed = started_at.elapsed();
    histogram!(METRIC_RENDER_MS).record(elapsed.as_secs_f64() * 1000.0);
    info!(
        target = "application::template",
        op = "template::render",
        result = "ok",
        elapsed_ms = elapsed.as_millis() as u64,
        images,
        sanitized,
        normalized = normalized.rewritten,
        unresolved = normalized.unresolved,
        preserve_placeholders,
        paragraphs = rendered.paragraphs.len(),
        "template rendered"
    );

    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::document::{Paragraph, Run};
    use serde_json::json;

    #[test]
    fn preserve_mode_keeps_a_bracketed_tag_for_missing_keys() {
        let template = TemplateDocument::from_plain_text("Name: <<[name]>> / {{city}}");

        let preserved = render_document(template.clone(), &json!({}), true).expect("render");
        let text = preserved.text();
        assert!(text.contains("<<[name]>>"), "{text}");
        assert!(text.contains("{{city}}"), "{text}");

        let dropped = render_document(template, &json!({}), false).expect("render");
        assert_eq!(dropped.text(), "Name:  / ");
    }

    #[test]
    fn image_is_embedded_at_requested_size_and_token_is_gone() {
        let template = TemplateDocument::new(vec![Paragraph::new(vec![
            Run::text("Signature: "),
            Run::text("<<[img]>>"),
        ])]);
        let data = json!({
            "img": format!("data:image/png;base64,{}|width=50|height=50", image::tests::ONE_PIXEL_PNG)
        });

        let rendered = render_document(template, &data, false).expect("render");

        let images: Vec<_> = rendered.images().collect();
        assert_eq!(images.len(), 1);
        assert_eq!((images[0].width, images[0].height), (50, 50));
        assert!(!rendered.text().contains("__DOCFLOW_IMG_"));
        assert_eq!(rendered.text(), "Signature: ");
    }

    #[test]
    fn illegal_tags_never_reach_resolution() {
        let template = TemplateDocument::from_plain_text("Cost <<[a$b]>> and {{c$d}}");
        let data = json!({ "a$b": 1, "c$d": 2 });
        let rendered = render_document(template, &data, false).expect("render");
        assert_eq!(
            rendered.text(),
            "Cost [invalid tag: &lt;&lt;[a$b]&gt;&gt;] and [invalid tag: {{c$d}}]"
        );
    }

    #[test]
    fn both_syntaxes_resolve_identically() {
        let template =
            TemplateDocument::from_plain_text("<<[customer.name]>>|{{ customer.name }}");
        let data = json!({ "customer": { "name": "Ada" } });
        let rendered = render_document(template, &data, false).expect("render");
        assert_eq!(rendered.text(), "Ada|Ada");
    }

    #[test]
    fn resolution_failure_aborts_the_render() {
        let template = TemplateDocument::from_plain_text("<<foreach [x in xs]>>");
        let err = render_document(template, &json!({ "xs": [1] }), false).expect_err("unclosed");
        assert!(matches!(err, RenderError::Template(_)));
    }
}
