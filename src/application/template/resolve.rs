//! Structured resolution phase: expands `<<foreach [item in list]>>` sections
//! and resolves `<<[path]>>` field tags against the data object.
//!
//! A `foreach` whose opening tag is the only content of its paragraph repeats
//! whole paragraphs up to a paragraph holding only `<</foreach>>`. Any other
//! `foreach` must open and close inside one paragraph and repeats inline.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::domain::document::{EmbeddedImage, Paragraph, Run, RunStyle, TemplateDocument};

use super::{
    RenderError,
    image::{is_image_data_uri, parse_image_value},
    rewrite::{Decision, rewrite_document},
    tags::{REPORT_TAG, bracket_tag, lookup_path},
};

static FOREACH_HEADER: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s+in\s+(\S.*?)\s*$") {
        Ok(regex) => regex,
        Err(err) => unreachable!("foreach header pattern is invalid: {err}"),
    }
});

pub(crate) fn apply(
    mut document: TemplateDocument,
    data: &Value,
    preserve: bool,
) -> Result<TemplateDocument, RenderError> {
    // Pull every tag into a single run before tokenizing.
    rewrite_document(&mut document, &REPORT_TAG, |captures| {
        Decision::Replace(captures[0].to_string())
    });

    let blocks = parse_blocks(&document.paragraphs)?;
    let mut evaluator = Evaluator {
        root: data,
        preserve,
        scopes: Vec::new(),
    };
    let mut paragraphs = Vec::with_capacity(document.paragraphs.len());
    evaluator.blocks(&blocks, &mut paragraphs)?;
    Ok(TemplateDocument::new(paragraphs))
}

enum Token<'d> {
    Text(&'d str, RunStyle),
    Image(&'d EmbeddedImage),
    Field { path: &'d str, style: RunStyle },
    Open { var: &'d str, source: &'d str },
    Close,
}

impl Token<'_> {
    fn is_blank(&self) -> bool {
        matches!(self, Token::Text(text, _) if text.trim().is_empty())
    }
}

enum Block<'d> {
    Paragraph(Vec<Inline<'d>>),
    Repeat {
        var: &'d str,
        source: &'d str,
        body: Vec<Block<'d>>,
    },
}

enum Inline<'d> {
    Text(&'d str, RunStyle),
    Image(&'d EmbeddedImage),
    Field { path: &'d str, style: RunStyle },
    Repeat {
        var: &'d str,
        source: &'d str,
        body: Vec<Inline<'d>>,
    },
}

struct Frame<'d, T> {
    var: &'d str,
    source: &'d str,
    body: Vec<T>,
}

fn tokenize(paragraph: &Paragraph) -> Result<Vec<Token<'_>>, RenderError> {
    let mut tokens = Vec::new();
    for run in &paragraph.runs {
        match run {
            Run::Image(image) => tokens.push(Token::Image(&image.image)),
            Run::Text(run) => {
                let text = run.text.as_str();
                let mut last = 0;
                for tag in REPORT_TAG.find_iter(text) {
                    if tag.start() > last {
                        tokens.push(Token::Text(&text[last..tag.start()], run.style));
                    }
                    tokens.push(parse_tag(tag.as_str(), run.style)?);
                    last = tag.end();
                }
                if last < text.len() {
                    tokens.push(Token::Text(&text[last..], run.style));
                }
            }
        }
    }
    Ok(tokens)
}

fn parse_tag(tag: &str, style: RunStyle) -> Result<Token<'_>, RenderError> {
    if tag == "<</foreach>>" {
        return Ok(Token::Close);
    }
    if let Some(path) = tag.strip_prefix("<<[").and_then(|rest| rest.strip_suffix("]>>")) {
        return Ok(Token::Field {
            path: path.trim(),
            style,
        });
    }

    let header = tag
        .strip_prefix("<<foreach")
        .and_then(|rest| rest.strip_suffix(">>"))
        .map(str::trim)
        .and_then(|rest| rest.strip_prefix('['))
        .and_then(|rest| rest.strip_suffix(']'));
    let captures = header.and_then(|header| FOREACH_HEADER.captures(header));
    match captures.and_then(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str()))) {
        Some((var, source)) => Ok(Token::Open { var, source }),
        None => Err(RenderError::Template(format!(
            "malformed foreach tag `{tag}`; expected `<<foreach [item in list]>>`"
        ))),
    }
}

enum Control<'d> {
    Open(&'d str, &'d str),
    Close,
}

fn standalone_control<'d>(tokens: &[Token<'d>]) -> Option<Control<'d>> {
    let mut significant = tokens.iter().filter(|token| !token.is_blank());
    let only = significant.next()?;
    if significant.next().is_some() {
        return None;
    }
    match only {
        Token::Open { var, source } => Some(Control::Open(*var, *source)),
        Token::Close => Some(Control::Close),
        _ => None,
    }
}

fn parse_blocks(paragraphs: &[Paragraph]) -> Result<Vec<Block<'_>>, RenderError> {
    let mut root = Vec::new();
    let mut stack: Vec<Frame<'_, Block<'_>>> = Vec::new();

    for paragraph in paragraphs {
        let tokens = tokenize(paragraph)?;
        let block = match standalone_control(&tokens) {
            Some(Control::Open(var, source)) => {
                stack.push(Frame {
                    var,
                    source,
                    body: Vec::new(),
                });
                continue;
            }
            Some(Control::Close) => {
                let frame = stack.pop().ok_or_else(|| {
                    RenderError::Template("`<</foreach>>` has no matching `<<foreach>>`".into())
                })?;
                Block::Repeat {
                    var: frame.var,
                    source: frame.source,
                    body: frame.body,
                }
            }
            None => Block::Paragraph(parse_inlines(tokens)?),
        };
        match stack.last_mut() {
            Some(frame) => frame.body.push(block),
            None => root.push(block),
        }
    }

    match stack.pop() {
        Some(frame) => Err(unclosed(frame.var, frame.source)),
        None => Ok(root),
    }
}

fn parse_inlines(tokens: Vec<Token<'_>>) -> Result<Vec<Inline<'_>>, RenderError> {
    let mut root = Vec::new();
    let mut stack: Vec<Frame<'_, Inline<'_>>> = Vec::new();

    for token in tokens {
        let inline = match token {
            Token::Text(text, style) => Inline::Text(text, style),
            Token::Image(image) => Inline::Image(image),
            Token::Field { path, style } => Inline::Field { path, style },
            Token::Open { var, source } => {
                stack.push(Frame {
                    var,
                    source,
                    body: Vec::new(),
                });
                continue;
            }
            Token::Close => {
                let frame = stack.pop().ok_or_else(|| {
                    RenderError::Template("`<</foreach>>` has no matching `<<foreach>>`".into())
                })?;
                Inline::Repeat {
                    var: frame.var,
                    source: frame.source,
                    body: frame.body,
                }
            }
        };
        match stack.last_mut() {
            Some(frame) => frame.body.push(inline),
            None => root.push(inline),
        }
    }

    match stack.pop() {
        Some(frame) => Err(unclosed(frame.var, frame.source)),
        None => Ok(root),
    }
}

fn unclosed(var: &str, source: &str) -> RenderError {
    RenderError::Template(format!(
        "`<<foreach [{var} in {source}]>>` is not closed; close it in the same paragraph \
         or put both tags in paragraphs of their own"
    ))
}

struct Evaluator<'d, 'v> {
    root: &'v Value,
    preserve: bool,
    scopes: Vec<(&'d str, &'v Value)>,
}

impl<'d, 'v> Evaluator<'d, 'v> {
    fn blocks(&mut self, blocks: &[Block<'d>], out: &mut Vec<Paragraph>) -> Result<(), RenderError> {
        for block in blocks {
            match block {
                Block::Paragraph(inlines) => {
                    let mut runs = Vec::with_capacity(inlines.len());
                    self.inlines(inlines, &mut runs)?;
                    out.push(Paragraph::new(runs));
                }
                Block::Repeat { var, source, body } => {
                    for item in self.items(source)? {
                        self.scopes.push((*var, item));
                        let result = self.blocks(body, out);
                        self.scopes.pop();
                        result?;
                    }
                }
            }
        }
        Ok(())
    }

    fn inlines(&mut self, inlines: &[Inline<'d>], runs: &mut Vec<Run>) -> Result<(), RenderError> {
        for inline in inlines {
            match inline {
                Inline::Text(text, style) => runs.push(Run::styled(*text, *style)),
                Inline::Image(image) => runs.push(Run::image((*image).clone())),
                Inline::Field { path, style } => self.field(path, *style, runs),
                Inline::Repeat { var, source, body } => {
                    for item in self.items(source)? {
                        self.scopes.push((*var, item));
                        let result = self.inlines(body, runs);
                        self.scopes.pop();
                        result?;
                    }
                }
            }
        }
        Ok(())
    }

    fn field(&self, path: &str, style: RunStyle, runs: &mut Vec<Run>) {
        match self.resolve(path) {
            Some(Value::String(text)) if is_image_data_uri(text) => match parse_image_value(text) {
                Ok(image) => runs.push(Run::image(image)),
                Err(err) => warn!(
                    target = "application::template::resolve",
                    path = %path,
                    error = %err,
                    "dropping unreadable image value"
                ),
            },
            Some(value) => {
                let text = display_value(value);
                if !text.is_empty() {
                    runs.push(Run::styled(text, style));
                }
            }
            None if self.preserve => runs.push(Run::styled(bracket_tag(path), style)),
            None => {}
        }
    }

    fn items(&self, source: &str) -> Result<&'v [Value], RenderError> {
        match self.resolve(source) {
            None | Some(Value::Null) => Ok(&[]),
            Some(Value::Array(items)) => Ok(items.as_slice()),
            Some(other) => Err(RenderError::Data(format!(
                "`{source}` is not a list (found {})",
                value_kind(other)
            ))),
        }
    }

    /// Loop variables shadow top-level keys, innermost first.
    fn resolve(&self, path: &str) -> Option<&'v Value> {
        let path = path.trim();
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head.trim(), Some(rest)),
            None => (path, None),
        };
        let scoped = self
            .scopes
            .iter()
            .rev()
            .find(|(name, _)| *name == head)
            .map(|(_, value)| *value);
        match (scoped, rest) {
            (Some(value), Some(rest)) => lookup_path(value, rest),
            (Some(value), None) => Some(value),
            (None, _) => lookup_path(self.root, path),
        }
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(lines: &[&str]) -> TemplateDocument {
        TemplateDocument::new(lines.iter().map(|line| Paragraph::from_text(*line)).collect())
    }

    #[test]
    fn resolves_nested_fields() {
        let template = document(&["Dear <<[customer.name]>>, total <<[total]>> <<[paid]>>"]);
        let data = json!({ "customer": { "name": "Ada" }, "total": 12.5, "paid": true });
        let output = apply(template, &data, false).expect("render");
        assert_eq!(output.text(), "Dear Ada, total 12.5 true");
    }

    #[test]
    fn expands_inline_repeats() {
        let template = document(&["Items: <<foreach [item in items]>><<[item.sku]>>;<</foreach>>"]);
        let data = json!({ "items": [ { "sku": "A" }, { "sku": "B" } ] });
        let output = apply(template, &data, false).expect("render");
        assert_eq!(output.text(), "Items: A;B;");
    }

    #[test]
    fn expands_paragraph_repeats_with_access_to_root() {
        let template = document(&[
            "Order <<[number]>>",
            "<<foreach [row in rows]>>",
            "- <<[row.name]>> x<<[row.qty]>> (<<[number]>>)",
            "<</foreach>>",
            "Thanks",
        ]);
        let data = json!({
            "number": 7,
            "rows": [ { "name": "Pen", "qty": 2 }, { "name": "Ink", "qty": 1 } ]
        });
        let output = apply(template, &data, false).expect("render");
        assert_eq!(output.text(), "Order 7\n- Pen x2 (7)\n- Ink x1 (7)\nThanks");
    }

    #[test]
    fn nested_repeats_shadow_outer_names() {
        let template = document(&[
            "<<foreach [g in groups]>><<[g.name]>>:<<foreach [g in g.members]>><<[g]>>,<</foreach>> <</foreach>>",
        ]);
        let data = json!({
            "groups": [
                { "name": "x", "members": ["a", "b"] },
                { "name": "y", "members": [] }
            ]
        });
        let output = apply(template, &data, false).expect("render");
        assert_eq!(output.text(), "x:a,b, y: ");
    }

    #[test]
    fn missing_members_collapse_or_are_preserved() {
        let template = document(&["[<<[ missing.field ]>>]"]);
        let collapsed = apply(template.clone(), &json!({}), false).expect("render");
        assert_eq!(collapsed.text(), "[]");

        let preserved = apply(template, &json!({}), true).expect("render");
        assert_eq!(preserved.text(), "[<<[missing.field]>>]");
    }

    #[test]
    fn repeat_over_missing_list_yields_nothing() {
        let template = document(&["<<foreach [x in absent]>><<[x]>><</foreach>>done"]);
        let output = apply(template, &json!({}), false).expect("render");
        assert_eq!(output.text(), "done");
    }

    #[test]
    fn repeat_over_scalar_is_an_error() {
        let template = document(&["<<foreach [x in total]>><<[x]>><</foreach>>"]);
        let err = apply(template, &json!({ "total": 3 }), false).expect_err("not a list");
        assert!(matches!(err, RenderError::Data(message) if message.contains("number")));
    }

    #[test]
    fn unbalanced_sections_abort() {
        let open = document(&["<<foreach [x in xs]>> never closed"]);
        assert!(matches!(
            apply(open, &json!({ "xs": [] }), false),
            Err(RenderError::Template(_))
        ));

        let close = document(&["<</foreach>>"]);
        assert!(matches!(
            apply(close, &json!({}), false),
            Err(RenderError::Template(_))
        ));

        let malformed = document(&["<<foreach [items]>><</foreach>>"]);
        assert!(matches!(
            apply(malformed, &json!({}), false),
            Err(RenderError::Template(_))
        ));
    }

    #[test]
    fn tags_split_across_runs_are_resolved() {
        let template = TemplateDocument::new(vec![Paragraph::new(vec![
            Run::text("Hi <<[cust"),
            Run::text("omer]>>!"),
        ])]);
        let output = apply(template, &json!({ "customer": "Ada" }), false).expect("render");
        assert_eq!(output.text(), "Hi Ada!");
    }

    #[test]
    fn nested_image_values_render_as_images() {
        let template = document(&["<<foreach [p in people]>><<[p.photo]>><</foreach>>"]);
        let photo = format!(
            "data:image/png;base64,{}|width=20",
            super::super::image::tests::ONE_PIXEL_PNG
        );
        let data = json!({ "people": [ { "photo": photo } ] });
        let output = apply(template, &data, false).expect("render");
        let image = output.images().next().expect("image");
        assert_eq!((image.width, image.height), (20, 20));
    }
}
