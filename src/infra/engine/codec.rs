//! Byte formats accepted and produced by the engine.
//!
//! Templates arrive either as a serialized document graph or as UTF-8 plain
//! text. Rendered documents leave as the graph, as HTML, or as HTML handed to
//! the converter for PDF output.

use std::fmt::Write as _;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::application::engine::EngineError;
use crate::domain::document::{EmbeddedImage, Run, TemplateDocument, TextRun};

/// Decode template bytes into the document graph.
pub fn decode(bytes: &[u8]) -> Result<TemplateDocument, EngineError> {
    if looks_like_graph(bytes) {
        return serde_json::from_slice(bytes)
            .map_err(|err| EngineError::Decode(format!("invalid document graph: {err}")));
    }

    let text = std::str::from_utf8(bytes).map_err(|_| EngineError::unsupported_format())?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    Ok(TemplateDocument::from_plain_text(text))
}

/// A JSON object opens with `{` followed by a quoted key or `}`. Text that opens
/// with a `{{key}}` tag does not.
fn looks_like_graph(bytes: &[u8]) -> bool {
    let mut significant = bytes.iter().copied().filter(|byte| !byte.is_ascii_whitespace());
    significant.next() == Some(b'{') && matches!(significant.next(), Some(b'"' | b'}'))
}

pub fn encode_json(document: &TemplateDocument) -> Result<Vec<u8>, EngineError> {
    serde_json::to_vec(document)
        .map_err(|err| EngineError::Decode(format!("failed to serialize document: {err}")))
}

/// Standalone HTML page, one `<p>` per paragraph.
pub fn encode_html(document: &TemplateDocument) -> Vec<u8> {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"></head>\n<body>\n",
    );
    for paragraph in &document.paragraphs {
        html.push_str("<p>");
        for run in &paragraph.runs {
            match run {
                Run::Text(text) => push_text_run(&mut html, text),
                Run::Image(image) => push_image(&mut html, &image.image),
            }
        }
        html.push_str("</p>\n");
    }
    html.push_str("</body>\n</html>\n");
    html.into_bytes()
}

fn push_text_run(html: &mut String, run: &TextRun) {
    let mut open = Vec::new();
    if run.style.bold {
        open.push("strong");
    }
    if run.style.italic {
        open.push("em");
    }
    if run.style.underline {
        open.push("u");
    }

    for tag in &open {
        let _ = write!(html, "<{tag}>");
    }
    push_escaped(html, &run.text);
    for tag in open.iter().rev() {
        let _ = write!(html, "</{tag}>");
    }
}

fn push_image(html: &mut String, image: &EmbeddedImage) {
    let _ = write!(
        html,
        "<img src=\"data:{};base64,{}\" width=\"{}\" height=\"{}\" alt=\"\">",
        escape_attr(&image.content_type),
        BASE64.encode(&image.data),
        image.width,
        image.height
    );
}

fn push_escaped(html: &mut String, text: &str) {
    for (index, line) in text.split('\n').enumerate() {
        if index > 0 {
            html.push_str("<br>");
        }
        for ch in line.chars() {
            match ch {
                '&' => html.push_str("&amp;"),
                '<' => html.push_str("&lt;"),
                '>' => html.push_str("&gt;"),
                '"' => html.push_str("&quot;"),
                '\'' => html.push_str("&#39;"),
                other => html.push(other),
            }
        }
    }
}

fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    push_escaped(&mut escaped, value);
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::document::{Paragraph, RunStyle};

    #[test]
    fn plain_text_becomes_one_paragraph_per_line() {
        let document = decode(b"first <<[a]>>\nsecond").expect("decode");
        assert_eq!(document.paragraphs.len(), 2);
        assert_eq!(document.text(), "first <<[a]>>\nsecond");
    }

    #[test]
    fn graph_json_is_decoded() {
        let document =
            decode(br#" {"paragraphs":[{"runs":[{"text":"Hi ","bold":true},{"text":"{{name}}"}]}]}"#)
                .expect("decode");
        assert_eq!(document.text(), "Hi {{name}}");
    }

    #[test]
    fn text_opening_with_a_brace_tag_is_plain_text() {
        let document = decode(b"{{name}}, welcome\n{{ city }}").expect("decode");
        assert_eq!(document.paragraphs.len(), 2);
        assert_eq!(document.text(), "{{name}}, welcome\n{{ city }}");

        let document = decode(b"  {  {x}} }").expect("decode");
        assert_eq!(document.text(), "  {  {x}} }");
    }

    #[test]
    fn binary_input_is_unsupported_and_bad_graph_is_a_decode_error() {
        assert!(matches!(
            decode(&[0x50, 0x4b, 0x03, 0x04, 0xff, 0xfe]),
            Err(EngineError::Unsupported(_))
        ));
        assert!(matches!(
            decode(b"{\"paragraphs\": 3}"),
            Err(EngineError::Decode(_))
        ));
    }

    #[test]
    fn html_escapes_text_and_inlines_images() {
        let document = TemplateDocument::new(vec![Paragraph::new(vec![
            Run::styled(
                "a < b & [invalid tag: &lt;&lt;[x]&gt;&gt;]",
                RunStyle {
                    bold: true,
                    ..RunStyle::default()
                },
            ),
            Run::image(EmbeddedImage {
                content_type: "image/png".to_string(),
                data: vec![1, 2, 3],
                width: 50,
                height: 40,
            }),
        ])]);

        let html = String::from_utf8(encode_html(&document)).expect("utf8");
        assert!(html.contains("<strong>a &lt; b &amp; [invalid tag: &amp;lt;"), "{html}");
        assert!(
            html.contains("<img src=\"data:image/png;base64,AQID\" width=\"50\" height=\"40\""),
            "{html}"
        );
    }
}
