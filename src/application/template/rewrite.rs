//! Match-and-decide text rewriting over the document graph.
//!
//! Patterns are matched against the concatenated text of a paragraph's text
//! runs, so a tag split across several runs is still found. The replacement
//! lands in the first run the match touches and keeps that run's style; the
//! matched text is cut out of every later run.

use std::collections::BTreeSet;

use regex::{Captures, Regex};

use crate::domain::document::{Paragraph, Run, TemplateDocument};

/// Outcome of inspecting one match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    Replace(String),
    Skip,
    Remove,
}

/// Apply `decide` to every match in the document. Returns the number of edits.
pub(crate) fn rewrite_document<F>(document: &mut TemplateDocument, pattern: &Regex, mut decide: F) -> usize
where
    F: FnMut(&Captures<'_>) -> Decision,
{
    document
        .paragraphs
        .iter_mut()
        .map(|paragraph| rewrite_paragraph(paragraph, pattern, &mut decide))
        .sum()
}

pub(crate) fn rewrite_paragraph<F>(paragraph: &mut Paragraph, pattern: &Regex, decide: &mut F) -> usize
where
    F: FnMut(&Captures<'_>) -> Decision,
{
    let mut text = String::new();
    let mut spans = Vec::new();
    for (index, run) in paragraph.runs.iter().enumerate() {
        if let Run::Text(run) = run {
            let start = text.len();
            text.push_str(&run.text);
            spans.push(Span {
                run: index,
                start,
                end: text.len(),
            });
        }
    }

    let mut edits = Vec::new();
    for captures in pattern.captures_iter(&text) {
        let Some(matched) = captures.get(0) else {
            continue;
        };
        if matched.is_empty() {
            continue;
        }
        let replacement = match decide(&captures) {
            Decision::Skip => continue,
            Decision::Remove => String::new(),
            Decision::Replace(value) => value,
        };
        edits.push(Edit {
            start: matched.start(),
            end: matched.end(),
            replacement,
        });
    }

    if edits.is_empty() {
        return 0;
    }

    let mut touched = BTreeSet::new();
    // Later edits first so earlier run-local offsets stay valid.
    for edit in edits.iter().rev() {
        let mut first = true;
        for span in spans
            .iter()
            .filter(|span| span.start < edit.end && span.end > edit.start)
        {
            let Some(Run::Text(run)) = paragraph.runs.get_mut(span.run) else {
                continue;
            };
            let local_start = edit.start.max(span.start) - span.start;
            let local_end = edit.end.min(span.end) - span.start;
            let replacement = if first { edit.replacement.as_str() } else { "" };
            run.text.replace_range(local_start..local_end, replacement);
            touched.insert(span.run);
            first = false;
        }
    }

    let mut index = 0;
    paragraph.runs.retain(|run| {
        let keep = match run {
            Run::Text(text) => !(text.text.is_empty() && touched.contains(&index)),
            Run::Image(_) => true,
        };
        index += 1;
        keep
    });

    edits.len()
}

struct Span {
    run: usize,
    start: usize,
    end: usize,
}

struct Edit {
    start: usize,
    end: usize,
    replacement: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::document::RunStyle;

    fn pattern() -> Regex {
        Regex::new(r"\{\{(.*?)\}\}").expect("regex")
    }

    #[test]
    fn replaces_tags_split_across_runs() {
        let bold = RunStyle {
            bold: true,
            ..RunStyle::default()
        };
        let mut paragraph = Paragraph::new(vec![
            Run::text("Dear {{cust"),
            Run::styled("omer}}", bold),
            Run::text(", welcome"),
        ]);

        let mut decide = |_: &Captures<'_>| Decision::Replace("Ada".to_string());
        let edits = rewrite_paragraph(&mut paragraph, &pattern(), &mut decide);

        assert_eq!(edits, 1);
        assert_eq!(paragraph.text(), "Dear Ada, welcome");
        assert_eq!(
            paragraph.runs,
            vec![Run::text("Dear Ada"), Run::text(", welcome")]
        );
    }

    #[test]
    fn skip_and_remove_decisions() {
        let mut document = TemplateDocument::from_plain_text("{{keep}} and {{drop}}!");
        let edits = rewrite_document(&mut document, &pattern(), |captures| {
            if &captures[1] == "keep" {
                Decision::Skip
            } else {
                Decision::Remove
            }
        });
        assert_eq!(edits, 1);
        assert_eq!(document.text(), "{{keep}} and !");
    }

    #[test]
    fn multiple_matches_in_one_run_are_applied_in_place() {
        let mut document = TemplateDocument::from_plain_text("{{a}}-{{bb}}-{{ccc}}");
        rewrite_document(&mut document, &pattern(), |captures| {
            Decision::Replace(captures[1].to_uppercase())
        });
        assert_eq!(document.text(), "A-BB-CCC");
    }
}
