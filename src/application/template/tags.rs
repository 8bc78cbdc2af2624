//! Placeholder tag syntaxes and data-path lookup shared by every phase.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// `<<[key]>>`
pub(crate) static BRACKET_TAG: Lazy<Regex> = Lazy::new(|| compile(r"<<\[(.*?)\]>>"));

/// `{{key}}`
pub(crate) static BRACE_TAG: Lazy<Regex> = Lazy::new(|| compile(r"\{\{(.*?)\}\}"));

/// Any tag understood by the structured resolution pass.
pub(crate) static REPORT_TAG: Lazy<Regex> =
    Lazy::new(|| compile(r"<<(?:\[.*?\]|foreach\s*\[.*?\]|/foreach)>>"));

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(err) => unreachable!("static tag pattern `{pattern}` is invalid: {err}"),
    }
}

/// Pattern matching both tag syntaxes for one literal key, tolerating inner whitespace.
pub(crate) fn key_pattern(key: &str) -> Result<Regex, regex::Error> {
    let escaped = regex::escape(key.trim());
    Regex::new(&format!(
        r"<<\[\s*{escaped}\s*\]>>|\{{\{{\s*{escaped}\s*\}}\}}"
    ))
}

/// Keys may contain letters, digits, `_`, `-`, `.` and spaces.
pub(crate) fn is_legal_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' '))
}

/// Render a tag as inert text: `<` and `>` become entities.
pub(crate) fn invalid_tag_notice(tag: &str) -> String {
    let escaped = tag.replace('<', "&lt;").replace('>', "&gt;");
    format!("[invalid tag: {escaped}]")
}

pub(crate) fn bracket_tag(path: &str) -> String {
    format!("<<[{path}]>>")
}

/// Follow a dotted path through objects and (by numeric segment) arrays.
pub(crate) fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |current, segment| {
        let segment = segment.trim();
        if segment.is_empty() {
            return None;
        }
        match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index)),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_traverses_objects_and_arrays() {
        let data = json!({
            "customer": { "name": "Ada", "orders": [ { "sku": "A-1" } ] }
        });
        assert_eq!(lookup_path(&data, "customer.name"), Some(&json!("Ada")));
        assert_eq!(
            lookup_path(&data, "customer.orders.0.sku"),
            Some(&json!("A-1"))
        );
        assert_eq!(lookup_path(&data, "customer.email"), None);
        assert_eq!(lookup_path(&data, "customer..name"), None);
    }

    #[test]
    fn key_pattern_matches_both_syntaxes() {
        let pattern = key_pattern("logo").expect("pattern");
        assert!(pattern.is_match("<<[logo]>>"));
        assert!(pattern.is_match("{{ logo }}"));
        assert!(!pattern.is_match("<<[logo2]>>"));
    }

    #[test]
    fn key_legality() {
        assert!(is_legal_key("customer.first name"));
        assert!(is_legal_key("line_item-2"));
        assert!(!is_legal_key("a$b"));
        assert!(!is_legal_key("total()"));
        assert!(!is_legal_key(""));
    }
}
