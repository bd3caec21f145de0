//! `<tag>...</tag>` extraction from free-form agent text.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

fn opening_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<([A-Za-z_][A-Za-z0-9_\-]*)>").expect("static regex"))
}

/// Collects every `<name>body</name>` pair, bodies trimmed. When a tag
/// repeats, the last occurrence wins.
pub fn parse_tags(text: &str) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    let mut cursor = 0;

    while let Some(captures) = opening_tag().captures_at(text, cursor) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            break;
        };
        let closing = format!("</{}>", name.as_str());
        match text[whole.end()..].find(&closing) {
            Some(offset) => {
                let body = &text[whole.end()..whole.end() + offset];
                tags.insert(name.as_str().to_string(), body.trim().to_string());
                cursor = whole.end() + offset + closing.len();
            }
            None => cursor = whole.end(),
        }
    }

    tags
}

/// Returns the bodies of every `<tag>...</tag>` block, in order.
pub fn find_blocks<'a>(text: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find(&open) {
        let after_open = &rest[start + open.len()..];
        let Some(end) = after_open.find(&close) else {
            break;
        };
        blocks.push(after_open[..end].trim());
        rest = &after_open[end + close.len()..];
    }

    blocks
}
