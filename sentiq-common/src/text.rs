//! Text cleaning helpers
//!
//! Used on the calling side before a dataset is handed to the worker, and by
//! the ensemble model before text reaches the primary model.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static COMMENT: Lazy<Regex> = Lazy::new(|| compile(r"(?s)<!--.*?-->"));
static TAG: Lazy<Regex> = Lazy::new(|| compile(r"(?s)<[^<>]*>"));
static ENTITY: Lazy<Regex> = Lazy::new(|| compile(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| compile(r"\s+"));

fn compile(pattern: &str) -> Regex {
    // Patterns are literals in this file.
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern}: {e}"))
}

/// Strip markup and normalise whitespace
///
/// Tags are replaced by a single space (so `a<br>b` becomes `a b`), HTML
/// entities are decoded after tag removal, runs of whitespace collapse to one
/// space and the result is trimmed.
pub fn clean_text(text: &str) -> String {
    let without_comments = COMMENT.replace_all(text, " ");
    let without_tags = TAG.replace_all(&without_comments, " ");
    let decoded = decode_entities(&without_tags);
    WHITESPACE.replace_all(&decoded, " ").trim().to_string()
}

/// Remove tags without inserting separators, then trim
pub fn strip_tags(text: &str) -> String {
    TAG.replace_all(text, "").trim().to_string()
}

/// Apply [`clean_text`] to string values; everything else is returned untouched
pub fn clean_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(clean_text(s)),
        other => other.clone(),
    }
}

/// Truncate to at most `max_chars` characters, respecting char boundaries
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            decode_entity(name).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn decode_entity(name: &str) -> Option<String> {
    if let Some(numeric) = name.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse::<u32>().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }
    let decoded = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "laquo" => "«",
        "raquo" => "»",
        "mdash" => "—",
        "ndash" => "–",
        "hellip" => "…",
        _ => return None,
    };
    Some(decoded.to_string())
}
