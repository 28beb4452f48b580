//! Message template renderer.
//!
//! Placeholders are `{name}` or `{name:limit}`. Unbounded placeholders are
//! cut at [`DEFAULT_FIELD_LIMIT`] characters, except `{link}` which is
//! never shortened. Unknown names render as the empty string.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Cut-off for `{name}` placeholders without an explicit limit.
pub const DEFAULT_FIELD_LIMIT: usize = 500;

/// Appended when a value is shortened.
pub const ELLIPSIS: &str = "...";

/// Field that is never truncated by an unbounded placeholder.
pub const LINK_FIELD: &str = "link";

/// Fields an entry exposes to templates.
pub const FIELDS: [&str; 8] = [
    "title",
    "link",
    "description",
    "content",
    "pubDate",
    "isoDate",
    "author",
    "categories",
];

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)(?::(\d+))?\}").expect("placeholder pattern is valid")
});

/// Render `template` against `fields`.
pub fn render(template: &str, fields: &HashMap<&str, String>) -> String {
    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        let name = &caps[1];
        let value = fields.get(name).map(String::as_str).unwrap_or("");
        match caps.get(2) {
            Some(limit) => {
                let limit = limit.as_str().parse().unwrap_or(DEFAULT_FIELD_LIMIT);
                truncate(value, limit)
            }
            None if name == LINK_FIELD => value.to_string(),
            None => truncate(value, DEFAULT_FIELD_LIMIT),
        }
    });
    rendered.trim().to_string()
}

/// Keep the first `limit` characters of `value`, adding [`ELLIPSIS`] when
/// anything was dropped.
pub fn truncate(value: &str, limit: usize) -> String {
    match value.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{ELLIPSIS}", &value[..cut]),
        None => value.to_string(),
    }
}
