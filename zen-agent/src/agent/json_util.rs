//! Lenient JSON extraction from model text.

use serde_json::Value;

/// Extract the first balanced JSON object from `text` and parse it.
///
/// Models wrap JSON in prose and code fences; this scans for the first
/// `{`, tracks brace depth, and parses the balanced slice.
#[must_use]
pub fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + c.len_utf8();
                    return serde_json::from_str(&text[start..end]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract and deserialize the first JSON object in `text`.
pub fn extract_typed<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    let value = extract_json_object(text)?;
    serde_json::from_value(value).ok()
}
