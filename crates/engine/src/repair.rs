//! Defensive JSON recovery for model output.
//!
//! Models return fenced, truncated, or trailing-comma JSON often enough
//! that the extractors never trust a payload on the first parse. The
//! repair pipeline is: strict parse, then fence stripping and
//! outermost-object slicing, then trailing-comma removal, then closing
//! unterminated strings/arrays/objects by bracket counting.

use serde_json::Value;
use tracing::debug;

/// Parse a model payload, repairing it if the strict parse fails.
///
/// Returns None when the payload is unrecoverable; callers fall back to
/// pattern extraction in that case.
pub fn parse_lenient(payload: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(payload) {
        return Some(value);
    }

    let stripped = strip_fences(payload);

    let sliced = slice_object(&stripped);
    if let Ok(value) = serde_json::from_str::<Value>(&sliced) {
        debug!("Recovered JSON payload after normalization");
        return Some(value);
    }

    let without_commas = strip_trailing_commas(&sliced);
    if let Ok(value) = serde_json::from_str::<Value>(&without_commas) {
        debug!("Recovered JSON payload after trailing-comma removal");
        return Some(value);
    }

    // Closure works on the unsliced text: a truncated payload has no final
    // '}' for the slice to find, and slicing would drop the partial tail.
    let closed = close_unterminated(&strip_trailing_commas(&stripped));
    match serde_json::from_str::<Value>(&closed) {
        Ok(value) => {
            debug!("Recovered JSON payload after bracket closure");
            Some(value)
        }
        Err(_) => None,
    }
}

/// Strip a markdown code fence if present
pub fn strip_fences(payload: &str) -> String {
    let trimmed = payload.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut lines = trimmed.lines();
    let _ = lines.next(); // drop ``` or ```json
    let mut content = lines.collect::<Vec<_>>().join("\n");
    if content.ends_with("```") {
        content.truncate(content.len().saturating_sub(3));
    }
    content.trim().to_string()
}

/// Slice out the outermost `{ ... }` when the model wrapped it in prose
pub fn slice_object(payload: &str) -> String {
    if let (Some(start), Some(end)) = (payload.find('{'), payload.rfind('}')) {
        if start < end {
            return payload[start..=end].to_string();
        }
    }
    payload.to_string()
}

/// Remove commas directly preceding a closing bracket, outside strings
pub fn strip_trailing_commas(payload: &str) -> String {
    let mut out = String::with_capacity(payload.len());
    let mut in_string = false;
    let mut escape = false;
    let mut pending_comma = false;

    for ch in payload.chars() {
        if in_string {
            out.push(ch);
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                if pending_comma {
                    out.push(',');
                    pending_comma = false;
                }
                in_string = true;
                out.push(ch);
            }
            ',' => {
                if pending_comma {
                    out.push(',');
                }
                pending_comma = true;
            }
            ']' | '}' => {
                // drop the pending comma
                pending_comma = false;
                out.push(ch);
            }
            c if c.is_whitespace() => out.push(c),
            _ => {
                if pending_comma {
                    out.push(',');
                    pending_comma = false;
                }
                out.push(ch);
            }
        }
    }

    out
}

/// Close an unterminated string and any open arrays/objects by counting
/// brackets with string-state awareness.
pub fn close_unterminated(payload: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape = false;

    for ch in payload.chars() {
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut out = payload.trim_end().to_string();
    if in_string {
        out.push('"');
    }
    // A truncated payload often ends mid-element; drop a dangling comma
    // before closing.
    while out.ends_with(',') {
        out.pop();
    }
    while let Some(close) = stack.pop() {
        out.push(close);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_parse_passthrough() {
        let value = parse_lenient(r#"{"entities": []}"#).unwrap();
        assert!(value["entities"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_fenced_payload() {
        let payload = "```json\n{\"entities\": [{\"name\": \"Acme\"}]}\n```";
        let value = parse_lenient(payload).unwrap();
        assert_eq!(value["entities"][0]["name"], "Acme");
    }

    #[test]
    fn test_prose_around_object() {
        let payload = "Here is the result: {\"relations\": []} hope that helps!";
        let value = parse_lenient(payload).unwrap();
        assert!(value["relations"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_trailing_commas() {
        let payload = r#"{"entities": [{"name": "Acme",}, ],}"#;
        let value = parse_lenient(payload).unwrap();
        assert_eq!(value["entities"][0]["name"], "Acme");
    }

    #[test]
    fn test_truncated_array_closed() {
        let payload = r#"{"entities": [{"name": "Acme"}, {"name": "Glob"#;
        let value = parse_lenient(payload).unwrap();
        let entities = value["entities"].as_array().unwrap();
        assert_eq!(entities[0]["name"], "Acme");
        // the truncated element survives with its open string closed
        assert_eq!(entities[1]["name"], "Glob");
    }

    #[test]
    fn test_unrecoverable_returns_none() {
        assert!(parse_lenient("not json at all").is_none());
        assert!(parse_lenient("").is_none());
    }

    #[test]
    fn test_comma_inside_string_kept() {
        let payload = r#"{"name": "Acme, Inc."}"#;
        let value = parse_lenient(payload).unwrap();
        assert_eq!(value["name"], "Acme, Inc.");
    }
}
