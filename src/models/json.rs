use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{PipelineError, PipelineResult};

/// Extracts the first well-formed JSON object from model output.
///
/// Handles code fences and prose before or after the object. Each `{` is tried
/// as a start position; when streaming deserialization fails everywhere, the
/// span between the first `{` and the last `}` is tried as a whole.
pub fn extract_json_object(text: &str) -> PipelineResult<serde_json::Value> {
    let cleaned = strip_code_fence(text);
    for (start, _) in cleaned.match_indices('{') {
        let slice = &cleaned[start..];
        let mut de = serde_json::Deserializer::from_str(slice);
        if let Ok(v) = serde_json::Value::deserialize(&mut de) {
            if v.is_object() {
                return Ok(v);
            }
        }
    }

    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if start < end {
            let trimmed = repair_trailing_commas(&cleaned[start..=end]);
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(&trimmed) {
                if v.is_object() {
                    return Ok(v);
                }
            }
        }
    }

    let head: String = text.chars().take(160).collect();
    Err(PipelineError::MalformedResponse(format!(
        "no JSON object recoverable from: {head}"
    )))
}

pub fn parse_json_response<T: DeserializeOwned>(text: &str) -> PipelineResult<T> {
    let value = extract_json_object(text)?;
    serde_json::from_value(value)
        .map_err(|e| PipelineError::MalformedResponse(format!("unexpected JSON shape: {e}")))
}

fn strip_code_fence(text: &str) -> &str {
    let s = text.trim();
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let body = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    match body.rfind("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

fn repair_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = text.chars().collect();
    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
        }
        if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json() {
        let raw = "```json\n{\"translation\": \"Hi\", \"risk\": \"low\"}\n```";
        let v = extract_json_object(raw).expect("json");
        assert_eq!(v["translation"], "Hi");
    }

    #[test]
    fn skips_prose_and_braces_in_prose() {
        let raw = "Sure {here} is the result: {\"pass\": true, \"issues\": []} hope it helps";
        let v = extract_json_object(raw).expect("json");
        assert_eq!(v["pass"], true);
    }

    #[test]
    fn recovers_trailing_comma() {
        let raw = "{\"translation\": \"a, b\", \"reverse_translation\": \"c\",}";
        let v = extract_json_object(raw).expect("json");
        assert_eq!(v["translation"], "a, b");
        assert_eq!(v["reverse_translation"], "c");
    }

    #[test]
    fn fails_without_object() {
        let err = extract_json_object("no json here").expect_err("should fail");
        assert!(matches!(err, PipelineError::MalformedResponse(_)));
    }

    #[test]
    fn typed_parse_reports_shape_errors() {
        #[derive(Debug, serde::Deserialize)]
        struct Shape {
            #[allow(dead_code)]
            pass: bool,
        }
        let err = parse_json_response::<Shape>("{\"pass\": \"maybe\"}").expect_err("shape");
        assert!(matches!(err, PipelineError::MalformedResponse(_)));
    }
}
