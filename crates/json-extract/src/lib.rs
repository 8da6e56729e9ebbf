//! Tolerant JSON Reader (C3)
//!
//! Best-effort extraction of the first valid JSON object/array from a
//! free-form model response. Model outputs in practice carry leading or
//! trailing prose despite instructions; a single stray sentence must never
//! fail an entire subtask.

use serde_json::Value;

/// Try, in order: the whole string; the first balanced `[...]` substring;
/// the first balanced `{...}` substring. Returns `None` on total failure.
pub fn parse(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some(v);
    }
    if let Some(block) = first_balanced(trimmed, '[', ']') {
        if let Ok(v) = serde_json::from_str(&block) {
            return Some(v);
        }
    }
    if let Some(block) = first_balanced(trimmed, '{', '}') {
        if let Ok(v) = serde_json::from_str(&block) {
            return Some(v);
        }
    }
    None
}

/// Find the first substring starting at `open` and ending at its matching
/// `close`, honoring nesting and skipping brackets inside string literals.
fn first_balanced(s: &str, open: char, close: char) -> Option<String> {
    let chars: Vec<char> = s.chars().collect();
    let start = chars.iter().position(|&c| c == open)?;

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate().skip(start) {
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
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    let block: String = chars[start..=i].iter().collect();
                    return Some(block);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_whole_string() {
        let v = parse(r#"{"labels":["a"]}"#).unwrap();
        assert_eq!(v, json!({"labels": ["a"]}));
    }

    #[test]
    fn extracts_object_from_surrounding_prose() {
        let text = "Sure, here you go:\n```json\n{\"labels\": [\"office\"], \"confidence\": 0.9}\n```\nHope that helps!";
        let v = parse(text).unwrap();
        assert_eq!(v["labels"][0], "office");
    }

    #[test]
    fn extracts_array_preferentially_over_trailing_object() {
        let text = r#"prefix ["a", "b"] and also {"x": 1} trailing"#;
        let v = parse(text).unwrap();
        assert_eq!(v, json!(["a", "b"]));
    }

    #[test]
    fn handles_nested_braces() {
        let text = r#"noise {"names": ["a"], "meta": {"n": 1}} noise"#;
        let v = parse(text).unwrap();
        assert_eq!(v["names"][0], "a");
        assert_eq!(v["meta"]["n"], 1);
    }

    #[test]
    fn ignores_brackets_inside_string_literals() {
        let text = r#"{"labels": ["a [weird] label"], "confidence": 1}"#;
        let v = parse(text).unwrap();
        assert_eq!(v["labels"][0], "a [weird] label");
    }

    #[test]
    fn returns_none_on_total_failure() {
        assert!(parse("not json at all, just prose.").is_none());
    }
}
