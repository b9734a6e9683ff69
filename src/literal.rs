//! Loose literal parsing for spreadsheet cells.
//!
//! Header and query cells are written in a relaxed list-of-maps syntax
//! such as `[{'Content-Type': 'application/json'}]` or even
//! `[{'Authorization', 'Bearer $token'}]`. Body cells are JSON, often
//! with single quotes. None of these functions fail: they return the
//! best structure they can recover plus an optional diagnostic.

use crate::env::Environment;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

static GROUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(.*?)\}").expect("failed to compile group regex")
});

/// Parser output: always a usable value, sometimes with a note on
/// what could not be understood.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub value: T,
    pub diagnostic: Option<String>,
}

impl<T> Parsed<T> {
    fn ok(value: T) -> Self {
        Self {
            value,
            diagnostic: None,
        }
    }

    fn with_diagnostic(value: T, diagnostic: String) -> Self {
        debug!("{}", diagnostic);
        Self {
            value,
            diagnostic: Some(diagnostic),
        }
    }
}

/// Canonical text of a value: strings are raw, everything else is
/// compact JSON (`null`, `true`, `42`, `{"a":1}`).
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a header/query cell into ordered `(key, value)` pairs.
/// Duplicate keys are kept.
pub fn parse_pairs(text: &str, env: &Environment) -> Parsed<Vec<(String, String)>> {
    if text.trim().is_empty() {
        return Parsed::ok(Vec::new());
    }
    let text = env.substitute(text);

    if let Some(json @ (Value::Array(_) | Value::Object(_))) = parse_json_relaxed(&text) {
        return Parsed::ok(pairs_from_json(&json));
    }

    let pairs = fallback_pairs(&text);
    if pairs.is_empty() {
        Parsed::with_diagnostic(
            Vec::new(),
            format!("Could not parse key/value list '{}'", preview(&text)),
        )
    } else {
        Parsed::ok(pairs)
    }
}

/// [`parse_pairs`] collapsed into a map; later duplicates win.
pub fn parse_map(text: &str, env: &Environment) -> Parsed<HashMap<String, String>> {
    let Parsed { value, diagnostic } = parse_pairs(text, env);
    Parsed {
        value: value.into_iter().collect(),
        diagnostic,
    }
}

/// Parse a body cell. Blank cells and a JSON `null` have no body.
pub fn parse_body(text: &str, env: &Environment) -> Parsed<Option<Value>> {
    if text.trim().is_empty() {
        return Parsed::ok(None);
    }
    let text = env.substitute(text);

    if let Some(json) = parse_json_relaxed(&text) {
        return Parsed::ok(Some(json).filter(|v| !v.is_null()));
    }

    let pairs = fallback_pairs(&text);
    if pairs.is_empty() {
        return Parsed::with_diagnostic(
            None,
            format!("Could not parse JSON body '{}'", preview(&text)),
        );
    }
    let map: Map<String, Value> = pairs
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    Parsed::with_diagnostic(
        Some(Value::Object(map)),
        format!(
            "Body '{}' is not valid JSON; recovered key/value pairs",
            preview(&text)
        ),
    )
}

/// Strict JSON first, then again with single quotes read as double
/// quotes.
fn parse_json_relaxed(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    serde_json::from_str(trimmed)
        .or_else(|_| serde_json::from_str(&trimmed.replace('\'', "\"")))
        .ok()
}

fn pairs_from_json(json: &Value) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut push_object = |map: &Map<String, Value>| {
        for (k, v) in map {
            pairs.push((k.clone(), to_text(v)));
        }
    };
    match json {
        Value::Array(items) => {
            for item in items {
                if let Value::Object(map) = item {
                    push_object(map);
                }
            }
        }
        Value::Object(map) => push_object(map),
        _ => {}
    }
    pairs
}

/// Recover one pair from each `{...}` group, splitting at whichever
/// of `,` or `:` comes first.
fn fallback_pairs(text: &str) -> Vec<(String, String)> {
    let strip = |s: &str| {
        s.trim_matches(|c: char| c == '\'' || c == '"' || c.is_whitespace())
            .to_string()
    };

    GROUP_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let item = caps[1].trim();
            let split_at = item.find([',', ':'])?;
            let key = strip(&item[..split_at]);
            let value = strip(&item[split_at + 1..]);
            if key.is_empty() {
                None
            } else {
                Some((key, value))
            }
        })
        .collect()
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 100;
    if text.chars().count() > LIMIT {
        let head: String = text.chars().take(LIMIT).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env() -> Environment {
        Environment::from_pairs([("token", "abc123"), ("id", "7")])
    }

    #[test]
    fn test_single_quoted_json_headers() {
        let parsed = parse_pairs(
            "[{'Content-Type': 'application/json'}, {'Authorization': 'Bearer $token'}]",
            &env(),
        );
        assert_eq!(parsed.diagnostic, None);
        assert_eq!(
            parsed.value,
            vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Authorization".to_string(), "Bearer abc123".to_string()),
            ]
        );
    }

    #[test]
    fn test_set_style_headers_use_fallback() {
        let parsed = parse_pairs(
            "[{'Authorization', 'Bearer $token'}, {'Content-Type', 'application/json'}]",
            &env(),
        );
        assert_eq!(parsed.diagnostic, None);
        assert_eq!(
            parsed.value,
            vec![
                ("Authorization".to_string(), "Bearer abc123".to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
            ]
        );
    }

    #[test]
    fn test_fallback_splits_at_first_separator() {
        let pairs = fallback_pairs("[{'url': 'http://a/b'}, {'k', 'x:y'}]");
        assert_eq!(
            pairs,
            vec![
                ("url".to_string(), "http://a/b".to_string()),
                ("k".to_string(), "x:y".to_string()),
            ]
        );
    }

    #[test]
    fn test_duplicate_keys_kept_in_pairs_last_wins_in_map() {
        let text = "[{'tag': 'a'}, {'tag': 'b'}]";
        assert_eq!(parse_pairs(text, &env()).value.len(), 2);
        let map = parse_map(text, &env()).value;
        assert_eq!(map.get("tag").map(String::as_str), Some("b"));
    }

    #[test]
    fn test_non_string_values_rendered_as_text() {
        let parsed = parse_pairs(r#"{"page": 2, "all": true}"#, &env());
        let map: HashMap<_, _> = parsed.value.into_iter().collect();
        assert_eq!(map["page"], "2");
        assert_eq!(map["all"], "true");
    }

    #[test]
    fn test_unparseable_pairs_give_diagnostic() {
        let parsed = parse_pairs("just some words", &env());
        assert!(parsed.value.is_empty());
        assert!(parsed.diagnostic.is_some());
    }

    #[test]
    fn test_blank_cells_are_empty_without_diagnostic() {
        assert_eq!(parse_pairs("  ", &env()), Parsed::ok(Vec::new()));
        assert_eq!(parse_body("", &env()), Parsed::ok(None));
    }

    #[test]
    fn test_empty_json_lists_have_no_diagnostic() {
        assert_eq!(parse_pairs("[]", &env()), Parsed::ok(Vec::new()));
        assert_eq!(parse_map("{}", &env()).diagnostic, None);
        assert_eq!(parse_pairs("[1, 'x']", &env()), Parsed::ok(Vec::new()));
    }

    #[test]
    fn test_null_body_sends_nothing() {
        assert_eq!(parse_body("null", &env()), Parsed::ok(None));
        assert_eq!(parse_body(" null ", &env()).value, None);
    }

    #[test]
    fn test_body_substitution_and_json() {
        let parsed = parse_body(r#"{"owner_id": "$id", "n": 1}"#, &env());
        assert_eq!(parsed.value, Some(json!({"owner_id": "7", "n": 1})));
        assert_eq!(parsed.diagnostic, None);
    }

    #[test]
    fn test_body_keeps_apostrophes_when_strict_json() {
        let parsed = parse_body(r#"{"name": "O'Brien"}"#, &env());
        assert_eq!(parsed.value, Some(json!({"name": "O'Brien"})));
    }

    #[test]
    fn test_body_single_quotes() {
        let parsed = parse_body("{'a': [1, 2]}", &env());
        assert_eq!(parsed.value, Some(json!({"a": [1, 2]})));
    }

    #[test]
    fn test_body_fallback_and_failure() {
        let recovered = parse_body("{name: widget}", &env());
        assert_eq!(recovered.value, Some(json!({"name": "widget"})));
        assert!(recovered.diagnostic.is_some());

        let failed = parse_body("not json", &env());
        assert_eq!(failed.value, None);
        assert!(failed.diagnostic.unwrap().contains("not json"));
    }

    #[test]
    fn test_to_text() {
        assert_eq!(to_text(&json!("plain")), "plain");
        assert_eq!(to_text(&json!(null)), "null");
        assert_eq!(to_text(&json!(false)), "false");
        assert_eq!(to_text(&json!(4.5)), "4.5");
        assert_eq!(to_text(&json!({"a": [1]})), r#"{"a":[1]}"#);
    }
}
