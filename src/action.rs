//! `action` cells: `$name = result.<path>` assignments that capture
//! response data into the environment for later test cases.

use crate::env::Environment;
use crate::literal::to_text;
use crate::path;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{debug, warn};

static ASSIGN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$([A-Za-z0-9_]+)\s*=\s*result\.([A-Za-z0-9_\[\]\.]+)$")
        .expect("failed to compile assignment regex")
});

/// One parsed `$name = result.<path>` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub name: String,
    pub path: String,
}

/// What happened to each statement of an action cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionReport {
    /// `(name, value)` pairs written to the environment.
    pub bound: Vec<(String, String)>,
    /// Statements that were skipped, with the reason.
    pub diagnostics: Vec<String>,
}

/// Split an action cell on `;` and newlines into assignments.
///
/// Statements that do not match the grammar are returned as
/// diagnostics rather than errors.
pub fn parse_assignments(action: &str) -> (Vec<Assignment>, Vec<String>) {
    let mut assignments = Vec::new();
    let mut diagnostics = Vec::new();

    for statement in action
        .split([';', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        match ASSIGN_RE.captures(statement) {
            Some(caps) => assignments.push(Assignment {
                name: caps[1].to_string(),
                path: caps[2].to_string(),
            }),
            None => diagnostics.push(format!(
                "Ignoring action '{statement}': expected '$name = result.<path>'"
            )),
        }
    }

    (assignments, diagnostics)
}

/// Run every assignment in `action` against `response`, writing
/// resolved values into `env`. Unresolved paths leave any existing
/// binding untouched.
pub fn apply(action: &str, response: &Value, env: &mut Environment) -> ActionReport {
    let (assignments, mut diagnostics) = parse_assignments(action);
    let mut bound = Vec::new();

    for Assignment { name, path } in assignments {
        match path::resolve(response, &path) {
            Some(value) => {
                let text = to_text(&value);
                debug!("Bound ${} = {}", name, text);
                env.set(name.clone(), text.clone());
                bound.push((name, text));
            }
            None => diagnostics.push(format!(
                "Path 'result.{path}' not found; ${name} not updated"
            )),
        }
    }

    for diagnostic in &diagnostics {
        warn!("{}", diagnostic);
    }

    ActionReport { bound, diagnostics }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_binds_token_for_later_substitution() {
        let response = json!({"code": 200, "body": {"access_token": "abc123"}});
        let mut env = Environment::new();
        let report = apply("$token = result.body.access_token", &response, &mut env);

        assert_eq!(report.bound, vec![("token".to_string(), "abc123".to_string())]);
        assert_eq!(env.get("token"), Some("abc123"));
        assert_eq!(env.substitute("Bearer $token"), "Bearer abc123");
    }

    #[test]
    fn test_value_serialisation() {
        let response = json!({"body": {
            "n": 7,
            "f": 1.5,
            "ok": false,
            "nothing": null,
            "list": [1, "a"],
            "obj": {"k": "v"}
        }});
        let mut env = Environment::new();
        apply(
            "$n = result.body.n; $f = result.body.f\n$ok = result.body.ok;\
             $nothing = result.body.nothing; $list = result.body.list;\
             $obj = result.body.obj",
            &response,
            &mut env,
        );
        assert_eq!(env.get("n"), Some("7"));
        assert_eq!(env.get("f"), Some("1.5"));
        assert_eq!(env.get("ok"), Some("false"));
        assert_eq!(env.get("nothing"), Some("null"));
        assert_eq!(env.get("list"), Some(r#"[1,"a"]"#));
        assert_eq!(env.get("obj"), Some(r#"{"k":"v"}"#));
    }

    #[test]
    fn test_unresolved_path_keeps_prior_binding() {
        let mut env = Environment::from_pairs([("id", "old")]);
        let report = apply("$id = result.body.items[3]", &json!({"body": {"items": []}}), &mut env);
        assert_eq!(env.get("id"), Some("old"));
        assert!(report.bound.is_empty());
        assert_eq!(report.diagnostics.len(), 1);
    }

    #[test]
    fn test_malformed_statements_ignored() {
        let (assignments, diagnostics) =
            parse_assignments("token = result.body.t; $x = body.y; $ok = result.code");
        assert_eq!(
            assignments,
            vec![Assignment {
                name: "ok".into(),
                path: "code".into()
            }]
        );
        assert_eq!(diagnostics.len(), 2);
    }

    #[test]
    fn test_blank_action_is_noop() {
        let mut env = Environment::new();
        let report = apply(" \n ; ", &json!({}), &mut env);
        assert_eq!(report, ActionReport::default());
        assert!(env.is_empty());
    }

    #[test]
    fn test_keyed_index_path() {
        let response = json!({"body": {"documentProcesses": [{"id": 9}]}});
        let mut env = Environment::new();
        apply("$doc = result.body.documentProcesses[0].id", &response, &mut env);
        assert_eq!(env.get("doc"), Some("9"));
    }
}
