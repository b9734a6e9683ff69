//! Response validation for one test case row: status code, body
//! condition and header condition.

use crate::env::Environment;
use crate::expression::{self, Evaluation};
use crate::model::{CheckOutcome, TestCase};
use serde_json::Value;
use tracing::{info, warn};

/// Verdict of all checks declared on a row.
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub passed: bool,
    pub body_validation: CheckOutcome,
    pub header_validation: CheckOutcome,
    /// Human-readable notes, one per failed or malformed check.
    pub details: Vec<String>,
}

/// Check the expected status code and conditions of `case` against
/// a response. `response` is the value conditions see as `result`.
pub fn validate_response(
    case: &TestCase,
    code: u16,
    response: &Value,
    env: &Environment,
    verbose: bool,
) -> Validation {
    let mut details = Vec::new();
    let mut passed = true;

    if let Some(expected) = case.expect_response_code.as_deref() {
        match parse_status_code(expected) {
            Some(expected) if expected != code => {
                passed = false;
                details.push(format!(
                    "Status Code Failed (Expected: {expected}, Actual: {code})."
                ));
            }
            Some(_) => {}
            None => {
                warn!("Invalid value for 'expect_response_code': '{}'", expected);
                details.push(format!(
                    "Invalid 'expect_response_code' value: '{expected}'."
                ));
            }
        }
    }

    let body_validation = check_condition(
        "Body",
        case.expect_response_body.as_deref(),
        response,
        env,
        verbose,
        &mut details,
    );
    let header_validation = check_condition(
        "Header",
        case.expect_response_header.as_deref(),
        response,
        env,
        verbose,
        &mut details,
    );

    if body_validation == CheckOutcome::Failed || header_validation == CheckOutcome::Failed {
        passed = false;
    }

    Validation {
        passed,
        body_validation,
        header_validation,
        details,
    }
}

/// Accepts `200` as well as spreadsheet-style `200.0`.
fn parse_status_code(text: &str) -> Option<u16> {
    let text = text.trim();
    text.parse::<u16>().ok().or_else(|| {
        let f = text.parse::<f64>().ok()?;
        (f.fract() == 0.0 && (0.0..=u16::MAX as f64).contains(&f)).then_some(f as u16)
    })
}

fn check_condition(
    label: &str,
    condition: Option<&str>,
    response: &Value,
    env: &Environment,
    verbose: bool,
    details: &mut Vec<String>,
) -> CheckOutcome {
    let Some(condition) = condition.filter(|c| !c.trim().is_empty()) else {
        return CheckOutcome::NotApplicable;
    };

    let evaluation = expression::evaluate_detailed(condition, response, env);
    if verbose {
        info!(
            "  Evaluating condition string: {}",
            expression::render_references(&evaluation.expression, response)
        );
        info!("  Condition '{}' evaluated to: {}", condition, evaluation.passed);
    }

    if evaluation.passed {
        CheckOutcome::Passed
    } else {
        details.push(describe_failure(label, condition, &evaluation));
        CheckOutcome::Failed
    }
}

fn describe_failure(label: &str, condition: &str, evaluation: &Evaluation) -> String {
    let mut message = format!("{label} Validation Failed ('{condition}').");
    if let Some(error) = &evaluation.error {
        message.push_str(&format!(" Error evaluating condition: {error}."));
    }
    for failure in &evaluation.failures {
        message.push_str(&format!(" {failure}."));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn case(code: Option<&str>, body: Option<&str>, header: Option<&str>) -> TestCase {
        TestCase {
            test_case_name: Some("case".into()),
            api_path: Some("/x".into()),
            expect_response_code: code.map(String::from),
            expect_response_body: body.map(String::from),
            expect_response_header: header.map(String::from),
            ..TestCase::default()
        }
    }

    fn response() -> Value {
        json!({
            "code": 200,
            "body": {"id": 1},
            "headers": {"content-type": "application/json"},
            "cookies": {},
            "elapsed_time_ms": 3.0
        })
    }

    #[test]
    fn test_status_code_mismatch_reports_both_values() {
        let v = validate_response(&case(Some("200"), None, None), 404, &response(), &Environment::new(), false);
        assert!(!v.passed);
        assert!(v.details[0].contains("200"));
        assert!(v.details[0].contains("404"));
        assert_eq!(v.body_validation, CheckOutcome::NotApplicable);
    }

    #[test]
    fn test_all_checks_pass() {
        let v = validate_response(
            &case(
                Some("200.0"),
                Some("equal(result.body.id, 1)"),
                Some("contains(result.headers, 'json')"),
            ),
            200,
            &response(),
            &Environment::new(),
            true,
        );
        assert!(v.passed, "{:?}", v.details);
        assert_eq!(v.body_validation, CheckOutcome::Passed);
        assert_eq!(v.header_validation, CheckOutcome::Passed);
        assert!(v.details.is_empty());
    }

    #[test]
    fn test_invalid_expected_code_is_noted_not_failed() {
        let v = validate_response(&case(Some("OK"), None, None), 500, &response(), &Environment::new(), false);
        assert!(v.passed);
        assert!(v.details[0].contains("Invalid 'expect_response_code'"));
    }

    #[test]
    fn test_failed_condition_details() {
        let v = validate_response(
            &case(None, Some("equal(result.body.id, 2)"), Some("bogus(")),
            200,
            &response(),
            &Environment::new(),
            false,
        );
        assert!(!v.passed);
        assert_eq!(v.body_validation, CheckOutcome::Failed);
        assert_eq!(v.header_validation, CheckOutcome::Failed);
        assert!(v.details[0].starts_with("Body Validation Failed"));
        assert!(v.details[0].contains("Expected '2', Actual '1'"));
        assert!(v.details[1].contains("Error evaluating condition"));
    }

    #[test]
    fn test_parse_status_code() {
        assert_eq!(parse_status_code(" 201 "), Some(201));
        assert_eq!(parse_status_code("204.0"), Some(204));
        assert_eq!(parse_status_code("20.5"), None);
        assert_eq!(parse_status_code("-1"), None);
    }
}
