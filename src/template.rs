//! Sample workbook for `apisheet --init`.

use crate::model::{EnvEntry, Sheet, TestCase, Workbook, WorkbookConfig};
use crate::spreadsheet;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use tracing::info;

#[allow(clippy::too_many_arguments)]
fn row(
    name: &str,
    api_path: &str,
    method: &str,
    inject_header: &str,
    body: &str,
    expect_response_code: u16,
    expect_response_body: &str,
    action: &str,
) -> TestCase {
    let cell = |s: &str| (!s.is_empty()).then(|| s.to_string());
    TestCase {
        test_case_name: cell(name),
        api_path: cell(api_path),
        method: cell(method),
        query_param: None,
        inject_header: cell(inject_header),
        body: cell(body),
        expect_response_code: Some(expect_response_code.to_string()),
        expect_response_body: cell(expect_response_body),
        expect_response_header: None,
        action: cell(action),
        verbose: None,
    }
}

/// An environment sheet, a setup sheet acquiring a token and two
/// journey sheets that use it.
pub fn sample_workbook() -> Workbook {
    let environment = [
        ("base_url", "https://api.example.com"),
        ("username", "testuser"),
        ("password", "testpass"),
        ("client_id", "client123"),
        ("client_secret", "secret456"),
    ]
    .into_iter()
    .map(|(key, value)| EnvEntry {
        key: key.to_string(),
        value: value.to_string(),
    })
    .collect();

    let setup = Sheet {
        name: "Setup".to_string(),
        cases: vec![row(
            "Get Authentication Token",
            "$base_url/auth/token",
            "POST",
            "[{'Content-Type', 'application/json'}]",
            r#"{"client_id": "$client_id", "client_secret": "$client_secret"}"#,
            200,
            "contains(result.body, 'access_token')",
            "$accessToken = result.body.access_token",
        )],
    };

    let profile = TestCase {
        query_param: Some("[{'fields': 'id,email'}]".to_string()),
        expect_response_header: Some("contains(result.headers, 'application/json')".to_string()),
        verbose: Some("true".to_string()),
        ..row(
            "Get User Profile",
            "$base_url/api/users/profile",
            "GET",
            "[{'Authorization', 'Bearer $accessToken'}, {'Content-Type', 'application/json'}]",
            "",
            200,
            "contains(result.body, 'id') and contains(result.body, 'email')",
            "$userId = result.body.id",
        )
    };

    let journey_two = vec![
        row(
            "Create Resource",
            "$base_url/api/resources",
            "POST",
            "[{'Authorization', 'Bearer $accessToken'}, {'Content-Type', 'application/json'}]",
            r#"{"name": "Test Resource", "owner_id": "$userId"}"#,
            201,
            "contains(result.body, 'id')",
            "$resourceId = result.body.id",
        ),
        row(
            "Delete Resource",
            "$base_url/api/resources/$resourceId",
            "DELETE",
            "[{'Authorization', 'Bearer $accessToken'}]",
            "",
            204,
            "",
            "",
        ),
    ];

    Workbook {
        name: Some("API Test Template".to_string()),
        config: WorkbookConfig::default(),
        environment,
        sheets: vec![
            setup,
            Sheet {
                name: "User Journey 1".to_string(),
                cases: vec![profile],
            },
            Sheet {
                name: "User Journey 2".to_string(),
                cases: journey_two,
            },
        ],
    }
}

/// Write the sample workbook to `path`, refusing to overwrite an
/// existing file. Spreadsheet extensions (`.xlsx`) get a spreadsheet,
/// anything else YAML.
pub fn write_template(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("Refusing to overwrite existing file {}", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .context(format!("Failed to create directory {}", parent.display()))?;
    }

    let workbook = sample_workbook();
    if spreadsheet::is_spreadsheet(path) {
        spreadsheet::write_workbook(&workbook, path)?;
    } else {
        let yaml = workbook
            .to_yaml()
            .context("Failed to serialize template workbook")?;
        fs::write(path, yaml).context(format!("Failed to write template {}", path.display()))?;
    }

    info!("Template created at: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkbookLoader;
    use crate::env::Environment;
    use crate::literal::parse_map;

    #[test]
    fn test_template_round_trips_through_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/template.yaml");
        write_template(&path).unwrap();

        let workbook = WorkbookLoader::new().load_workbook(&path).unwrap();
        assert_eq!(workbook.name.as_deref(), Some("API Test Template"));
        assert_eq!(workbook.environment.len(), 5);
        let names: Vec<_> = workbook.sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Setup", "User Journey 1", "User Journey 2"]);
        assert_eq!(workbook.sheets[2].cases[1].method(), "DELETE");
        assert!(workbook.sheets[1].cases[0].verbose());

        assert!(write_template(&path).is_err());
    }

    #[test]
    fn test_spreadsheet_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_test_template.xlsx");
        write_template(&path).unwrap();

        let workbook = WorkbookLoader::new().load_workbook(&path).unwrap();
        let sample = sample_workbook();
        assert_eq!(workbook.name.as_deref(), Some("api_test_template"));
        assert_eq!(workbook.sheets.len(), sample.sheets.len());
        assert_eq!(workbook.environment, sample.environment);
        for (read, written) in workbook.sheets.iter().zip(&sample.sheets) {
            assert_eq!(read.name, written.name);
            assert_eq!(read.cases, written.cases);
        }

        assert!(write_template(&path).is_err());
    }

    #[test]
    fn test_template_headers_parse() {
        let workbook = sample_workbook();
        let env = Environment::from_pairs([("accessToken", "tok")]);
        let header = workbook.sheets[1].cases[0].inject_header.clone().unwrap();
        let headers = parse_map(&header, &env).value;
        assert_eq!(headers.get("Authorization").map(String::as_str), Some("Bearer tok"));
        assert_eq!(headers.get("Content-Type").map(String::as_str), Some("application/json"));
    }
}
