use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use apisheet::{
    template, CheckOutcome, HttpExecutor, RunOptions, RunStatus, SuiteReport, SuiteRunner,
    Workbook, WorkbookLoader, WorkbookRunner,
};
use axum::{
    extract::{Path, Query},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

const TOKEN: &str = "tok-123";

struct TestServer {
    base_url: String,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(format!("Bearer {TOKEN}").as_str())
}

async fn issue_token(Json(body): Json<Value>) -> Response {
    if body["client_id"] == "client123" && body["client_secret"] == "secret456" {
        (
            [(header::SET_COOKIE, "session=s-1; Path=/")],
            Json(json!({"access_token": TOKEN, "token_type": "Bearer"})),
        )
            .into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid_client"})),
        )
            .into_response()
    }
}

async fn profile(headers: HeaderMap) -> Response {
    if authorized(&headers) {
        Json(json!({"id": 42, "email": "amy@example.com", "name": "amy"})).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"}))).into_response()
    }
}

async fn list_items(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let page = query
        .get("page")
        .and_then(|p| p.parse::<u64>().ok())
        .unwrap_or(1);
    Json(json!({
        "page": page,
        "items": [{"id": "item-1"}, {"id": "item-2"}]
    }))
}

async fn get_item(Path(id): Path<String>) -> Response {
    if id.starts_with("item-") {
        Json(json!({"id": id})).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn create_resource(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    (
        StatusCode::CREATED,
        Json(json!({
            "id": "res-7",
            "name": body["name"],
            "owner_id": body["owner_id"]
        })),
    )
        .into_response()
}

async fn delete_resource(headers: HeaderMap, Path(id): Path<String>) -> StatusCode {
    if !authorized(&headers) {
        StatusCode::UNAUTHORIZED
    } else if id == "res-7" {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

impl TestServer {
    async fn spawn() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();

        let app = Router::new()
            .route("/auth/token", post(issue_token))
            .route("/api/users/profile", get(profile))
            .route("/api/items", get(list_items))
            .route("/api/items/:id", get(get_item))
            .route("/api/resources", post(create_resource))
            .route("/api/resources/:id", delete(delete_resource))
            .route("/text", get(|| async move { "Hello runner world" }))
            .route(
                "/slow",
                get(|| async move {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    Json(json!({"slow": true}))
                }),
            );

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let server = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });

        let handle = tokio::spawn(async move {
            if let Err(err) = server.await {
                eprintln!("test server error: {err}");
            }
        });
        let base_url = format!("http://{addr}");

        Self {
            base_url,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn load_workbook(path: &str, base_url: &str) -> Workbook {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let workbook_path = manifest_dir.join("tests/fixtures").join(path);
    let content = fs::read_to_string(&workbook_path)
        .unwrap_or_else(|e| panic!("failed to read {workbook_path:?}: {e}"));
    let content = content.replace("__BASE_URL__", base_url);

    Workbook::from_yaml(&content).unwrap_or_else(|e| panic!("failed to parse workbook yaml: {e}"))
}

async fn run(workbook: &Workbook, options: RunOptions) -> SuiteReport {
    let executor = HttpExecutor::new(options.timeout).expect("failed to build executor");
    SuiteRunner::new(executor, options)
        .run(workbook)
        .await
        .expect("runner returned error")
}

fn status(report: &SuiteReport, key: &str) -> RunStatus {
    report
        .case(key)
        .unwrap_or_else(|| panic!("no case {key}"))
        .summary
        .status
}

#[tokio::test]
async fn journey_binds_values_across_sheets() {
    let server = TestServer::spawn().await;
    let workbook = load_workbook("journey.yaml", &server.base_url);
    let report = run(&workbook, RunOptions::from_config(&workbook.config)).await;

    let failures: Vec<_> = report
        .cases()
        .filter(|c| c.summary.status != RunStatus::Passed)
        .map(|c| (c.key.clone(), c.runs[0].details.clone()))
        .collect();
    assert!(report.success(), "unexpected failures: {failures:?}");
    assert!(!report.aborted);
    assert_eq!(report.sheets.len(), 3);

    let token = report.case("Setup::Get Authentication Token").unwrap();
    assert_eq!(token.runs[0].actual_code, Some(200));
    assert_eq!(token.runs[0].header_validation, CheckOutcome::Passed);
    assert_eq!(status(&report, "User Journey 1::Get Item"), RunStatus::Passed);
    assert_eq!(
        status(&report, "User Journey 2::Delete Resource"),
        RunStatus::Passed
    );

    server.shutdown().await;
}

#[tokio::test]
async fn cycles_are_aggregated_per_case() {
    let server = TestServer::spawn().await;
    let workbook = load_workbook("journey.yaml", &server.base_url);
    let options = RunOptions {
        cycles: 3,
        ..RunOptions::from_config(&workbook.config)
    };
    let report = run(&workbook, options).await;

    assert!(report.success());
    let setup = report.case("Setup::Get Authentication Token").unwrap();
    assert_eq!(setup.runs.len(), 1);

    let create = report.case("User Journey 2::Create Resource").unwrap();
    assert_eq!(create.runs.len(), 3);
    assert_eq!(create.summary.passed, 3);
    assert_eq!(create.summary.success_rate, Some(100.0));
    let timing = create.summary.timing.as_ref().unwrap();
    assert_eq!(timing.samples, 3);
    assert!(timing.min <= timing.median && timing.median <= timing.max);
    assert_eq!(create.summary.last_status, Some(RunStatus::Passed));

    server.shutdown().await;
}

#[tokio::test]
async fn setup_failure_skips_remaining_sheets() {
    let server = TestServer::spawn().await;
    let workbook = load_workbook("setup_failure.yaml", &server.base_url);
    let report = run(&workbook, RunOptions::from_config(&workbook.config)).await;

    assert!(report.aborted);
    assert!(!report.success());
    assert_eq!(report.sheets.len(), 1);

    let token = report.case("Setup::Get Authentication Token").unwrap();
    assert_eq!(token.summary.status, RunStatus::Failed);
    assert!(token.runs[0].details.contains("Actual: 401"));
    assert!(token.runs[0].details.contains("not updated"));
    assert_eq!(status(&report, "Setup::Never Runs"), RunStatus::Skipped);
    assert!(report.case("Journey::Get User Profile").is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn failures_are_classified() {
    let server = TestServer::spawn().await;
    let workbook = load_workbook("failures.yaml", &server.base_url);
    let report = run(&workbook, RunOptions::from_config(&workbook.config)).await;
    assert!(!report.success());

    let wrong = report.case("Failures::Wrong Status").unwrap();
    assert_eq!(wrong.summary.status, RunStatus::Failed);
    assert!(wrong.runs[0]
        .details
        .contains("Status Code Failed (Expected: 200, Actual: 404)"));

    let body = &report.case("Failures::Body Mismatch").unwrap().runs[0];
    assert_eq!(body.status, RunStatus::Failed);
    assert_eq!(body.body_validation, CheckOutcome::Failed);
    assert!(body.details.contains("Expected '5', Actual '2'"));

    let profile = &report.case("Failures::Unauthorized Profile").unwrap().runs[0];
    assert_eq!(profile.actual_code, Some(401));
    assert_eq!(profile.header_validation, CheckOutcome::Failed);
    assert!(!profile.details.contains("Status Code Failed"));

    assert_eq!(status(&report, "Failures::Text Body"), RunStatus::Passed);

    let slow = &report.case("Failures::Slow Endpoint").unwrap().runs[0];
    assert_eq!(slow.status, RunStatus::Failed);
    assert!(slow.details.starts_with("Request Error:"));
    assert_eq!(slow.elapsed_ms, None);

    let unreachable = &report.case("Failures::Unreachable Host").unwrap().runs[0];
    assert_eq!(unreachable.status, RunStatus::Failed);
    assert!(unreachable.details.starts_with("Request Error:"));

    let blank = &report.case("Failures::Blank Path").unwrap().runs[0];
    assert_eq!(blank.status, RunStatus::Skipped);
    assert_eq!(blank.details, "'api_path' is missing or empty.");

    let malformed = &report.case("Failures::Malformed Condition").unwrap().runs[0];
    assert_eq!(malformed.status, RunStatus::Failed);
    assert_eq!(malformed.body_validation, CheckOutcome::Failed);

    let counts = report.counts();
    assert_eq!(counts.total, 8);
    assert_eq!(counts.passed, 1);
    assert_eq!(counts.skipped, 1);
    assert_eq!(counts.failed, 6);

    server.shutdown().await;
}

#[tokio::test]
async fn generated_template_runs_against_server() {
    let server = TestServer::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("template.yaml");
    template::write_template(&path).unwrap();

    let workbook = WorkbookLoader::new().load_workbook(&path).unwrap();
    let options = RunOptions {
        cycle_delay: Duration::ZERO,
        variables: vec![("base_url".to_string(), server.base_url.clone())],
        ..RunOptions::from_config(&workbook.config)
    };
    let report = run(&workbook, options).await;

    let failures: Vec<_> = report
        .cases()
        .filter(|c| c.summary.status != RunStatus::Passed)
        .map(|c| (c.key.clone(), c.runs[0].details.clone()))
        .collect();
    assert!(report.success(), "unexpected failures: {failures:?}");
    assert_eq!(
        status(&report, "User Journey 2::Delete Resource"),
        RunStatus::Passed
    );

    server.shutdown().await;
}

#[tokio::test]
async fn spreadsheet_template_runs_against_server() {
    let server = TestServer::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("api_test_template.xlsx");
    template::write_template(&path).unwrap();

    let workbook = WorkbookLoader::new().load_workbook(&path).unwrap();
    assert_eq!(workbook.sheets.len(), 3);
    let options = RunOptions {
        cycle_delay: Duration::ZERO,
        variables: vec![("base_url".to_string(), server.base_url.clone())],
        ..RunOptions::from_config(&workbook.config)
    };
    let report = run(&workbook, options).await;

    let failures: Vec<_> = report
        .cases()
        .filter(|c| c.summary.status != RunStatus::Passed)
        .map(|c| (c.key.clone(), c.runs[0].details.clone()))
        .collect();
    assert!(report.success(), "unexpected failures: {failures:?}");
    assert_eq!(report.workbook, "api_test_template");
    assert_eq!(
        status(&report, "User Journey 1::Get User Profile"),
        RunStatus::Passed
    );

    server.shutdown().await;
}
