//! Workbook execution: setup sheet, test sheets and cycles.

use crate::action;
use crate::api_client::{ApiRequest, RequestExecutor};
use crate::config::{initial_environment, RunOptions};
use crate::env::Environment;
use crate::literal;
use crate::model::*;
use crate::stats;
use crate::validator::validate_response;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

const MISSING_API_PATH: &str = "'api_path' is missing or empty.";

/// Workbook runner trait
#[async_trait]
pub trait WorkbookRunner: Send + Sync {
    /// Execute every selected sheet of a workbook
    async fn run(&self, workbook: &Workbook) -> Result<SuiteReport>;
}

/// Runs workbooks through a [`RequestExecutor`].
#[derive(Debug)]
pub struct SuiteRunner<E> {
    executor: E,
    options: RunOptions,
}

impl<E: RequestExecutor> SuiteRunner<E> {
    pub fn new(executor: E, options: RunOptions) -> Self {
        Self { executor, options }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run one row once. Always yields a terminal status; transport
    /// and internal failures are folded into the result, and a panic
    /// inside the row becomes `Error` instead of ending the suite.
    #[instrument(skip(self, case, env), fields(case = %case.name()))]
    pub async fn execute_test_case(
        &self,
        case: &TestCase,
        cycle: u32,
        env: &mut Environment,
    ) -> RunResult {
        match AssertUnwindSafe(self.run_case(case, cycle, env))
            .catch_unwind()
            .await
        {
            Ok(run) => run,
            Err(payload) => {
                let message = panic_message(&*payload);
                error!("Test case '{}' panicked: {}", case.name(), message);
                RunResult {
                    status: RunStatus::Error,
                    details: format!("Unexpected Error: {message}"),
                    ..RunResult::skipped(case.name(), cycle, "")
                }
            }
        }
    }

    async fn run_case(&self, case: &TestCase, cycle: u32, env: &mut Environment) -> RunResult {
        let name = case.name();
        if !case.has_api_path() {
            info!("Skipping '{}': {}", name, MISSING_API_PATH);
            return RunResult::skipped(name, cycle, MISSING_API_PATH);
        }

        let verbose = case.verbose();
        let (request, mut notes) = build_request(case, env);
        if verbose {
            info!("  Request: {} {}", request.method, request.url);
            info!("  Query params: {:?}", request.query);
            info!("  Headers: {:?}", request.headers);
            if let Some(body) = &request.body {
                info!("  Body: {}", body);
            }
        }

        let response = match self.executor.execute(&request).await {
            Ok(response) => response,
            Err(e) if e.is_transport() => {
                warn!("Request for '{}' failed: {}", name, e);
                return RunResult {
                    status: RunStatus::Failed,
                    details: join_details(vec![format!("Request Error: {e}")], notes),
                    ..RunResult::skipped(name, cycle, "")
                };
            }
            Err(e) => {
                error!("Unexpected error in '{}': {:?}", name, e);
                return RunResult {
                    status: RunStatus::Error,
                    details: join_details(vec![format!("Unexpected Error: {e:?}")], notes),
                    ..RunResult::skipped(name, cycle, "")
                };
            }
        };

        let result_value = response.to_value();
        if verbose {
            info!("  Response: {} in {:.2} ms", response.code, response.elapsed_ms);
            info!("  Response body: {}", response.body);
        }

        let validation = validate_response(case, response.code, &result_value, env, verbose);

        if let Some(statement) = case.action.as_deref() {
            let report = action::apply(statement, &result_value, env);
            for (key, value) in &report.bound {
                debug!("Environment updated: ${} = {}", key, value);
            }
            notes.extend(report.diagnostics);
        }

        RunResult {
            test_name: name.to_string(),
            cycle,
            status: if validation.passed {
                RunStatus::Passed
            } else {
                RunStatus::Failed
            },
            actual_code: Some(response.code),
            elapsed_ms: Some(response.elapsed_ms),
            body_validation: validation.body_validation,
            header_validation: validation.header_validation,
            details: join_details(validation.details, notes),
        }
    }

    /// Run the setup sheet once, stopping at its first failed or
    /// errored row. Rows after that are recorded as skipped.
    pub async fn run_setup_sheet(&self, sheet: &Sheet, env: &mut Environment) -> SheetReport {
        info!("Running setup sheet '{}'", sheet.name);
        let mut runs = Vec::with_capacity(sheet.cases.len());
        let mut failed_at: Option<String> = None;

        for case in &sheet.cases {
            let run = match &failed_at {
                Some(failed) => RunResult::skipped(
                    case.name(),
                    1,
                    format!("Setup aborted after '{failed}' failed."),
                ),
                None => self.execute_test_case(case, 1, env).await,
            };
            log_run(&sheet.name, &run);
            if failed_at.is_none() && run.status.is_failure() {
                error!("Setup case '{}' {}; aborting the suite", run.test_name, run.status);
                failed_at = Some(run.test_name.clone());
            }
            runs.push(vec![run]);
        }

        sheet_report(sheet, true, 1, runs)
    }

    /// Run an ordinary sheet for the configured number of cycles,
    /// sequentially, sharing `env` across cycles.
    pub async fn run_sheet(&self, sheet: &Sheet, env: &mut Environment) -> SheetReport {
        let cycles = self.options.cycles.max(1);
        let mut runs: Vec<Vec<RunResult>> = vec![Vec::with_capacity(cycles as usize); sheet.cases.len()];

        for cycle in 1..=cycles {
            info!("Running sheet '{}' (cycle {}/{})", sheet.name, cycle, cycles);
            let mut stopped_at: Option<String> = None;

            for (idx, case) in sheet.cases.iter().enumerate() {
                let run = match &stopped_at {
                    Some(failed) => RunResult::skipped(
                        case.name(),
                        cycle,
                        format!("Skipped after '{failed}' failed (stop_on_failure)."),
                    ),
                    None => self.execute_test_case(case, cycle, env).await,
                };
                log_run(&sheet.name, &run);
                if self.options.stop_on_failure && stopped_at.is_none() && run.status.is_failure() {
                    warn!("Stopping cycle {} of sheet '{}' at '{}'", cycle, sheet.name, run.test_name);
                    stopped_at = Some(run.test_name.clone());
                }
                runs[idx].push(run);
            }

            if cycle < cycles && !self.options.cycle_delay.is_zero() {
                tokio::time::sleep(self.options.cycle_delay).await;
            }
        }

        sheet_report(sheet, false, cycles, runs)
    }
}

#[async_trait]
impl<E: RequestExecutor> WorkbookRunner for SuiteRunner<E> {
    #[instrument(skip(self, workbook), fields(workbook = workbook.name.as_deref().unwrap_or("workbook")))]
    async fn run(&self, workbook: &Workbook) -> Result<SuiteReport> {
        let name = workbook.name.clone().unwrap_or_else(|| "workbook".to_string());
        let Some(setup) = workbook.setup_sheet() else {
            bail!("Workbook '{name}' has no sheets");
        };

        let started = Instant::now();
        let mut env = initial_environment(workbook, &self.options.variables);
        info!("Running workbook '{}' with {} variable(s)", name, env.len());

        let setup_report = self.run_setup_sheet(setup, &mut env).await;
        let aborted = setup_report
            .cases
            .iter()
            .any(|c| c.summary.status.is_failure());
        let mut sheets = vec![setup_report];

        if aborted {
            error!("Setup sheet '{}' failed; skipping remaining sheets", setup.name);
        } else {
            for sheet in workbook.test_sheets() {
                if !self.options.includes_sheet(&sheet.name) {
                    debug!("Sheet '{}' not selected", sheet.name);
                    continue;
                }
                sheets.push(self.run_sheet(sheet, &mut env).await);
            }
        }

        let report = SuiteReport {
            workbook: name,
            timestamp: Utc::now().to_rfc3339(),
            duration_ms: started.elapsed().as_millis() as u64,
            aborted,
            sheets,
        };

        info!(
            "Workbook finished: {} ({} ms) - Success: {}",
            report.workbook,
            report.duration_ms,
            report.success()
        );
        Ok(report)
    }
}

/// Substitute and parse the request columns of a row. Literal parser
/// diagnostics are returned as notes.
fn build_request(case: &TestCase, env: &Environment) -> (ApiRequest, Vec<String>) {
    let mut notes = Vec::new();
    let mut note = |diagnostic: Option<String>| {
        if let Some(d) = diagnostic {
            warn!("{}", d);
            notes.push(d);
        }
    };

    let cell = |value: &Option<String>| value.as_deref().unwrap_or_default().to_string();

    let query = literal::parse_map(&cell(&case.query_param), env);
    note(query.diagnostic);
    let headers = literal::parse_map(&cell(&case.inject_header), env);
    note(headers.diagnostic);
    let body = literal::parse_body(&cell(&case.body), env);
    note(body.diagnostic);

    let request = ApiRequest {
        method: case.method(),
        url: env.substitute(cell(&case.api_path).trim()),
        query: query.value,
        headers: headers.value,
        body: body.value,
    };
    (request, notes)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

fn join_details(details: Vec<String>, notes: Vec<String>) -> String {
    details
        .into_iter()
        .chain(notes)
        .collect::<Vec<_>>()
        .join(" ")
}

fn log_run(sheet: &str, run: &RunResult) {
    let elapsed = stats::format_ms(run.elapsed_ms);
    match run.status {
        RunStatus::Passed => info!("[{}] {} passed ({})", sheet, run.test_name, elapsed),
        RunStatus::Skipped => info!("[{}] {} skipped: {}", sheet, run.test_name, run.details),
        status => warn!("[{}] {} {} ({}): {}", sheet, run.test_name, status, elapsed, run.details),
    }
}

fn sheet_report(sheet: &Sheet, setup: bool, cycles: u32, runs: Vec<Vec<RunResult>>) -> SheetReport {
    let cases = sheet
        .cases
        .iter()
        .zip(runs)
        .map(|(case, runs)| CaseReport {
            key: format!("{}::{}", sheet.name, case.name()),
            test_name: case.name().to_string(),
            summary: stats::aggregate(&runs),
            runs,
        })
        .collect();

    SheetReport {
        name: sheet.name.clone(),
        setup,
        cycles,
        cases,
    }
}
