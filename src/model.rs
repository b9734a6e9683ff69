//! Workbook definitions and run result records.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// A test workbook: environment bindings, a setup sheet and any
/// number of ordinary test sheets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workbook {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: WorkbookConfig,
    /// Initial environment bindings. Accepts a mapping or a list of
    /// `{key, value}` rows.
    #[serde(default, deserialize_with = "environment_sheet")]
    pub environment: Vec<EnvEntry>,
    /// `sheets[0]` is the setup sheet.
    #[serde(default)]
    pub sheets: Vec<Sheet>,
}

/// One `key`/`value` row of the environment sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvEntry {
    #[serde(deserialize_with = "required_cell")]
    pub key: String,
    #[serde(default, deserialize_with = "required_cell")]
    pub value: String,
}

/// Run settings stored in the workbook; CLI flags override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkbookConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// How many times each ordinary sheet is executed.
    #[serde(default = "default_cycles")]
    pub cycles: u32,
    /// Pause between cycles.
    #[serde(default = "default_cycle_delay_ms")]
    pub cycle_delay_ms: u64,
    /// Stop a sheet at its first failed or errored case.
    #[serde(default)]
    pub stop_on_failure: bool,
}

impl Default for WorkbookConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            cycles: default_cycles(),
            cycle_delay_ms: default_cycle_delay_ms(),
            stop_on_failure: false,
        }
    }
}

fn default_timeout() -> u64 {
    15
}

fn default_cycles() -> u32 {
    1
}

fn default_cycle_delay_ms() -> u64 {
    500
}

/// A named list of test cases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    #[serde(default)]
    pub cases: Vec<TestCase>,
}

/// One row of a test sheet. Every column is free text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default, deserialize_with = "cell", skip_serializing_if = "Option::is_none")]
    pub test_case_name: Option<String>,
    #[serde(default, deserialize_with = "cell", skip_serializing_if = "Option::is_none")]
    pub api_path: Option<String>,
    #[serde(default, deserialize_with = "cell", skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, deserialize_with = "cell", skip_serializing_if = "Option::is_none")]
    pub query_param: Option<String>,
    #[serde(default, deserialize_with = "cell", skip_serializing_if = "Option::is_none")]
    pub inject_header: Option<String>,
    #[serde(default, deserialize_with = "cell", skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, deserialize_with = "cell", skip_serializing_if = "Option::is_none")]
    pub expect_response_code: Option<String>,
    #[serde(default, deserialize_with = "cell", skip_serializing_if = "Option::is_none")]
    pub expect_response_body: Option<String>,
    #[serde(default, deserialize_with = "cell", skip_serializing_if = "Option::is_none")]
    pub expect_response_header: Option<String>,
    #[serde(default, deserialize_with = "cell", skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, deserialize_with = "cell", skip_serializing_if = "Option::is_none")]
    pub verbose: Option<String>,
}

impl TestCase {
    pub fn name(&self) -> &str {
        self.test_case_name.as_deref().unwrap_or_default()
    }

    /// Upper-cased method, `GET` when blank.
    pub fn method(&self) -> String {
        match self.method.as_deref().map(str::trim) {
            Some(m) if !m.is_empty() => m.to_uppercase(),
            _ => "GET".to_string(),
        }
    }

    /// `true`, `yes` or `1`, case-insensitive.
    pub fn verbose(&self) -> bool {
        self.verbose
            .as_deref()
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "yes" | "1"))
            .unwrap_or(false)
    }

    pub fn has_api_path(&self) -> bool {
        self.api_path.as_deref().is_some_and(|p| !p.trim().is_empty())
    }
}

/// Read any scalar cell as text; blank and null cells are `None`.
/// Mappings and sequences are kept as JSON text.
fn cell<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    Ok(value.and_then(cell_text))
}

fn required_cell<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(cell(deserializer)?.unwrap_or_default())
}

fn cell_text(value: serde_yaml::Value) -> Option<String> {
    use serde_yaml::Value as Y;
    let text = match value {
        Y::Null => return None,
        Y::Bool(b) => b.to_string(),
        Y::Number(n) => n.to_string(),
        Y::String(s) => s,
        other => serde_json::to_string(&other).ok()?,
    };
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn environment_sheet<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<EnvEntry>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum EnvSheet {
        Map(serde_yaml::Mapping),
        Rows(Vec<EnvEntry>),
    }

    let entries = match Option::<EnvSheet>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(EnvSheet::Rows(rows)) => rows,
        Some(EnvSheet::Map(map)) => map
            .into_iter()
            .filter_map(|(k, v)| {
                let key = cell_text(k)?.trim().to_string();
                Some(EnvEntry {
                    key,
                    value: cell_text(v).unwrap_or_default(),
                })
            })
            .collect(),
    };
    Ok(entries
        .into_iter()
        .filter(|e| !e.key.trim().is_empty())
        .collect())
}

impl Workbook {
    /// Deserialize a workbook from YAML (or JSON) text. Rows without
    /// a test case name are dropped.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let mut workbook: Workbook = serde_yaml::from_str(yaml)?;
        for sheet in &mut workbook.sheets {
            sheet
                .cases
                .retain(|case| case.test_case_name.as_deref().is_some_and(|n| !n.trim().is_empty()));
        }
        Ok(workbook)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn setup_sheet(&self) -> Option<&Sheet> {
        self.sheets.first()
    }

    pub fn test_sheets(&self) -> &[Sheet] {
        self.sheets.get(1..).unwrap_or_default()
    }
}

/// Terminal status of one test case execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Passed,
    Failed,
    Error,
    Skipped,
}

impl RunStatus {
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Error)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Passed => "Passed",
            Self::Failed => "Failed",
            Self::Error => "Error",
            Self::Skipped => "Skipped",
        })
    }
}

/// Outcome of a body or header condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckOutcome {
    #[default]
    #[serde(rename = "N/A")]
    NotApplicable,
    Passed,
    Failed,
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotApplicable => "N/A",
            Self::Passed => "Passed",
            Self::Failed => "Failed",
        })
    }
}

/// Result of one test case in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub test_name: String,
    /// 1-based cycle number.
    pub cycle: u32,
    pub status: RunStatus,
    pub actual_code: Option<u16>,
    pub elapsed_ms: Option<f64>,
    pub body_validation: CheckOutcome,
    pub header_validation: CheckOutcome,
    pub details: String,
}

impl RunResult {
    pub fn skipped(test_name: &str, cycle: u32, details: impl Into<String>) -> Self {
        Self {
            test_name: test_name.to_string(),
            cycle,
            status: RunStatus::Skipped,
            actual_code: None,
            elapsed_ms: None,
            body_validation: CheckOutcome::NotApplicable,
            header_validation: CheckOutcome::NotApplicable,
            details: details.into(),
        }
    }
}

/// Elapsed-time statistics in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingStats {
    pub samples: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation; 0 for a single sample.
    pub stdev: f64,
}

/// Summary of all runs of one test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub runs: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
    /// `None` when no run recorded an elapsed time.
    pub timing: Option<TimingStats>,
    /// Percentage of executed runs that passed; `None` when nothing
    /// was executed.
    pub success_rate: Option<f64>,
    pub failure_rate: Option<f64>,
    /// Error > Failed > Passed > Skipped.
    pub status: RunStatus,
    pub last_status: Option<RunStatus>,
}

/// All runs of one test case row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    /// `<sheet>::<test case>`
    pub key: String,
    pub test_name: String,
    pub runs: Vec<RunResult>,
    pub summary: AggregatedResult,
}

/// Results of one sheet, in row order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetReport {
    pub name: String,
    pub setup: bool,
    pub cycles: u32,
    pub cases: Vec<CaseReport>,
}

/// Counts of overall case statuses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: RunStatus) {
        self.total += 1;
        match status {
            RunStatus::Passed => self.passed += 1,
            RunStatus::Failed => self.failed += 1,
            RunStatus::Error => self.errors += 1,
            RunStatus::Skipped => self.skipped += 1,
        }
    }
}

/// Full result of running a workbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub workbook: String,
    pub timestamp: String,
    pub duration_ms: u64,
    /// The setup sheet failed and the test sheets were not run.
    pub aborted: bool,
    pub sheets: Vec<SheetReport>,
}

impl SuiteReport {
    pub fn cases(&self) -> impl Iterator<Item = &CaseReport> {
        self.sheets.iter().flat_map(|s| s.cases.iter())
    }

    pub fn case(&self, key: &str) -> Option<&CaseReport> {
        self.cases().find(|c| c.key == key)
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for case in self.cases() {
            counts.record(case.summary.status);
        }
        counts
    }

    pub fn success(&self) -> bool {
        !self.aborted && self.cases().all(|c| !c.summary.status.is_failure())
    }
}
