//! apisheet CLI - runs spreadsheet-style API test workbooks.

use anyhow::{bail, Result};
use apisheet::{
    parse_variable, report, template, ConfigOverrides, HttpExecutor, ReportFormat, RunOptions,
    SuiteReport, SuiteRunner, WorkbookLoader, WorkbookRunner,
};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Data-driven API test runner.
#[derive(Parser, Debug)]
#[command(name = "apisheet", version, about)]
struct Cli {
    /// Workbook file (YAML, JSON or spreadsheet) or directory of workbooks.
    #[arg(short = 'p', long = "path", required_unless_present = "init")]
    test_path: Option<PathBuf>,

    /// Write a sample workbook to this path and exit (`.xlsx` for a
    /// spreadsheet, otherwise YAML).
    #[arg(long = "init", value_name = "PATH", conflicts_with = "test_path")]
    init: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Request timeout in seconds.
    #[arg(short = 't', long = "timeout")]
    timeout: Option<u64>,

    /// Number of times each test sheet is executed.
    #[arg(short = 'c', long = "cycles", env = "APISHEET_CYCLES")]
    cycles: Option<u32>,

    /// Pause between cycles in milliseconds.
    #[arg(long = "cycle-delay-ms")]
    cycle_delay_ms: Option<u64>,

    /// Stop a sheet's cycle at its first failed test case.
    #[arg(long = "stop-on-failure")]
    stop_on_failure: bool,

    /// Only run these test sheets (repeatable). The setup sheet always runs.
    #[arg(short = 's', long = "sheet")]
    sheets: Vec<String>,

    /// Extra environment binding, `key=value` (repeatable).
    #[arg(long = "var", value_parser = parse_var)]
    variables: Vec<(String, String)>,

    /// Directory to save report files.
    #[arg(short = 'r', long = "report-dir", env = "APISHEET_REPORT_DIR")]
    report_dir: Option<PathBuf>,

    /// Report output format.
    #[arg(long = "report-format", default_value = "json")]
    report_format: ReportFormat,
}

fn parse_var(text: &str) -> Result<(String, String), String> {
    parse_variable(text).map_err(|e| e.to_string())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

fn print_report(report: &SuiteReport) {
    let status = if report.success() {
        "\x1b[32mPASS\x1b[0m"
    } else {
        "\x1b[31mFAIL\x1b[0m"
    };
    println!("{}", report::render_text(report));
    info!(
        "{} workbook: {} ({} ms)",
        status, report.workbook, report.duration_ms
    );
}

async fn run_all(cli: &Cli, test_path: &Path) -> Result<bool> {
    let workbooks = WorkbookLoader::new().load(test_path)?;
    let overrides = ConfigOverrides {
        timeout: cli.timeout,
        cycles: cli.cycles,
        cycle_delay_ms: cli.cycle_delay_ms,
        stop_on_failure: cli.stop_on_failure,
        sheets: cli.sheets.clone(),
        variables: cli.variables.clone(),
    };

    let total_start = Instant::now();
    let total = workbooks.len();
    let mut all_success = true;

    for (idx, workbook) in workbooks.iter().enumerate() {
        let options = RunOptions::resolve(&workbook.config, &overrides);
        info!(
            "Workbook {}/{}: {}",
            idx + 1,
            total,
            workbook.name.as_deref().unwrap_or("workbook")
        );

        let runner = SuiteRunner::new(HttpExecutor::new(options.timeout)?, options);
        match runner.run(workbook).await {
            Ok(report) => {
                print_report(&report);
                if let Some(dir) = &cli.report_dir {
                    match report::save_report(&report, dir, cli.report_format) {
                        Ok(path) => info!("Report saved: {}", path.display()),
                        Err(e) => error!("Failed to save report: {:#}", e),
                    }
                }
                all_success &= report.success();
            }
            Err(e) => {
                error!("\x1b[31mWorkbook execution error: {:#}\x1b[0m", e);
                all_success = false;
            }
        }
    }

    info!(
        "Finished {} workbook(s) in {} ms",
        total,
        total_start.elapsed().as_millis()
    );
    Ok(all_success)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Some(path) = &cli.init {
        template::write_template(path)?;
        return Ok(());
    }

    let Some(test_path) = cli.test_path.clone() else {
        bail!("--path is required");
    };

    if !run_all(&cli, &test_path).await? {
        exit(1);
    }

    Ok(())
}
