//! Console tables and report files.

use crate::model::{RunResult, SheetReport, SuiteReport};
use crate::stats::{format_ms, format_rate};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::ValueEnum;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

const DETAILS_WIDTH: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Json,
    Yaml,
    Text,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Text => "txt",
        }
    }
}

/// Left-aligned plain-text table sized to its widest cells.
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    out.push_str(&format_line(headers.iter().copied(), &widths));
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.push('\n');
    for row in rows {
        out.push_str(&format_line(row.iter().map(String::as_str), &widths));
        out.push('\n');
    }
    out
}

fn format_line<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    cells
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join(" | ")
        .trim_end()
        .to_string()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let mut cut: String = text.chars().take(max).collect();
        cut.push_str("...");
        cut
    } else {
        text.to_string()
    }
}

fn run_row(run: &RunResult, label: String) -> Vec<String> {
    vec![
        label,
        format_ms(run.elapsed_ms),
        run.status.to_string(),
        run.actual_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "N/A".to_string()),
        run.body_validation.to_string(),
        run.header_validation.to_string(),
        truncate(&run.details, DETAILS_WIDTH),
    ]
}

/// One row per run; runs are labelled with their cycle when the sheet
/// ran more than once.
pub fn render_sheet_table(sheet: &SheetReport) -> String {
    let rows: Vec<Vec<String>> = sheet
        .cases
        .iter()
        .flat_map(|case| {
            case.runs.iter().map(move |run| {
                let label = if sheet.cycles > 1 {
                    format!("{} (#{})", case.test_name, run.cycle)
                } else {
                    case.test_name.clone()
                };
                run_row(run, label)
            })
        })
        .collect();

    let kind = if sheet.setup { "Setup sheet" } else { "Sheet" };
    format!(
        "{kind}: {}\n{}",
        sheet.name,
        render_table(
            &[
                "Test Name",
                "Response Time",
                "Status",
                "Code",
                "Body Val",
                "Header Val",
                "Details",
            ],
            &rows,
        )
    )
}

/// Per-case statistics, or `None` when every case ran at most once.
pub fn render_cycle_stats(report: &SuiteReport) -> Option<String> {
    let rows: Vec<Vec<String>> = report
        .cases()
        .filter(|case| case.runs.len() > 1)
        .map(|case| {
            let s = &case.summary;
            let timing = |f: fn(&crate::model::TimingStats) -> f64| {
                format_ms(s.timing.as_ref().map(f))
            };
            vec![
                case.key.clone(),
                s.runs.to_string(),
                s.passed.to_string(),
                s.failed.to_string(),
                s.errors.to_string(),
                s.skipped.to_string(),
                timing(|t| t.min),
                timing(|t| t.max),
                timing(|t| t.mean),
                timing(|t| t.median),
                timing(|t| t.stdev),
                format_rate(s.success_rate),
                s.last_status
                    .map(|st| st.to_string())
                    .unwrap_or_else(|| "N/A".to_string()),
            ]
        })
        .collect();

    if rows.is_empty() {
        return None;
    }

    Some(format!(
        "Cycle statistics\n{}",
        render_table(
            &[
                "Test Case",
                "Runs",
                "Passed",
                "Failed",
                "Errors",
                "Skipped",
                "Min",
                "Max",
                "Mean",
                "Median",
                "StdDev",
                "Success",
                "Last",
            ],
            &rows,
        )
    ))
}

pub fn render_summary(report: &SuiteReport) -> String {
    let counts = report.counts();
    let mut out = String::new();
    let _ = writeln!(out, "Summary for '{}'", report.workbook);
    let _ = writeln!(out, "  Total test cases attempted: {}", counts.total);
    let _ = writeln!(out, "  Passed: {}", counts.passed);
    let _ = writeln!(out, "  Failed: {}", counts.failed);
    let _ = writeln!(out, "  Errors: {}", counts.errors);
    let _ = writeln!(out, "  Skipped: {}", counts.skipped);
    let _ = writeln!(out, "  Duration: {} ms", report.duration_ms);
    if report.aborted {
        let _ = writeln!(out, "  Setup failed; remaining sheets were not run.");
    }
    out
}

/// Every table plus the summary, as printed to the console.
pub fn render_text(report: &SuiteReport) -> String {
    let mut sections: Vec<String> = report.sheets.iter().map(render_sheet_table).collect();
    sections.extend(render_cycle_stats(report));
    sections.push(render_summary(report));
    sections.join("\n")
}

/// Write `report` to `<dir>/<workbook>-<unix timestamp>.<ext>`.
pub fn save_report(report: &SuiteReport, report_dir: &Path, format: ReportFormat) -> Result<PathBuf> {
    if !report_dir.exists() {
        fs::create_dir_all(report_dir)
            .context(format!("Failed to create report directory {}", report_dir.display()))?;
    }

    let content = match format {
        ReportFormat::Json => serde_json::to_string_pretty(report)?,
        ReportFormat::Yaml => serde_yaml::to_string(report)?,
        ReportFormat::Text => render_text(report),
    };

    let sanitized_name = report.workbook.replace([' ', '/', '\\'], "_");
    let filename = format!(
        "{sanitized_name}-{}.{}",
        Utc::now().timestamp(),
        format.extension()
    );
    let file_path = report_dir.join(filename);
    fs::write(&file_path, content)
        .context(format!("Failed to write report {}", file_path.display()))?;

    Ok(file_path)
}
