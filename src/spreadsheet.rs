//! Excel workbooks.
//!
//! The first worksheet holds environment rows (`key | value`, no header
//! required), the second is the setup sheet and every later worksheet
//! is an ordinary test sheet. Test sheets start with a header row
//! naming the columns; unknown columns are ignored.

use crate::model::{EnvEntry, Sheet, TestCase, Workbook, WorkbookConfig};
use anyhow::{anyhow, bail, Context, Result};
use calamine::{open_workbook_auto, Data, Range, Reader};
use rust_xlsxwriter::{Workbook as XlsxWorkbook, XlsxError};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, warn};

/// Test sheet columns in the order they are written.
pub const COLUMNS: [&str; 11] = [
    "test_case_name",
    "api_path",
    "query_param",
    "method",
    "inject_header",
    "body",
    "expect_response_code",
    "expect_response_body",
    "expect_response_header",
    "action",
    "verbose",
];

const ENVIRONMENT_SHEET: &str = "Environment";

/// `.xlsx`, `.xlsm`, `.xls` and `.ods` files are spreadsheets.
pub fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            matches!(
                ext.to_ascii_lowercase().as_str(),
                "xlsx" | "xlsm" | "xls" | "ods"
            )
        })
}

/// Read a spreadsheet into a [`Workbook`] with default run settings.
pub fn read_workbook(path: &Path) -> Result<Workbook> {
    let mut book = open_workbook_auto(path)
        .map_err(|e| anyhow!("Failed to open spreadsheet {}: {e}", path.display()))?;

    let names = book.sheet_names();
    if names.len() < 2 {
        bail!(
            "Spreadsheet {} needs an environment sheet and a setup sheet, found {} sheet(s)",
            path.display(),
            names.len()
        );
    }

    let mut environment = Vec::new();
    let mut sheets = Vec::with_capacity(names.len() - 1);
    for (idx, name) in names.iter().enumerate() {
        let range = book
            .worksheet_range(name)
            .map_err(|e| anyhow!("Failed to read sheet '{name}': {e}"))?;
        if idx == 0 {
            environment = environment_rows(&range);
        } else {
            sheets.push(test_sheet(name, &range)?);
        }
    }

    debug!(
        "Read {} environment row(s) and {} sheet(s) from {}",
        environment.len(),
        sheets.len(),
        path.display()
    );
    Ok(Workbook {
        name: None,
        config: WorkbookConfig::default(),
        environment,
        sheets,
    })
}

/// Write `workbook` as a spreadsheet in the layout [`read_workbook`]
/// expects. The workbook's name and `config` block are not stored.
pub fn write_workbook(workbook: &Workbook, path: &Path) -> Result<()> {
    let is_xlsx = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx"));
    if !is_xlsx {
        bail!("Only .xlsx spreadsheets can be written, got {}", path.display());
    }
    build_xlsx(workbook)
        .and_then(|mut book| book.save(path))
        .map_err(|e| anyhow!("Failed to write spreadsheet {}: {e}", path.display()))
}

fn build_xlsx(workbook: &Workbook) -> Result<XlsxWorkbook, XlsxError> {
    let mut book = XlsxWorkbook::new();

    let env_sheet = book.add_worksheet();
    env_sheet.set_name(ENVIRONMENT_SHEET)?;
    env_sheet.write_string(0, 0, "Key")?;
    env_sheet.write_string(0, 1, "Value")?;
    for (idx, entry) in workbook.environment.iter().enumerate() {
        let row = idx as u32 + 1;
        env_sheet.write_string(row, 0, entry.key.as_str())?;
        env_sheet.write_string(row, 1, entry.value.as_str())?;
    }

    for sheet in &workbook.sheets {
        let worksheet = book.add_worksheet();
        worksheet.set_name(sheet.name.as_str())?;
        for (col, column) in COLUMNS.iter().enumerate() {
            worksheet.write_string(0, col as u16, *column)?;
        }
        for (idx, case) in sheet.cases.iter().enumerate() {
            let row = idx as u32 + 1;
            for (col, cell) in row_cells(case).into_iter().enumerate() {
                let col = col as u16;
                match cell {
                    None => {}
                    Some(text) if COLUMNS[col as usize] == "expect_response_code" => {
                        match text.trim().parse::<f64>() {
                            Ok(code) => worksheet.write_number(row, col, code)?,
                            Err(_) => worksheet.write_string(row, col, text)?,
                        };
                    }
                    Some(text) => {
                        worksheet.write_string(row, col, text)?;
                    }
                }
            }
        }
    }

    Ok(book)
}

/// Cells of a row in [`COLUMNS`] order.
fn row_cells(case: &TestCase) -> [Option<&str>; 11] {
    [
        case.test_case_name.as_deref(),
        case.api_path.as_deref(),
        case.query_param.as_deref(),
        case.method.as_deref(),
        case.inject_header.as_deref(),
        case.body.as_deref(),
        case.expect_response_code.as_deref(),
        case.expect_response_body.as_deref(),
        case.expect_response_header.as_deref(),
        case.action.as_deref(),
        case.verbose.as_deref(),
    ]
}

/// Cell text; empty and error cells are `None`. Whole floats print
/// without a fraction (`200.0` reads as `200`).
fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty | Data::Error(_) => return None,
        Data::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Key in the first column, value in the second. A leading
/// `Key | Value` header row is skipped.
fn environment_rows(range: &Range<Data>) -> Vec<EnvEntry> {
    range
        .rows()
        .enumerate()
        .filter_map(|(idx, row)| {
            let key = row.first().and_then(cell_text)?.trim().to_string();
            let value = row.get(1).and_then(cell_text).unwrap_or_default();
            if idx == 0 && key.eq_ignore_ascii_case("key") && value.eq_ignore_ascii_case("value") {
                return None;
            }
            Some(EnvEntry { key, value })
        })
        .collect()
}

fn test_sheet(name: &str, range: &Range<Data>) -> Result<Sheet> {
    let mut rows = range.rows();
    let headers: Vec<Option<String>> = rows
        .next()
        .map(|row| {
            row.iter()
                .map(|cell| cell_text(cell).map(|h| h.trim().to_string()))
                .collect()
        })
        .unwrap_or_default();

    if !headers.iter().flatten().any(|h| h == "test_case_name") {
        warn!("Sheet '{}' has no test_case_name column", name);
    }

    let mut cases = Vec::new();
    for (idx, row) in rows.enumerate() {
        let record: Map<String, Value> = headers
            .iter()
            .zip(row)
            .filter_map(|(header, cell)| Some((header.clone()?, Value::String(cell_text(cell)?))))
            .collect();
        let case: TestCase = serde_json::from_value(Value::Object(record))
            .with_context(|| format!("Invalid row {} in sheet '{name}'", idx + 2))?;

        if case.test_case_name.as_deref().is_some_and(|n| !n.trim().is_empty()) {
            cases.push(case);
        } else {
            debug!("Sheet '{}' row {} has no test_case_name; ignored", name, idx + 2);
        }
    }

    Ok(Sheet {
        name: name.to_string(),
        cases,
    })
}
