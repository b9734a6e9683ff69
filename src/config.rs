//! Workbook loading and run options.

use crate::env::Environment;
use crate::model::{Workbook, WorkbookConfig};
use crate::spreadsheet;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Loads workbooks from files and directories.
#[derive(Debug, Default)]
pub struct WorkbookLoader;

impl WorkbookLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a single workbook file, YAML/JSON or spreadsheet. The
    /// workbook name defaults to the file stem.
    pub fn load_workbook<P: AsRef<Path>>(&self, path: P) -> Result<Workbook> {
        let path = path.as_ref();
        info!("Loading workbook from {}", path.display());

        let mut workbook = if spreadsheet::is_spreadsheet(path) {
            spreadsheet::read_workbook(path)?
        } else {
            let content = fs::read_to_string(path)
                .context(format!("Failed to read workbook file: {}", path.display()))?;
            Workbook::from_yaml(&content)
                .context(format!("Failed to parse workbook from {}", path.display()))?
        };

        if workbook.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
            workbook.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned());
        }

        if workbook.sheets.is_empty() {
            bail!("Workbook {} has no sheets", path.display());
        }

        debug!(
            "Loaded workbook '{}' with {} sheet(s)",
            workbook.name.as_deref().unwrap_or_default(),
            workbook.sheets.len()
        );
        Ok(workbook)
    }

    /// Load every workbook in `dir`, sorted by file name. Files that
    /// fail to parse are logged and skipped.
    pub fn load_workbooks_from_dir<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<Workbook>> {
        let dir = dir.as_ref();
        info!("Loading workbooks from directory: {}", dir.display());

        let mut paths = Vec::new();
        for entry in
            fs::read_dir(dir).context(format!("Failed to read directory: {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() && is_workbook_file(&path) && !is_lock_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut workbooks = Vec::new();
        for path in paths {
            match self.load_workbook(&path) {
                Ok(workbook) => workbooks.push(workbook),
                Err(err) => warn!("Skipping {}: {:#}", path.display(), err),
            }
        }

        info!("Loaded {} workbook(s) from {}", workbooks.len(), dir.display());
        Ok(workbooks)
    }

    /// Load a workbook file or a directory of workbooks.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<Vec<Workbook>> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("Path does not exist: {}", path.display());
        }

        let workbooks = if path.is_dir() {
            self.load_workbooks_from_dir(path)?
        } else {
            vec![self.load_workbook(path)?]
        };

        if workbooks.is_empty() {
            bail!("No workbooks found in {}", path.display());
        }
        Ok(workbooks)
    }
}

/// `.yaml`, `.yml`, `.json` and spreadsheet files are workbooks.
pub fn is_workbook_file(path: &Path) -> bool {
    spreadsheet::is_spreadsheet(path)
        || path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "yaml" | "yml" | "json"))
}

/// Office lock files (`~$suite.xlsx`) sit next to open spreadsheets.
fn is_lock_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("~$"))
}

/// Command-line overrides of a workbook's `config` block.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub timeout: Option<u64>,
    pub cycles: Option<u32>,
    pub cycle_delay_ms: Option<u64>,
    pub stop_on_failure: bool,
    /// Only run ordinary sheets with these names (the setup sheet
    /// always runs).
    pub sheets: Vec<String>,
    /// Extra environment bindings, applied after the workbook's own.
    pub variables: Vec<(String, String)>,
}

/// Effective settings for one workbook run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub timeout: Duration,
    pub cycles: u32,
    pub cycle_delay: Duration,
    pub stop_on_failure: bool,
    pub sheets: Vec<String>,
    pub variables: Vec<(String, String)>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&WorkbookConfig::default())
    }
}

impl RunOptions {
    pub fn from_config(config: &WorkbookConfig) -> Self {
        Self::resolve(config, &ConfigOverrides::default())
    }

    /// Merge workbook settings with overrides; overrides win.
    pub fn resolve(config: &WorkbookConfig, overrides: &ConfigOverrides) -> Self {
        let mut cycles = overrides.cycles.unwrap_or(config.cycles);
        if cycles == 0 {
            warn!("cycles must be at least 1; running once");
            cycles = 1;
        }
        Self {
            timeout: Duration::from_secs(overrides.timeout.unwrap_or(config.timeout)),
            cycles,
            cycle_delay: Duration::from_millis(
                overrides.cycle_delay_ms.unwrap_or(config.cycle_delay_ms),
            ),
            stop_on_failure: overrides.stop_on_failure || config.stop_on_failure,
            sheets: overrides.sheets.clone(),
            variables: overrides.variables.clone(),
        }
    }

    /// Whether the ordinary sheet `name` is selected.
    pub fn includes_sheet(&self, name: &str) -> bool {
        self.sheets.is_empty() || self.sheets.iter().any(|s| s == name)
    }
}

/// The initial Environment Store of a run: the workbook's environment
/// sheet, then `variables` on top.
pub fn initial_environment(workbook: &Workbook, variables: &[(String, String)]) -> Environment {
    let mut env: Environment = workbook
        .environment
        .iter()
        .map(|entry| (entry.key.trim().to_string(), entry.value.clone()))
        .collect();
    for (key, value) in variables {
        env.set(key.clone(), value.clone());
    }
    env
}

/// Parse a `key=value` command-line binding.
pub fn parse_variable(text: &str) -> Result<(String, String)> {
    match text.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => bail!("expected key=value, got '{text}'"),
    }
}
