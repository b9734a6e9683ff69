//! Data-driven API testing.
//!
//! Test cases are rows of a workbook: request columns are substituted
//! from a shared environment, sent to a live endpoint and checked with
//! small condition expressions over `result`. `action` cells capture
//! response values into the environment for later rows, and repeated
//! cycles are summarised statistically.

pub mod action;
pub mod api_client;
pub mod config;
pub mod env;
pub mod expression;
pub mod literal;
pub mod model;
pub mod path;
pub mod report;
pub mod runner;
pub mod spreadsheet;
pub mod stats;
pub mod template;
pub mod validator;

pub use api_client::{ApiRequest, ApiResponse, ExecuteError, HttpExecutor, RequestExecutor};
pub use config::*;
pub use env::Environment;
pub use model::*;
pub use report::ReportFormat;
pub use runner::*;
pub use validator::*;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
