//! Error types for configuration and storage failures.
//!
//! Both are fatal for a run: they surface before (or instead of) row
//! processing. Per-row model failures never use these types, see
//! [`crate::llm::ModelFailure`].

use std::path::PathBuf;

/// Fatal configuration errors detected before any row is processed
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("The input file must contain a '{column}' column (found: {available})")]
    MissingInputColumn { column: String, available: String },

    #[error("Prompt template not found: {0}")]
    MissingTemplate(PathBuf),

    #[error("Verify prompt file not found. Tried:\n{0}")]
    MissingVerifierTemplate(String),

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Spreadsheet read/write failures
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Spreadsheet read error in {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Spreadsheet write error in {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("Spreadsheet {0} contains no worksheets")]
    NoSheets(PathBuf),

    #[error("Unsupported table format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
