use serde_json::{json, Value};
use thiserror::Error;

/// Failures that stop an import attempt. Row-level anomalies never end up
/// here; they are counted in `formats::SkipLog` instead.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("unbalanced quote starting on line {line}")]
    MalformedRow { line: u64 },

    #[error("required column missing: {column} (accepted: {})", synonyms.join(", "))]
    RequiredColumnMissing {
        column: &'static str,
        synonyms: Vec<&'static str>,
    },

    #[error("test title mismatch in {file}: expected \"{expected}\", found \"{found}\"")]
    TitleMismatch {
        expected: String,
        found: String,
        file: String,
    },

    #[error("no valid rows to import")]
    NoValidRows,

    #[error("bulk import failed: {}", errors.join("; "))]
    StorageFailure {
        errors: Vec<String>,
        messages: Vec<String>,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("lookup failed: {0:#}")]
    Lookup(#[from] anyhow::Error),
}

impl ImportError {
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::MalformedInput(_) => "malformed_input",
            ImportError::MalformedRow { .. } => "malformed_row",
            ImportError::RequiredColumnMissing { .. } => "required_column_missing",
            ImportError::TitleMismatch { .. } => "title_mismatch",
            ImportError::NoValidRows => "no_valid_rows",
            ImportError::StorageFailure { .. } => "storage_failure",
            ImportError::Io(_) => "io_failed",
            ImportError::Csv(_) => "malformed_input",
            ImportError::Lookup(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            ImportError::MalformedRow { line } => Some(json!({ "line": line })),
            ImportError::RequiredColumnMissing { column, synonyms } => Some(json!({
                "column": column,
                "synonyms": synonyms,
            })),
            ImportError::TitleMismatch {
                expected,
                found,
                file,
            } => Some(json!({
                "expected": expected,
                "found": found,
                "file": file,
            })),
            ImportError::StorageFailure { errors, messages } => Some(json!({
                "errors": errors,
                "messages": messages,
            })),
            _ => None,
        }
    }
}

pub type ImportResult<T> = std::result::Result<T, ImportError>;
