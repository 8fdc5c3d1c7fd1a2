//! Error handling for the cohort pipeline.
//!
//! Fatal errors are `CohortError` values. Problems the pipeline recovers from
//! locally (a skipped predicate, a missing optional extract, an unparsable
//! number) are recorded as `PipelineWarning`s in a `Diagnostics` sink instead.

use std::fmt;
use std::io;
use std::path::PathBuf;

use arrow::error::ArrowError;
use parquet::errors::ParquetError;

/// Specialized error type for cohort operations
#[derive(Debug, thiserror::Error)]
pub enum CohortError {
    /// A required extract could not be found
    #[error("Missing source '{name}': {detail}")]
    MissingSource { name: String, detail: String },

    /// A column needed by an operation is absent
    #[error("Column '{column}' not found in {table}")]
    MissingColumn { column: String, table: String },

    /// A column has a type the operation cannot work with
    #[error("Column '{column}' has unsupported type {found}")]
    InvalidDataType { column: String, found: String },

    /// Error opening or reading a file
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Error processing Arrow data
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    /// Error processing Parquet data
    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    /// Error talking to the relational store
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Error reading configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The request itself is malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CohortError {
    /// Wrap an IO error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn missing_source(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::MissingSource {
            name: name.into(),
            detail: detail.into(),
        }
    }

    pub fn missing_column(column: impl Into<String>, table: impl Into<String>) -> Self {
        Self::MissingColumn {
            column: column.into(),
            table: table.into(),
        }
    }

    /// Whether this error means the data store could not be reached at all
    #[must_use]
    pub fn is_source_error(&self) -> bool {
        matches!(self, Self::MissingSource { .. } | Self::Io { .. } | Self::Sqlite(_))
    }
}

/// Result type for cohort operations
pub type Result<T> = std::result::Result<T, CohortError>;

/// A recoverable problem encountered while building a cohort view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineWarning {
    /// A filter or join step was skipped because its column is absent
    MissingColumn { column: String, context: String },
    /// An optional extract was not available and its join step was skipped
    MissingOptionalExtract { name: String },
    /// Values in a column failed numeric parsing and were treated as missing
    Coercion { column: String, failed: usize },
    /// Rows were dropped because their subject identifier was unusable
    DroppedRows { table: String, rows: usize },
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingColumn { column, context } => {
                write!(f, "column '{column}' not found, skipped {context}")
            }
            Self::MissingOptionalExtract { name } => {
                write!(f, "optional extract '{name}' not available, join skipped")
            }
            Self::Coercion { column, failed } => {
                write!(f, "{failed} non-numeric values in '{column}' treated as missing")
            }
            Self::DroppedRows { table, rows } => {
                write!(f, "dropped {rows} rows without a subject id from '{table}'")
            }
        }
    }
}

/// Collects warnings raised while the pipeline runs
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    warnings: Vec<PipelineWarning>,
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning and log it; repeats of a recorded warning are dropped
    pub fn warn(&mut self, warning: PipelineWarning) {
        if self.warnings.contains(&warning) {
            return;
        }
        log::warn!("{warning}");
        self.warnings.push(warning);
    }

    /// Take over warnings collected elsewhere, already logged there
    pub fn absorb(&mut self, other: Self) {
        for warning in other.warnings {
            if !self.warnings.contains(&warning) {
                self.warnings.push(warning);
            }
        }
    }

    #[must_use]
    pub fn warnings(&self) -> &[PipelineWarning] {
        &self.warnings
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    #[must_use]
    pub fn into_messages(self) -> Vec<String> {
        self.warnings.iter().map(ToString::to_string).collect()
    }
}
