//! Extracts stored as CSV or Parquet files in a directory tree
//!
//! An extract is found as `<root>/<stem>.<ext>` or under one of the module
//! subdirectories (`hosp/`, `ed/`, `icu/`, `note/`).

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use arrow::array::{Array, ArrayRef, RecordBatchOptions};
use arrow::compute::{cast, concat_batches};
use arrow::csv::ReaderBuilder;
use arrow::csv::reader::Format;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::{CohortError, Result};
use crate::reader::ExtractSource;
use crate::schema::ExtractKind;
use crate::schema::columns::{IDENTIFIER_COLUMNS, TEXT_COLUMNS};
use crate::utils::{FileAction, log_file_done, log_file_start};

/// Default number of rows per Arrow batch while reading
pub const DEFAULT_BATCH_SIZE: usize = 16384;

/// Rows sampled when inferring a CSV schema
pub const DEFAULT_INFER_ROWS: usize = 1000;

const MODULE_DIRS: [&str; 4] = ["hosp", "ed", "icu", "note"];

/// File format of a directory's extracts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractFormat {
    /// Prefer Parquet, fall back to CSV
    #[default]
    Auto,
    Csv,
    Parquet,
}

impl ExtractFormat {
    const fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Auto => &["parquet", "csv"],
            Self::Csv => &["csv"],
            Self::Parquet => &["parquet"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    format: ExtractFormat,
    batch_size: usize,
    infer_schema_rows: usize,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            format: ExtractFormat::Auto,
            batch_size: DEFAULT_BATCH_SIZE,
            infer_schema_rows: DEFAULT_INFER_ROWS,
        }
    }

    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.data_dir)
            .with_format(config.format)
            .with_batch_size(config.batch_size)
            .with_infer_schema_rows(config.infer_schema_rows)
    }

    #[must_use]
    pub fn with_format(mut self, format: ExtractFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_infer_schema_rows(mut self, rows: usize) -> Self {
        self.infer_schema_rows = rows.max(1);
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Candidate paths for an extract, in lookup order
    fn candidates(&self, kind: ExtractKind) -> Vec<PathBuf> {
        let mut dirs = vec![self.root.join(kind.module_dir()), self.root.clone()];
        dirs.extend(
            MODULE_DIRS
                .iter()
                .filter(|dir| **dir != kind.module_dir())
                .map(|dir| self.root.join(dir)),
        );

        let mut paths = Vec::new();
        for stem in kind.file_stems() {
            for dir in &dirs {
                for ext in self.format.extensions() {
                    paths.push(dir.join(format!("{stem}.{ext}")));
                }
            }
        }
        paths
    }

    /// The file an extract would be read from, if any exists
    #[must_use]
    pub fn resolve(&self, kind: ExtractKind) -> Option<PathBuf> {
        self.candidates(kind).into_iter().find(|path| path.is_file())
    }

    fn read_path(&self, path: &Path) -> Result<RecordBatch> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("parquet") => read_parquet_file(path, self.batch_size),
            _ => read_csv_file(path, self.batch_size, self.infer_schema_rows),
        }
    }
}

impl ExtractSource for DirectorySource {
    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }

    fn load(&self, kind: ExtractKind) -> Result<RecordBatch> {
        let path = self.resolve(kind).ok_or_else(|| {
            CohortError::missing_source(
                kind.name(),
                format!(
                    "no {} file found under {}",
                    kind.file_stems().join(" or "),
                    self.root.display()
                ),
            )
        })?;
        self.read_path(&path)
    }

    fn cache_key(&self, kind: ExtractKind) -> String {
        self.resolve(kind).map_or_else(
            || format!("{}#{}", self.root.display(), kind.name()),
            |path| path.display().to_string(),
        )
    }
}

/// Type a text column is converted to once the whole file is read
///
/// Codes and temporal columns stay text. Identifiers are only converted
/// when every value parses, so prefixed ids survive for normalization.
fn retyped(field: &Field) -> Option<(DataType, bool)> {
    let name = field.name().as_str();
    if TEXT_COLUMNS.contains(&name) {
        return None;
    }
    let strict = IDENTIFIER_COLUMNS.contains(&name);
    match field.data_type() {
        dt @ (DataType::Int64 | DataType::Float64 | DataType::Boolean) => {
            Some((dt.clone(), strict))
        }
        _ => None,
    }
}

/// Cast a text column to its inferred type, nulling values that do not parse
///
/// An integer column with fractional values past the sample falls back to
/// floats when that keeps more values. In strict mode any unparsable value
/// keeps the column as text.
fn retype_column(
    text: &ArrayRef,
    target: &DataType,
    strict: bool,
    name: &str,
) -> Result<ArrayRef> {
    let mut typed = cast(text, target)?;
    if target == &DataType::Int64 && typed.null_count() > text.null_count() {
        let floats = cast(text, &DataType::Float64)?;
        if floats.null_count() < typed.null_count() {
            typed = floats;
        }
    }

    let failed = typed.null_count() - text.null_count();
    if failed > 0 {
        if strict {
            return Ok(text.clone());
        }
        log::warn!("{failed} values in '{name}' are not {target}, read as missing");
    }
    Ok(typed)
}

/// Read a whole CSV file into one batch
///
/// Column types are inferred from the first `infer_rows` rows. Values later
/// in the file that do not fit the inferred type become nulls.
///
/// # Errors
/// Returns an error if the file cannot be opened or is not valid CSV
pub fn read_csv_file(path: &Path, batch_size: usize, infer_rows: usize) -> Result<RecordBatch> {
    let start = Instant::now();
    log_file_start(FileAction::Read, "CSV", path);

    let mut file = File::open(path).map_err(|e| CohortError::io(path, e))?;
    let format = Format::default().with_header(true);
    let (inferred, _) = format.infer_schema(&mut file, Some(infer_rows))?;
    file.seek(SeekFrom::Start(0))
        .map_err(|e| CohortError::io(path, e))?;

    // Read everything as text; a value past the sample must not fail the read
    let fields: Vec<Field> = inferred
        .fields()
        .iter()
        .map(|f| Field::new(f.name(), DataType::Utf8, true))
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let reader = ReaderBuilder::new(schema.clone())
        .with_format(format)
        .with_batch_size(batch_size)
        .build(file)?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    let text = concat_batches(&schema, &batches)?;

    let mut fields = Vec::with_capacity(text.num_columns());
    let mut columns = Vec::with_capacity(text.num_columns());
    for (field, column) in inferred.fields().iter().zip(text.columns()) {
        let column = match retyped(field) {
            Some((target, strict)) => retype_column(column, &target, strict, field.name())?,
            None => column.clone(),
        };
        fields.push(Field::new(field.name(), column.data_type().clone(), true));
        columns.push(column);
    }
    let options = RecordBatchOptions::new().with_row_count(Some(text.num_rows()));
    let batch =
        RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), columns, &options)?;

    log_file_done(FileAction::Read, path, batch.num_rows(), start.elapsed());
    Ok(batch)
}

/// Read a whole Parquet file into one batch
///
/// # Errors
/// Returns an error if the file cannot be opened or is not valid Parquet
pub fn read_parquet_file(path: &Path, batch_size: usize) -> Result<RecordBatch> {
    let start = Instant::now();
    log_file_start(FileAction::Read, "Parquet", path);

    let file = File::open(path).map_err(|e| CohortError::io(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?.with_batch_size(batch_size);
    let schema = builder.schema().clone();
    let reader = builder.build()?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    let batch = concat_batches(&schema, &batches)?;

    log_file_done(FileAction::Read, path, batch.num_rows(), start.elapsed());
    Ok(batch)
}
