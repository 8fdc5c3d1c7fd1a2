//! Persisting derived tables for downstream use

use std::fs::{self, File};
use std::path::Path;
use std::time::Instant;

use arrow::csv::WriterBuilder;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use crate::error::{CohortError, Result};
use crate::utils::{FileAction, log_file_done, log_file_start};

/// Output format of a snapshot, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Csv,
    Parquet,
}

impl SnapshotFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .as_deref()
        {
            Some("csv") => Ok(Self::Csv),
            Some("parquet") => Ok(Self::Parquet),
            _ => Err(CohortError::InvalidRequest(format!(
                "cannot tell snapshot format of {}; use .csv or .parquet",
                path.display()
            ))),
        }
    }
}

/// Write a table to `path`, creating parent directories
pub fn write_snapshot(batch: &RecordBatch, path: &Path) -> Result<()> {
    let start = Instant::now();
    let format = SnapshotFormat::from_path(path)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CohortError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| CohortError::io(path, e))?;

    match format {
        SnapshotFormat::Csv => log_file_start(FileAction::Write, "CSV", path),
        SnapshotFormat::Parquet => log_file_start(FileAction::Write, "Parquet", path),
    }
    match format {
        SnapshotFormat::Csv => {
            let mut writer = WriterBuilder::new().with_header(true).build(file);
            writer.write(batch)?;
        }
        SnapshotFormat::Parquet => {
            let props = WriterProperties::builder().build();
            let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
            writer.write(batch)?;
            writer.close()?;
        }
    }

    log_file_done(FileAction::Write, path, batch.num_rows(), start.elapsed());
    Ok(())
}
