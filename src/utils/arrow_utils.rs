//! Arrow utility functions for column selection and value extraction
//!
//! Helpers shared by the join assembler, the cohort view and the derived
//! products: column lookup, projection, relabeling and typed value access.

use std::sync::Arc;

use arrow::array::{ArrayRef, AsArray, RecordBatchOptions};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::error::{CohortError, Diagnostics, PipelineWarning, Result};

/// Whether the batch has a column with this name
#[must_use]
pub fn has_column(batch: &RecordBatch, name: &str) -> bool {
    batch.schema().index_of(name).is_ok()
}

/// Get a column by name
pub fn column<'a>(batch: &'a RecordBatch, name: &str, table: &str) -> Result<&'a ArrayRef> {
    batch
        .schema()
        .index_of(name)
        .map(|idx| batch.column(idx))
        .map_err(|_| CohortError::missing_column(name, table))
}

/// Build a batch from fields and columns, keeping the row count when no
/// column survives
fn rebuild(fields: Vec<Field>, columns: Vec<ArrayRef>, num_rows: usize) -> Result<RecordBatch> {
    let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
    Ok(RecordBatch::try_new_with_options(
        Arc::new(Schema::new(fields)),
        columns,
        &options,
    )?)
}

/// Keep the listed columns that exist, in the listed order
pub fn select_existing(batch: &RecordBatch, columns: &[String]) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields = Vec::with_capacity(columns.len());
    let mut arrays = Vec::with_capacity(columns.len());

    for name in columns {
        if let Ok(idx) = schema.index_of(name) {
            if fields.iter().any(|f: &Field| f.name() == name) {
                continue;
            }
            fields.push(schema.field(idx).clone());
            arrays.push(batch.column(idx).clone());
        }
    }

    rebuild(fields, arrays, batch.num_rows())
}

/// Like `select_existing`, reporting every listed column that is absent
pub fn project(
    batch: &RecordBatch,
    columns: &[String],
    table: &str,
    diagnostics: &mut Diagnostics,
) -> Result<RecordBatch> {
    for name in columns.iter().filter(|name| !has_column(batch, name)) {
        diagnostics.warn(PipelineWarning::MissingColumn {
            column: name.clone(),
            context: format!("projection of {table}"),
        });
    }
    select_existing(batch, columns)
}

/// Drop the named columns, ignoring names the batch lacks
pub fn drop_columns(batch: &RecordBatch, columns: &[&str]) -> Result<RecordBatch> {
    let keep: Vec<String> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .filter(|name| !columns.contains(&name.as_str()))
        .collect();
    select_existing(batch, &keep)
}

/// Rename columns according to `labels`, leaving others untouched
pub fn rename_columns(batch: &RecordBatch, labels: &[(String, String)]) -> Result<RecordBatch> {
    let fields: Vec<Field> = batch
        .schema()
        .fields()
        .iter()
        .map(|field| {
            match labels.iter().find(|(from, _)| from == field.name()) {
                Some((_, to)) => field.as_ref().clone().with_name(to.clone()),
                None => field.as_ref().clone(),
            }
        })
        .collect();

    rebuild(fields, batch.columns().to_vec(), batch.num_rows())
}

/// Append a column to a batch
pub fn with_column(batch: &RecordBatch, name: &str, array: ArrayRef) -> Result<RecordBatch> {
    let mut fields: Vec<Field> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    fields.push(Field::new(name, array.data_type().clone(), true));
    let mut columns = batch.columns().to_vec();
    columns.push(array);
    rebuild(fields, columns, batch.num_rows())
}

/// Read a whole column as optional strings
pub fn string_values(array: &ArrayRef) -> Result<Vec<Option<String>>> {
    let text = cast(array, &DataType::Utf8)?;
    Ok(text
        .as_string::<i32>()
        .iter()
        .map(|v| v.map(ToString::to_string))
        .collect())
}

/// Read a whole column as optional floats; unparsable values become `None`
pub fn float_values(array: &ArrayRef) -> Result<Vec<Option<f64>>> {
    let floats = cast(array, &DataType::Float64)?;
    Ok(floats
        .as_primitive::<arrow::datatypes::Float64Type>()
        .iter()
        .collect())
}
