//! Normalization applied to every extract right after it is loaded.
//!
//! Sources disagree on types: identifiers arrive as integers, floats or
//! strings with embedded prefixes, text arrives as `Utf8`, `LargeUtf8` or
//! `Utf8View`, and timestamps are sometimes already typed. After
//! normalization identifiers are `Int64`, every other text or temporal column
//! is `Utf8`, and no row has a null subject id.

use std::sync::{Arc, LazyLock};

use arrow::array::{Array, ArrayRef, AsArray, Int64Array};
use arrow::compute::{cast, filter_record_batch, is_not_null};
use arrow::datatypes::{DataType, Field, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use regex::Regex;

use crate::error::{CohortError, Diagnostics, PipelineWarning, Result};
use crate::schema::columns::{IDENTIFIER_COLUMNS, SUBJECT_ID, TEXT_COLUMNS};

static DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("digit pattern is valid"));

/// Normalize a freshly loaded extract
///
/// # Arguments
/// * `batch` - The raw table
/// * `table` - Table name used in warnings
/// * `diagnostics` - Sink for recoverable problems
pub fn normalize_extract(
    batch: &RecordBatch,
    table: &str,
    diagnostics: &mut Diagnostics,
) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(batch.num_columns());
    let mut columns = Vec::with_capacity(batch.num_columns());

    for (field, column) in batch.schema().fields().iter().zip(batch.columns()) {
        let name = field.name().as_str();
        let normalized: ArrayRef = if IDENTIFIER_COLUMNS.contains(&name) {
            let (ids, failed) = extract_identifier(column, name)?;
            if failed > 0 {
                diagnostics.warn(PipelineWarning::Coercion {
                    column: format!("{table}.{name}"),
                    failed,
                });
            }
            Arc::new(ids)
        } else if TEXT_COLUMNS.contains(&name) {
            cast(column, &DataType::Utf8)?
        } else {
            canonical_text(column)?
        };
        fields.push(Field::new(name, normalized.data_type().clone(), true));
        columns.push(normalized);
    }

    let normalized = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
    drop_missing_subjects(normalized, table, diagnostics)
}

/// Convert an identifier column to `Int64`
///
/// Integer and float columns are cast. Text columns keep the first run of
/// digits, so `"hadm_2001"` and `"2001.0"` both become 2001; values without
/// digits become null.
///
/// # Returns
/// The converted array and the number of non-null inputs that could not be
/// converted
pub fn extract_identifier(array: &ArrayRef, column: &str) -> Result<(Int64Array, usize)> {
    match array.data_type() {
        DataType::Int64 => Ok((array.as_primitive::<Int64Type>().clone(), 0)),
        dt if dt.is_integer() || dt.is_floating() => {
            let casted = cast(array, &DataType::Int64)?;
            let failed = casted.null_count() - array.null_count();
            Ok((casted.as_primitive::<Int64Type>().clone(), failed))
        }
        DataType::Null => Ok((Int64Array::new_null(array.len()), 0)),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            let text = cast(array, &DataType::Utf8)?;
            let strings = text.as_string::<i32>();
            let mut failed = 0;
            let ids: Int64Array = strings
                .iter()
                .map(|value| {
                    let value = value?;
                    let parsed = leading_identifier(value);
                    if parsed.is_none() {
                        failed += 1;
                    }
                    parsed
                })
                .collect();
            Ok((ids, failed))
        }
        other => Err(CohortError::InvalidDataType {
            column: column.to_string(),
            found: other.to_string(),
        }),
    }
}

/// First run of digits in a value, as an integer
fn leading_identifier(value: &str) -> Option<i64> {
    DIGITS
        .find(value)
        .and_then(|m| m.as_str().parse::<i64>().ok())
}

/// Cast non-identifier text and temporal columns to `Utf8`
fn canonical_text(array: &ArrayRef) -> Result<ArrayRef> {
    match array.data_type() {
        DataType::LargeUtf8
        | DataType::Utf8View
        | DataType::Date32
        | DataType::Date64
        | DataType::Timestamp(_, _)
        | DataType::Time32(_)
        | DataType::Time64(_)
        | DataType::Dictionary(_, _) => Ok(cast(array, &DataType::Utf8)?),
        _ => Ok(array.clone()),
    }
}

fn drop_missing_subjects(
    batch: RecordBatch,
    table: &str,
    diagnostics: &mut Diagnostics,
) -> Result<RecordBatch> {
    let Ok(idx) = batch.schema().index_of(SUBJECT_ID) else {
        return Ok(batch);
    };
    let subjects = batch.column(idx);
    if subjects.null_count() == 0 {
        return Ok(batch);
    }

    let rows = subjects.null_count();
    let mask = is_not_null(subjects.as_ref())?;
    let kept = filter_record_batch(&batch, &mask)?;
    diagnostics.warn(PipelineWarning::DroppedRows {
        table: table.to_string(),
        rows,
    });
    Ok(kept)
}
