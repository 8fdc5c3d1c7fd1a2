//! Hash joins over record batches
//!
//! The right side is hashed on its key columns and the left side probes it,
//! so output rows keep the left table's order with matches in right-table
//! order. Null keys never match. A non-key column present on both sides is
//! coalesced: the left value wins and the right value fills its nulls.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, Int64Array, StringArray, UInt64Array};
use arrow::compute::{cast, is_not_null, take};
use arrow::datatypes::{DataType, Field, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::error::{CohortError, Result};
use crate::filter::filter_record_batch;

pub mod assembler;

pub use assembler::{ColumnSelection, JoinAssembler, JoinStep};

/// How unmatched left rows are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// Keep unmatched left rows with null right columns
    Left,
    /// Drop unmatched left rows
    Inner,
}

/// One component of a composite key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyValue {
    Int(i64),
    Text(String),
}

/// A key column viewed with a single physical representation
enum KeyColumn {
    Int(Int64Array),
    Text(StringArray),
}

impl KeyColumn {
    fn value(&self, row: usize) -> Option<KeyValue> {
        match self {
            Self::Int(array) => (!array.is_null(row)).then(|| KeyValue::Int(array.value(row))),
            Self::Text(array) => {
                (!array.is_null(row)).then(|| KeyValue::Text(array.value(row).to_string()))
            }
        }
    }
}

fn key_column(batch: &RecordBatch, name: &str, as_text: bool) -> Result<KeyColumn> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|_| CohortError::missing_column(name, "join input"))?;
    let column = batch.column(idx);

    if !as_text && column.data_type() == &DataType::Int64 {
        return Ok(KeyColumn::Int(column.as_primitive::<Int64Type>().clone()));
    }
    let text = cast(column, &DataType::Utf8)?;
    Ok(KeyColumn::Text(text.as_string::<i32>().clone()))
}

/// Resolve both sides' key columns with a shared representation per key
fn key_columns(
    left: &RecordBatch,
    right: &RecordBatch,
    keys: &[String],
) -> Result<(Vec<KeyColumn>, Vec<KeyColumn>)> {
    let mut left_keys = Vec::with_capacity(keys.len());
    let mut right_keys = Vec::with_capacity(keys.len());

    for key in keys {
        let both_int = [left, right].iter().all(|batch| {
            batch
                .schema()
                .field_with_name(key)
                .is_ok_and(|f| f.data_type() == &DataType::Int64)
        });
        left_keys.push(key_column(left, key, !both_int)?);
        right_keys.push(key_column(right, key, !both_int)?);
    }

    Ok((left_keys, right_keys))
}

/// Composite key of a row, `None` when any part is null
fn row_key(columns: &[KeyColumn], row: usize) -> Option<Vec<KeyValue>> {
    columns.iter().map(|column| column.value(row)).collect()
}

/// Join two batches on the given key columns
///
/// Key columns are taken from the left side only. Right-side columns that
/// also exist on the left are coalesced into the left column.
///
/// # Errors
/// Returns an error if a key column is missing on either side
pub fn hash_join(
    left: &RecordBatch,
    right: &RecordBatch,
    keys: &[String],
    kind: JoinKind,
) -> Result<RecordBatch> {
    let (left_keys, right_keys) = key_columns(left, right, keys)?;

    // usize fits in u64 on every supported target
    let mut index: FxHashMap<Vec<KeyValue>, Vec<u64>> = FxHashMap::default();
    for row in 0..right.num_rows() {
        if let Some(key) = row_key(&right_keys, row) {
            index.entry(key).or_default().push(row as u64);
        }
    }

    let mut left_indices: Vec<u64> = Vec::with_capacity(left.num_rows());
    let mut right_indices: Vec<Option<u64>> = Vec::with_capacity(left.num_rows());
    for row in 0..left.num_rows() {
        let matches = row_key(&left_keys, row).and_then(|key| index.get(&key));
        match matches {
            Some(rows) => {
                for &right_row in rows {
                    left_indices.push(row as u64);
                    right_indices.push(Some(right_row));
                }
            }
            None if kind == JoinKind::Left => {
                left_indices.push(row as u64);
                right_indices.push(None);
            }
            None => {}
        }
    }

    let left_indices = UInt64Array::from(left_indices);
    let right_indices = UInt64Array::from(right_indices);
    assemble_columns(left, right, keys, &left_indices, &right_indices)
}

fn assemble_columns(
    left: &RecordBatch,
    right: &RecordBatch,
    keys: &[String],
    left_indices: &UInt64Array,
    right_indices: &UInt64Array,
) -> Result<RecordBatch> {
    let left_schema = left.schema();
    let mut fields: Vec<Field> = Vec::with_capacity(left.num_columns() + right.num_columns());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(left.num_columns() + right.num_columns());

    for (field, column) in left_schema.fields().iter().zip(left.columns()) {
        fields.push(field.as_ref().clone());
        columns.push(take(column.as_ref(), left_indices, None)?);
    }

    let right_schema = right.schema();
    for (field, column) in right_schema.fields().iter().zip(right.columns()) {
        let name = field.name();
        if keys.iter().any(|key| key == name) {
            continue;
        }

        let taken = take(column.as_ref(), right_indices, None)?;
        match left_schema.index_of(name) {
            Ok(idx) => {
                columns[idx] = coalesce(&columns[idx], &taken)?;
                fields[idx] = fields[idx].clone().with_nullable(true);
            }
            Err(_) => {
                fields.push(Field::new(name, field.data_type().clone(), true));
                columns.push(taken);
            }
        }
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Left value where present, right value otherwise
fn coalesce(primary: &ArrayRef, fallback: &ArrayRef) -> Result<ArrayRef> {
    if primary.null_count() == 0 {
        return Ok(primary.clone());
    }

    let fallback = if fallback.data_type() == primary.data_type() {
        fallback.clone()
    } else {
        cast(fallback, primary.data_type())?
    };
    let mask = is_not_null(primary.as_ref())?;
    Ok(arrow::compute::kernels::zip::zip(&mask, primary, &fallback)?)
}

/// Keep the first row for each distinct combination of the given columns
///
/// Columns the batch lacks are ignored; with none present the batch is
/// returned unchanged. Nulls compare equal to each other here.
pub fn distinct_on(batch: &RecordBatch, columns: &[String]) -> Result<RecordBatch> {
    let present: Vec<String> = columns
        .iter()
        .filter(|c| batch.schema().index_of(c).is_ok())
        .cloned()
        .collect();
    if present.is_empty() {
        return Ok(batch.clone());
    }

    let key_columns = present
        .iter()
        .map(|name| {
            let as_text = batch
                .schema()
                .field_with_name(name)
                .map(|f| f.data_type() != &DataType::Int64)
                .unwrap_or(true);
            key_column(batch, name, as_text)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut seen: FxHashSet<Vec<Option<KeyValue>>> = FxHashSet::default();
    let mask: BooleanArray = (0..batch.num_rows())
        .map(|row| {
            let key: Vec<Option<KeyValue>> = key_columns.iter().map(|c| c.value(row)).collect();
            Some(seen.insert(key))
        })
        .collect();

    filter_record_batch(batch, &mask)
}
