//! Subject-level filtering
//!
//! Restricts a child table (labs, medications, notes) to the subjects of a
//! cohort, the semi-join every downstream extract script performs.

use std::collections::HashSet;

use arrow::array::{Array, AsArray, BooleanArray};
use arrow::datatypes::{DataType, Int64Type};
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashSet;

use crate::error::{CohortError, Diagnostics, PipelineWarning, Result};
use crate::filter::core::{BatchFilter, filter_record_batch};
use crate::schema::columns::SUBJECT_ID;

/// A filter that includes only rows with matching subject identifiers
#[derive(Debug, Clone)]
pub struct SubjectFilter {
    subjects: FxHashSet<i64>,
    column: String,
}

impl SubjectFilter {
    /// Create a new subject filter over the `subject_id` column
    #[must_use]
    pub fn new(subjects: FxHashSet<i64>) -> Self {
        Self {
            subjects,
            column: SUBJECT_ID.to_string(),
        }
    }

    /// Collect the distinct subjects of a (normalized) table
    pub fn from_batch(batch: &RecordBatch) -> Result<Self> {
        Ok(Self::new(subject_ids(batch)?))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    #[must_use]
    pub fn subjects(&self) -> &FxHashSet<i64> {
        &self.subjects
    }
}

/// Distinct subject identifiers of a normalized table
pub fn subject_ids(batch: &RecordBatch) -> Result<FxHashSet<i64>> {
    let idx = batch
        .schema()
        .index_of(SUBJECT_ID)
        .map_err(|_| CohortError::missing_column(SUBJECT_ID, "subject list"))?;
    let column = batch.column(idx);
    if column.data_type() != &DataType::Int64 {
        return Err(CohortError::InvalidDataType {
            column: SUBJECT_ID.to_string(),
            found: column.data_type().to_string(),
        });
    }

    Ok(column.as_primitive::<Int64Type>().iter().flatten().collect())
}

impl BatchFilter for SubjectFilter {
    fn filter(&self, batch: &RecordBatch, diagnostics: &mut Diagnostics) -> Result<RecordBatch> {
        let Ok(idx) = batch.schema().index_of(&self.column) else {
            diagnostics.warn(PipelineWarning::MissingColumn {
                column: self.column.clone(),
                context: "subject filter".to_string(),
            });
            return Ok(batch.clone());
        };

        let column = batch.column(idx);
        if column.data_type() != &DataType::Int64 {
            return Err(CohortError::InvalidDataType {
                column: self.column.clone(),
                found: column.data_type().to_string(),
            });
        }

        let mask: BooleanArray = column
            .as_primitive::<Int64Type>()
            .iter()
            .map(|v| Some(v.is_some_and(|id| self.subjects.contains(&id))))
            .collect();

        filter_record_batch(batch, &mask)
    }

    fn required_columns(&self) -> HashSet<String> {
        HashSet::from([self.column.clone()])
    }
}
