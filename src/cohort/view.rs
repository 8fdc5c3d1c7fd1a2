//! Shaping the assembled table into the presented cohort view
//!
//! Covers column selection and relabeling, sorting, patient counting and the
//! discovery of filter choices from the loaded extracts.

use std::collections::BTreeSet;
use std::sync::Arc;

use arrow::array::{ArrayRef, UInt64Array};
use arrow::compute::{SortColumn, SortOptions, lexsort_to_indices, take_record_batch};
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{Diagnostics, PipelineWarning, Result};
use crate::reader::ExtractSet;
use crate::schema::ExtractKind;
use crate::schema::columns::{
    ADMISSION_LOCATION, ADMISSION_TYPE, ANCHOR_AGE, DISCHARGE_LOCATION, DISPOSITION, GENDER,
    ICD_CODE, LONG_TITLE,
};
use crate::utils::arrow_utils::{
    column, float_values, has_column, rename_columns, select_existing, string_values,
};

/// Order a view by one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

impl SortSpec {
    #[must_use]
    pub fn ascending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    #[must_use]
    pub fn descending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// Sort rows by `spec`, keeping the current order among equal values
///
/// Nulls go last. Sorting by a missing column is skipped with a warning.
pub fn sort_batch(
    batch: &RecordBatch,
    spec: &SortSpec,
    diagnostics: &mut Diagnostics,
) -> Result<RecordBatch> {
    if !has_column(batch, &spec.column) {
        diagnostics.warn(PipelineWarning::MissingColumn {
            column: spec.column.clone(),
            context: "sort".to_string(),
        });
        return Ok(batch.clone());
    }

    let values = column(batch, &spec.column, "cohort view")?.clone();
    let position: ArrayRef = Arc::new(UInt64Array::from_iter_values(0..batch.num_rows() as u64));
    let indices = lexsort_to_indices(
        &[
            SortColumn {
                values,
                options: Some(SortOptions {
                    descending: spec.descending,
                    nulls_first: false,
                }),
            },
            SortColumn {
                values: position,
                options: None,
            },
        ],
        None,
    )?;
    Ok(take_record_batch(batch, &indices)?)
}

/// Select the output columns in order and apply presentation labels
///
/// Absent output columns are skipped silently. An empty column list keeps
/// every column.
pub fn shape_view(
    batch: &RecordBatch,
    columns: &[String],
    labels: &[(String, String)],
) -> Result<RecordBatch> {
    let selected = if columns.is_empty() {
        batch.clone()
    } else {
        select_existing(batch, columns)?
    };
    rename_columns(&selected, labels)
}

/// Number of distinct non-null values in a column, 0 if it is absent
pub fn distinct_count(batch: &RecordBatch, name: &str) -> Result<usize> {
    if !has_column(batch, name) {
        return Ok(0);
    }
    let values = string_values(column(batch, name, "cohort view")?)?;
    Ok(values.iter().flatten().collect::<FxHashSet<_>>().len())
}

/// Sorted distinct non-null values of a column
pub fn distinct_values(batch: &RecordBatch, name: &str) -> Result<Vec<String>> {
    if !has_column(batch, name) {
        return Ok(Vec::new());
    }
    let values = string_values(column(batch, name, "option discovery")?)?;
    Ok(values
        .into_iter()
        .flatten()
        .filter(|v| !v.trim().is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect())
}

/// Smallest and largest numeric value of a column; text that is not a
/// number is ignored
pub fn numeric_range(batch: &RecordBatch, name: &str) -> Result<Option<(f64, f64)>> {
    if !has_column(batch, name) {
        return Ok(None);
    }
    let values = float_values(column(batch, name, "option discovery")?)?;
    Ok(values
        .into_iter()
        .flatten()
        .filter(|v| !v.is_nan())
        .fold(None, |range, v| match range {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        }))
}

/// Choices a caller can offer for each filter
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterOptions {
    pub genders: Vec<String>,
    pub age_range: Option<(f64, f64)>,
    pub icd_codes: Vec<String>,
    pub icd_titles: Vec<String>,
    pub admission_types: Vec<String>,
    pub admission_locations: Vec<String>,
    pub discharge_locations: Vec<String>,
    pub dispositions: Vec<String>,
}

fn values_in(extracts: &ExtractSet, kind: ExtractKind, name: &str) -> Result<Vec<String>> {
    extracts
        .get(kind)
        .map_or_else(|| Ok(Vec::new()), |batch| distinct_values(batch, name))
}

/// Codes from both diagnosis tables, sorted and distinct
fn diagnosis_codes(extracts: &ExtractSet) -> Result<Vec<String>> {
    let mut codes = values_in(extracts, ExtractKind::HospDiagnoses, ICD_CODE)?;
    codes.extend(values_in(extracts, ExtractKind::EdDiagnoses, ICD_CODE)?);
    codes.sort();
    codes.dedup();
    Ok(codes)
}

/// Collect filter choices from whichever extracts are loaded
pub fn discover_options(extracts: &ExtractSet) -> Result<FilterOptions> {
    let age_range = match extracts.get(ExtractKind::Patients) {
        Some(patients) => numeric_range(patients, ANCHOR_AGE)?,
        None => None,
    };

    Ok(FilterOptions {
        genders: values_in(extracts, ExtractKind::Patients, GENDER)?,
        age_range,
        icd_codes: diagnosis_codes(extracts)?,
        icd_titles: values_in(extracts, ExtractKind::IcdDictionary, LONG_TITLE)?,
        admission_types: values_in(extracts, ExtractKind::Admissions, ADMISSION_TYPE)?,
        admission_locations: values_in(extracts, ExtractKind::Admissions, ADMISSION_LOCATION)?,
        discharge_locations: values_in(extracts, ExtractKind::Admissions, DISCHARGE_LOCATION)?,
        dispositions: values_in(extracts, ExtractKind::EdStays, DISPOSITION)?,
    })
}
