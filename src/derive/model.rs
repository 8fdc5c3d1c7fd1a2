//! Flat per-visit table for downstream modelling

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float64Array, Int64Array, StringArray};
use arrow::compute::{cast, is_not_null};
use arrow::datatypes::{DataType, Field, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashMap;

use crate::error::{CohortError, Diagnostics, PipelineWarning, Result};
use crate::filter::filter_record_batch;
use crate::join::{JoinAssembler, JoinKind, JoinStep, hash_join};
use crate::reader::ExtractSet;
use crate::schema::ExtractKind;
use crate::schema::columns::{
    DISPOSITION, HADM_ID, ICD_TITLE, LAB_MEAN, LONG_TITLE, STAY_ID, SUBJECT_ID, VALUENUM,
};
use crate::utils::arrow_utils::{column, drop_columns, float_values, has_column};

/// Placeholder written into empty cells of the model input
pub const UNKNOWN: &str = "unknown";

/// Mean numeric lab value per subject, in order of first appearance
pub fn lab_means(labs: &RecordBatch) -> Result<RecordBatch> {
    let subjects = column(labs, SUBJECT_ID, "labs")?;
    if subjects.data_type() != &DataType::Int64 {
        return Err(CohortError::InvalidDataType {
            column: SUBJECT_ID.to_string(),
            found: subjects.data_type().to_string(),
        });
    }
    let subjects = subjects.as_primitive::<Int64Type>();
    let values = float_values(column(labs, VALUENUM, "labs")?)?;

    let mut order = Vec::new();
    let mut sums: FxHashMap<i64, (f64, usize)> = FxHashMap::default();
    for (subject, value) in subjects.iter().zip(values) {
        let Some(subject) = subject else { continue };
        let entry = sums.entry(subject).or_insert_with(|| {
            order.push(subject);
            (0.0, 0)
        });
        if let Some(value) = value.filter(|v| !v.is_nan()) {
            entry.0 += value;
            entry.1 += 1;
        }
    }

    let means: Float64Array = order
        .iter()
        .map(|subject| {
            let (sum, n) = sums[subject];
            (n > 0).then(|| sum / n as f64)
        })
        .collect();

    Ok(RecordBatch::try_from_iter(vec![
        (SUBJECT_ID, Arc::new(Int64Array::from(order)) as ArrayRef),
        (LAB_MEAN, Arc::new(means) as ArrayRef),
    ])?)
}

/// Cast every column to text and replace nulls with `placeholder`
pub fn fill_nulls(batch: &RecordBatch, placeholder: &str) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(batch.num_columns());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());

    for (field, array) in batch.schema().fields().iter().zip(batch.columns()) {
        let text = cast(array, &DataType::Utf8)?;
        let filled: StringArray = text
            .as_string::<i32>()
            .iter()
            .map(|v| Some(v.unwrap_or(placeholder)))
            .collect();
        fields.push(Field::new(field.name(), DataType::Utf8, false));
        columns.push(Arc::new(filled));
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Join visits with their admissions, diagnoses and per-subject lab means
///
/// `visits` is a table of ED stays (typically a keyword cohort's stays).
/// Title columns are dropped, visits without a disposition are removed and
/// every remaining empty cell becomes `"unknown"`.
pub fn model_input(
    visits: &RecordBatch,
    admissions: &RecordBatch,
    diagnoses: &RecordBatch,
    labs: Option<&RecordBatch>,
    diagnostics: &mut Diagnostics,
) -> Result<RecordBatch> {
    let mut extracts = ExtractSet::new();
    extracts.insert(ExtractKind::Admissions, admissions.clone());
    extracts.insert(ExtractKind::EdDiagnoses, diagnoses.clone());

    let steps = [
        JoinStep::new(ExtractKind::Admissions, JoinKind::Left, &[SUBJECT_ID])
            .with_optional_keys(&[HADM_ID]),
        JoinStep::new(ExtractKind::EdDiagnoses, JoinKind::Left, &[SUBJECT_ID])
            .with_optional_keys(&[STAY_ID, HADM_ID]),
    ];
    let mut base = JoinAssembler::new(&steps).assemble(visits.clone(), &extracts, diagnostics)?;

    if let Some(labs) = labs.filter(|labs| labs.num_rows() > 0) {
        let means = lab_means(labs)?;
        base = hash_join(&base, &means, &[SUBJECT_ID.to_string()], JoinKind::Left)?;
    }

    let base = drop_columns(&base, &[ICD_TITLE, LONG_TITLE])?;

    let base = if has_column(&base, DISPOSITION) {
        let mask = is_not_null(column(&base, DISPOSITION, "model input")?.as_ref())?;
        filter_record_batch(&base, &mask)?
    } else {
        diagnostics.warn(PipelineWarning::MissingColumn {
            column: DISPOSITION.to_string(),
            context: "model input target".to_string(),
        });
        base
    };

    fill_nulls(&base, UNKNOWN)
}
