//! Keyword cohorts and the child tables restricted to them

use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray};
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::derive::summary::with_titles;
use crate::error::{CohortError, Diagnostics, PipelineWarning, Result};
use crate::filter::{BatchFilter, Expr, ExpressionFilter, SubjectFilter};
use crate::join::{JoinKind, distinct_on, hash_join};
use crate::schema::columns::{
    CATEGORY, CHIEF_COMPLAINT, ITEMID, LABEL, LONG_TITLE, STAY_ID, SUBJECT_ID, TEST_NAME,
};
use crate::utils::arrow_utils::{has_column, rename_columns, select_existing, with_column};

/// Triage complaints next to the diagnoses of the same stay
///
/// Columns come out as `complaint` and `diagnosis`. Returns `None` with a
/// warning when triage has no chief complaint column.
pub fn complaint_diagnosis(
    triage: &RecordBatch,
    diagnoses: &RecordBatch,
    dictionary: &RecordBatch,
    diagnostics: &mut Diagnostics,
) -> Result<Option<RecordBatch>> {
    if !has_column(triage, CHIEF_COMPLAINT) {
        diagnostics.warn(PipelineWarning::MissingColumn {
            column: CHIEF_COMPLAINT.to_string(),
            context: "complaint/diagnosis table".to_string(),
        });
        return Ok(None);
    }

    let complaints = select_existing(
        triage,
        &[SUBJECT_ID.to_string(), STAY_ID.to_string(), CHIEF_COMPLAINT.to_string()],
    )?;
    let keys: Vec<String> = [SUBJECT_ID, STAY_ID]
        .into_iter()
        .filter(|key| has_column(&complaints, key) && has_column(diagnoses, key))
        .map(String::from)
        .collect();
    if !keys.iter().any(|key| key == SUBJECT_ID) {
        return Err(CohortError::missing_column(SUBJECT_ID, "diagnoses"));
    }

    let joined = hash_join(&complaints, diagnoses, &keys, JoinKind::Left)?;
    let titled = with_titles(&joined, dictionary)?;
    let renamed = rename_columns(
        &titled,
        &[
            (CHIEF_COMPLAINT.to_string(), "complaint".to_string()),
            (LONG_TITLE.to_string(), "diagnosis".to_string()),
        ],
    )?;
    Ok(Some(renamed))
}

/// Diagnoses matching a keyword list and the ED stays of their subjects
#[derive(Debug, Clone)]
pub struct KeywordCohort {
    /// Titled diagnoses whose long title contains a keyword
    pub diagnoses: RecordBatch,
    /// ED stays of the subjects with a matching diagnosis
    pub stays: RecordBatch,
    pub subjects: SubjectFilter,
}

/// Select diagnoses whose title contains any keyword, ignoring case
///
/// # Errors
/// Returns `CohortError::InvalidRequest` when no usable keyword is given
pub fn keyword_cohort(
    diagnoses: &RecordBatch,
    dictionary: &RecordBatch,
    ed_stays: &RecordBatch,
    keywords: &[String],
    diagnostics: &mut Diagnostics,
) -> Result<KeywordCohort> {
    let matchers: Vec<Expr> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| Expr::ContainsIgnoreCase(LONG_TITLE.to_string(), k.to_string()))
        .collect();
    if matchers.is_empty() {
        return Err(CohortError::InvalidRequest("no keywords given".into()));
    }

    let titled = with_titles(diagnoses, dictionary)?;
    let matched = ExpressionFilter::new(Expr::Or(matchers)).filter(&titled, diagnostics)?;
    let subjects = SubjectFilter::from_batch(&matched)?;
    let stays = subjects.filter(ed_stays, diagnostics)?;

    log::info!(
        "Keyword cohort: {} diagnoses, {} subjects, {} stays",
        matched.num_rows(),
        subjects.len(),
        stays.num_rows()
    );

    Ok(KeywordCohort {
        diagnoses: matched,
        stays,
        subjects,
    })
}

/// Keep only the rows of a child table that belong to the cohort's subjects
pub fn restrict_to_subjects(
    table: &RecordBatch,
    subjects: &SubjectFilter,
    diagnostics: &mut Diagnostics,
) -> Result<RecordBatch> {
    subjects.filter(table, diagnostics)
}

/// Attach the lab test name from the item dictionary as `test_name`
pub fn label_lab_results(labs: &RecordBatch, lab_items: &RecordBatch) -> Result<RecordBatch> {
    let keys = [ITEMID.to_string()];
    let items = select_existing(lab_items, &[ITEMID.to_string(), LABEL.to_string()])?;
    let items = distinct_on(&items, &[ITEMID.to_string(), LABEL.to_string()])?;
    let labeled = hash_join(labs, &items, &keys, JoinKind::Left)?;
    rename_columns(&labeled, &[(LABEL.to_string(), TEST_NAME.to_string())])
}

/// Stack note tables on the columns they share, tagging each row with its
/// table's category
///
/// Column types follow the first table.
pub fn combine_notes(tables: &[(&str, &RecordBatch)]) -> Result<RecordBatch> {
    let Some((_, first)) = tables.first() else {
        return Err(CohortError::InvalidRequest("no note tables given".into()));
    };

    let common: Vec<String> = first
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .filter(|name| tables.iter().all(|(_, table)| has_column(table, name)))
        .collect();
    let template = select_existing(first, &common)?;
    let schema = template.schema();

    let mut aligned = Vec::with_capacity(tables.len());
    for (category, table) in tables {
        let selected = select_existing(table, &common)?;
        let columns = selected
            .columns()
            .iter()
            .zip(schema.fields())
            .map(|(column, field)| cast(column, field.data_type()))
            .collect::<std::result::Result<Vec<ArrayRef>, _>>()?;
        let labels: ArrayRef = Arc::new(StringArray::from(vec![*category; table.num_rows()]));
        let cast_batch = RecordBatch::try_new(schema.clone(), columns)?;
        aligned.push(with_column(&cast_batch, CATEGORY, labels)?);
    }

    let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
    fields.push(Field::new(CATEGORY, DataType::Utf8, true));
    Ok(concat_batches(&Arc::new(Schema::new(fields)), &aligned)?)
}
