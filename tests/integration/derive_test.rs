//! Derived tables over the shared fixtures

use std::collections::BTreeSet;

use cohort_reader::derive::{
    complaint_diagnosis, keyword_cohort, length_of_stay, model_input, restrict_to_subjects,
    top_diagnoses, visit_trend, write_snapshot,
};
use arrow::array::{Array, AsArray};
use arrow::datatypes::Float64Type;
use cohort_reader::Diagnostics;
use cohort_reader::reader::directory::read_csv_file;

use crate::utils::{
    admissions, diagnoses, ed_diagnoses, ed_stays, icd_dictionary, int_column, text_column,
    triage,
};

/// Most frequent titled diagnosis first; untitled codes are not counted
#[test]
fn test_top_diagnoses_ranking() {
    let top = top_diagnoses(&diagnoses(), &icd_dictionary()).unwrap();

    assert_eq!(
        text_column(&top, "icd_code"),
        vec![Some("I10".into()), Some("F33".into()), Some("Z00".into())]
    );
    assert_eq!(int_column(&top, "frequency"), vec![Some(2), Some(1), Some(1)]);
}

/// A keyword cohort carries the matching subjects into their child tables
#[test]
fn test_keyword_cohort_restricts_children() {
    let mut diagnostics = Diagnostics::new();
    let cohort = keyword_cohort(
        &diagnoses(),
        &icd_dictionary(),
        &ed_stays(),
        &["depress".to_string()],
        &mut diagnostics,
    )
    .unwrap();

    assert_eq!(cohort.subjects.len(), 1);
    assert_eq!(int_column(&cohort.stays, "subject_id"), vec![Some(3)]);

    let admitted = restrict_to_subjects(&admissions(), &cohort.subjects, &mut diagnostics).unwrap();
    assert_eq!(int_column(&admitted, "hadm_id"), vec![Some(300), Some(301)]);
    assert!(diagnostics.is_empty());
}

#[test]
fn test_keyword_cohort_needs_a_keyword() {
    let mut diagnostics = Diagnostics::new();
    let result = keyword_cohort(
        &diagnoses(),
        &icd_dictionary(),
        &ed_stays(),
        &["  ".to_string()],
        &mut diagnostics,
    );
    assert!(result.is_err());
}

#[test]
fn test_complaints_pair_with_stay_diagnoses() {
    let mut diagnostics = Diagnostics::new();
    let table = complaint_diagnosis(&triage(), &ed_diagnoses(), &icd_dictionary(), &mut diagnostics)
        .unwrap()
        .unwrap();

    assert_eq!(
        text_column(&table, "complaint"),
        vec![
            Some("Depression".into()),
            Some("Chest pain".into()),
            Some("depressed mood".into())
        ]
    );
    assert_eq!(
        text_column(&table, "diagnosis"),
        vec![
            None,
            Some("Essential (primary) hypertension".into()),
            Some("Major depressive disorder, recurrent".into())
        ]
    );
}

#[test]
fn test_stay_lengths_and_daily_visits() {
    let stays = ed_stays();

    let lengths = length_of_stay(&stays).unwrap();
    assert_eq!(lengths.num_rows(), 3);
    let hours = lengths.column(2).as_primitive::<Float64Type>();
    assert_eq!(hours.values().to_vec(), vec![4.0, 9.0, 1.5]);

    let trend = visit_trend(&stays).unwrap();
    assert_eq!(
        text_column(&trend, "visit_day"),
        vec![Some("2150-01-01".into()), Some("2150-01-02".into())]
    );
    assert_eq!(int_column(&trend, "visits"), vec![Some(1), Some(2)]);
}

/// Model input has no empty cells and no visits without a disposition
#[test]
fn test_model_input_is_complete() {
    let mut diagnostics = Diagnostics::new();
    let table = model_input(&ed_stays(), &admissions(), &diagnoses(), None, &mut diagnostics)
        .unwrap();

    assert!(table.num_rows() > 0);
    for column in table.columns() {
        assert_eq!(column.null_count(), 0);
    }
    let schema = table.schema();
    assert!(schema.index_of("long_title").is_err());
    let subjects: BTreeSet<String> = text_column(&table, "subject_id")
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(subjects.len(), 3);
}

/// Snapshots written as CSV read back with the same rows
#[test]
fn test_csv_snapshot_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("derived").join("top_diagnoses.csv");
    let top = top_diagnoses(&diagnoses(), &icd_dictionary()).unwrap();

    write_snapshot(&top, &path).unwrap();
    let read = read_csv_file(&path, 1024, 100).unwrap();
    assert_eq!(read.num_rows(), top.num_rows());
    assert_eq!(text_column(&read, "long_title"), text_column(&top, "long_title"));
}
