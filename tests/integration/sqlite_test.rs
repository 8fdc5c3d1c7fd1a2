//! The SQLite store as a cohort source

use std::collections::BTreeSet;

use cohort_reader::filter::{BatchFilter, ExpressionFilter};
use cohort_reader::{
    CohortDefinition, CohortFilters, CohortPipeline, CohortRequest, Diagnostics, Expr,
    ExtractKind, LiteralValue, RecordBatch, SqliteStore,
};

use crate::utils::{
    admissions, diagnoses, hospital_source, icd_dictionary, int_column, patients, text_column,
    write_csv,
};

fn populated_store(path: &std::path::Path) -> SqliteStore {
    let store = SqliteStore::open(path).unwrap();
    store.import_batch("patients", &patients()).unwrap();
    store.import_batch("admissions", &admissions()).unwrap();
    store.import_batch("diagnoses_icd", &diagnoses()).unwrap();
    store.import_batch("d_icd_diagnoses", &icd_dictionary()).unwrap();
    store
}

fn subject_set(batch: &RecordBatch, column: &str) -> BTreeSet<i64> {
    int_column(batch, column).into_iter().flatten().collect()
}

/// The same request gives the same view from SQLite as from memory
#[test]
fn test_sqlite_matches_memory_source() {
    let dir = tempfile::tempdir().unwrap();
    let store = populated_store(&dir.path().join("cohort.db"));

    let from_sqlite = CohortPipeline::new(Box::new(store), CohortDefinition::hospital());
    let from_memory = CohortPipeline::new(Box::new(hospital_source()), CohortDefinition::hospital());

    for filters in [
        CohortFilters::new(),
        CohortFilters::new().with_gender("F"),
        CohortFilters::new().with_age_range(18.0, 50.0),
        CohortFilters::new().with_icd_search("hypertension"),
    ] {
        let request = CohortRequest::new(filters);
        let a = from_sqlite.run(&request);
        let b = from_memory.run(&request);
        assert!(a.is_ok(), "{:?}", a.error);
        assert_eq!(a.total_rows, b.total_rows);
        assert_eq!(a.distinct_patients, b.distinct_patients);
        assert_eq!(
            int_column(&a.rows, "Subject ID"),
            int_column(&b.rows, "Subject ID")
        );
        assert_eq!(
            text_column(&a.rows, "ICD Code"),
            text_column(&b.rows, "ICD Code")
        );
    }
}

/// Predicates pushed into SQL select what in-memory evaluation selects
#[test]
fn test_pushdown_matches_in_memory_filter() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.import_batch("patients", &patients()).unwrap();

    let exprs = [
        Expr::Eq("gender".to_string(), LiteralValue::from("F")),
        Expr::Between("anchor_age".to_string(), 30.0, 60.0),
        Expr::In(
            "subject_id".to_string(),
            vec![LiteralValue::Int(1), LiteralValue::Int(3)],
        ),
        Expr::ContainsIgnoreCase("gender".to_string(), "m".to_string()),
        Expr::Not(Box::new(Expr::Eq(
            "gender".to_string(),
            LiteralValue::from("F"),
        ))),
        Expr::And(vec![
            Expr::Eq("subject_id".to_string(), LiteralValue::Int(2)),
            Expr::IsNotNull("gender".to_string()),
        ]),
    ];

    for expr in exprs {
        let mut diagnostics = Diagnostics::new();
        let pushed = store
            .load_filtered("patients", &expr, &mut diagnostics)
            .unwrap();
        let evaluated = ExpressionFilter::new(expr.clone())
            .filter(&patients(), &mut diagnostics)
            .unwrap();
        assert_eq!(
            subject_set(&pushed, "subject_id"),
            subject_set(&evaluated, "subject_id"),
            "{expr:?}"
        );
    }
}

/// Ages stored as text still fall in range when they are numbers
#[test]
fn test_pushdown_range_over_text_ages() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(
        dir.path(),
        "patients.csv",
        "subject_id,gender,anchor_age\n1,F,20\n2,M,40\n3,F,unknown\n4,M,70\n",
    );
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .import_csv(&dir.path().join("patients.csv"), "patients")
        .unwrap();

    let expr = Expr::Between("anchor_age".to_string(), 18.0, 50.0);
    let mut diagnostics = Diagnostics::new();
    let pushed = store
        .load_filtered("patients", &expr, &mut diagnostics)
        .unwrap();
    let everything = store.load_table("patients").unwrap();
    let evaluated = ExpressionFilter::new(expr)
        .filter(&everything, &mut diagnostics)
        .unwrap();

    assert_eq!(subject_set(&pushed, "subject_id"), BTreeSet::from([1, 2]));
    assert_eq!(
        subject_set(&pushed, "subject_id"),
        subject_set(&evaluated, "subject_id")
    );
}

/// A predicate over a column the table lacks is skipped with a warning
#[test]
fn test_pushdown_skips_absent_column() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.import_batch("patients", &patients()).unwrap();

    let mut diagnostics = Diagnostics::new();
    let rows = store
        .load_filtered(
            "patients",
            &Expr::Eq("race".to_string(), LiteralValue::from("WHITE")),
            &mut diagnostics,
        )
        .unwrap();
    assert_eq!(rows.num_rows(), 3);
    assert_eq!(diagnostics.warnings().len(), 1);
}

#[test]
fn test_load_for_subjects() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.import_batch("diagnoses_icd", &diagnoses()).unwrap();

    let mut diagnostics = Diagnostics::new();
    let rows = store
        .load_for_subjects(ExtractKind::HospDiagnoses, &[1, 3], &mut diagnostics)
        .unwrap();
    assert_eq!(subject_set(&rows, "subject_id"), BTreeSet::from([1, 3]));
    assert_eq!(rows.num_rows(), 4);
}

#[test]
fn test_import_csv_and_distinct_values() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(
        dir.path(),
        "admissions.csv",
        "subject_id,hadm_id,admission_type\n1,100,EMERGENCY\n2,200,ELECTIVE\n3,300,EMERGENCY\n",
    );

    let store = SqliteStore::open_in_memory().unwrap();
    let inserted = store
        .import_csv(&dir.path().join("admissions.csv"), "admissions")
        .unwrap();
    assert_eq!(inserted, 3);
    assert_eq!(
        store.distinct_values("admissions", "admission_type").unwrap(),
        vec!["ELECTIVE".to_string(), "EMERGENCY".to_string()]
    );
    assert!(store.import_csv(&dir.path().join("admissions.csv"), "bad name").is_err());
}
