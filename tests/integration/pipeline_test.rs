//! End-to-end properties of the cohort pipeline over in-memory extracts

use std::collections::BTreeSet;
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::compute::concat_batches;
use cohort_reader::cohort::paginate;
use cohort_reader::join::JoinStep;
use cohort_reader::reader::ExtractSpec;
use cohort_reader::{
    CohortDefinition, CohortError, CohortFilters, CohortPipeline, CohortRequest, Diagnostics,
    ExtractKind, JoinAssembler, JoinKind, RecordBatch, SortSpec,
};

use crate::utils::{
    MemorySource, emergency_source, hospital_source, int_column, patients, text_column,
};

fn hospital_pipeline() -> CohortPipeline {
    CohortPipeline::new(Box::new(hospital_source()), CohortDefinition::hospital())
}

fn subjects(batch: &RecordBatch) -> BTreeSet<i64> {
    int_column(batch, "Subject ID").into_iter().flatten().collect()
}

/// Every filter narrows the unfiltered view, never widens it
#[test]
fn test_filters_only_narrow() {
    let pipeline = hospital_pipeline();
    let unfiltered = pipeline.run(&CohortRequest::default().with_page_size(100));
    assert!(unfiltered.is_ok());
    assert_eq!(unfiltered.total_rows, 4);
    assert_eq!(unfiltered.distinct_patients, 3);

    let filter_sets = [
        CohortFilters::new().with_gender("F"),
        CohortFilters::new().with_age_range(18.0, 50.0),
        CohortFilters::new().with_icd_codes(["I10"]),
        CohortFilters::new().with_icd_search("depress"),
        CohortFilters::new()
            .with_gender("F")
            .with_age_range(50.0, 70.0)
            .with_icd_codes(["I10", "F33"]),
    ];

    for filters in filter_sets {
        let narrowed = pipeline.run(&CohortRequest::new(filters.clone()).with_page_size(100));
        assert!(narrowed.is_ok(), "{filters:?}: {:?}", narrowed.error);
        assert!(narrowed.total_rows <= unfiltered.total_rows, "{filters:?}");
        assert!(subjects(&narrowed.rows).is_subset(&subjects(&unfiltered.rows)));
    }
}

/// Filters left at their defaults change nothing
#[test]
fn test_default_filters_are_no_op() {
    let pipeline = hospital_pipeline();
    let plain = pipeline.run(&CohortRequest::default());

    let defaults = CohortFilters {
        gender: Some("All".to_string()),
        icd_codes: vec![String::new()],
        admission_type: Some("  ".to_string()),
        ..CohortFilters::default()
    };
    let explicit = pipeline.run(&CohortRequest::new(defaults));

    assert_eq!(plain.rows, explicit.rows);
    assert_eq!(plain.total_rows, explicit.total_rows);
}

/// Running the same request twice yields the same page and messages
#[test]
fn test_runs_are_repeatable() {
    let pipeline = hospital_pipeline();
    let request = CohortRequest::new(CohortFilters::new().with_gender("F"));

    let first = pipeline.run(&request);
    let second = pipeline.run(&request);
    assert_eq!(first.rows, second.rows);
    assert_eq!(first.messages, second.messages);
    assert_eq!(first.distinct_patients, second.distinct_patients);
}

/// The age range [18, 50] keeps the 20 and 40 year olds only
#[test]
fn test_age_range_selects_patients() {
    let response = hospital_pipeline().run(&CohortRequest::new(
        CohortFilters::new().with_age_range(18.0, 50.0),
    ));

    assert!(response.is_ok());
    assert_eq!(subjects(&response.rows), BTreeSet::from([1, 2]));
    assert_eq!(response.distinct_patients, 2);
    assert_eq!(
        int_column(&response.rows, "Age").into_iter().flatten().collect::<BTreeSet<_>>(),
        BTreeSet::from([20, 40])
    );
}

/// A diagnosis absent from the dictionary keeps its row with no title
#[test]
fn test_unmatched_dictionary_code_keeps_row() {
    let response = hospital_pipeline().run(&CohortRequest::new(
        CohortFilters::new().with_icd_codes(["F32"]),
    ));

    assert_eq!(response.total_rows, 1, "duplicate F32 rows collapse to one");
    assert_eq!(text_column(&response.rows, "ICD Code"), vec![Some("F32".to_string())]);
    assert_eq!(text_column(&response.rows, "Diagnosis"), vec![None]);
}

/// Presented columns follow the definition's order and labels
#[test]
fn test_view_is_labelled() {
    let response = hospital_pipeline().run(&CohortRequest::default());
    let schema = response.rows.schema();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();

    assert_eq!(
        names,
        vec![
            "Subject ID",
            "Gender",
            "Age",
            "Admission ID",
            "Admission Type",
            "Admission Location",
            "Discharge Location",
            "ICD Code",
            "Diagnosis",
        ]
    );
}

/// Without an admission column the diagnoses join falls back to the subject
#[test]
fn test_join_falls_back_to_subject_key() {
    let diagnoses = RecordBatch::try_from_iter(vec![
        ("subject_id", Arc::new(Int64Array::from(vec![1, 3, 3])) as ArrayRef),
        ("hadm_id", Arc::new(Int64Array::from(vec![100, 300, 301])) as ArrayRef),
        ("icd_code", Arc::new(StringArray::from(vec!["F32", "F33", "I10"])) as ArrayRef),
    ])
    .unwrap();

    let mut extracts = cohort_reader::ExtractSet::new();
    extracts.insert(ExtractKind::HospDiagnoses, diagnoses);

    let steps = [JoinStep::new(ExtractKind::HospDiagnoses, JoinKind::Inner, &["subject_id"])
        .with_optional_keys(&["hadm_id"])];
    let mut diagnostics = Diagnostics::new();
    let joined = JoinAssembler::new(&steps)
        .assemble(patients(), &extracts, &mut diagnostics)
        .unwrap();

    assert!(diagnostics.is_empty());
    assert_eq!(int_column(&joined, "subject_id"), vec![Some(1), Some(3), Some(3)]);
    assert_eq!(
        int_column(&joined, "hadm_id"),
        vec![Some(100), Some(300), Some(301)]
    );
}

/// Concatenated pages reproduce the whole view in order
#[test]
fn test_pages_reconstruct_view() {
    let pipeline = hospital_pipeline();
    let mut diagnostics = Diagnostics::new();
    let view = pipeline.view(&CohortRequest::default(), &mut diagnostics).unwrap();

    let first = pipeline.run(&CohortRequest::default().with_page_size(3));
    assert_eq!(first.total_pages, 2);

    let pages: Vec<RecordBatch> = (1..=first.total_pages)
        .map(|page| {
            pipeline
                .run(&CohortRequest::default().with_page(page).with_page_size(3))
                .rows
        })
        .collect();
    let joined = concat_batches(&view.schema(), &pages).unwrap();
    assert_eq!(joined, view);
}

fn many_patients(count: i64) -> MemorySource {
    let ids: Vec<i64> = (1..=count).collect();
    let patients = RecordBatch::try_from_iter(vec![
        ("subject_id", Arc::new(Int64Array::from(ids.clone())) as ArrayRef),
        ("anchor_age", Arc::new(Int64Array::from(vec![30; ids.len()])) as ArrayRef),
    ])
    .unwrap();
    let diagnoses = RecordBatch::try_from_iter(vec![
        ("subject_id", Arc::new(Int64Array::from(ids.clone())) as ArrayRef),
        ("icd_code", Arc::new(StringArray::from(vec!["I10"; ids.len()])) as ArrayRef),
    ])
    .unwrap();

    MemorySource::new()
        .with(ExtractKind::Patients, patients)
        .with(ExtractKind::HospDiagnoses, diagnoses)
}

/// Page 5 of 120 rows at 50 per page is empty, not an error
#[test]
fn test_page_past_end_is_empty() {
    let definition = CohortDefinition {
        name: "minimal".to_string(),
        base: ExtractKind::Patients,
        extracts: vec![
            ExtractSpec::required(ExtractKind::Patients),
            ExtractSpec::required(ExtractKind::HospDiagnoses),
        ],
        steps: vec![JoinStep::new(ExtractKind::HospDiagnoses, JoinKind::Inner, &["subject_id"])],
        dedupe_keys: Vec::new(),
        columns: Vec::new(),
        labels: Vec::new(),
        page_size: Some(50),
        sort: None,
    };
    definition.validate().unwrap();
    let pipeline = CohortPipeline::new(Box::new(many_patients(120)), definition);

    let last = pipeline.run(&CohortRequest::default().with_page(3));
    assert_eq!(last.total_rows, 120);
    assert_eq!(last.total_pages, 3);
    assert_eq!(last.rows.num_rows(), 20);

    let beyond = pipeline.run(&CohortRequest::default().with_page(5));
    assert!(beyond.is_ok());
    assert_eq!(beyond.rows.num_rows(), 0);
    assert_eq!(beyond.total_rows, 120);

    let direct = paginate(&last.rows, 2, 50).unwrap();
    assert_eq!(direct.rows.num_rows(), 0);
}

/// A missing optional extract is a message, not a failure
#[test]
fn test_missing_optional_extract_warns() {
    let source = hospital_source().without(ExtractKind::IcdDictionary);
    let pipeline = CohortPipeline::new(Box::new(source), CohortDefinition::hospital());

    let response = pipeline.run(&CohortRequest::default());
    assert!(response.is_ok());
    assert_eq!(response.total_rows, 4);
    assert!(
        response
            .messages
            .iter()
            .any(|m| m.contains("icd_dictionary"))
    );
    assert!(response.rows.schema().index_of("Diagnosis").is_err());
}

/// A missing required extract yields an empty page carrying the error
#[test]
fn test_missing_required_extract_fails_cleanly() {
    let source = hospital_source().without(ExtractKind::HospDiagnoses);
    let pipeline = CohortPipeline::new(Box::new(source), CohortDefinition::hospital());

    let response = pipeline.run(&CohortRequest::default());
    assert!(!response.is_ok());
    assert_eq!(response.rows.num_rows(), 0);
    assert_eq!(response.total_rows, 0);
    assert!(response.error.unwrap().contains("diagnoses"));

    assert!(matches!(
        pipeline.try_run(&CohortRequest::default()),
        Err(CohortError::MissingSource { .. })
    ));
}

/// A filter over a column the cohort lacks is skipped with a message
#[test]
fn test_filter_on_absent_column_is_skipped() {
    let pipeline = hospital_pipeline();
    let response = pipeline.run(&CohortRequest::new(
        CohortFilters::new().with_chief_complaint("pain"),
    ));

    assert!(response.is_ok());
    assert_eq!(response.total_rows, 4);
    assert!(
        response
            .messages
            .iter()
            .any(|m| m.contains("chiefcomplaint"))
    );
}

#[test]
fn test_inverted_age_range_is_rejected() {
    let response = hospital_pipeline().run(&CohortRequest::new(
        CohortFilters::new().with_age_range(60.0, 20.0),
    ));
    assert!(!response.is_ok());
    assert_eq!(response.rows.num_rows(), 0);
}

#[test]
fn test_page_zero_is_rejected() {
    let response = hospital_pipeline().run(&CohortRequest::default().with_page(0));
    assert!(response.error.is_some());
}

#[test]
fn test_sort_descending_by_age() {
    let response = hospital_pipeline()
        .run(&CohortRequest::default().with_sort(SortSpec::descending("anchor_age")));

    let ages: Vec<i64> = int_column(&response.rows, "Age").into_iter().flatten().collect();
    assert_eq!(ages, vec![60, 60, 40, 20]);
}

/// The emergency view carries the complaint and, on request, the vitals
#[test]
fn test_emergency_complaint_and_vitals() {
    let pipeline =
        CohortPipeline::new(Box::new(emergency_source()), CohortDefinition::emergency());

    let response = pipeline.run(&CohortRequest::new(
        CohortFilters::new().with_chief_complaint("DEPRESS"),
    ));
    assert!(response.is_ok(), "{:?}", response.error);
    assert_eq!(subjects(&response.rows), BTreeSet::from([1, 3]));

    let mut diagnostics = Diagnostics::new();
    let plain = pipeline
        .assemble(&CohortRequest::default(), &mut diagnostics)
        .unwrap();
    assert!(plain.schema().index_of("heartrate").is_err());

    let with_vitals = pipeline
        .assemble(&CohortRequest::default().with_vitals(true), &mut diagnostics)
        .unwrap();
    assert_eq!(
        int_column(&with_vitals, "heartrate"),
        vec![Some(80), Some(110), Some(72)]
    );
}

#[test]
fn test_options_list_choices() {
    let options = hospital_pipeline().options().unwrap();
    assert_eq!(options.genders, vec!["F".to_string(), "M".to_string()]);
    assert_eq!(options.age_range, Some((20.0, 60.0)));
    assert!(options.icd_codes.contains(&"F32".to_string()));
}
