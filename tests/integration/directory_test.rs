//! Cohorts served from CSV and Parquet extract directories

use std::collections::BTreeSet;

use cohort_reader::derive::write_snapshot;
use cohort_reader::reader::ExtractFormat;
use cohort_reader::{
    CohortDefinition, CohortFilters, CohortPipeline, CohortRequest, DirectorySource, ExtractKind,
    ExtractSource, PipelineConfig,
};
use tempfile::TempDir;

use crate::utils::{diagnoses, int_column, patients, text_column, write_csv};

/// An extract tree with the irregularities real deliveries have
fn extract_tree() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    write_csv(
        root,
        "hosp/patients.csv",
        "subject_id,gender,anchor_age\n1,F,20\n2,M,40\n3,F,unknown\n,M,30\n",
    );
    write_csv(
        root,
        "hosp/admissions.csv",
        "subject_id,hadm_id,admission_type,admittime\n\
         1,hadm_100,EMERGENCY,2150-01-01 10:00:00\n\
         2,200.0,ELECTIVE,2150-02-01 08:00:00\n\
         3,hadm_300,URGENT,2150-03-01 12:00:00\n",
    );
    write_csv(
        root,
        "hosp/diagnoses_icd.csv",
        "subject_id,hadm_id,seq_num,icd_code,icd_version\n\
         1,100,1,0389,9\n\
         2,200,1,I10,10\n\
         3,300,1,F33,10\n",
    );
    write_csv(
        root,
        "hosp/d_icd_diagnoses.csv",
        "icd_code,icd_version,long_title\n\
         0389,9,Unspecified septicemia\n\
         I10,10,Essential hypertension\n",
    );
    dir
}

fn pipeline(root: &std::path::Path) -> CohortPipeline {
    pipeline_for(root, CohortDefinition::hospital())
}

fn pipeline_for(root: &std::path::Path, definition: CohortDefinition) -> CohortPipeline {
    let config = PipelineConfig {
        data_dir: root.to_path_buf(),
        ..PipelineConfig::default()
    };
    CohortPipeline::from_config(config, definition)
}

/// Prefixed and float-formatted identifiers still join
#[test]
fn test_messy_identifiers_join() {
    let dir = extract_tree();
    let response = pipeline(dir.path()).run(&CohortRequest::default());

    assert!(response.is_ok(), "{:?}", response.error);
    assert_eq!(response.total_rows, 3);
    assert_eq!(
        int_column(&response.rows, "Admission ID"),
        vec![Some(100), Some(200), Some(300)]
    );
    assert_eq!(
        text_column(&response.rows, "ICD Code"),
        vec![Some("0389".into()), Some("I10".into()), Some("F33".into())]
    );
    assert_eq!(
        text_column(&response.rows, "Diagnosis"),
        vec![
            Some("Unspecified septicemia".into()),
            Some("Essential hypertension".into()),
            None
        ]
    );
    assert!(
        response
            .messages
            .iter()
            .any(|m| m.contains("without a subject id"))
    );
}

/// Unparsable ages are treated as missing and reported
#[test]
fn test_non_numeric_age_is_missing() {
    let dir = extract_tree();
    let response = pipeline(dir.path()).run(&CohortRequest::new(
        CohortFilters::new().with_age_range(0.0, 120.0),
    ));

    let subjects: BTreeSet<i64> = int_column(&response.rows, "Subject ID")
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(subjects, BTreeSet::from([1, 2]));
    assert!(response.messages.iter().any(|m| m.contains("non-numeric")));
}

/// Extracts load the same whether the module directory is used or not
#[test]
fn test_flat_layout_resolves() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "patients.csv", "subject_id,gender\n1,F\n");

    let source = DirectorySource::new(dir.path());
    assert!(source.resolve(ExtractKind::Patients).is_some());
    assert_eq!(source.load(ExtractKind::Patients).unwrap().num_rows(), 1);
}

/// Parquet snapshots are readable as extracts
#[test]
fn test_parquet_extracts() {
    let dir = tempfile::tempdir().unwrap();
    write_snapshot(&patients(), &dir.path().join("hosp/patients.parquet")).unwrap();
    write_snapshot(&diagnoses(), &dir.path().join("hosp/diagnoses_icd.parquet")).unwrap();

    let source = DirectorySource::new(dir.path()).with_format(ExtractFormat::Parquet);
    let loaded = source.load(ExtractKind::Patients).unwrap();
    assert_eq!(int_column(&loaded, "anchor_age"), vec![Some(20), Some(40), Some(60)]);

    let pipeline = CohortPipeline::new(Box::new(source), CohortDefinition::hospital());
    let response = pipeline.run(&CohortRequest::default());
    assert!(response.is_ok(), "{:?}", response.error);
    // No admissions: diagnoses join on subject alone, then dedupe on code
    assert_eq!(response.distinct_patients, 3);
}

/// A directory without the base extract fails with a clear message
#[test]
fn test_empty_directory_reports_missing_source() {
    let dir = tempfile::tempdir().unwrap();
    let response = pipeline(dir.path()).run(&CohortRequest::default());

    assert!(!response.is_ok());
    assert!(response.error.unwrap().contains("patients"));
}

/// A full tree carries both diagnosis tables; each preset reads its own
#[test]
fn test_hospital_and_ed_diagnoses_stay_apart() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_csv(root, "hosp/patients.csv", "subject_id,gender,anchor_age\n1,F,20\n");
    write_csv(
        root,
        "ed/edstays.csv",
        "subject_id,hadm_id,stay_id,intime,outtime,disposition\n\
         1,,10,2150-01-01 10:00:00,2150-01-01 14:00:00,HOME\n",
    );
    write_csv(
        root,
        "ed/diagnosis.csv",
        "subject_id,stay_id,seq_num,icd_code,icd_version,icd_title\n1,10,1,F32,10,DEPRESSION\n",
    );
    write_csv(
        root,
        "hosp/diagnoses_icd.csv",
        "subject_id,hadm_id,seq_num,icd_code,icd_version\n1,999,1,I10,10\n",
    );

    let emergency =
        pipeline_for(root, CohortDefinition::emergency()).run(&CohortRequest::default());
    assert!(emergency.is_ok(), "{:?}", emergency.error);
    assert_eq!(emergency.total_rows, 1);
    assert_eq!(text_column(&emergency.rows, "ICD Code"), vec![Some("F32".into())]);
    assert_eq!(text_column(&emergency.rows, "ICD Title"), vec![Some("DEPRESSION".into())]);
    assert_eq!(int_column(&emergency.rows, "Stay ID"), vec![Some(10)]);

    let hospital = pipeline(root).run(&CohortRequest::default());
    assert!(hospital.is_ok(), "{:?}", hospital.error);
    assert_eq!(text_column(&hospital.rows, "ICD Code"), vec![Some("I10".into())]);
    assert!(hospital.rows.schema().index_of("ICD Title").is_err());
}

/// Bad values after the type inference sample are missing, not fatal
#[test]
fn test_bad_values_past_inference_sample() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    let mut patients = String::from("subject_id,gender,anchor_age\n");
    let mut admissions = String::from("subject_id,hadm_id,admission_type\n");
    for subject in 1..=1001 {
        patients.push_str(&format!("{subject},F,30\n"));
        admissions.push_str(&format!("{subject},{},ELECTIVE\n", subject * 10));
    }
    patients.push_str("1002,M,unknown\n");
    admissions.push_str("1002,hadm_10020,URGENT\n");
    write_csv(root, "hosp/patients.csv", &patients);
    write_csv(root, "hosp/admissions.csv", &admissions);
    write_csv(
        root,
        "hosp/diagnoses_icd.csv",
        "subject_id,hadm_id,seq_num,icd_code,icd_version\n\
         1,10,1,I10,10\n\
         2,20,1,F33,10\n\
         1002,10020,1,F32,10\n",
    );

    let all = pipeline(root).run(&CohortRequest::default());
    assert!(all.is_ok(), "{:?}", all.error);
    assert_eq!(all.total_rows, 3);
    assert_eq!(
        int_column(&all.rows, "Admission ID"),
        vec![Some(10), Some(20), Some(10020)]
    );

    let aged = pipeline(root).run(&CohortRequest::new(
        CohortFilters::new().with_age_range(18.0, 50.0),
    ));
    assert!(aged.is_ok(), "{:?}", aged.error);
    let subjects: BTreeSet<i64> = int_column(&aged.rows, "Subject ID")
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(subjects, BTreeSet::from([1, 2]));
}
