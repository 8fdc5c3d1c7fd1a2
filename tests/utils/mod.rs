//! Shared fixtures for the integration tests

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, AsArray, Int64Array, StringArray};
use arrow::datatypes::Int64Type;
use cohort_reader::{CohortError, ExtractKind, ExtractSource, RecordBatch, Result};

/// An extract source over tables held in memory
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    tables: HashMap<ExtractKind, RecordBatch>,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, kind: ExtractKind, batch: RecordBatch) -> Self {
        self.tables.insert(kind, batch);
        self
    }

    #[must_use]
    pub fn without(mut self, kind: ExtractKind) -> Self {
        self.tables.remove(&kind);
        self
    }
}

impl ExtractSource for MemorySource {
    fn describe(&self) -> String {
        format!("memory ({} tables)", self.tables.len())
    }

    fn load(&self, kind: ExtractKind) -> Result<RecordBatch> {
        self.tables
            .get(&kind)
            .cloned()
            .ok_or_else(|| CohortError::missing_source(kind.name(), "not in memory"))
    }

    fn cache_key(&self, kind: ExtractKind) -> String {
        format!("memory#{kind}")
    }
}

fn ints(values: Vec<i64>) -> ArrayRef {
    Arc::new(Int64Array::from(values))
}

fn texts(values: Vec<&str>) -> ArrayRef {
    Arc::new(StringArray::from(values))
}

/// Three patients aged 20, 40 and 60
#[must_use]
pub fn patients() -> RecordBatch {
    RecordBatch::try_from_iter(vec![
        ("subject_id", ints(vec![1, 2, 3])),
        ("gender", texts(vec!["F", "M", "F"])),
        ("anchor_age", ints(vec![20, 40, 60])),
    ])
    .unwrap()
}

/// One admission each for patients 1 and 2, two for patient 3
#[must_use]
pub fn admissions() -> RecordBatch {
    RecordBatch::try_from_iter(vec![
        ("subject_id", ints(vec![1, 2, 3, 3])),
        ("hadm_id", ints(vec![100, 200, 300, 301])),
        (
            "admission_type",
            texts(vec!["EMERGENCY", "ELECTIVE", "EMERGENCY", "URGENT"]),
        ),
        (
            "admission_location",
            texts(vec![
                "EMERGENCY ROOM",
                "PHYSICIAN REFERRAL",
                "EMERGENCY ROOM",
                "TRANSFER FROM HOSPITAL",
            ]),
        ),
        (
            "discharge_location",
            texts(vec!["HOME", "HOME", "SKILLED NURSING FACILITY", "DIED"]),
        ),
    ])
    .unwrap()
}

/// Admission diagnoses; patient 1 has F32 recorded twice, and one row
/// points at an admission that does not exist
#[must_use]
pub fn diagnoses() -> RecordBatch {
    RecordBatch::try_from_iter(vec![
        ("subject_id", ints(vec![1, 1, 2, 3, 3, 2])),
        ("hadm_id", ints(vec![100, 100, 200, 300, 301, 999])),
        ("seq_num", ints(vec![1, 2, 1, 1, 1, 1])),
        ("icd_code", texts(vec!["F32", "F32", "I10", "F33", "I10", "Z00"])),
        ("icd_version", ints(vec![10, 10, 10, 10, 10, 10])),
    ])
    .unwrap()
}

/// ICD dictionary without an entry for F32
#[must_use]
pub fn icd_dictionary() -> RecordBatch {
    RecordBatch::try_from_iter(vec![
        ("icd_code", texts(vec!["I10", "F33", "Z00"])),
        ("icd_version", ints(vec![10, 10, 10])),
        (
            "long_title",
            texts(vec![
                "Essential (primary) hypertension",
                "Major depressive disorder, recurrent",
                "General examination",
            ]),
        ),
    ])
    .unwrap()
}

#[must_use]
pub fn ed_stays() -> RecordBatch {
    RecordBatch::try_from_iter(vec![
        ("subject_id", ints(vec![1, 2, 3])),
        ("stay_id", ints(vec![10, 20, 30])),
        ("arrival_transport", texts(vec!["WALK IN", "AMBULANCE", "AMBULANCE"])),
        ("disposition", texts(vec!["HOME", "ADMITTED", "HOME"])),
        (
            "intime",
            texts(vec!["2150-01-01 10:00:00", "2150-01-02 09:00:00", "2150-01-02 12:00:00"]),
        ),
        (
            "outtime",
            texts(vec!["2150-01-01 14:00:00", "2150-01-02 18:00:00", "2150-01-02 13:30:00"]),
        ),
    ])
    .unwrap()
}

#[must_use]
pub fn triage() -> RecordBatch {
    RecordBatch::try_from_iter(vec![
        ("subject_id", ints(vec![1, 2, 3])),
        ("stay_id", ints(vec![10, 20, 30])),
        ("chiefcomplaint", texts(vec!["Depression", "Chest pain", "depressed mood"])),
        ("heartrate", ints(vec![80, 110, 72])),
    ])
    .unwrap()
}

/// ED diagnoses keyed by stay
#[must_use]
pub fn ed_diagnoses() -> RecordBatch {
    RecordBatch::try_from_iter(vec![
        ("subject_id", ints(vec![1, 2, 3])),
        ("stay_id", ints(vec![10, 20, 30])),
        ("icd_code", texts(vec!["F32", "I10", "F33"])),
        ("icd_version", ints(vec![10, 10, 10])),
        ("icd_title", texts(vec!["DEPRESSION", "HYPERTENSION", "RECURRENT DEPRESSION"])),
    ])
    .unwrap()
}

/// Source with every hospital extract except ICU stays
#[must_use]
pub fn hospital_source() -> MemorySource {
    MemorySource::new()
        .with(ExtractKind::Patients, patients())
        .with(ExtractKind::Admissions, admissions())
        .with(ExtractKind::HospDiagnoses, diagnoses())
        .with(ExtractKind::IcdDictionary, icd_dictionary())
}

#[must_use]
pub fn emergency_source() -> MemorySource {
    MemorySource::new()
        .with(ExtractKind::Patients, patients())
        .with(ExtractKind::EdStays, ed_stays())
        .with(ExtractKind::Triage, triage())
        .with(ExtractKind::EdDiagnoses, ed_diagnoses())
        .with(ExtractKind::IcdDictionary, icd_dictionary())
}

/// Write raw CSV text to `dir/relative`, creating directories
pub fn write_csv(dir: &Path, relative: &str, contents: &str) {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

/// Values of an Int64 column by name
#[must_use]
pub fn int_column(batch: &RecordBatch, name: &str) -> Vec<Option<i64>> {
    let idx = batch.schema().index_of(name).unwrap();
    batch.column(idx).as_primitive::<Int64Type>().iter().collect()
}

/// Values of a Utf8 column by name
#[must_use]
pub fn text_column(batch: &RecordBatch, name: &str) -> Vec<Option<String>> {
    let idx = batch.schema().index_of(name).unwrap();
    batch
        .column(idx)
        .as_string::<i32>()
        .iter()
        .map(|v| v.map(ToString::to_string))
        .collect()
}
