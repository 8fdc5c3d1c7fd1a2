//! Cohort definitions and the pipeline that serves them
//!
//! A `CohortDefinition` describes one cohort view: the extracts it reads, the
//! join steps that assemble them, the rows considered duplicates, and the
//! columns and labels it presents. The dashboard variants of the hospital and
//! emergency cohorts are presets of the same structure.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CohortError, Result};
use crate::join::{JoinKind, JoinStep};
use crate::reader::ExtractSpec;
use crate::schema::ExtractKind;
use crate::schema::columns::{
    ADMISSION_LOCATION, ADMISSION_TYPE, ADMITTIME, ANCHOR_AGE, ARRIVAL_TRANSPORT,
    CHIEF_COMPLAINT, DISCHARGE_LOCATION, DISCHTIME, DISPOSITION, FIRST_CAREUNIT, GENDER, HADM_ID,
    ICD_CODE, ICD_TITLE, ICD_VERSION, INTIME, LAST_CAREUNIT, LONG_TITLE, OUTTIME, RACE, STAY_ID,
    SUBJECT_ID,
};

pub mod pager;
pub mod pipeline;
pub mod view;

pub use pager::{Page, page_count, paginate};
pub use pipeline::{CohortPipeline, CohortRequest, CohortResponse};
pub use view::{FilterOptions, SortSpec, discover_options, shape_view, sort_batch};

/// Everything that distinguishes one cohort view from another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortDefinition {
    pub name: String,
    /// Extract the join sequence starts from
    pub base: ExtractKind,
    pub extracts: Vec<ExtractSpec>,
    pub steps: Vec<JoinStep>,
    /// Rows equal on these columns are duplicates; the first is kept
    #[serde(default)]
    pub dedupe_keys: Vec<String>,
    /// Output columns in presentation order; empty keeps all
    #[serde(default)]
    pub columns: Vec<String>,
    /// Presentation labels as (column, label) pairs
    #[serde(default)]
    pub labels: Vec<(String, String)>,
    /// Page size used when a request does not set one
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub sort: Option<view::SortSpec>,
}

fn admissions_step() -> JoinStep {
    JoinStep::new(ExtractKind::Admissions, JoinKind::Left, &[SUBJECT_ID])
        .with_optional_keys(&[HADM_ID])
}

fn hosp_diagnoses_step() -> JoinStep {
    JoinStep::new(ExtractKind::HospDiagnoses, JoinKind::Inner, &[SUBJECT_ID])
        .with_optional_keys(&[HADM_ID])
}

fn ed_diagnoses_step() -> JoinStep {
    JoinStep::new(ExtractKind::EdDiagnoses, JoinKind::Inner, &[SUBJECT_ID])
        .with_optional_keys(&[STAY_ID])
}

fn dictionary_step() -> JoinStep {
    JoinStep::new(ExtractKind::IcdDictionary, JoinKind::Left, &[ICD_CODE])
        .with_optional_keys(&[ICD_VERSION])
        .with_columns(&[LONG_TITLE])
}

fn icu_step() -> JoinStep {
    JoinStep::new(ExtractKind::IcuStays, JoinKind::Left, &[SUBJECT_ID])
        .with_optional_keys(&[HADM_ID])
        .with_columns(&[FIRST_CAREUNIT, LAST_CAREUNIT])
}

fn ed_stays_step() -> JoinStep {
    JoinStep::new(ExtractKind::EdStays, JoinKind::Left, &[SUBJECT_ID])
        .with_optional_keys(&[STAY_ID, HADM_ID])
}

fn triage_step() -> JoinStep {
    JoinStep::new(ExtractKind::Triage, JoinKind::Left, &[SUBJECT_ID])
        .with_optional_keys(&[STAY_ID])
        .with_columns(&[CHIEF_COMPLAINT])
        .with_vitals()
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

fn label_pairs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(column, label)| ((*column).to_string(), (*label).to_string()))
        .collect()
}

const COMMON_LABELS: [(&str, &str); 6] = [
    (SUBJECT_ID, "Subject ID"),
    (GENDER, "Gender"),
    (ANCHOR_AGE, "Age"),
    (HADM_ID, "Admission ID"),
    (ICD_CODE, "ICD Code"),
    (LONG_TITLE, "Diagnosis"),
];

impl CohortDefinition {
    /// Patients with their hospital admissions and admission diagnoses
    #[must_use]
    pub fn hospital() -> Self {
        let mut labels = label_pairs(&COMMON_LABELS);
        labels.extend(label_pairs(&[
            (RACE, "Race"),
            (ADMISSION_TYPE, "Admission Type"),
            (ADMISSION_LOCATION, "Admission Location"),
            (DISCHARGE_LOCATION, "Discharge Location"),
            (ADMITTIME, "Admitted"),
            (DISCHTIME, "Discharged"),
            (FIRST_CAREUNIT, "First Care Unit"),
            (LAST_CAREUNIT, "Last Care Unit"),
        ]));

        Self {
            name: "hospital".to_string(),
            base: ExtractKind::Patients,
            extracts: vec![
                ExtractSpec::required(ExtractKind::Patients),
                ExtractSpec::optional(ExtractKind::Admissions),
                ExtractSpec::optional(ExtractKind::IcuStays),
                ExtractSpec::required(ExtractKind::HospDiagnoses),
                ExtractSpec::optional(ExtractKind::IcdDictionary),
            ],
            steps: vec![admissions_step(), icu_step(), hosp_diagnoses_step(), dictionary_step()],
            dedupe_keys: strings(&[SUBJECT_ID, HADM_ID, ICD_CODE]),
            columns: strings(&[
                SUBJECT_ID,
                GENDER,
                ANCHOR_AGE,
                RACE,
                HADM_ID,
                ADMISSION_TYPE,
                ADMISSION_LOCATION,
                DISCHARGE_LOCATION,
                ADMITTIME,
                DISCHTIME,
                FIRST_CAREUNIT,
                LAST_CAREUNIT,
                ICD_CODE,
                LONG_TITLE,
            ]),
            labels,
            page_size: Some(50),
            sort: None,
        }
    }

    /// Patients with their ED visits, triage complaint and ED diagnoses
    #[must_use]
    pub fn emergency() -> Self {
        let mut labels = label_pairs(&COMMON_LABELS);
        labels.extend(label_pairs(&[
            (STAY_ID, "Stay ID"),
            (ARRIVAL_TRANSPORT, "Arrival Transport"),
            (DISPOSITION, "Disposition"),
            (INTIME, "In Time"),
            (OUTTIME, "Out Time"),
            (CHIEF_COMPLAINT, "Chief Complaint"),
            (ICD_TITLE, "ICD Title"),
        ]));

        Self {
            name: "emergency".to_string(),
            base: ExtractKind::Patients,
            extracts: vec![
                ExtractSpec::required(ExtractKind::Patients),
                ExtractSpec::optional(ExtractKind::EdStays),
                ExtractSpec::optional(ExtractKind::Triage),
                ExtractSpec::required(ExtractKind::EdDiagnoses),
                ExtractSpec::optional(ExtractKind::IcdDictionary),
            ],
            steps: vec![ed_stays_step(), triage_step(), ed_diagnoses_step(), dictionary_step()],
            dedupe_keys: strings(&[SUBJECT_ID, STAY_ID, ICD_CODE]),
            columns: strings(&[
                SUBJECT_ID,
                GENDER,
                ANCHOR_AGE,
                STAY_ID,
                HADM_ID,
                ARRIVAL_TRANSPORT,
                DISPOSITION,
                INTIME,
                OUTTIME,
                CHIEF_COMPLAINT,
                ICD_CODE,
                ICD_TITLE,
                LONG_TITLE,
            ]),
            labels,
            page_size: Some(25),
            sort: None,
        }
    }

    /// Parse a definition from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let definition: Self =
            toml::from_str(text).map_err(|e| CohortError::Config(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| CohortError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    /// Look up a preset by name
    pub fn preset(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "hospital" | "hosp" => Ok(Self::hospital()),
            "emergency" | "ed" => Ok(Self::emergency()),
            "combined" | "default" => Ok(Self::default()),
            other => Err(CohortError::Config(format!("Unknown cohort preset: {other}"))),
        }
    }

    /// Check the definition is internally consistent
    pub fn validate(&self) -> Result<()> {
        let Some(base) = self.extracts.iter().find(|spec| spec.kind == self.base) else {
            return Err(CohortError::Config(format!(
                "base extract {} is not listed in extracts",
                self.base
            )));
        };
        if !base.required {
            return Err(CohortError::Config(format!(
                "base extract {} must be required",
                self.base
            )));
        }
        if let Some(step) = self
            .steps
            .iter()
            .find(|step| !self.extracts.iter().any(|spec| spec.kind == step.extract))
        {
            return Err(CohortError::Config(format!(
                "join step uses {} which is not listed in extracts",
                step.extract
            )));
        }
        if self.page_size == Some(0) {
            return Err(CohortError::Config("page_size must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for CohortDefinition {
    /// Every default join step. Diagnoses come from the hospital table, so ED
    /// visits are matched to them through their admission.
    fn default() -> Self {
        let hospital = Self::hospital();
        let emergency = Self::emergency();

        let mut columns = hospital.columns;
        for column in emergency.columns {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        let mut labels = hospital.labels;
        for pair in emergency.labels {
            if !labels.iter().any(|(column, _)| *column == pair.0) {
                labels.push(pair);
            }
        }

        Self {
            name: "combined".to_string(),
            base: ExtractKind::Patients,
            extracts: vec![
                ExtractSpec::required(ExtractKind::Patients),
                ExtractSpec::optional(ExtractKind::Admissions),
                ExtractSpec::optional(ExtractKind::IcuStays),
                ExtractSpec::optional(ExtractKind::EdStays),
                ExtractSpec::optional(ExtractKind::Triage),
                ExtractSpec::required(ExtractKind::HospDiagnoses),
                ExtractSpec::optional(ExtractKind::IcdDictionary),
            ],
            steps: vec![
                admissions_step(),
                icu_step(),
                ed_stays_step(),
                triage_step(),
                hosp_diagnoses_step(),
                dictionary_step(),
            ],
            dedupe_keys: strings(&[SUBJECT_ID, HADM_ID, STAY_ID, ICD_CODE]),
            columns,
            labels,
            page_size: Some(25),
            sort: None,
        }
    }
}
