//! Extract kinds and their column conventions.
//!
//! Each raw table the pipeline can consume is an `ExtractKind`. The kind knows
//! the file stems it is usually delivered under and the subdirectory of the
//! extract tree it lives in, so a source can resolve it without configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CohortError;

pub mod columns;
pub mod date_utils;
pub mod normalize;

pub use normalize::{extract_identifier, normalize_extract};

/// The raw tables known to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractKind {
    Patients,
    Admissions,
    IcuStays,
    EdStays,
    Triage,
    /// Hospital diagnoses, keyed by admission
    #[serde(alias = "diagnoses")]
    HospDiagnoses,
    /// ED diagnoses, keyed by stay and carrying their own `icd_title`
    EdDiagnoses,
    IcdDictionary,
    Labs,
    LabItems,
    Prescriptions,
    Pyxis,
    #[serde(rename = "medrecon")]
    MedRecon,
    DischargeNotes,
    RadiologyNotes,
}

impl ExtractKind {
    pub const ALL: [Self; 15] = [
        Self::Patients,
        Self::Admissions,
        Self::IcuStays,
        Self::EdStays,
        Self::Triage,
        Self::HospDiagnoses,
        Self::EdDiagnoses,
        Self::IcdDictionary,
        Self::Labs,
        Self::LabItems,
        Self::Prescriptions,
        Self::Pyxis,
        Self::MedRecon,
        Self::DischargeNotes,
        Self::RadiologyNotes,
    ];

    /// Short name used in logs and configuration
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Patients => "patients",
            Self::Admissions => "admissions",
            Self::IcuStays => "icu_stays",
            Self::EdStays => "ed_stays",
            Self::Triage => "triage",
            Self::HospDiagnoses => "hosp_diagnoses",
            Self::EdDiagnoses => "ed_diagnoses",
            Self::IcdDictionary => "icd_dictionary",
            Self::Labs => "labs",
            Self::LabItems => "lab_items",
            Self::Prescriptions => "prescriptions",
            Self::Pyxis => "pyxis",
            Self::MedRecon => "medrecon",
            Self::DischargeNotes => "discharge_notes",
            Self::RadiologyNotes => "radiology_notes",
        }
    }

    /// File stems the extract is delivered under, most specific first
    #[must_use]
    pub const fn file_stems(self) -> &'static [&'static str] {
        match self {
            Self::Patients => &["patients"],
            Self::Admissions => &["admissions"],
            Self::IcuStays => &["icustays"],
            Self::EdStays => &["edstays"],
            Self::Triage => &["triage"],
            Self::HospDiagnoses => &["diagnoses_icd"],
            Self::EdDiagnoses => &["diagnosis"],
            Self::IcdDictionary => &["d_icd_diagnoses"],
            Self::Labs => &["labevents"],
            Self::LabItems => &["d_labitems"],
            Self::Prescriptions => &["prescriptions"],
            Self::Pyxis => &["pyxis"],
            Self::MedRecon => &["medrecon"],
            Self::DischargeNotes => &["discharge"],
            Self::RadiologyNotes => &["radiology"],
        }
    }

    /// Subdirectory of a full extract tree the table lives in
    #[must_use]
    pub const fn module_dir(self) -> &'static str {
        match self {
            Self::Patients
            | Self::Admissions
            | Self::HospDiagnoses
            | Self::IcdDictionary
            | Self::Labs
            | Self::LabItems
            | Self::Prescriptions => "hosp",
            Self::IcuStays => "icu",
            Self::EdStays
            | Self::Triage
            | Self::EdDiagnoses
            | Self::Pyxis
            | Self::MedRecon => "ed",
            Self::DischargeNotes | Self::RadiologyNotes => "note",
        }
    }
}

impl fmt::Display for ExtractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ExtractKind {
    type Err = CohortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_lowercase();
        if lowered == "diagnoses" {
            return Ok(Self::HospDiagnoses);
        }
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == lowered || kind.file_stems().contains(&lowered.as_str()))
            .ok_or_else(|| CohortError::Config(format!("Unknown extract: {s}")))
    }
}
