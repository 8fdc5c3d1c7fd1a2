//! Column names shared by the extracts.
//!
//! Names follow the extract headers as delivered, so they double as the
//! lookup keys for filters, joins and the cohort view.

pub const SUBJECT_ID: &str = "subject_id";
pub const HADM_ID: &str = "hadm_id";
pub const STAY_ID: &str = "stay_id";

/// Identifier columns normalized to integers before joining
pub const IDENTIFIER_COLUMNS: [&str; 3] = [SUBJECT_ID, HADM_ID, STAY_ID];

// Patients
pub const GENDER: &str = "gender";
pub const ANCHOR_AGE: &str = "anchor_age";
pub const DOD: &str = "dod";

// Admissions
pub const ADMISSION_TYPE: &str = "admission_type";
pub const ADMISSION_LOCATION: &str = "admission_location";
pub const DISCHARGE_LOCATION: &str = "discharge_location";
pub const RACE: &str = "race";
pub const MARITAL_STATUS: &str = "marital_status";
pub const ADMITTIME: &str = "admittime";
pub const DISCHTIME: &str = "dischtime";

// ICU stays
pub const FIRST_CAREUNIT: &str = "first_careunit";
pub const LAST_CAREUNIT: &str = "last_careunit";

// ED stays
pub const ARRIVAL_TRANSPORT: &str = "arrival_transport";
pub const DISPOSITION: &str = "disposition";
pub const INTIME: &str = "intime";
pub const OUTTIME: &str = "outtime";

// Triage
pub const CHIEF_COMPLAINT: &str = "chiefcomplaint";
pub const VITAL_SIGNS: [&str; 7] = [
    "temperature",
    "heartrate",
    "resprate",
    "o2sat",
    "sbp",
    "dbp",
    "pain",
];

// Diagnoses
pub const ICD_CODE: &str = "icd_code";
pub const ICD_VERSION: &str = "icd_version";
pub const ICD_TITLE: &str = "icd_title";
pub const LONG_TITLE: &str = "long_title";
pub const SEQ_NUM: &str = "seq_num";

/// Code columns read as text so leading zeros survive (`"0389"`)
pub const TEXT_COLUMNS: [&str; 1] = [ICD_CODE];

// Labs
pub const ITEMID: &str = "itemid";
pub const LABEL: &str = "label";
pub const VALUENUM: &str = "valuenum";
pub const TEST_NAME: &str = "test_name";
pub const LAB_MEAN: &str = "lab_mean";

// Notes
pub const CATEGORY: &str = "category";
