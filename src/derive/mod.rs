//! Derived tables built from loaded extracts
//!
//! Frequency tables, stay lengths and visit trends for summaries, keyword
//! cohorts with the child tables restricted to their subjects, and the flat
//! per-visit table used as model input. Every product is a new batch; the
//! snapshot writer persists any of them.

pub mod model;
pub mod snapshot;
pub mod subsets;
pub mod summary;

pub use model::{fill_nulls, lab_means, model_input};
pub use snapshot::{SnapshotFormat, write_snapshot};
pub use subsets::{
    KeywordCohort, combine_notes, complaint_diagnosis, keyword_cohort, label_lab_results,
    restrict_to_subjects,
};
pub use summary::{length_of_stay, top_diagnoses, visit_trend};
