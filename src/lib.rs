//! A Rust library for loading clinical research extracts and building
//! filtered, joined and paged patient cohort views.

pub mod cohort;
pub mod config;
pub mod derive;
pub mod error;
pub mod filter;
pub mod join;
pub mod reader;
pub mod schema;
pub mod store;
pub mod utils;

// Re-export the most common types for easier use
// Core types
pub use cohort::{CohortDefinition, CohortPipeline, CohortRequest, CohortResponse, SortSpec};
pub use config::PipelineConfig;
pub use error::{CohortError, Diagnostics, PipelineWarning, Result};
pub use reader::{DirectorySource, ExtractCache, ExtractSet, ExtractSource, ExtractSpec};
pub use schema::ExtractKind;
pub use store::SqliteStore;

// Arrow types
pub use arrow::datatypes::Schema as ArrowSchema;
pub use arrow::record_batch::RecordBatch;

// Filtering capabilities
pub use filter::{AgeRange, CohortFilters, Expr, LiteralValue, SubjectFilter};
pub use filter::{evaluate_expr, filter_record_batch};

// Joining
pub use join::{JoinAssembler, JoinKind, JoinStep, distinct_on, hash_join};
