//! Filtering capabilities for cohort tables
//!
//! This module provides an expression-based filtering system over Arrow
//! record batches, the cohort filter request that compiles into it, and the
//! subject filter used to restrict child tables to a cohort.

pub mod cohort;
pub mod core;
pub mod expr;
pub mod subject;

pub use cohort::{ALL, AgeRange, CohortFilters};
pub use core::{BatchFilter, filter_record_batch};
pub use expr::{Expr, ExpressionFilter, LiteralValue, eq_filter, evaluate_expr, in_filter};
pub use subject::{SubjectFilter, subject_ids};
