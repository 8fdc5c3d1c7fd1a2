//! Core filtering functionality for cohort tables
//!
//! This module defines the `BatchFilter` trait shared by the expression
//! filters and the subject filter, and the mask application they all use.

use std::collections::HashSet;

use arrow::array::BooleanArray;
use arrow::compute::filter_record_batch as arrow_filter_record_batch;
use arrow::record_batch::RecordBatch;

use crate::error::{CohortError, Diagnostics, Result};

/// Filter a record batch based on a boolean mask
///
/// Null mask entries drop the row.
///
/// # Errors
/// Returns an error if the mask length does not match the batch
pub fn filter_record_batch(batch: &RecordBatch, mask: &BooleanArray) -> Result<RecordBatch> {
    if batch.num_rows() != mask.len() {
        return Err(CohortError::InvalidRequest(format!(
            "Mask length ({}) doesn't match batch row count ({})",
            mask.len(),
            batch.num_rows()
        )));
    }

    Ok(arrow_filter_record_batch(batch, mask)?)
}

/// Trait for objects that can filter record batches
pub trait BatchFilter: std::fmt::Debug {
    /// Filter a record batch
    ///
    /// Predicates over columns the batch lacks are skipped and reported to
    /// `diagnostics`, never raised.
    fn filter(&self, batch: &RecordBatch, diagnostics: &mut Diagnostics) -> Result<RecordBatch>;

    /// Returns the set of column names required by this filter
    fn required_columns(&self) -> HashSet<String>;
}
