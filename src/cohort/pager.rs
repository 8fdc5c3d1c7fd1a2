//! Fixed-size pages over a cohort view

use arrow::record_batch::RecordBatch;

use crate::error::{CohortError, Result};

/// One page of a view plus the totals it was cut from
#[derive(Debug, Clone)]
pub struct Page {
    /// 1-indexed page number that was requested
    pub number: usize,
    pub page_size: usize,
    pub total_rows: usize,
    pub total_pages: usize,
    pub rows: RecordBatch,
}

/// Number of pages needed for `total_rows`
#[must_use]
pub const fn page_count(total_rows: usize, page_size: usize) -> usize {
    if page_size == 0 {
        0
    } else {
        total_rows.div_ceil(page_size)
    }
}

/// Cut page `number` (1-indexed) out of `batch`
///
/// A page past the end is empty, not an error.
///
/// # Errors
/// Returns `CohortError::InvalidRequest` for page 0 or a page size of 0
pub fn paginate(batch: &RecordBatch, number: usize, page_size: usize) -> Result<Page> {
    if number == 0 {
        return Err(CohortError::InvalidRequest("pages are numbered from 1".into()));
    }
    if page_size == 0 {
        return Err(CohortError::InvalidRequest("page size must be at least 1".into()));
    }

    let total_rows = batch.num_rows();
    let offset = (number - 1).saturating_mul(page_size);
    let rows = if offset >= total_rows {
        batch.slice(0, 0)
    } else {
        batch.slice(offset, page_size.min(total_rows - offset))
    };

    Ok(Page {
        number,
        page_size,
        total_rows,
        total_pages: page_count(total_rows, page_size),
        rows,
    })
}
