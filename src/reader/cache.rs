//! Memoized extract loads
//!
//! Keyed by the literal path or query string of a load. Entries are never
//! evicted; the set of distinct keys is small and fixed in practice.

use std::sync::{Mutex, PoisonError};

use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashMap;

use crate::error::Result;

#[derive(Debug, Default)]
pub struct ExtractCache {
    entries: Mutex<FxHashMap<String, RecordBatch>>,
}

impl ExtractCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached batch for `key`, loading and storing it on a miss
    ///
    /// Failed loads are not cached. The lock is not held while loading, so two
    /// threads missing the same key may both load it.
    pub fn get_or_load<F>(&self, key: &str, load: F) -> Result<RecordBatch>
    where
        F: FnOnce() -> Result<RecordBatch>,
    {
        if let Some(hit) = self.get(key) {
            log::debug!("Cache hit for {key}");
            return Ok(hit);
        }

        let batch = load()?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_insert_with(|| batch.clone());
        Ok(batch)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<RecordBatch> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
