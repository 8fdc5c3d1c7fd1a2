//! Loading raw extracts
//!
//! An `ExtractSource` hands out whole tables by `ExtractKind`. The pipeline
//! asks for the extracts a cohort definition declares, normalizes each one and
//! keeps them in an `ExtractSet` for the join assembler.

use std::fmt::Debug;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{CohortError, Diagnostics, PipelineWarning, Result};
use crate::schema::{ExtractKind, normalize_extract};

pub mod cache;
pub mod directory;

pub use cache::ExtractCache;
pub use directory::{DirectorySource, ExtractFormat};

/// Anything that can produce raw extract tables
pub trait ExtractSource: Debug + Send + Sync {
    /// Human-readable description for logs
    fn describe(&self) -> String;

    /// Load one extract in full
    ///
    /// # Errors
    /// Returns `CohortError::MissingSource` if the source has no such extract
    fn load(&self, kind: ExtractKind) -> Result<RecordBatch>;

    /// Literal key identifying this load, used for memoization
    fn cache_key(&self, kind: ExtractKind) -> String;
}

/// An extract a cohort definition depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractSpec {
    pub kind: ExtractKind,
    #[serde(default)]
    pub required: bool,
}

impl ExtractSpec {
    #[must_use]
    pub const fn required(kind: ExtractKind) -> Self {
        Self {
            kind,
            required: true,
        }
    }

    #[must_use]
    pub const fn optional(kind: ExtractKind) -> Self {
        Self {
            kind,
            required: false,
        }
    }
}

/// Normalized extracts keyed by kind
#[derive(Debug, Clone, Default)]
pub struct ExtractSet {
    tables: FxHashMap<ExtractKind, RecordBatch>,
}

impl ExtractSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: ExtractKind, batch: RecordBatch) {
        self.tables.insert(kind, batch);
    }

    #[must_use]
    pub fn get(&self, kind: ExtractKind) -> Option<&RecordBatch> {
        self.tables.get(&kind)
    }

    /// Get an extract that must be present
    pub fn require(&self, kind: ExtractKind) -> Result<&RecordBatch> {
        self.get(kind)
            .ok_or_else(|| CohortError::missing_source(kind.name(), "extract was not loaded"))
    }

    #[must_use]
    pub fn contains(&self, kind: ExtractKind) -> bool {
        self.tables.contains_key(&kind)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

fn load_one(
    source: &dyn ExtractSource,
    kind: ExtractKind,
    cache: Option<&ExtractCache>,
) -> Result<RecordBatch> {
    match cache {
        Some(cache) => cache.get_or_load(&source.cache_key(kind), || source.load(kind)),
        None => source.load(kind),
    }
}

/// Load and normalize the given extracts in parallel
///
/// A missing required extract fails the whole load. A missing optional
/// extract is recorded as a warning and left out of the set.
///
/// # Errors
/// Returns the first error of a required extract, or any non-source error
pub fn load_extracts(
    source: &dyn ExtractSource,
    specs: &[ExtractSpec],
    cache: Option<&ExtractCache>,
    diagnostics: &mut Diagnostics,
) -> Result<ExtractSet> {
    let start = Instant::now();
    log::info!("Loading {} extracts from {}", specs.len(), source.describe());

    let results: Vec<(ExtractSpec, Result<RecordBatch>, Diagnostics)> = specs
        .par_iter()
        .map(|spec| {
            let mut local = Diagnostics::new();
            let loaded = load_one(source, spec.kind, cache)
                .and_then(|raw| normalize_extract(&raw, spec.kind.name(), &mut local));
            (*spec, loaded, local)
        })
        .collect();

    let mut set = ExtractSet::new();
    for (spec, loaded, local) in results {
        diagnostics.absorb(local);
        match loaded {
            Ok(batch) => {
                log::debug!("Loaded {} with {} rows", spec.kind, batch.num_rows());
                set.insert(spec.kind, batch);
            }
            Err(err) if !spec.required && err.is_source_error() => {
                log::debug!("Optional extract {} unavailable: {err}", spec.kind);
                diagnostics.warn(PipelineWarning::MissingOptionalExtract {
                    name: spec.kind.name().to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }

    log::info!(
        "Loaded {} of {} extracts in {:?}",
        set.len(),
        specs.len(),
        start.elapsed()
    );
    Ok(set)
}
