//! Join assembler for the cohort view
//!
//! Runs a declared sequence of join steps starting from a base extract. Each
//! step names its extract, its join kind and its keys. Required keys must be
//! present on both sides; optional keys are added only when both sides carry
//! them, which lets the same step join on `(subject_id, hadm_id)` for a
//! hospital extract and fall back to `subject_id` alone when the left side has
//! no admission column.

use std::time::Instant;

use arrow::record_batch::RecordBatch;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{CohortError, Diagnostics, PipelineWarning, Result};
use crate::join::{JoinKind, hash_join};
use crate::reader::ExtractSet;
use crate::schema::ExtractKind;
use crate::schema::columns::VITAL_SIGNS;
use crate::utils::arrow_utils::{has_column, project};

/// Which right-side columns a join step brings along
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnSelection {
    #[default]
    All,
    /// Only these columns, in addition to the join keys
    Only(Vec<String>),
}

/// One join in the assembly sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinStep {
    pub extract: ExtractKind,
    pub kind: JoinKind,
    pub required_keys: Vec<String>,
    #[serde(default)]
    pub optional_keys: Vec<String>,
    #[serde(default)]
    pub columns: ColumnSelection,
    /// Append the triage vital sign columns when a request asks for them
    #[serde(default)]
    pub vitals: bool,
}

impl JoinStep {
    #[must_use]
    pub fn new(extract: ExtractKind, kind: JoinKind, required_keys: &[&str]) -> Self {
        Self {
            extract,
            kind,
            required_keys: required_keys.iter().map(ToString::to_string).collect(),
            optional_keys: Vec::new(),
            columns: ColumnSelection::All,
            vitals: false,
        }
    }

    #[must_use]
    pub fn with_optional_keys(mut self, keys: &[&str]) -> Self {
        self.optional_keys = keys.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn with_columns(mut self, columns: &[&str]) -> Self {
        self.columns = ColumnSelection::Only(columns.iter().map(ToString::to_string).collect());
        self
    }

    #[must_use]
    pub fn with_vitals(mut self) -> Self {
        self.vitals = true;
        self
    }

    /// Keys usable between these two tables, or the first missing required key
    fn resolve_keys(
        &self,
        left: &RecordBatch,
        right: &RecordBatch,
    ) -> std::result::Result<Vec<String>, String> {
        if let Some(missing) = self
            .required_keys
            .iter()
            .find(|key| !has_column(left, key) || !has_column(right, key))
        {
            return Err(missing.clone());
        }

        let mut keys = self.required_keys.clone();
        keys.extend(
            self.optional_keys
                .iter()
                .filter(|key| has_column(left, key) && has_column(right, key))
                .cloned(),
        );
        Ok(keys)
    }

    /// Right-side columns to keep for this step
    fn wanted_columns(&self, keys: &[String], include_vitals: bool) -> Option<Vec<String>> {
        let ColumnSelection::Only(selected) = &self.columns else {
            return None;
        };

        let mut wanted: Vec<String> = keys.to_vec();
        wanted.extend(selected.iter().cloned());
        if self.vitals && include_vitals {
            wanted.extend(VITAL_SIGNS.iter().map(ToString::to_string));
        }
        Some(wanted.into_iter().unique().collect())
    }
}

/// Runs join steps over a set of loaded extracts
#[derive(Debug, Clone)]
pub struct JoinAssembler<'a> {
    steps: &'a [JoinStep],
    include_vitals: bool,
}

impl<'a> JoinAssembler<'a> {
    #[must_use]
    pub fn new(steps: &'a [JoinStep]) -> Self {
        Self {
            steps,
            include_vitals: false,
        }
    }

    #[must_use]
    pub fn with_vitals(mut self, include_vitals: bool) -> Self {
        self.include_vitals = include_vitals;
        self
    }

    /// Join every step onto `base`
    ///
    /// Steps whose extract is absent are skipped with a warning, as are left
    /// joins whose required keys are missing.
    ///
    /// # Errors
    /// Returns `CohortError::MissingColumn` when an inner join lacks a
    /// required key
    pub fn assemble(
        &self,
        base: RecordBatch,
        extracts: &ExtractSet,
        diagnostics: &mut Diagnostics,
    ) -> Result<RecordBatch> {
        let mut result = base;

        for step in self.steps {
            let Some(right) = extracts.get(step.extract) else {
                diagnostics.warn(PipelineWarning::MissingOptionalExtract {
                    name: step.extract.name().to_string(),
                });
                continue;
            };

            let keys = match step.resolve_keys(&result, right) {
                Ok(keys) => keys,
                // Skipping an inner join would let unmatched rows through
                Err(missing) if step.kind == JoinKind::Inner => {
                    return Err(CohortError::missing_column(
                        missing,
                        format!("join with {}", step.extract),
                    ));
                }
                Err(missing) => {
                    diagnostics.warn(PipelineWarning::MissingColumn {
                        column: missing,
                        context: format!("join with {}", step.extract),
                    });
                    continue;
                }
            };

            let right = match step.wanted_columns(&keys, self.include_vitals) {
                Some(wanted) => project(right, &wanted, step.extract.name(), diagnostics)?,
                None => right.clone(),
            };

            let start = Instant::now();
            result = hash_join(&result, &right, &keys, step.kind)?;
            log::debug!(
                "Joined {} ({:?}) on [{}]: {} rows in {:?}",
                step.extract,
                step.kind,
                keys.join(", "),
                result.num_rows(),
                start.elapsed()
            );
        }

        Ok(result)
    }
}
