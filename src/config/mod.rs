//! Configuration for the cohort pipeline.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CohortError, Result};
use crate::reader::ExtractFormat;
use crate::reader::directory::{DEFAULT_BATCH_SIZE, DEFAULT_INFER_ROWS};

/// Rows per page when a request does not choose one
pub const DEFAULT_PAGE_SIZE: usize = 25;

/// Configuration for loading extracts and serving cohort views
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root directory of the extract tree
    pub data_dir: PathBuf,
    /// File format of the extracts
    pub format: ExtractFormat,
    /// Rows per Arrow batch while reading
    pub batch_size: usize,
    /// Rows sampled when inferring CSV schemas
    pub infer_schema_rows: usize,
    /// Page size used when a request does not set one
    pub page_size: usize,
    /// Bring triage vital signs into the cohort view
    pub include_vitals: bool,
    /// Memoize extract loads across requests
    pub cache_extracts: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            format: ExtractFormat::Auto,
            batch_size: DEFAULT_BATCH_SIZE,
            infer_schema_rows: DEFAULT_INFER_ROWS,
            page_size: DEFAULT_PAGE_SIZE,
            include_vitals: false,
            cache_extracts: true,
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration from TOML text; absent keys take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| CohortError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| CohortError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(CohortError::Config("page_size must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(CohortError::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }
}
