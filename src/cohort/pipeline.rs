//! The cohort request/response pipeline
//!
//! Extracts are loaded (through the memo cache when enabled), joined in the
//! definition's step order, filtered once on the assembled table, deduplicated,
//! optionally sorted, shaped for presentation and paged. Given the same
//! extracts and request the result is always the same.

use std::sync::Arc;
use std::time::Instant;

use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::cohort::pager::paginate;
use crate::cohort::view::{
    FilterOptions, SortSpec, discover_options, distinct_count, shape_view, sort_batch,
};
use crate::cohort::CohortDefinition;
use crate::config::PipelineConfig;
use crate::error::{Diagnostics, Result};
use crate::filter::{BatchFilter, CohortFilters, ExpressionFilter};
use crate::join::{JoinAssembler, distinct_on};
use crate::reader::{DirectorySource, ExtractCache, ExtractSet, ExtractSource, load_extracts};
use crate::schema::columns::SUBJECT_ID;

/// One request for a page of a cohort view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortRequest {
    pub filters: CohortFilters,
    /// 1-indexed page number
    pub page: usize,
    /// Overrides the definition's page size
    pub page_size: Option<usize>,
    /// Overrides the definition's sort
    pub sort: Option<SortSpec>,
    /// Overrides the configured vitals flag
    pub include_vitals: Option<bool>,
}

impl Default for CohortRequest {
    fn default() -> Self {
        Self {
            filters: CohortFilters::default(),
            page: 1,
            page_size: None,
            sort: None,
            include_vitals: None,
        }
    }
}

impl CohortRequest {
    #[must_use]
    pub fn new(filters: CohortFilters) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    #[must_use]
    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    #[must_use]
    pub fn with_vitals(mut self, include_vitals: bool) -> Self {
        self.include_vitals = Some(include_vitals);
        self
    }
}

/// A page of the cohort view with its totals and any messages
#[derive(Debug, Clone)]
pub struct CohortResponse {
    pub rows: RecordBatch,
    pub page: usize,
    pub page_size: usize,
    pub total_rows: usize,
    pub distinct_patients: usize,
    pub total_pages: usize,
    /// Non-fatal warnings raised while building the view
    pub messages: Vec<String>,
    /// Set when the view could not be built at all
    pub error: Option<String>,
}

impl CohortResponse {
    fn failed(page: usize, page_size: usize, error: String, messages: Vec<String>) -> Self {
        Self {
            rows: RecordBatch::new_empty(Arc::new(Schema::empty())),
            page,
            page_size,
            total_rows: 0,
            distinct_patients: 0,
            total_pages: 0,
            messages,
            error: Some(error),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Serves cohort requests for one definition over one extract source
#[derive(Debug)]
pub struct CohortPipeline {
    source: Box<dyn ExtractSource>,
    definition: CohortDefinition,
    config: PipelineConfig,
    cache: Option<ExtractCache>,
}

impl CohortPipeline {
    pub fn new(source: Box<dyn ExtractSource>, definition: CohortDefinition) -> Self {
        let config = PipelineConfig::default();
        let cache = config.cache_extracts.then(ExtractCache::new);
        Self {
            source,
            definition,
            config,
            cache,
        }
    }

    /// Pipeline over the configured data directory
    #[must_use]
    pub fn from_config(config: PipelineConfig, definition: CohortDefinition) -> Self {
        let source = DirectorySource::from_config(&config);
        Self::new(Box::new(source), definition).with_config(config)
    }

    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.cache = config.cache_extracts.then(ExtractCache::new);
        self.config = config;
        self
    }

    #[must_use]
    pub fn definition(&self) -> &CohortDefinition {
        &self.definition
    }

    #[must_use]
    pub fn source(&self) -> &dyn ExtractSource {
        self.source.as_ref()
    }

    fn page_size(&self, request: &CohortRequest) -> usize {
        request
            .page_size
            .or(self.definition.page_size)
            .unwrap_or(self.config.page_size)
    }

    /// Load the definition's extracts
    pub fn load(&self, diagnostics: &mut Diagnostics) -> Result<ExtractSet> {
        load_extracts(
            self.source.as_ref(),
            &self.definition.extracts,
            self.cache.as_ref(),
            diagnostics,
        )
    }

    /// The filtered, deduplicated and sorted table before presentation
    pub fn assemble(
        &self,
        request: &CohortRequest,
        diagnostics: &mut Diagnostics,
    ) -> Result<RecordBatch> {
        request.filters.validate()?;
        let extracts = self.load(diagnostics)?;
        self.assemble_from(&extracts, request, diagnostics)
    }

    /// Same as `assemble`, over extracts that are already loaded
    pub fn assemble_from(
        &self,
        extracts: &ExtractSet,
        request: &CohortRequest,
        diagnostics: &mut Diagnostics,
    ) -> Result<RecordBatch> {
        let base = extracts.require(self.definition.base)?.clone();
        let include_vitals = request.include_vitals.unwrap_or(self.config.include_vitals);

        let joined = JoinAssembler::new(&self.definition.steps)
            .with_vitals(include_vitals)
            .assemble(base, extracts, diagnostics)?;

        let filter = ExpressionFilter::new(request.filters.to_expr(&joined.schema()));
        let filtered = filter.filter(&joined, diagnostics)?;
        let deduped = distinct_on(&filtered, &self.definition.dedupe_keys)?;

        log::debug!(
            "Cohort {}: {} joined, {} after filters, {} after dedupe",
            self.definition.name,
            joined.num_rows(),
            filtered.num_rows(),
            deduped.num_rows()
        );

        match request.sort.as_ref().or(self.definition.sort.as_ref()) {
            Some(spec) => sort_batch(&deduped, spec, diagnostics),
            None => Ok(deduped),
        }
    }

    /// The whole presented view, unpaged
    pub fn view(&self, request: &CohortRequest, diagnostics: &mut Diagnostics) -> Result<RecordBatch> {
        let assembled = self.assemble(request, diagnostics)?;
        shape_view(&assembled, &self.definition.columns, &self.definition.labels)
    }

    /// Build the requested page, returning the error of a failed build
    pub fn try_run(&self, request: &CohortRequest) -> Result<CohortResponse> {
        let mut diagnostics = Diagnostics::new();
        self.run_with(request, &mut diagnostics)
    }

    fn run_with(
        &self,
        request: &CohortRequest,
        diagnostics: &mut Diagnostics,
    ) -> Result<CohortResponse> {
        let start = Instant::now();
        let page_size = self.page_size(request);

        let assembled = self.assemble(request, diagnostics)?;
        let distinct_patients = distinct_count(&assembled, SUBJECT_ID)?;
        let view = shape_view(&assembled, &self.definition.columns, &self.definition.labels)?;
        let page = paginate(&view, request.page, page_size)?;

        log::info!(
            "Cohort {} page {}/{}: {} of {} rows, {} patients in {:?}",
            self.definition.name,
            page.number,
            page.total_pages,
            page.rows.num_rows(),
            page.total_rows,
            distinct_patients,
            start.elapsed()
        );

        Ok(CohortResponse {
            rows: page.rows,
            page: page.number,
            page_size,
            total_rows: page.total_rows,
            distinct_patients,
            total_pages: page.total_pages,
            messages: diagnostics.warnings().iter().map(ToString::to_string).collect(),
            error: None,
        })
    }

    /// Build the requested page; any failure yields an empty page whose
    /// `error` says why
    pub fn run(&self, request: &CohortRequest) -> CohortResponse {
        let mut diagnostics = Diagnostics::new();
        match self.run_with(request, &mut diagnostics) {
            Ok(response) => response,
            Err(err) => {
                log::error!("Cohort {} failed: {err}", self.definition.name);
                CohortResponse::failed(
                    request.page,
                    self.page_size(request),
                    err.to_string(),
                    diagnostics.into_messages(),
                )
            }
        }
    }

    /// Choices for each filter, from the definition's extracts
    pub fn options(&self) -> Result<FilterOptions> {
        let mut diagnostics = Diagnostics::new();
        let extracts = self.load(&mut diagnostics)?;
        discover_options(&extracts)
    }
}
