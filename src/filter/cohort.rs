//! The cohort filter request
//!
//! `CohortFilters` is the immutable set of filter values a caller passes into
//! the pipeline. Every field defaults to "no filter": an empty string, `"All"`
//! or an empty list never removes rows.

use arrow::datatypes::Schema;
use serde::{Deserialize, Serialize};

use crate::error::{CohortError, Result};
use crate::filter::expr::{Expr, LiteralValue};
use crate::schema::columns::{
    ADMISSION_LOCATION, ADMISSION_TYPE, ANCHOR_AGE, CHIEF_COMPLAINT, DISCHARGE_LOCATION,
    DISPOSITION, GENDER, ICD_CODE, ICD_TITLE, LONG_TITLE,
};

/// The value a select box shows when nothing is selected
pub const ALL: &str = "All";

/// Inclusive age bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgeRange {
    pub min: f64,
    pub max: f64,
}

impl AgeRange {
    #[must_use]
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// Filter values for one cohort request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortFilters {
    /// Exact gender match
    pub gender: Option<String>,
    /// Inclusive range on `anchor_age`
    pub age_range: Option<AgeRange>,
    /// Diagnosis must carry one of these ICD codes
    pub icd_codes: Vec<String>,
    /// Diagnosis long title must be one of these
    pub icd_titles: Vec<String>,
    /// Case-insensitive search over ICD code and titles
    pub icd_search: Option<String>,
    pub admission_type: Option<String>,
    pub admission_location: Option<String>,
    pub discharge_location: Option<String>,
    /// Case-insensitive substring of the triage chief complaint
    pub chief_complaint: Option<String>,
    /// ED disposition must be one of these
    pub dispositions: Vec<String>,
}

/// Whether a single-value filter is set to something other than its default
fn active(value: Option<&String>) -> Option<&str> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case(ALL))
}

fn active_list(values: &[String]) -> Vec<LiteralValue> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case(ALL))
        .map(LiteralValue::from)
        .collect()
}

impl CohortFilters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = Some(gender.into());
        self
    }

    #[must_use]
    pub fn with_age_range(mut self, min: f64, max: f64) -> Self {
        self.age_range = Some(AgeRange::new(min, max));
        self
    }

    #[must_use]
    pub fn with_icd_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.icd_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_icd_search(mut self, text: impl Into<String>) -> Self {
        self.icd_search = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_chief_complaint(mut self, text: impl Into<String>) -> Self {
        self.chief_complaint = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_dispositions<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dispositions = values.into_iter().map(Into::into).collect();
        self
    }

    /// Reject values no filter could be built from
    pub fn validate(&self) -> Result<()> {
        if let Some(range) = self.age_range {
            if range.min.is_nan() || range.max.is_nan() || range.min > range.max {
                return Err(CohortError::InvalidRequest(format!(
                    "age range {}..{} is empty",
                    range.min, range.max
                )));
            }
        }
        Ok(())
    }

    /// The active predicates, one expression per set filter
    ///
    /// The ICD search spans whichever of the code and title columns `schema`
    /// has; every other predicate is emitted regardless so a missing column is
    /// reported when it is evaluated.
    #[must_use]
    pub fn predicates(&self, schema: &Schema) -> Vec<Expr> {
        let mut exprs = Vec::new();

        let exact = [
            (GENDER, self.gender.as_ref()),
            (ADMISSION_TYPE, self.admission_type.as_ref()),
            (ADMISSION_LOCATION, self.admission_location.as_ref()),
            (DISCHARGE_LOCATION, self.discharge_location.as_ref()),
        ];
        for (column, value) in exact {
            if let Some(value) = active(value) {
                exprs.push(Expr::Eq(column.to_string(), LiteralValue::from(value)));
            }
        }

        if let Some(range) = self.age_range {
            exprs.push(Expr::Between(ANCHOR_AGE.to_string(), range.min, range.max));
        }

        let sets = [
            (ICD_CODE, &self.icd_codes),
            (LONG_TITLE, &self.icd_titles),
            (DISPOSITION, &self.dispositions),
        ];
        for (column, values) in sets {
            let values = active_list(values);
            if !values.is_empty() {
                exprs.push(Expr::In(column.to_string(), values));
            }
        }

        if let Some(text) = active(self.icd_search.as_ref()) {
            let searched: Vec<Expr> = [ICD_CODE, LONG_TITLE, ICD_TITLE]
                .into_iter()
                .filter(|column| schema.index_of(column).is_ok())
                .map(|column| Expr::ContainsIgnoreCase(column.to_string(), text.to_string()))
                .collect();
            if searched.is_empty() {
                // Reported as missing when evaluated
                exprs.push(Expr::ContainsIgnoreCase(ICD_CODE.to_string(), text.to_string()));
            } else {
                exprs.push(Expr::Or(searched));
            }
        }

        if let Some(text) = active(self.chief_complaint.as_ref()) {
            exprs.push(Expr::ContainsIgnoreCase(
                CHIEF_COMPLAINT.to_string(),
                text.to_string(),
            ));
        }

        exprs
    }

    /// All active predicates joined with AND
    #[must_use]
    pub fn to_expr(&self, schema: &Schema) -> Expr {
        let exprs = self.predicates(schema);
        if exprs.is_empty() {
            Expr::AlwaysTrue
        } else {
            Expr::And(exprs)
        }
    }

    /// Whether no filter is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predicates(&Schema::empty()).is_empty()
    }
}
