//! Expression-based filtering for cohort tables
//!
//! Expressions evaluate to a boolean mask over a record batch. A leaf whose
//! column is missing from the batch has no opinion: it is reported and left
//! out of the surrounding `And`/`Or`, so a predicate over an absent column
//! never removes rows. Null values never satisfy a leaf predicate.

use std::collections::HashSet;
use std::fmt;

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::compute::kernels::cmp::{eq, gt_eq, lt_eq};
use arrow::compute::{and, cast, is_not_null, not, or};
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::error::{Diagnostics, PipelineWarning, Result};
use crate::filter::core::{BatchFilter, filter_record_batch};

/// Represents a filter expression over a cohort table
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column equals a literal value
    Eq(String, LiteralValue),

    /// Column is in a set of values
    In(String, Vec<LiteralValue>),

    /// Column, read as a number, lies in an inclusive range
    Between(String, f64, f64),

    /// Column text contains a substring, ignoring case
    ContainsIgnoreCase(String, String),

    /// Column is not null
    IsNotNull(String),

    /// Logical AND of expressions
    And(Vec<Expr>),

    /// Logical OR of expressions
    Or(Vec<Expr>),

    /// Logical NOT of an expression
    Not(Box<Expr>),

    /// Always evaluates to true
    AlwaysTrue,

    /// Always evaluates to false
    AlwaysFalse,
}

/// Represents a literal value that can be used in filter expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiteralValue {
    /// Boolean value
    Boolean(bool),

    /// Integer value
    Int(i64),

    /// Floating point value
    Float(f64),

    /// String value
    String(String),
}

impl LiteralValue {
    /// Numeric view of the literal, parsing strings
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            Self::String(s) => s.trim().parse().ok(),
            Self::Boolean(_) => None,
        }
    }

    /// Integer view of the literal, parsing strings
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for LiteralValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for LiteralValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for LiteralValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl Expr {
    /// Returns a set of all column names required by this expression
    #[must_use]
    pub fn required_columns(&self) -> HashSet<String> {
        let mut columns = HashSet::new();
        self.collect_required_columns(&mut columns);
        columns
    }

    fn collect_required_columns(&self, columns: &mut HashSet<String>) {
        match self {
            Self::Eq(col, _)
            | Self::In(col, _)
            | Self::Between(col, _, _)
            | Self::ContainsIgnoreCase(col, _)
            | Self::IsNotNull(col) => {
                columns.insert(col.clone());
            }
            Self::And(exprs) | Self::Or(exprs) => {
                for expr in exprs {
                    expr.collect_required_columns(columns);
                }
            }
            Self::Not(expr) => expr.collect_required_columns(columns),
            Self::AlwaysTrue | Self::AlwaysFalse => {}
        }
    }
}

/// Evaluates a filter expression against a record batch
///
/// # Returns
/// A boolean mask with no nulls. An expression whose every leaf was skipped
/// keeps all rows.
pub fn evaluate_expr(
    batch: &RecordBatch,
    expr: &Expr,
    diagnostics: &mut Diagnostics,
) -> Result<BooleanArray> {
    Ok(evaluate_optional(batch, expr, diagnostics)?
        .unwrap_or_else(|| constant_mask(batch.num_rows(), true)))
}

fn constant_mask(len: usize, value: bool) -> BooleanArray {
    BooleanArray::from(vec![value; len])
}

/// `None` means the expression had no applicable leaf
fn evaluate_optional(
    batch: &RecordBatch,
    expr: &Expr,
    diagnostics: &mut Diagnostics,
) -> Result<Option<BooleanArray>> {
    match expr {
        Expr::AlwaysTrue => Ok(Some(constant_mask(batch.num_rows(), true))),
        Expr::AlwaysFalse => Ok(Some(constant_mask(batch.num_rows(), false))),
        Expr::And(exprs) => combine(batch, exprs, diagnostics, |a, b| and(a, b)),
        Expr::Or(exprs) => combine(batch, exprs, diagnostics, |a, b| or(a, b)),
        Expr::Not(inner) => match evaluate_optional(batch, inner, diagnostics)? {
            Some(mask) => Ok(Some(not(&mask)?)),
            None => Ok(None),
        },
        Expr::Eq(col_name, literal) => {
            let Some(column) = lookup_column(batch, col_name, diagnostics) else {
                return Ok(None);
            };
            eq_mask(&column, literal).map(|m| Some(nulls_as_false(m)))
        }
        Expr::In(col_name, values) => {
            let Some(column) = lookup_column(batch, col_name, diagnostics) else {
                return Ok(None);
            };
            in_mask(&column, values).map(Some)
        }
        Expr::Between(col_name, min, max) => {
            let Some(column) = lookup_column(batch, col_name, diagnostics) else {
                return Ok(None);
            };
            between_mask(&column, col_name, *min, *max, diagnostics)
                .map(|m| Some(nulls_as_false(m)))
        }
        Expr::ContainsIgnoreCase(col_name, needle) => {
            let Some(column) = lookup_column(batch, col_name, diagnostics) else {
                return Ok(None);
            };
            contains_mask(&column, needle).map(Some)
        }
        Expr::IsNotNull(col_name) => {
            let Some(column) = lookup_column(batch, col_name, diagnostics) else {
                return Ok(None);
            };
            Ok(Some(is_not_null(column.as_ref())?))
        }
    }
}

fn combine<F>(
    batch: &RecordBatch,
    exprs: &[Expr],
    diagnostics: &mut Diagnostics,
    op: F,
) -> Result<Option<BooleanArray>>
where
    F: Fn(&BooleanArray, &BooleanArray) -> std::result::Result<BooleanArray, arrow::error::ArrowError>,
{
    let mut result: Option<BooleanArray> = None;
    for expr in exprs {
        if let Some(mask) = evaluate_optional(batch, expr, diagnostics)? {
            result = Some(match result {
                Some(acc) => op(&acc, &mask)?,
                None => mask,
            });
        }
    }
    Ok(result)
}

fn lookup_column(
    batch: &RecordBatch,
    col_name: &str,
    diagnostics: &mut Diagnostics,
) -> Option<ArrayRef> {
    match batch.schema().index_of(col_name) {
        Ok(idx) => Some(batch.column(idx).clone()),
        Err(_) => {
            diagnostics.warn(PipelineWarning::MissingColumn {
                column: col_name.to_string(),
                context: "filter predicate".to_string(),
            });
            None
        }
    }
}

fn nulls_as_false(mask: BooleanArray) -> BooleanArray {
    if mask.null_count() == 0 {
        return mask;
    }
    mask.iter().map(|v| Some(v.unwrap_or(false))).collect()
}

/// Evaluates equality for string, integer and numeric columns
fn eq_mask(column: &ArrayRef, literal: &LiteralValue) -> Result<BooleanArray> {
    match (column.data_type(), literal) {
        (DataType::Utf8, LiteralValue::String(s)) => Ok(eq(
            column.as_string::<i32>(),
            &StringArray::new_scalar(s.as_str()),
        )?),
        (DataType::Int64, _) if literal.as_i64().is_some() => {
            let n = literal.as_i64().unwrap_or_default();
            Ok(eq(
                column.as_primitive::<Int64Type>(),
                &Int64Array::new_scalar(n),
            )?)
        }
        (dt, _) if dt.is_numeric() => match literal.as_f64() {
            Some(value) => {
                let floats = cast(column, &DataType::Float64)?;
                Ok(eq(&floats, &Float64Array::new_scalar(value))?)
            }
            // A non-numeric literal never equals a number
            None => Ok(constant_mask(column.len(), false)),
        },
        _ => {
            let text = cast(column, &DataType::Utf8)?;
            Ok(eq(&text, &StringArray::new_scalar(literal.to_string()))?)
        }
    }
}

/// Evaluates set membership
fn in_mask(column: &ArrayRef, values: &[LiteralValue]) -> Result<BooleanArray> {
    if let DataType::Int64 = column.data_type() {
        let wanted: HashSet<i64> = values.iter().filter_map(LiteralValue::as_i64).collect();
        return Ok(column
            .as_primitive::<Int64Type>()
            .iter()
            .map(|v| Some(v.is_some_and(|n| wanted.contains(&n))))
            .collect());
    }

    let wanted: HashSet<String> = values.iter().map(ToString::to_string).collect();
    let text = cast(column, &DataType::Utf8)?;
    Ok(text
        .as_string::<i32>()
        .iter()
        .map(|v| Some(v.is_some_and(|s| wanted.contains(s))))
        .collect())
}

/// Evaluates an inclusive numeric range, treating unparsable values as missing
fn between_mask(
    column: &ArrayRef,
    col_name: &str,
    min: f64,
    max: f64,
    diagnostics: &mut Diagnostics,
) -> Result<BooleanArray> {
    let floats = cast(column, &DataType::Float64)?;
    let failed = floats.null_count().saturating_sub(column.null_count());
    if failed > 0 {
        diagnostics.warn(PipelineWarning::Coercion {
            column: col_name.to_string(),
            failed,
        });
    }

    let floats = floats.as_primitive::<Float64Type>();
    let lower = gt_eq(floats, &Float64Array::new_scalar(min))?;
    let upper = lt_eq(floats, &Float64Array::new_scalar(max))?;
    Ok(and(&lower, &upper)?)
}

/// Evaluates a case-insensitive substring match
fn contains_mask(column: &ArrayRef, needle: &str) -> Result<BooleanArray> {
    let needle = needle.to_lowercase();
    let text = cast(column, &DataType::Utf8)?;
    Ok(text
        .as_string::<i32>()
        .iter()
        .map(|v| Some(v.is_some_and(|s| s.to_lowercase().contains(&needle))))
        .collect())
}

/// A filter that evaluates an expression against a record batch
#[derive(Debug, Clone)]
pub struct ExpressionFilter {
    expr: Expr,
}

impl ExpressionFilter {
    #[must_use]
    pub fn new(expr: Expr) -> Self {
        Self { expr }
    }

    #[must_use]
    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

impl BatchFilter for ExpressionFilter {
    fn filter(&self, batch: &RecordBatch, diagnostics: &mut Diagnostics) -> Result<RecordBatch> {
        let mask = evaluate_expr(batch, &self.expr, diagnostics)?;
        filter_record_batch(batch, &mask)
    }

    fn required_columns(&self) -> HashSet<String> {
        self.expr.required_columns()
    }
}

/// Helper function to create equality filter for a column
#[must_use]
pub fn eq_filter(column: &str, value: impl Into<LiteralValue>) -> Expr {
    Expr::Eq(column.to_string(), value.into())
}

/// Helper function to create IN filter for a column
#[must_use]
pub fn in_filter<I, V>(column: &str, values: I) -> Expr
where
    I: IntoIterator<Item = V>,
    V: Into<LiteralValue>,
{
    Expr::In(column.to_string(), values.into_iter().map(Into::into).collect())
}
