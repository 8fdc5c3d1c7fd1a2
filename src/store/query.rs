//! Compile filter expressions into parameterized SQL
//!
//! Only identifiers are ever written into the SQL text, and only after
//! validation. Every literal becomes a bound `?` parameter.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::types::Value;

use crate::error::{CohortError, Diagnostics, PipelineWarning, Result};
use crate::filter::{Expr, LiteralValue};

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// A WHERE clause body and its parameters, in order
#[derive(Debug, Clone, PartialEq)]
pub struct SqlPredicate {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlPredicate {
    fn constant(value: bool) -> Self {
        Self {
            sql: if value { "1" } else { "0" }.to_string(),
            params: Vec::new(),
        }
    }

    /// A leaf comparison; a NULL result counts as false
    fn leaf(sql: String, params: Vec<Value>) -> Self {
        Self {
            sql: format!("COALESCE({sql}, 0)"),
            params,
        }
    }
}

/// Reject anything that is not a plain SQL identifier
pub fn validate_identifier(name: &str) -> Result<&str> {
    if IDENTIFIER.is_match(name) {
        Ok(name)
    } else {
        Err(CohortError::InvalidRequest(format!(
            "'{name}' is not a valid table or column name"
        )))
    }
}

/// Validate and double-quote an identifier
pub fn quote_identifier(name: &str) -> Result<String> {
    validate_identifier(name).map(|name| format!("\"{name}\""))
}

fn literal_value(literal: &LiteralValue) -> Value {
    match literal {
        LiteralValue::Boolean(b) => Value::Integer(i64::from(*b)),
        LiteralValue::Int(n) => Value::Integer(*n),
        LiteralValue::Float(f) => Value::Real(*f),
        LiteralValue::String(s) => Value::Text(s.clone()),
    }
}

/// Compile an expression against a table with the given columns
///
/// Leaves over columns the table lacks are skipped with a warning, matching
/// in-memory evaluation. Returns `None` when nothing applicable remains.
pub fn compile_predicate(
    expr: &Expr,
    columns: &HashSet<String>,
    diagnostics: &mut Diagnostics,
) -> Result<Option<SqlPredicate>> {
    let column = |name: &str, diagnostics: &mut Diagnostics| -> Result<Option<String>> {
        if columns.contains(name) {
            quote_identifier(name).map(Some)
        } else {
            diagnostics.warn(PipelineWarning::MissingColumn {
                column: name.to_string(),
                context: "filter predicate".to_string(),
            });
            Ok(None)
        }
    };

    let compiled = match expr {
        Expr::AlwaysTrue => Some(SqlPredicate::constant(true)),
        Expr::AlwaysFalse => Some(SqlPredicate::constant(false)),
        Expr::And(exprs) => join_all(exprs, " AND ", columns, diagnostics)?,
        Expr::Or(exprs) => join_all(exprs, " OR ", columns, diagnostics)?,
        Expr::Not(inner) => compile_predicate(inner, columns, diagnostics)?.map(|inner| {
            SqlPredicate {
                sql: format!("NOT ({})", inner.sql),
                params: inner.params,
            }
        }),
        Expr::Eq(name, literal) => column(name, diagnostics)?
            .map(|col| SqlPredicate::leaf(format!("{col} = ?"), vec![literal_value(literal)])),
        Expr::In(name, values) => column(name, diagnostics)?.map(|col| {
            if values.is_empty() {
                SqlPredicate::constant(false)
            } else {
                let placeholders = vec!["?"; values.len()].join(", ");
                SqlPredicate::leaf(
                    format!("{col} IN ({placeholders})"),
                    values.iter().map(literal_value).collect(),
                )
            }
        }),
        // Numeric text is compared as a number; other text stays out of range
        Expr::Between(name, min, max) => column(name, diagnostics)?.map(|col| {
            SqlPredicate::leaf(
                format!(
                    "(CASE WHEN typeof({col}) IN ('integer', 'real') THEN {col} \
                     WHEN typeof({col}) = 'text' AND {col} GLOB '*[0-9]*' \
                     AND {col} NOT GLOB '*[^0-9.eE+-]*' THEN CAST({col} AS REAL) \
                     END) BETWEEN ? AND ?"
                ),
                vec![Value::Real(*min), Value::Real(*max)],
            )
        }),
        Expr::ContainsIgnoreCase(name, needle) => column(name, diagnostics)?.map(|col| {
            SqlPredicate::leaf(
                format!("instr(lower({col}), ?) > 0"),
                vec![Value::Text(needle.to_lowercase())],
            )
        }),
        Expr::IsNotNull(name) => column(name, diagnostics)?.map(|col| SqlPredicate {
            sql: format!("{col} IS NOT NULL"),
            params: Vec::new(),
        }),
    };

    Ok(compiled)
}

fn join_all(
    exprs: &[Expr],
    separator: &str,
    columns: &HashSet<String>,
    diagnostics: &mut Diagnostics,
) -> Result<Option<SqlPredicate>> {
    let mut parts = Vec::new();
    let mut params = Vec::new();
    for expr in exprs {
        if let Some(compiled) = compile_predicate(expr, columns, diagnostics)? {
            parts.push(format!("({})", compiled.sql));
            params.extend(compiled.params);
        }
    }

    if parts.is_empty() {
        return Ok(None);
    }
    Ok(Some(SqlPredicate {
        sql: parts.join(separator),
        params,
    }))
}
