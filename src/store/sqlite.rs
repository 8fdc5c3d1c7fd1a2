//! SQLite-backed extract store

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use arrow::array::{
    Array, ArrayRef, AsArray, Float64Array, Int64Array, RecordBatchOptions, StringArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, params_from_iter};

use crate::error::{CohortError, Diagnostics, Result};
use crate::filter::{Expr, LiteralValue};
use crate::reader::ExtractSource;
use crate::reader::directory::{DEFAULT_BATCH_SIZE, DEFAULT_INFER_ROWS, read_csv_file};
use crate::schema::ExtractKind;
use crate::schema::columns::SUBJECT_ID;
use crate::store::query::{compile_predicate, quote_identifier, validate_identifier};

/// Extract tables held in a SQLite database
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    location: String,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            location: path.display().to_string(),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            location: ":memory:".to_string(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a table of this name exists
    pub fn has_table(&self, table: &str) -> Result<bool> {
        let count: i64 = self.lock().query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// The table an extract is stored under, trying each of its file stems
    pub fn table_for(&self, kind: ExtractKind) -> Result<Option<String>> {
        for stem in kind.file_stems().iter().copied().chain([kind.name()]) {
            if self.has_table(stem)? {
                return Ok(Some(stem.to_string()));
            }
        }
        Ok(None)
    }

    /// Column names of a table, in declaration order
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
        let names = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    /// Read a whole table
    pub fn load_table(&self, table: &str) -> Result<RecordBatch> {
        let sql = format!("SELECT * FROM {}", quote_identifier(table)?);
        self.query_batch(&sql, &[])
    }

    /// Read the rows of a table matching `expr`
    ///
    /// Leaves over absent columns are skipped and reported, as they are for
    /// in-memory filtering.
    pub fn load_filtered(
        &self,
        table: &str,
        expr: &Expr,
        diagnostics: &mut Diagnostics,
    ) -> Result<RecordBatch> {
        let columns: HashSet<String> = self.table_columns(table)?.into_iter().collect();
        let mut sql = format!("SELECT * FROM {}", quote_identifier(table)?);
        let params = match compile_predicate(expr, &columns, diagnostics)? {
            Some(predicate) => {
                sql.push_str(" WHERE ");
                sql.push_str(&predicate.sql);
                predicate.params
            }
            None => Vec::new(),
        };
        self.query_batch(&sql, &params)
    }

    /// Read the rows of an extract that belong to the given subjects
    pub fn load_for_subjects(
        &self,
        kind: ExtractKind,
        subjects: &[i64],
        diagnostics: &mut Diagnostics,
    ) -> Result<RecordBatch> {
        let table = self.require_table(kind)?;
        let expr = Expr::In(
            SUBJECT_ID.to_string(),
            subjects.iter().copied().map(LiteralValue::Int).collect(),
        );
        self.load_filtered(&table, &expr, diagnostics)
    }

    /// Sorted distinct non-null values of a column, as text
    pub fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<String>> {
        let column = quote_identifier(column)?;
        let sql = format!(
            "SELECT DISTINCT CAST({column} AS TEXT) FROM {} WHERE {column} IS NOT NULL ORDER BY 1",
            quote_identifier(table)?
        );
        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let values = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(values)
    }

    fn require_table(&self, kind: ExtractKind) -> Result<String> {
        self.table_for(kind)?.ok_or_else(|| {
            CohortError::missing_source(kind.name(), format!("no table in {}", self.location))
        })
    }

    fn query_batch(&self, sql: &str, params: &[Value]) -> Result<RecordBatch> {
        let start = Instant::now();
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut columns: Vec<Vec<Value>> = vec![Vec::new(); names.len()];
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        while let Some(row) = rows.next()? {
            for (idx, column) in columns.iter_mut().enumerate() {
                column.push(owned_value(row.get_ref(idx)?));
            }
        }

        let batch = values_to_batch(&names, columns)?;
        log::debug!(
            "Query returned {} rows in {:?}: {sql}",
            batch.num_rows(),
            start.elapsed()
        );
        Ok(batch)
    }

    /// Create `table` from the batch's columns if needed and insert its rows
    ///
    /// Column types are inferred from the Arrow types. Rows that violate a
    /// table constraint are skipped. Returns the number of rows inserted.
    pub fn import_batch(&self, table: &str, batch: &RecordBatch) -> Result<usize> {
        let start = Instant::now();
        let table_sql = quote_identifier(table)?;
        let schema = batch.schema();

        let definitions = schema
            .fields()
            .iter()
            .map(|field| {
                quote_identifier(field.name())
                    .map(|name| format!("{name} {}", sql_type(field.name(), field.data_type())))
            })
            .collect::<Result<Vec<_>>>()?;
        let names = schema
            .fields()
            .iter()
            .map(|field| quote_identifier(field.name()))
            .collect::<Result<Vec<_>>>()?;

        let columns = batch
            .columns()
            .iter()
            .map(ColumnValues::from_array)
            .collect::<Result<Vec<_>>>()?;

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table_sql} ({})",
                definitions.join(", ")
            ),
            [],
        )?;

        let mut inserted = 0;
        {
            let placeholders = vec!["?"; names.len()].join(", ");
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO {table_sql} ({}) VALUES ({placeholders})",
                names.join(", ")
            ))?;
            for row in 0..batch.num_rows() {
                let values = columns.iter().map(|column| column.value(row));
                inserted += stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        log::info!(
            "Imported {inserted} of {} rows into {table} in {:?}",
            batch.num_rows(),
            start.elapsed()
        );
        Ok(inserted)
    }

    /// Import a CSV file into `table`
    pub fn import_csv(&self, path: &Path, table: &str) -> Result<usize> {
        validate_identifier(table)?;
        let batch = read_csv_file(path, DEFAULT_BATCH_SIZE, DEFAULT_INFER_ROWS)?;
        self.import_batch(table, &batch)
    }
}

impl ExtractSource for SqliteStore {
    fn describe(&self) -> String {
        format!("sqlite {}", self.location)
    }

    fn load(&self, kind: ExtractKind) -> Result<RecordBatch> {
        let table = self.require_table(kind)?;
        self.load_table(&table)
    }

    fn cache_key(&self, kind: ExtractKind) -> String {
        let table = self
            .table_for(kind)
            .ok()
            .flatten()
            .unwrap_or_else(|| kind.name().to_string());
        format!("{}: SELECT * FROM {table}", self.location)
    }
}

/// Declared SQLite type for an Arrow column
fn sql_type(name: &str, data_type: &DataType) -> &'static str {
    match data_type {
        dt if dt.is_integer() => "INTEGER",
        DataType::Boolean => "INTEGER",
        dt if dt.is_floating() => "REAL",
        _ if name.to_lowercase().contains("time") => "TIMESTAMP",
        _ => "TEXT",
    }
}

fn owned_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Integer(n),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

/// An Arrow column in the form rows are bound from
enum ColumnValues {
    Int(Int64Array),
    Float(Float64Array),
    Text(StringArray),
}

impl ColumnValues {
    fn from_array(array: &ArrayRef) -> Result<Self> {
        let data_type = array.data_type();
        if data_type.is_integer() || data_type == &DataType::Boolean {
            let ints = cast(array, &DataType::Int64)?;
            Ok(Self::Int(ints.as_primitive::<Int64Type>().clone()))
        } else if data_type.is_floating() {
            let floats = cast(array, &DataType::Float64)?;
            Ok(Self::Float(floats.as_primitive::<Float64Type>().clone()))
        } else {
            let text = cast(array, &DataType::Utf8)?;
            Ok(Self::Text(text.as_string::<i32>().clone()))
        }
    }

    fn value(&self, row: usize) -> Value {
        match self {
            Self::Int(a) if a.is_valid(row) => Value::Integer(a.value(row)),
            Self::Float(a) if a.is_valid(row) => Value::Real(a.value(row)),
            Self::Text(a) if a.is_valid(row) => Value::Text(a.value(row).to_string()),
            _ => Value::Null,
        }
    }
}

/// Build a batch from row values, typing each column by what it holds
///
/// All-integer columns become Int64, all-numeric columns Float64, anything
/// else Utf8.
fn values_to_batch(names: &[String], columns: Vec<Vec<Value>>) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(names.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(names.len());

    for (name, values) in names.iter().zip(columns) {
        let all_int = values
            .iter()
            .all(|v| matches!(v, Value::Null | Value::Integer(_)));
        let all_numeric = values
            .iter()
            .all(|v| matches!(v, Value::Null | Value::Integer(_) | Value::Real(_)));

        let array: ArrayRef = if all_int {
            Arc::new(
                values
                    .iter()
                    .map(|v| match v {
                        Value::Integer(n) => Some(*n),
                        _ => None,
                    })
                    .collect::<Int64Array>(),
            )
        } else if all_numeric {
            Arc::new(
                values
                    .iter()
                    .map(|v| match v {
                        Value::Integer(n) => Some(*n as f64),
                        Value::Real(f) => Some(*f),
                        _ => None,
                    })
                    .collect::<Float64Array>(),
            )
        } else {
            Arc::new(
                values
                    .iter()
                    .map(|v| match v {
                        Value::Null => None,
                        Value::Integer(n) => Some(n.to_string()),
                        Value::Real(f) => Some(f.to_string()),
                        Value::Text(s) => Some(s.clone()),
                        Value::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
                    })
                    .collect::<StringArray>(),
            )
        };

        fields.push(Field::new(name, array.data_type().clone(), true));
        arrays.push(array);
    }

    let num_rows = arrays.first().map_or(0, |a| a.len());
    let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
    Ok(RecordBatch::try_new_with_options(
        Arc::new(Schema::new(fields)),
        arrays,
        &options,
    )?)
}
