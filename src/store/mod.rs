//! Relational extract store
//!
//! Extracts imported into SQLite and read back as Arrow tables. Filter
//! expressions are pushed down as SQL with every value bound as a parameter.

pub mod query;
pub mod sqlite;

pub use query::{SqlPredicate, compile_predicate, quote_identifier, validate_identifier};
pub use sqlite::SqliteStore;
