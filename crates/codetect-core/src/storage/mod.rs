//! Storage layer: one neutral query API over two SQL backends.
//!
//! Every domain store (cache, locations, symbols, repo configs) writes its
//! SQL in the neutral `?` placeholder form and composes DDL through the
//! [`Dialect`]. The [`Store`] rewrites placeholders and binds a small
//! [`Value`] enum, so the same statement text runs against the embedded
//! SQLite file or a networked PostgreSQL server.
//!
//! ## Concurrency
//!
//! SQLite is configured in WAL mode; a mutex serializes the single
//! connection. The PostgreSQL backend draws connections from an r2d2 pool,
//! so concurrent statements run on separate connections.

pub mod dialect;
mod postgres;
mod sqlite;

use std::sync::Arc;

use crate::config::{DbBackend, StorageConfig};
use crate::error::{CodetectError, CodetectResult};

pub use dialect::{rewrite_placeholders, ColumnSpec, ColumnType, Dialect, PostgresDialect, SqliteDialect};
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

/// A neutral SQL parameter / result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL. Only used for nullable text columns in this schema.
    Null,
    /// 64-bit integer (also carries Unix-second timestamps).
    Integer(i64),
    /// Double-precision float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
    /// Embedding vector. Bound as the native vector type on backends that
    /// have one and as JSON text elsewhere.
    Vector(Vec<f32>),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<Option<String>> for Value {
    fn from(v: Option<String>) -> Self {
        v.map_or(Self::Null, Self::Text)
    }
}

/// One result row, positionally indexed.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    /// Wrap decoded cells into a row.
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    fn cell(&self, idx: usize) -> CodetectResult<&Value> {
        self.values
            .get(idx)
            .ok_or_else(|| CodetectError::Database(format!("row has no column {idx}")))
    }

    /// Integer cell. Accepts REAL cells that hold whole numbers.
    pub fn get_i64(&self, idx: usize) -> CodetectResult<i64> {
        match self.cell(idx)? {
            Value::Integer(v) => Ok(*v),
            #[allow(clippy::cast_possible_truncation)]
            Value::Real(v) => Ok(*v as i64),
            other => Err(CodetectError::Database(format!(
                "column {idx} is not an integer: {other:?}"
            ))),
        }
    }

    /// Float cell. Accepts integer cells.
    pub fn get_f64(&self, idx: usize) -> CodetectResult<f64> {
        match self.cell(idx)? {
            Value::Real(v) => Ok(*v),
            #[allow(clippy::cast_precision_loss)]
            Value::Integer(v) => Ok(*v as f64),
            Value::Null => Ok(0.0),
            other => Err(CodetectError::Database(format!(
                "column {idx} is not a float: {other:?}"
            ))),
        }
    }

    /// Required text cell.
    pub fn get_string(&self, idx: usize) -> CodetectResult<String> {
        match self.cell(idx)? {
            Value::Text(v) => Ok(v.clone()),
            other => Err(CodetectError::Database(format!(
                "column {idx} is not text: {other:?}"
            ))),
        }
    }

    /// Nullable text cell.
    pub fn get_opt_string(&self, idx: usize) -> CodetectResult<Option<String>> {
        match self.cell(idx)? {
            Value::Text(v) => Ok(Some(v.clone())),
            Value::Null => Ok(None),
            other => Err(CodetectError::Database(format!(
                "column {idx} is not nullable text: {other:?}"
            ))),
        }
    }

    /// Vector cell: native vector on pgvector backends, JSON text elsewhere.
    pub fn get_vector(&self, idx: usize) -> CodetectResult<Vec<f32>> {
        match self.cell(idx)? {
            Value::Vector(v) => Ok(v.clone()),
            Value::Text(json) => serde_json::from_str(json).map_err(|e| {
                CodetectError::Database(format!("column {idx} is not a JSON vector: {e}"))
            }),
            other => Err(CodetectError::Database(format!(
                "column {idx} is not a vector: {other:?}"
            ))),
        }
    }
}

/// Neutral statement API implemented by both backends.
pub trait Store: Send + Sync {
    /// Which backend this store talks to.
    fn backend(&self) -> DbBackend;

    /// The active dialect.
    fn dialect(&self) -> &dyn Dialect;

    /// Execute a statement, returning the affected row count.
    fn execute(&self, sql: &str, params: &[Value]) -> CodetectResult<u64>;

    /// Run a query and decode every row.
    fn query(&self, sql: &str, params: &[Value]) -> CodetectResult<Vec<Row>>;

    /// Execute several statements inside one transaction.
    fn execute_transaction(&self, statements: &[(String, Vec<Value>)]) -> CodetectResult<()>;

    /// Run a query expected to produce at most one row.
    fn query_one(&self, sql: &str, params: &[Value]) -> CodetectResult<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }
}

/// Open the backend selected by the configuration.
///
/// SQLite resolves the database file under the repo data directory unless
/// `DB_PATH` overrides it; postgres requires `DB_DSN`.
pub fn open_store(config: &StorageConfig, db_path: &std::path::Path) -> CodetectResult<Arc<dyn Store>> {
    match config.backend {
        DbBackend::Sqlite => Ok(Arc::new(SqliteStore::open(db_path)?)),
        DbBackend::Postgres => {
            let dsn = config.dsn.as_deref().ok_or_else(|| CodetectError::Config {
                details: "DB_TYPE=postgres requires DB_DSN".into(),
            })?;
            Ok(Arc::new(PostgresStore::connect(dsn)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_accessors() {
        let row = Row::new(vec![
            Value::Integer(42),
            Value::Text("hello".into()),
            Value::Null,
            Value::Text("[1.0,2.0]".into()),
        ]);
        assert_eq!(row.get_i64(0).expect("int"), 42);
        assert_eq!(row.get_string(1).expect("text"), "hello");
        assert_eq!(row.get_opt_string(2).expect("null"), None);
        assert_eq!(row.get_vector(3).expect("vector"), vec![1.0, 2.0]);
        assert!(row.get_i64(9).is_err());
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from("a"), Value::Text("a".into()));
        assert_eq!(Value::from(Option::<String>::None), Value::Null);
        assert_eq!(Value::from(7i64), Value::Integer(7));
    }
}
