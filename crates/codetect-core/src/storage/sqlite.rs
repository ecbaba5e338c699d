//! Embedded SQLite backend.
//!
//! One connection behind a mutex, WAL journaling for concurrent readers.
//! Vectors are bound and read as JSON text since SQLite has no native
//! vector type; KNN search uses the brute-force index instead.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::config::DbBackend;
use crate::error::{CodetectError, CodetectResult};

use super::{rewrite_placeholders, Dialect, Row, SqliteDialect, Store, Value};

/// SQLite-backed [`Store`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
    dialect: SqliteDialect,
}

impl SqliteStore {
    /// Open or create the database file, running the dialect's init
    /// statements on the fresh connection.
    pub fn open(db_path: &Path) -> CodetectResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        let dialect = SqliteDialect;
        for stmt in dialect.init_statements() {
            // Pragmas may return a result row; execute_batch tolerates that.
            conn.execute_batch(&format!("{stmt};"))?;
        }

        tracing::debug!(path = %db_path.display(), "opened sqlite store");
        Ok(Self {
            conn: Mutex::new(conn),
            dialect,
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> CodetectResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            dialect: SqliteDialect,
        })
    }

    fn bind_params(params: &[Value]) -> CodetectResult<Vec<rusqlite::types::Value>> {
        params
            .iter()
            .map(|p| {
                Ok(match p {
                    Value::Null => rusqlite::types::Value::Null,
                    Value::Integer(v) => rusqlite::types::Value::Integer(*v),
                    Value::Real(v) => rusqlite::types::Value::Real(*v),
                    Value::Text(v) => rusqlite::types::Value::Text(v.clone()),
                    Value::Blob(v) => rusqlite::types::Value::Blob(v.clone()),
                    Value::Vector(v) => {
                        rusqlite::types::Value::Text(serde_json::to_string(v)?)
                    }
                })
            })
            .collect()
    }

    fn decode_row(row: &rusqlite::Row<'_>, column_count: usize) -> CodetectResult<Row> {
        let mut values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            let value = match row.get_ref(idx)? {
                rusqlite::types::ValueRef::Null => Value::Null,
                rusqlite::types::ValueRef::Integer(v) => Value::Integer(v),
                rusqlite::types::ValueRef::Real(v) => Value::Real(v),
                rusqlite::types::ValueRef::Text(v) => Value::Text(
                    std::str::from_utf8(v)
                        .map_err(|e| CodetectError::Database(format!("non-UTF-8 text cell: {e}")))?
                        .to_string(),
                ),
                rusqlite::types::ValueRef::Blob(v) => Value::Blob(v.to_vec()),
            };
            values.push(value);
        }
        Ok(Row::new(values))
    }
}

impl Store for SqliteStore {
    fn backend(&self) -> DbBackend {
        DbBackend::Sqlite
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn execute(&self, sql: &str, params: &[Value]) -> CodetectResult<u64> {
        let sql = rewrite_placeholders(sql, &self.dialect);
        let bound = Self::bind_params(params)?;
        let conn = self.conn.lock();
        let affected = conn.execute(&sql, rusqlite::params_from_iter(bound))?;
        Ok(affected as u64)
    }

    fn query(&self, sql: &str, params: &[Value]) -> CodetectResult<Vec<Row>> {
        let sql = rewrite_placeholders(sql, &self.dialect);
        let bound = Self::bind_params(params)?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query(rusqlite::params_from_iter(bound))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(Self::decode_row(row, column_count)?);
        }
        Ok(out)
    }

    fn execute_transaction(&self, statements: &[(String, Vec<Value>)]) -> CodetectResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for (sql, params) in statements {
            let sql = rewrite_placeholders(sql, &self.dialect);
            let bound = Self::bind_params(params)?;
            tx.execute(&sql, rusqlite::params_from_iter(bound))?;
        }
        tx.commit()?;
        Ok(())
    }
}
