//! Networked PostgreSQL backend.
//!
//! Connections come from an r2d2 pool; the pgvector extension provides the
//! native vector column type and KNN operators. The dialect's init
//! statements (extension creation, `hnsw.ef_search`) run once per pooled
//! connection on customize.

use postgres::types::{ToSql, Type};
use postgres::NoTls;
use r2d2_postgres::PostgresConnectionManager;

use crate::config::DbBackend;
use crate::error::{CodetectError, CodetectResult};

use super::{rewrite_placeholders, Dialect, PostgresDialect, Row, Store, Value};

/// Runs the dialect init statements on every fresh pooled connection.
#[derive(Debug)]
struct InitOnConnect {
    statements: Vec<String>,
}

impl r2d2::CustomizeConnection<postgres::Client, postgres::Error> for InitOnConnect {
    fn on_acquire(&self, conn: &mut postgres::Client) -> Result<(), postgres::Error> {
        for stmt in &self.statements {
            conn.batch_execute(stmt)?;
        }
        Ok(())
    }
}

/// PostgreSQL-backed [`Store`].
pub struct PostgresStore {
    pool: r2d2::Pool<PostgresConnectionManager<NoTls>>,
    dialect: PostgresDialect,
}

impl PostgresStore {
    /// Connect a pool to the given DSN and run the init statements.
    pub fn connect(dsn: &str) -> CodetectResult<Self> {
        let config: postgres::Config = dsn
            .parse()
            .map_err(|e| CodetectError::Config {
                details: format!("invalid DB_DSN: {e}"),
            })?;
        let manager = PostgresConnectionManager::new(config, NoTls);
        let dialect = PostgresDialect;
        let pool = r2d2::Pool::builder()
            .max_size(8)
            .connection_customizer(Box::new(InitOnConnect {
                statements: dialect.init_statements(),
            }))
            .build(manager)?;

        tracing::debug!("opened postgres store");
        Ok(Self { pool, dialect })
    }

    /// Bind neutral values as postgres parameters.
    ///
    /// `Null` binds as a text NULL; this schema only stores NULLs in
    /// nullable text columns.
    fn bind_params(params: &[Value]) -> Vec<Box<dyn ToSql + Sync>> {
        params
            .iter()
            .map(|p| -> Box<dyn ToSql + Sync> {
                match p {
                    Value::Null => Box::new(Option::<String>::None),
                    Value::Integer(v) => Box::new(*v),
                    Value::Real(v) => Box::new(*v),
                    Value::Text(v) => Box::new(v.clone()),
                    Value::Blob(v) => Box::new(v.clone()),
                    Value::Vector(v) => Box::new(pgvector::Vector::from(v.clone())),
                }
            })
            .collect()
    }

    fn decode_row(row: &postgres::Row) -> CodetectResult<Row> {
        let mut values = Vec::with_capacity(row.len());
        for (idx, column) in row.columns().iter().enumerate() {
            let ty = column.type_();
            // `Type` consts are not usable as match patterns; compare.
            let value = if *ty == Type::INT2 {
                row.try_get::<_, Option<i16>>(idx)
                    .map(|v| v.map_or(Value::Null, |v| Value::Integer(i64::from(v))))
            } else if *ty == Type::INT4 {
                row.try_get::<_, Option<i32>>(idx)
                    .map(|v| v.map_or(Value::Null, |v| Value::Integer(i64::from(v))))
            } else if *ty == Type::INT8 {
                row.try_get::<_, Option<i64>>(idx)
                    .map(|v| v.map_or(Value::Null, Value::Integer))
            } else if *ty == Type::FLOAT4 {
                row.try_get::<_, Option<f32>>(idx)
                    .map(|v| v.map_or(Value::Null, |v| Value::Real(f64::from(v))))
            } else if *ty == Type::FLOAT8 {
                row.try_get::<_, Option<f64>>(idx)
                    .map(|v| v.map_or(Value::Null, Value::Real))
            } else if *ty == Type::BOOL {
                row.try_get::<_, Option<bool>>(idx)
                    .map(|v| v.map_or(Value::Null, |v| Value::Integer(i64::from(v))))
            } else if *ty == Type::BYTEA {
                row.try_get::<_, Option<Vec<u8>>>(idx)
                    .map(|v| v.map_or(Value::Null, Value::Blob))
            } else if ty.name() == "vector" {
                row.try_get::<_, Option<pgvector::Vector>>(idx)
                    .map(|v| v.map_or(Value::Null, |v| Value::Vector(v.to_vec())))
            } else {
                row.try_get::<_, Option<String>>(idx)
                    .map(|v| v.map_or(Value::Null, Value::Text))
            }
            .map_err(|e| {
                CodetectError::Database(format!(
                    "decode column {} ({}): {e}",
                    column.name(),
                    column.type_()
                ))
            })?;
            values.push(value);
        }
        Ok(Row::new(values))
    }
}

impl Store for PostgresStore {
    fn backend(&self) -> DbBackend {
        DbBackend::Postgres
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn execute(&self, sql: &str, params: &[Value]) -> CodetectResult<u64> {
        let sql = rewrite_placeholders(sql, &self.dialect);
        let bound = Self::bind_params(params);
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(AsRef::as_ref).collect();
        let mut conn = self.pool.get()?;
        Ok(conn.execute(sql.as_str(), &refs)?)
    }

    fn query(&self, sql: &str, params: &[Value]) -> CodetectResult<Vec<Row>> {
        let sql = rewrite_placeholders(sql, &self.dialect);
        let bound = Self::bind_params(params);
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(AsRef::as_ref).collect();
        let mut conn = self.pool.get()?;
        let rows = conn.query(sql.as_str(), &refs)?;
        rows.iter().map(Self::decode_row).collect()
    }

    fn execute_transaction(&self, statements: &[(String, Vec<Value>)]) -> CodetectResult<()> {
        let mut conn = self.pool.get()?;
        let mut tx = conn.transaction()?;
        for (sql, params) in statements {
            let sql = rewrite_placeholders(sql, &self.dialect);
            let bound = Self::bind_params(params);
            let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(AsRef::as_ref).collect();
            tx.execute(sql.as_str(), &refs)?;
        }
        tx.commit()?;
        Ok(())
    }
}
