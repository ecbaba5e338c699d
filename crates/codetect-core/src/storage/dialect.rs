//! SQL dialect abstraction.
//!
//! The dialect is the only source of backend-specific SQL. Components write
//! statements in a neutral `?` placeholder form and compose DDL through the
//! dialect; the store rewrites placeholders at execution time.

use crate::vector::DistanceMetric;

/// Semantic column types understood by both backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Auto-generating integer primary key.
    AutoId,
    /// 64-bit integer. Timestamps are stored as Unix seconds in this type.
    Integer,
    /// Double-precision float.
    Real,
    /// UTF-8 text.
    Text,
    /// Raw bytes.
    Blob,
    /// Fixed-width embedding vector. Maps to the backend's native vector
    /// type where available and to JSON text where not.
    Vector(usize),
}

/// One column in a `create_table` call.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    /// Column name.
    pub name: &'static str,
    /// Semantic type.
    pub ty: ColumnType,
    /// Whether the column is the primary key. Implied for `AutoId`.
    pub primary_key: bool,
    /// Whether the column carries NOT NULL.
    pub not_null: bool,
}

impl ColumnSpec {
    /// A NOT NULL column.
    pub fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            primary_key: false,
            not_null: true,
        }
    }

    /// A nullable column.
    pub fn nullable(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            primary_key: false,
            not_null: false,
        }
    }

    /// Mark this column as the primary key.
    pub fn primary(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

/// Backend-specific SQL generation.
///
/// Statements returned by the trait use the neutral `?` placeholder form;
/// [`rewrite_placeholders`] translates them for backends that number their
/// parameters.
pub trait Dialect: Send + Sync {
    /// Short backend identifier (`sqlite`, `postgres`).
    fn name(&self) -> &'static str;

    /// The n-th (1-indexed) parameter placeholder in native form.
    fn placeholder(&self, n: usize) -> String;

    /// Whether the backend has a native vector column and KNN operator.
    fn supports_native_vector(&self) -> bool;

    /// SQL type for a semantic column type.
    fn type_sql(&self, ty: ColumnType) -> String;

    /// One-shot statements run when a connection is first used.
    fn init_statements(&self) -> Vec<String>;

    /// `CREATE TABLE IF NOT EXISTS` for the given columns.
    fn create_table(&self, name: &str, columns: &[ColumnSpec]) -> String {
        let cols: Vec<String> = columns.iter().map(|c| self.column_sql(c)).collect();
        format!("CREATE TABLE IF NOT EXISTS {name} ({})", cols.join(", "))
    }

    /// Rendering of a single column definition.
    fn column_sql(&self, col: &ColumnSpec) -> String {
        let mut sql = format!("{} {}", col.name, self.type_sql(col.ty));
        // AutoId renders its own PRIMARY KEY clause.
        if col.primary_key && col.ty != ColumnType::AutoId {
            sql.push_str(" PRIMARY KEY");
        } else if col.not_null && col.ty != ColumnType::AutoId {
            sql.push_str(" NOT NULL");
        }
        sql
    }

    /// `CREATE [UNIQUE] INDEX IF NOT EXISTS` over plain columns.
    fn create_index(&self, table: &str, name: &str, columns: &[&str], unique: bool) -> String {
        let unique_kw = if unique { "UNIQUE " } else { "" };
        format!(
            "CREATE {unique_kw}INDEX IF NOT EXISTS {name} ON {table} ({})",
            columns.join(", ")
        )
    }

    /// Insert-or-update statement in neutral `?` form.
    ///
    /// `update_cols = None` updates every non-conflict column.
    fn upsert_sql(
        &self,
        table: &str,
        cols: &[&str],
        conflict_cols: &[&str],
        update_cols: Option<&[&str]>,
    ) -> String {
        let placeholders: Vec<&str> = cols.iter().map(|_| "?").collect();
        let updates: Vec<String> = match update_cols {
            Some(explicit) => explicit
                .iter()
                .map(|c| format!("{c} = excluded.{c}"))
                .collect(),
            None => cols
                .iter()
                .filter(|c| !conflict_cols.contains(c))
                .map(|c| format!("{c} = excluded.{c}"))
                .collect(),
        };
        format!(
            "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
            cols.join(", "),
            placeholders.join(", "),
            conflict_cols.join(", "),
            updates.join(", ")
        )
    }

    /// Native KNN query over a vector table, ascending by distance.
    ///
    /// Parameters, in order: query vector, query vector again (the distance
    /// expression appears twice), result limit. Returns `None` when the
    /// backend has no native vector support.
    fn knn_sql(&self, table: &str, metric: DistanceMetric) -> Option<String>;

    /// Native vector index DDL (HNSW), or `None` when unsupported.
    fn create_vector_index_sql(
        &self,
        table: &str,
        column: &str,
        metric: DistanceMetric,
    ) -> Option<String>;
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// Dialect for the embedded single-file SQLite store.
///
/// Vectors are stored as JSON text; KNN falls back to the brute-force index.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, _n: usize) -> String {
        "?".into()
    }

    fn supports_native_vector(&self) -> bool {
        false
    }

    fn type_sql(&self, ty: ColumnType) -> String {
        match ty {
            ColumnType::AutoId => "INTEGER PRIMARY KEY AUTOINCREMENT".into(),
            ColumnType::Integer => "INTEGER".into(),
            ColumnType::Real => "REAL".into(),
            ColumnType::Text => "TEXT".into(),
            ColumnType::Blob => "BLOB".into(),
            // JSON-encoded vector; dimension is carried in a sibling column.
            ColumnType::Vector(_) => "TEXT".into(),
        }
    }

    fn init_statements(&self) -> Vec<String> {
        vec![
            "PRAGMA journal_mode=WAL".into(),
            "PRAGMA synchronous=NORMAL".into(),
            "PRAGMA foreign_keys=ON".into(),
            "PRAGMA cache_size=-64000".into(),
        ]
    }

    fn knn_sql(&self, _table: &str, _metric: DistanceMetric) -> Option<String> {
        None
    }

    fn create_vector_index_sql(
        &self,
        _table: &str,
        _column: &str,
        _metric: DistanceMetric,
    ) -> Option<String> {
        None
    }
}

// ---------------------------------------------------------------------------
// PostgreSQL + pgvector
// ---------------------------------------------------------------------------

/// HNSW build parameter: max connections per node.
const HNSW_M: u32 = 16;
/// HNSW build parameter: candidate list size during construction.
const HNSW_EF_CONSTRUCTION: u32 = 64;
/// Per-query candidate list size.
const HNSW_EF_SEARCH: u32 = 100;

/// Dialect for the networked PostgreSQL store with the pgvector extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// pgvector distance operator for a metric.
    fn distance_operator(metric: DistanceMetric) -> &'static str {
        match metric {
            DistanceMetric::Cosine => "<=>",
            DistanceMetric::Euclidean => "<->",
            DistanceMetric::NegativeDot => "<#>",
            DistanceMetric::Manhattan => "<+>",
        }
    }

    /// pgvector operator class for an HNSW index on a metric.
    fn operator_class(metric: DistanceMetric) -> &'static str {
        match metric {
            DistanceMetric::Cosine => "vector_cosine_ops",
            DistanceMetric::Euclidean => "vector_l2_ops",
            DistanceMetric::NegativeDot => "vector_ip_ops",
            DistanceMetric::Manhattan => "vector_l1_ops",
        }
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, n: usize) -> String {
        format!("${n}")
    }

    fn supports_native_vector(&self) -> bool {
        true
    }

    fn type_sql(&self, ty: ColumnType) -> String {
        match ty {
            ColumnType::AutoId => "BIGSERIAL PRIMARY KEY".into(),
            ColumnType::Integer => "BIGINT".into(),
            ColumnType::Real => "DOUBLE PRECISION".into(),
            ColumnType::Text => "TEXT".into(),
            ColumnType::Blob => "BYTEA".into(),
            ColumnType::Vector(dim) => format!("vector({dim})"),
        }
    }

    fn init_statements(&self) -> Vec<String> {
        vec![
            "CREATE EXTENSION IF NOT EXISTS vector".into(),
            format!("SET hnsw.ef_search = {HNSW_EF_SEARCH}"),
        ]
    }

    fn knn_sql(&self, table: &str, metric: DistanceMetric) -> Option<String> {
        let op = Self::distance_operator(metric);
        Some(format!(
            "SELECT content_hash, embedding {op} ? AS distance FROM {table} \
             ORDER BY embedding {op} ? LIMIT ?"
        ))
    }

    fn create_vector_index_sql(
        &self,
        table: &str,
        column: &str,
        metric: DistanceMetric,
    ) -> Option<String> {
        let opclass = Self::operator_class(metric);
        Some(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_{column}_hnsw ON {table} \
             USING hnsw ({column} {opclass}) WITH (m = {HNSW_M}, ef_construction = {HNSW_EF_CONSTRUCTION})"
        ))
    }
}

// ---------------------------------------------------------------------------
// Placeholder rewriting
// ---------------------------------------------------------------------------

/// Translate a statement written in the neutral `?` form into the active
/// dialect's placeholder form.
///
/// `?` inside single-quoted string literals is left alone. For dialects
/// whose native form is already `?` this is an allocation-only no-op.
pub fn rewrite_placeholders(sql: &str, dialect: &dyn Dialect) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut in_string = false;
    let mut n = 0usize;

    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_string = !in_string;
                out.push(ch);
            }
            '?' if !in_string => {
                n += 1;
                out.push_str(&dialect.placeholder(n));
            }
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_placeholders_sqlite_noop() {
        let sql = "SELECT * FROM t WHERE a = ? AND b = ?";
        assert_eq!(rewrite_placeholders(sql, &SqliteDialect), sql);
    }

    #[test]
    fn test_rewrite_placeholders_postgres_numbers() {
        let sql = "INSERT INTO t (a, b) VALUES (?, ?)";
        assert_eq!(
            rewrite_placeholders(sql, &PostgresDialect),
            "INSERT INTO t (a, b) VALUES ($1, $2)"
        );
    }

    #[test]
    fn test_rewrite_placeholders_skips_string_literals() {
        let sql = "SELECT 'what?' FROM t WHERE a = ?";
        assert_eq!(
            rewrite_placeholders(sql, &PostgresDialect),
            "SELECT 'what?' FROM t WHERE a = $1"
        );
    }

    #[test]
    fn test_upsert_sql_updates_non_conflict_columns() {
        let sql = SqliteDialect.upsert_sql(
            "chunk_locations",
            &["repo_root", "path", "start_line", "content_hash"],
            &["repo_root", "path", "start_line"],
            None,
        );
        assert!(sql.contains("ON CONFLICT (repo_root, path, start_line)"));
        assert!(sql.contains("content_hash = excluded.content_hash"));
        assert!(!sql.contains("repo_root = excluded.repo_root"));
    }

    #[test]
    fn test_upsert_sql_explicit_update_columns() {
        let sql = SqliteDialect.upsert_sql(
            "embedding_cache_768",
            &["content_hash", "embedding"],
            &["content_hash"],
            Some(&["embedding"]),
        );
        assert!(sql.ends_with("DO UPDATE SET embedding = excluded.embedding"));
    }

    #[test]
    fn test_vector_type_mapping() {
        assert_eq!(SqliteDialect.type_sql(ColumnType::Vector(768)), "TEXT");
        assert_eq!(
            PostgresDialect.type_sql(ColumnType::Vector(768)),
            "vector(768)"
        );
    }

    #[test]
    fn test_postgres_knn_sql_orders_by_distance() {
        let sql = PostgresDialect
            .knn_sql("embedding_cache_768", DistanceMetric::Cosine)
            .expect("postgres supports native knn");
        assert!(sql.contains("<=>"));
        assert!(sql.contains("ORDER BY"));
        assert!(sql.contains("LIMIT"));
        assert!(SqliteDialect
            .knn_sql("embedding_cache", DistanceMetric::Cosine)
            .is_none());
    }
}
