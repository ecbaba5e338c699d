//! Location store: the many-to-one mapping from code locations to cache
//! hashes.
//!
//! A location is one occurrence of some content at `(repo_root, path,
//! start_line, end_line)`. Duplicate content across files or repositories
//! shares a single cache entry; orphan detection finds cache hashes no
//! location references any more.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::CodetectResult;
use crate::storage::{ColumnSpec, ColumnType, Store, Value};
use crate::types::{now_epoch, Chunk, Location};

/// Table name for chunk locations.
const TABLE: &str = "chunk_locations";

/// Per-repo statistics grouped by node type and language.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RepoLocationStats {
    /// Total location rows for the repo.
    pub total_locations: usize,
    /// Distinct file paths with at least one location.
    pub total_files: usize,
    /// Distinct content hashes referenced by the repo.
    pub unique_hashes: usize,
    /// Location counts per node type.
    pub by_node_type: HashMap<String, usize>,
    /// Location counts per language.
    pub by_language: HashMap<String, usize>,
}

/// SQL-backed location store.
pub struct LocationStore {
    store: Arc<dyn Store>,
}

impl LocationStore {
    /// Open the store, creating the table and its indexes if needed.
    pub fn open(store: Arc<dyn Store>) -> CodetectResult<Self> {
        let dialect = store.dialect();
        let columns = [
            ColumnSpec::new("id", ColumnType::AutoId),
            ColumnSpec::new("repo_root", ColumnType::Text),
            ColumnSpec::new("path", ColumnType::Text),
            ColumnSpec::new("start_line", ColumnType::Integer),
            ColumnSpec::new("end_line", ColumnType::Integer),
            ColumnSpec::new("content_hash", ColumnType::Text),
            ColumnSpec::nullable("node_type", ColumnType::Text),
            ColumnSpec::nullable("node_name", ColumnType::Text),
            ColumnSpec::nullable("language", ColumnType::Text),
            ColumnSpec::new("created_at", ColumnType::Integer),
        ];
        store.execute(&dialect.create_table(TABLE, &columns), &[])?;
        store.execute(
            &dialect.create_index(
                TABLE,
                "idx_locations_span",
                &["repo_root", "path", "start_line", "end_line"],
                true,
            ),
            &[],
        )?;
        store.execute(
            &dialect.create_index(TABLE, "idx_locations_repo", &["repo_root"], false),
            &[],
        )?;
        store.execute(
            &dialect.create_index(TABLE, "idx_locations_repo_path", &["repo_root", "path"], false),
            &[],
        )?;
        store.execute(
            &dialect.create_index(TABLE, "idx_locations_hash", &["content_hash"], false),
            &[],
        )?;
        Ok(Self { store })
    }

    /// Upsert location rows for a set of chunks in one transaction. On
    /// span conflict the row's hash and chunk metadata are replaced.
    pub fn upsert_chunks(&self, repo_root: &str, chunks: &[Chunk]) -> CodetectResult<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let sql = self.store.dialect().upsert_sql(
            TABLE,
            &[
                "repo_root",
                "path",
                "start_line",
                "end_line",
                "content_hash",
                "node_type",
                "node_name",
                "language",
                "created_at",
            ],
            &["repo_root", "path", "start_line", "end_line"],
            Some(&["content_hash", "node_type", "node_name", "language"]),
        );
        let statements: Vec<(String, Vec<Value>)> = chunks
            .iter()
            .map(|chunk| {
                (
                    sql.clone(),
                    vec![
                        Value::from(repo_root),
                        Value::from(chunk.path.to_string_lossy().replace('\\', "/")),
                        Value::Integer(i64::from(chunk.start_line)),
                        Value::Integer(i64::from(chunk.end_line)),
                        Value::from(chunk.content_hash.clone()),
                        Value::from(chunk.node_type.clone()),
                        Value::from(chunk.node_name.clone()),
                        Value::from(chunk.language.as_str()),
                        Value::Integer(now_epoch()),
                    ],
                )
            })
            .collect();
        self.store.execute_transaction(&statements)
    }

    /// All locations for one path in a repo, ordered by start line.
    pub fn get_by_path(&self, repo_root: &str, path: &str) -> CodetectResult<Vec<Location>> {
        let sql = format!(
            "SELECT id, repo_root, path, start_line, end_line, content_hash, node_type, node_name, language, created_at \
             FROM {TABLE} WHERE repo_root = ? AND path = ? ORDER BY start_line, end_line"
        );
        self.store
            .query(&sql, &[Value::from(repo_root), Value::from(path)])?
            .iter()
            .map(Self::decode)
            .collect()
    }

    /// All locations for a repo, ordered by path and start line.
    pub fn get_by_repo(&self, repo_root: &str) -> CodetectResult<Vec<Location>> {
        let sql = format!(
            "SELECT id, repo_root, path, start_line, end_line, content_hash, node_type, node_name, language, created_at \
             FROM {TABLE} WHERE repo_root = ? ORDER BY path, start_line"
        );
        self.store
            .query(&sql, &[Value::from(repo_root)])?
            .iter()
            .map(Self::decode)
            .collect()
    }

    /// All locations of one content hash within a repo (duplicate-code
    /// lookup).
    pub fn get_by_hash(&self, repo_root: &str, content_hash: &str) -> CodetectResult<Vec<Location>> {
        let sql = format!(
            "SELECT id, repo_root, path, start_line, end_line, content_hash, node_type, node_name, language, created_at \
             FROM {TABLE} WHERE repo_root = ? AND content_hash = ? ORDER BY path, start_line"
        );
        self.store
            .query(&sql, &[Value::from(repo_root), Value::from(content_hash)])?
            .iter()
            .map(Self::decode)
            .collect()
    }

    /// Content hashes referenced by one path, with multiplicity.
    pub fn hashes_for_path(&self, repo_root: &str, path: &str) -> CodetectResult<Vec<String>> {
        let sql = format!(
            "SELECT content_hash FROM {TABLE} WHERE repo_root = ? AND path = ? ORDER BY start_line"
        );
        self.store
            .query(&sql, &[Value::from(repo_root), Value::from(path)])?
            .iter()
            .map(|r| r.get_string(0))
            .collect()
    }

    /// Delete all locations for one path. Returns the number removed.
    pub fn delete_by_path(&self, repo_root: &str, path: &str) -> CodetectResult<u64> {
        self.store.execute(
            &format!("DELETE FROM {TABLE} WHERE repo_root = ? AND path = ?"),
            &[Value::from(repo_root), Value::from(path)],
        )
    }

    /// Delete all locations for a repo. Returns the number removed.
    pub fn delete_by_repo(&self, repo_root: &str) -> CodetectResult<u64> {
        self.store.execute(
            &format!("DELETE FROM {TABLE} WHERE repo_root = ?"),
            &[Value::from(repo_root)],
        )
    }

    /// Distinct content hashes referenced by a repo.
    pub fn referenced_hashes(&self, repo_root: &str) -> CodetectResult<HashSet<String>> {
        let sql = format!("SELECT DISTINCT content_hash FROM {TABLE} WHERE repo_root = ?");
        self.store
            .query(&sql, &[Value::from(repo_root)])?
            .iter()
            .map(|r| r.get_string(0))
            .collect()
    }

    /// Cache hashes not referenced by any location: candidates for cache
    /// garbage collection.
    pub fn orphan_hashes(&self, all_cache_hashes: &[String]) -> CodetectResult<Vec<String>> {
        let sql = format!("SELECT DISTINCT content_hash FROM {TABLE}");
        let referenced: HashSet<String> = self
            .store
            .query(&sql, &[])?
            .iter()
            .map(|r| r.get_string(0))
            .collect::<CodetectResult<_>>()?;
        let mut orphans: Vec<String> = all_cache_hashes
            .iter()
            .filter(|h| !referenced.contains(*h))
            .cloned()
            .collect();
        orphans.sort();
        Ok(orphans)
    }

    /// Per-repo statistics grouped by node type and language.
    pub fn repo_stats(&self, repo_root: &str) -> CodetectResult<RepoLocationStats> {
        let totals = format!(
            "SELECT COUNT(*), COUNT(DISTINCT path), COUNT(DISTINCT content_hash) \
             FROM {TABLE} WHERE repo_root = ?"
        );
        let mut stats = RepoLocationStats::default();
        if let Some(row) = self.store.query_one(&totals, &[Value::from(repo_root)])? {
            #[allow(clippy::cast_sign_loss)]
            {
                stats.total_locations = row.get_i64(0)? as usize;
                stats.total_files = row.get_i64(1)? as usize;
                stats.unique_hashes = row.get_i64(2)? as usize;
            }
        }

        let by_type = format!(
            "SELECT node_type, COUNT(*) FROM {TABLE} WHERE repo_root = ? AND node_type IS NOT NULL \
             GROUP BY node_type"
        );
        for row in self.store.query(&by_type, &[Value::from(repo_root)])? {
            #[allow(clippy::cast_sign_loss)]
            stats
                .by_node_type
                .insert(row.get_string(0)?, row.get_i64(1)? as usize);
        }

        let by_lang = format!(
            "SELECT language, COUNT(*) FROM {TABLE} WHERE repo_root = ? AND language IS NOT NULL \
             GROUP BY language"
        );
        for row in self.store.query(&by_lang, &[Value::from(repo_root)])? {
            #[allow(clippy::cast_sign_loss)]
            stats
                .by_language
                .insert(row.get_string(0)?, row.get_i64(1)? as usize);
        }

        Ok(stats)
    }

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn decode(row: &crate::storage::Row) -> CodetectResult<Location> {
        Ok(Location {
            id: row.get_i64(0)?,
            repo_root: row.get_string(1)?,
            path: row.get_string(2)?,
            start_line: row.get_i64(3)? as u32,
            end_line: row.get_i64(4)? as u32,
            content_hash: row.get_string(5)?,
            node_type: row.get_opt_string(6)?,
            node_name: row.get_opt_string(7)?,
            language: row.get_opt_string(8)?,
            created_at: row.get_i64(9)?,
        })
    }
}
