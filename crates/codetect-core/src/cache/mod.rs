//! Content-addressed embedding cache.
//!
//! Stores `content_hash -> vector` rows tagged with the producing model.
//! On backends with a native vector column the physical tables are
//! dimension-grouped (`embedding_cache_<dim>`) so a fixed-width column and
//! one index serve each dimension; elsewhere a single table stores vectors
//! as JSON text and carries the dimension in a column.
//!
//! The cache is shared by every repository using the same backend. Entries
//! are kept alive by locations referencing their hash and are evicted only
//! when orphaned or by explicit LRU / model-scoped eviction.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::CodetectResult;
use crate::storage::{ColumnSpec, ColumnType, Store, Value};
use crate::types::{now_epoch, CacheEntry};

/// Batch size for `IN (...)` lookups, kept under SQLite's parameter limit.
const IN_BATCH: usize = 400;

/// Aggregate statistics over one cache table.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStats {
    /// Number of rows.
    pub total_entries: usize,
    /// Mean access count.
    pub avg_access_count: f64,
    /// Smallest access count.
    pub min_access_count: i64,
    /// Largest access count.
    pub max_access_count: i64,
    /// Oldest `created_at` (Unix seconds).
    pub oldest_entry: i64,
    /// Newest `created_at` (Unix seconds).
    pub newest_entry: i64,
}

/// Content-addressed embedding cache bound to one model + dimension.
pub struct EmbeddingCache {
    store: Arc<dyn Store>,
    model: String,
    dimensions: usize,
    /// Guards cache-level mutation; reads proceed concurrently. The
    /// asynchronous access-stat bumps acquire no lock at all.
    lock: RwLock<()>,
}

impl EmbeddingCache {
    /// Open the cache for the configured model and dimension, creating
    /// the dimension table if needed.
    pub fn open(store: Arc<dyn Store>, model: &str, dimensions: usize) -> CodetectResult<Self> {
        let cache = Self {
            store,
            model: model.to_string(),
            dimensions,
            lock: RwLock::new(()),
        };
        cache.ensure_table(dimensions)?;
        Ok(cache)
    }

    /// Physical table for a dimension under the active dialect.
    pub fn table_name_for(&self, dimensions: usize) -> String {
        if self.store.dialect().supports_native_vector() {
            format!("embedding_cache_{dimensions}")
        } else {
            "embedding_cache".to_string()
        }
    }

    /// Table holding entries for the configured dimension.
    pub fn table_name(&self) -> String {
        self.table_name_for(self.dimensions)
    }

    /// Configured vector dimensionality.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Configured model tag.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn ensure_table(&self, dimensions: usize) -> CodetectResult<()> {
        let table = self.table_name_for(dimensions);
        let dialect = self.store.dialect();
        let columns = [
            ColumnSpec::new("content_hash", ColumnType::Text).primary(),
            ColumnSpec::new("embedding", ColumnType::Vector(dimensions)),
            ColumnSpec::new("model", ColumnType::Text),
            ColumnSpec::new("dimensions", ColumnType::Integer),
            ColumnSpec::new("created_at", ColumnType::Integer),
            ColumnSpec::new("access_count", ColumnType::Integer),
            ColumnSpec::new("last_accessed", ColumnType::Integer),
        ];
        self.store.execute(&dialect.create_table(&table, &columns), &[])?;
        self.store.execute(
            &dialect.create_index(&table, &format!("idx_{table}_last_accessed"), &["last_accessed"], false),
            &[],
        )?;
        self.store.execute(
            &dialect.create_index(&table, &format!("idx_{table}_model"), &["model"], false),
            &[],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    /// Look up one hash. A miss returns `Ok(None)`. A hit schedules a
    /// fire-and-forget access-stat bump.
    pub fn get(&self, hash: &str) -> CodetectResult<Option<CacheEntry>> {
        let _read = self.lock.read();
        let table = self.table_name();
        let sql = format!(
            "SELECT content_hash, embedding, model, dimensions, created_at, access_count, last_accessed \
             FROM {table} WHERE content_hash = ?"
        );
        let row = self.store.query_one(&sql, &[Value::from(hash)])?;
        let entry = row.map(|r| Self::decode_entry(&r)).transpose()?;
        if entry.is_some() {
            self.bump_access(vec![hash.to_string()]);
        }
        Ok(entry)
    }

    /// Look up many hashes with chunked `IN (...)` queries. Missing
    /// hashes are simply absent from the result map.
    pub fn get_batch(&self, hashes: &[String]) -> CodetectResult<HashMap<String, CacheEntry>> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }
        let _read = self.lock.read();
        let table = self.table_name();
        let mut out = HashMap::with_capacity(hashes.len());

        for chunk in hashes.chunks(IN_BATCH) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT content_hash, embedding, model, dimensions, created_at, access_count, last_accessed \
                 FROM {table} WHERE content_hash IN ({placeholders})"
            );
            let params: Vec<Value> = chunk.iter().map(|h| Value::from(h.clone())).collect();
            for row in self.store.query(&sql, &params)? {
                let entry = Self::decode_entry(&row)?;
                out.insert(entry.content_hash.clone(), entry);
            }
        }

        if !out.is_empty() {
            self.bump_access(out.keys().cloned().collect());
        }
        Ok(out)
    }

    /// Cache statistics for the configured dimension table.
    #[allow(clippy::cast_sign_loss)]
    pub fn stats(&self) -> CodetectResult<CacheStats> {
        let _read = self.lock.read();
        let table = self.table_name();
        let sql = format!(
            "SELECT COUNT(*), CAST(AVG(access_count) AS REAL), MIN(access_count), MAX(access_count), \
             MIN(created_at), MAX(created_at) FROM {table}"
        );
        let Some(row) = self.store.query_one(&sql, &[])? else {
            return Ok(CacheStats::default());
        };
        let total = row.get_i64(0)?;
        if total == 0 {
            return Ok(CacheStats::default());
        }
        Ok(CacheStats {
            total_entries: total as usize,
            avg_access_count: row.get_f64(1)?,
            min_access_count: row.get_i64(2)?,
            max_access_count: row.get_i64(3)?,
            oldest_entry: row.get_i64(4)?,
            newest_entry: row.get_i64(5)?,
        })
    }

    // -----------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------

    /// Upsert one embedding. On conflict the existing row's access count
    /// is incremented and `last_accessed` refreshed; the vector itself is
    /// immutable after insert.
    pub fn put(&self, hash: &str, vector: &[f32]) -> CodetectResult<()> {
        let _write = self.lock.write();
        let (sql, params) = self.upsert_statement(hash, vector);
        self.store.execute(&sql, &params)?;
        Ok(())
    }

    /// Upsert a batch of embeddings in one transaction.
    pub fn put_batch(&self, entries: &HashMap<String, Vec<f32>>) -> CodetectResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let _write = self.lock.write();
        let statements: Vec<(String, Vec<Value>)> = entries
            .iter()
            .map(|(hash, vector)| self.upsert_statement(hash, vector))
            .collect();
        self.store.execute_transaction(&statements)
    }

    fn upsert_statement(&self, hash: &str, vector: &[f32]) -> (String, Vec<Value>) {
        let table = self.table_name();
        #[allow(clippy::cast_possible_wrap)]
        let params = vec![
            Value::from(hash),
            Value::Vector(vector.to_vec()),
            Value::from(self.model.clone()),
            Value::Integer(self.dimensions as i64),
            Value::Integer(now_epoch()),
            Value::Integer(now_epoch()),
        ];
        // The access-count increment references the existing row, so this
        // statement is composed here rather than through the generic
        // dialect upsert helper.
        let sql = format!(
            "INSERT INTO {table} (content_hash, embedding, model, dimensions, created_at, access_count, last_accessed) \
             VALUES (?, ?, ?, ?, ?, 1, ?) \
             ON CONFLICT (content_hash) DO UPDATE SET \
             access_count = {table}.access_count + 1, last_accessed = excluded.last_accessed"
        );
        (sql, params)
    }

    /// Delete one entry.
    pub fn delete(&self, hash: &str) -> CodetectResult<u64> {
        let _write = self.lock.write();
        let table = self.table_name();
        self.store.execute(
            &format!("DELETE FROM {table} WHERE content_hash = ?"),
            &[Value::from(hash)],
        )
    }

    /// Delete a batch of entries from the configured dimension table.
    pub fn delete_batch(&self, hashes: &[String]) -> CodetectResult<u64> {
        self.delete_batch_for_dimension(self.dimensions, hashes)
    }

    /// Delete a batch of entries from a specific dimension table. Used by
    /// model migration, which targets the former dimension.
    pub fn delete_batch_for_dimension(
        &self,
        dimensions: usize,
        hashes: &[String],
    ) -> CodetectResult<u64> {
        if hashes.is_empty() {
            return Ok(0);
        }
        let _write = self.lock.write();
        let table = self.table_name_for(dimensions);
        let mut deleted = 0;
        for chunk in hashes.chunks(IN_BATCH) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("DELETE FROM {table} WHERE content_hash IN ({placeholders})");
            let params: Vec<Value> = chunk.iter().map(|h| Value::from(h.clone())).collect();
            deleted += self.store.execute(&sql, &params)?;
        }
        Ok(deleted)
    }

    /// Evict least-recently-accessed entries until `keep_n` remain.
    pub fn evict(&self, keep_n: usize) -> CodetectResult<u64> {
        let _write = self.lock.write();
        let table = self.table_name();
        let total = self
            .store
            .query_one(&format!("SELECT COUNT(*) FROM {table}"), &[])?
            .map_or(0, |r| r.get_i64(0).unwrap_or(0));
        #[allow(clippy::cast_possible_wrap)]
        let excess = total - keep_n as i64;
        if excess <= 0 {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM {table} WHERE content_hash IN \
             (SELECT content_hash FROM {table} ORDER BY last_accessed ASC, content_hash ASC LIMIT ?)"
        );
        self.store.execute(&sql, &[Value::Integer(excess)])
    }

    /// Drop every row produced by a model.
    pub fn evict_by_model(&self, model: &str) -> CodetectResult<u64> {
        let _write = self.lock.write();
        let table = self.table_name();
        self.store.execute(
            &format!("DELETE FROM {table} WHERE model = ?"),
            &[Value::from(model)],
        )
    }

    /// All hashes currently present in the configured dimension table.
    pub fn all_hashes(&self) -> CodetectResult<Vec<String>> {
        let _read = self.lock.read();
        let table = self.table_name();
        self.store
            .query(&format!("SELECT content_hash FROM {table}"), &[])?
            .iter()
            .map(|r| r.get_string(0))
            .collect()
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    /// Fire-and-forget access-stat update on a background thread. Takes
    /// no cache lock; failures are ignored.
    fn bump_access(&self, hashes: Vec<String>) {
        let store = Arc::clone(&self.store);
        let table = self.table_name();
        std::thread::spawn(move || {
            let now = now_epoch();
            for chunk in hashes.chunks(IN_BATCH) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let sql = format!(
                    "UPDATE {table} SET access_count = access_count + 1, last_accessed = ? \
                     WHERE content_hash IN ({placeholders})"
                );
                let mut params = vec![Value::Integer(now)];
                params.extend(chunk.iter().map(|h| Value::from(h.clone())));
                if let Err(e) = store.execute(&sql, &params) {
                    tracing::debug!(error = %e, "access-stat update failed");
                }
            }
        });
    }

    #[allow(clippy::cast_sign_loss)]
    fn decode_entry(row: &crate::storage::Row) -> CodetectResult<CacheEntry> {
        Ok(CacheEntry {
            content_hash: row.get_string(0)?,
            vector: row.get_vector(1)?,
            model: row.get_string(2)?,
            dimensions: row.get_i64(3)? as usize,
            created_at: row.get_i64(4)?,
            access_count: row.get_i64(5)?,
            last_accessed: row.get_i64(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;

    fn test_cache() -> EmbeddingCache {
        let store: Arc<dyn Store> =
            Arc::new(SqliteStore::open_in_memory().expect("open in-memory store"));
        EmbeddingCache::open(store, "test-model", 4).expect("open cache")
    }

    #[test]
    fn test_miss_returns_none() {
        let cache = test_cache();
        assert!(cache.get("deadbeef").expect("get").is_none());
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = test_cache();
        cache.put("h1", &[1.0, 2.0, 3.0, 4.0]).expect("put");
        let entry = cache.get("h1").expect("get").expect("hit");
        assert_eq!(entry.vector, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(entry.model, "test-model");
        assert_eq!(entry.dimensions, 4);
        assert_eq!(entry.access_count, 1);
    }

    #[test]
    fn test_put_conflict_bumps_access_count() {
        let cache = test_cache();
        cache.put("h1", &[1.0, 0.0, 0.0, 0.0]).expect("put");
        cache.put("h1", &[1.0, 0.0, 0.0, 0.0]).expect("put again");
        let entry = cache.get("h1").expect("get").expect("hit");
        assert_eq!(entry.access_count, 2);
    }

    #[test]
    fn test_get_batch_returns_only_present() {
        let cache = test_cache();
        let mut batch = HashMap::new();
        batch.insert("h1".to_string(), vec![1.0, 0.0, 0.0, 0.0]);
        batch.insert("h2".to_string(), vec![0.0, 1.0, 0.0, 0.0]);
        cache.put_batch(&batch).expect("put batch");

        let found = cache
            .get_batch(&["h1".into(), "h2".into(), "missing".into()])
            .expect("get batch");
        assert_eq!(found.len(), 2);
        assert!(found.contains_key("h1"));
        assert!(!found.contains_key("missing"));
    }

    #[test]
    fn test_evict_keeps_most_recent() {
        let cache = test_cache();
        for (i, h) in ["h1", "h2", "h3"].iter().enumerate() {
            cache.put(h, &[i as f32, 0.0, 0.0, 0.0]).expect("put");
            // Distinct last_accessed values.
            let table = cache.table_name();
            cache
                .store
                .execute(
                    &format!("UPDATE {table} SET last_accessed = ? WHERE content_hash = ?"),
                    &[Value::Integer(i as i64), Value::from(*h)],
                )
                .expect("age entry");
        }

        let deleted = cache.evict(1).expect("evict");
        assert_eq!(deleted, 2);
        assert!(cache.get("h3").expect("get").is_some());
        assert!(cache.get("h1").expect("get").is_none());
    }

    #[test]
    fn test_evict_noop_when_under_limit() {
        let cache = test_cache();
        cache.put("h1", &[1.0, 0.0, 0.0, 0.0]).expect("put");
        assert_eq!(cache.evict(10).expect("evict"), 0);
        assert!(cache.get("h1").expect("get").is_some());
    }

    #[test]
    fn test_evict_by_model() {
        let cache = test_cache();
        cache.put("h1", &[1.0, 0.0, 0.0, 0.0]).expect("put");
        let deleted = cache.evict_by_model("test-model").expect("evict by model");
        assert_eq!(deleted, 1);
        assert_eq!(cache.evict_by_model("other-model").expect("evict"), 0);
    }

    #[test]
    fn test_stats() {
        let cache = test_cache();
        assert_eq!(cache.stats().expect("stats").total_entries, 0);

        cache.put("h1", &[1.0, 0.0, 0.0, 0.0]).expect("put");
        cache.put("h2", &[0.0, 1.0, 0.0, 0.0]).expect("put");
        let stats = cache.stats().expect("stats");
        assert_eq!(stats.total_entries, 2);
        assert!(stats.avg_access_count >= 1.0);
        assert!(stats.oldest_entry > 0);
    }

    #[test]
    fn test_sqlite_uses_single_shared_table() {
        let cache = test_cache();
        assert_eq!(cache.table_name(), "embedding_cache");
        assert_eq!(cache.table_name_for(1536), "embedding_cache");
    }
}
