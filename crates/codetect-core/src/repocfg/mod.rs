//! Per-repository embedding configuration.
//!
//! Records which model and dimension a repo's embeddings were produced
//! with. Read before any indexing or embedding; a mismatch against the
//! current configuration migrates the repo (drop its rows in the former
//! dimension table plus the config row) and forces a full re-index.

use std::sync::Arc;

use crate::cache::EmbeddingCache;
use crate::error::CodetectResult;
use crate::locations::LocationStore;
use crate::storage::{ColumnSpec, ColumnType, Store, Value};
use crate::types::now_epoch;

/// Table name for repo embedding configs.
const TABLE: &str = "repo_embedding_configs";

/// One repo's recorded embedding configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoEmbeddingConfig {
    /// Repository root (primary key).
    pub repo_root: String,
    /// Model the repo's embeddings were produced with.
    pub model: String,
    /// Vector dimensionality of those embeddings.
    pub dimensions: usize,
    /// Unix seconds of the last update.
    pub updated_at: i64,
}

/// SQL-backed store for repo embedding configs.
pub struct RepoConfigStore {
    store: Arc<dyn Store>,
}

impl RepoConfigStore {
    /// Open the store, creating the table if needed.
    pub fn open(store: Arc<dyn Store>) -> CodetectResult<Self> {
        let dialect = store.dialect();
        let columns = [
            ColumnSpec::new("repo_root", ColumnType::Text).primary(),
            ColumnSpec::new("model", ColumnType::Text),
            ColumnSpec::new("dimensions", ColumnType::Integer),
            ColumnSpec::new("updated_at", ColumnType::Integer),
        ];
        store.execute(&dialect.create_table(TABLE, &columns), &[])?;
        Ok(Self { store })
    }

    /// Fetch the recorded config for a repo, if any.
    #[allow(clippy::cast_sign_loss)]
    pub fn get(&self, repo_root: &str) -> CodetectResult<Option<RepoEmbeddingConfig>> {
        let sql = format!(
            "SELECT repo_root, model, dimensions, updated_at FROM {TABLE} WHERE repo_root = ?"
        );
        let row = self.store.query_one(&sql, &[Value::from(repo_root)])?;
        row.map(|r| {
            Ok(RepoEmbeddingConfig {
                repo_root: r.get_string(0)?,
                model: r.get_string(1)?,
                dimensions: r.get_i64(2)? as usize,
                updated_at: r.get_i64(3)?,
            })
        })
        .transpose()
    }

    /// Record the current model and dimension for a repo.
    pub fn set(&self, repo_root: &str, model: &str, dimensions: usize) -> CodetectResult<()> {
        let sql = self.store.dialect().upsert_sql(
            TABLE,
            &["repo_root", "model", "dimensions", "updated_at"],
            &["repo_root"],
            None,
        );
        #[allow(clippy::cast_possible_wrap)]
        self.store.execute(
            &sql,
            &[
                Value::from(repo_root),
                Value::from(model),
                Value::Integer(dimensions as i64),
                Value::Integer(now_epoch()),
            ],
        )?;
        Ok(())
    }

    /// Remove a repo's config row.
    pub fn delete(&self, repo_root: &str) -> CodetectResult<u64> {
        self.store.execute(
            &format!("DELETE FROM {TABLE} WHERE repo_root = ?"),
            &[Value::from(repo_root)],
        )
    }

    /// Whether the recorded config conflicts with the current model and
    /// dimension. A missing record is not a mismatch.
    pub fn detect_mismatch(
        &self,
        repo_root: &str,
        model: &str,
        dimensions: usize,
    ) -> CodetectResult<Option<RepoEmbeddingConfig>> {
        Ok(self
            .get(repo_root)?
            .filter(|existing| existing.model != model || existing.dimensions != dimensions))
    }

    /// Migrate a repo off a stale embedding config: delete its cache rows
    /// in the former dimension table, its locations, and its config row.
    /// The caller restarts indexing as a full run afterwards.
    pub fn migrate(
        &self,
        stale: &RepoEmbeddingConfig,
        cache: &EmbeddingCache,
        locations: &LocationStore,
    ) -> CodetectResult<()> {
        let hashes: Vec<String> = locations
            .referenced_hashes(&stale.repo_root)?
            .into_iter()
            .collect();
        let dropped = cache.delete_batch_for_dimension(stale.dimensions, &hashes)?;
        let removed = locations.delete_by_repo(&stale.repo_root)?;
        self.delete(&stale.repo_root)?;
        tracing::info!(
            repo = %stale.repo_root,
            old_model = %stale.model,
            old_dimensions = stale.dimensions,
            cache_rows = dropped,
            locations = removed,
            "migrated repo off stale embedding config"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use crate::types::{content_hash, Chunk, Language};
    use std::path::PathBuf;

    fn test_store() -> Arc<dyn Store> {
        Arc::new(SqliteStore::open_in_memory().expect("open in-memory store"))
    }

    #[test]
    fn test_get_set_roundtrip() {
        let configs = RepoConfigStore::open(test_store()).expect("open");
        assert!(configs.get("/repo").expect("get").is_none());

        configs.set("/repo", "nomic-embed-text", 768).expect("set");
        let config = configs.get("/repo").expect("get").expect("present");
        assert_eq!(config.model, "nomic-embed-text");
        assert_eq!(config.dimensions, 768);

        configs.set("/repo", "other-model", 1024).expect("update");
        let config = configs.get("/repo").expect("get").expect("present");
        assert_eq!(config.model, "other-model");
        assert_eq!(config.dimensions, 1024);
    }

    #[test]
    fn test_detect_mismatch() {
        let configs = RepoConfigStore::open(test_store()).expect("open");
        assert!(configs
            .detect_mismatch("/repo", "m", 768)
            .expect("detect")
            .is_none());

        configs.set("/repo", "m", 768).expect("set");
        assert!(configs
            .detect_mismatch("/repo", "m", 768)
            .expect("detect")
            .is_none());
        assert!(configs
            .detect_mismatch("/repo", "m", 1024)
            .expect("detect")
            .is_some());
        assert!(configs
            .detect_mismatch("/repo", "m2", 768)
            .expect("detect")
            .is_some());
    }

    #[test]
    fn test_migrate_drops_repo_rows() {
        let store = test_store();
        let configs = RepoConfigStore::open(Arc::clone(&store)).expect("open configs");
        let cache = EmbeddingCache::open(Arc::clone(&store), "old-model", 4).expect("open cache");
        let locations = LocationStore::open(Arc::clone(&store)).expect("open locations");

        let content = "func a() {}";
        cache.put(&content_hash(content), &[1.0, 0.0, 0.0, 0.0]).expect("put");
        locations
            .upsert_chunks(
                "/repo",
                &[Chunk {
                    path: PathBuf::from("a.go"),
                    start_line: 1,
                    end_line: 10,
                    start_byte: 0,
                    end_byte: content.len(),
                    content: content.to_string(),
                    content_hash: content_hash(content),
                    node_type: "function_declaration".to_string(),
                    node_name: Some("a".to_string()),
                    language: Language::Go,
                }],
            )
            .expect("upsert");
        configs.set("/repo", "old-model", 4).expect("set");

        let stale = configs
            .detect_mismatch("/repo", "new-model", 8)
            .expect("detect")
            .expect("mismatch");
        configs.migrate(&stale, &cache, &locations).expect("migrate");

        assert!(configs.get("/repo").expect("get").is_none());
        assert!(locations.get_by_repo("/repo").expect("locations").is_empty());
        assert!(cache.get(&content_hash(content)).expect("get").is_none());
    }
}
