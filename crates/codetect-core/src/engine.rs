//! Engine wiring.
//!
//! Owns every subsystem for one repository and exposes the operations the
//! CLI and MCP surfaces call: `index`, `embed`, `stats`, and hybrid
//! `search`. Construction opens the configured storage backend, creates
//! the schema, and selects the vector index variant and embedding
//! provider from configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::{CacheStats, EmbeddingCache};
use crate::chunker;
use crate::config::Config;
use crate::embedder::{create_embedder, Embedder};
use crate::error::CodetectResult;
use crate::indexer::Indexer;
use crate::locations::{LocationStore, RepoLocationStats};
use crate::pipeline::EmbeddingPipeline;
use crate::repocfg::RepoConfigStore;
use crate::reranker::Reranker;
use crate::retriever::Retriever;
use crate::storage::{open_store, Store};
use crate::symbols::SymbolStore;
use crate::types::{Chunk, EmbedReport, IndexReport, SearchResult};
use crate::vector::{DistanceMetric, VectorIndex};

/// The main codetect engine for one repository.
pub struct Engine {
    config: Config,
    repo_key: String,
    store: Arc<dyn Store>,
    cache: Arc<EmbeddingCache>,
    locations: Arc<LocationStore>,
    symbols: Arc<SymbolStore>,
    repocfg: Arc<RepoConfigStore>,
    pipeline: Arc<EmbeddingPipeline>,
    retriever: Retriever,
    reranker: Reranker,
}

/// Status snapshot returned by `stats`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStats {
    /// Repository root being indexed.
    pub repo_root: String,
    /// Storage backend in use.
    pub backend: &'static str,
    /// Embedding provider identifier.
    pub provider: String,
    /// Embedding model name.
    pub model: String,
    /// Vector dimensionality.
    pub dimensions: usize,
    /// Whether backend-native KNN is active.
    pub native_vector_index: bool,
    /// Location-store statistics for the repo.
    pub locations: RepoLocationStats,
    /// Cache statistics for the active dimension table.
    pub cache: CacheStats,
    /// Symbols indexed for the repo.
    pub symbols: usize,
}

impl Engine {
    /// Create an engine for the given repository, loading configuration
    /// from its data directory and the environment.
    pub fn new(repo_path: &Path) -> CodetectResult<Self> {
        let config = Config::load(repo_path)?;
        Self::with_config(config)
    }

    /// Create an engine with explicit configuration (for testing).
    pub fn with_config(config: Config) -> CodetectResult<Self> {
        let repo_root = config
            .repo_path
            .canonicalize()
            .unwrap_or_else(|_| config.repo_path.clone());
        let repo_key = repo_root.to_string_lossy().replace('\\', "/");

        std::fs::create_dir_all(config.data_dir())?;
        let store = open_store(&config.storage, &config.db_path())?;

        let cache = Arc::new(EmbeddingCache::open(
            Arc::clone(&store),
            &config.embedding.model,
            config.embedding.dimensions,
        )?);
        let locations = Arc::new(LocationStore::open(Arc::clone(&store))?);
        let symbols = Arc::new(SymbolStore::open(Arc::clone(&store))?);
        let repocfg = Arc::new(RepoConfigStore::open(Arc::clone(&store))?);

        let vector_index = Arc::new(VectorIndex::for_store(
            Arc::clone(&store),
            cache.table_name(),
            DistanceMetric::Cosine,
        ));
        if let Err(e) = vector_index.create_index() {
            tracing::warn!(error = %e, "vector index creation failed, KNN may be unindexed");
        }

        let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);

        let pipeline = Arc::new(EmbeddingPipeline::new(
            Arc::clone(&cache),
            Arc::clone(&locations),
            Arc::clone(&vector_index),
            Arc::clone(&embedder),
            config.embedding.batch_size,
            config.embedding.workers,
        ));

        let retriever = Retriever::new(
            repo_root.clone(),
            repo_key.clone(),
            config.search.clone(),
            Arc::clone(&embedder),
            Arc::clone(&vector_index),
            Arc::clone(&locations),
            Arc::clone(&symbols),
        );
        let reranker = Reranker::new(&config.rerank);

        tracing::info!(
            repo = %repo_key,
            backend = store.dialect().name(),
            provider = embedder.provider_id(),
            model = %config.embedding.model,
            dimensions = config.embedding.dimensions,
            native_vectors = vector_index.supports_native(),
            "engine initialized"
        );

        Ok(Self {
            config,
            repo_key,
            store,
            cache,
            locations,
            symbols,
            repocfg,
            pipeline,
            retriever,
            reranker,
        })
    }

    /// Repository root string used for database partitioning.
    pub fn repo_key(&self) -> &str {
        &self.repo_key
    }

    /// Effective configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one indexing pass over the repository.
    pub fn index(&self, force: bool, cancel: &CancellationToken) -> CodetectResult<IndexReport> {
        self.indexer().index(force, cancel)
    }

    /// Chunk and embed one file (or the whole repository when `path` is
    /// `None`), bypassing Merkle change detection. Per-file location rows
    /// are replaced through the incremental re-index path.
    pub fn embed(
        &self,
        path: Option<&str>,
        cancel: &CancellationToken,
    ) -> CodetectResult<EmbedReport> {
        let paths: Vec<PathBuf> = match path {
            Some(single) => vec![PathBuf::from(single)],
            None => self.indexer().collect_files(),
        };

        let mut files: HashMap<String, Vec<Chunk>> = HashMap::new();
        for rel in &paths {
            let abs = self.config.repo_path.join(rel);
            let content = match std::fs::read_to_string(&abs) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(path = %abs.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };
            let rel_key = rel.to_string_lossy().replace('\\', "/");
            files.insert(rel_key, chunker::chunk_file(rel, &content)?);
        }
        self.pipeline.reindex_files(&self.repo_key, &files, cancel)
    }

    /// Hybrid search: three-signal retrieval, RRF fusion, optional
    /// reranking of the top candidates.
    ///
    /// Canceling mid-query abandons outstanding signals; whatever
    /// completed is still fused and returned.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        rerank: bool,
        cancel: &CancellationToken,
    ) -> CodetectResult<Vec<SearchResult>> {
        let fused = self.retriever.retrieve(query, limit.max(1), cancel);
        if !rerank || !self.reranker.is_enabled() || fused.is_empty() || cancel.is_cancelled() {
            return Ok(fused);
        }

        let texts = self.result_texts(&fused, self.config.rerank.top_k);
        Ok(self.reranker.rerank(query, fused, &texts))
    }

    /// Engine and index statistics.
    pub fn stats(&self) -> CodetectResult<EngineStats> {
        Ok(EngineStats {
            repo_root: self.repo_key.clone(),
            backend: self.store.dialect().name(),
            provider: self.retriever_provider(),
            model: self.config.embedding.model.clone(),
            dimensions: self.config.embedding.dimensions,
            native_vector_index: self.store.dialect().supports_native_vector(),
            locations: self.locations.repo_stats(&self.repo_key)?,
            cache: self.cache.stats()?,
            symbols: self.symbols.count(&self.repo_key)?,
        })
    }

    /// Delete cache entries no longer referenced by any location.
    pub fn cleanup_orphans(&self) -> CodetectResult<usize> {
        self.pipeline.cleanup_orphans()
    }

    fn indexer(&self) -> Indexer {
        Indexer::new(
            self.config.repo_path.clone(),
            self.repo_key.clone(),
            self.config.data_dir(),
            self.config.indexing.max_file_size,
            self.config.indexing.exclude_patterns.clone(),
            self.config.indexing.symbol_bin.clone(),
            self.config.embedding.model.clone(),
            self.config.embedding.dimensions,
            Arc::clone(&self.pipeline),
            Arc::clone(&self.locations),
            Arc::clone(&self.symbols),
            Arc::clone(&self.repocfg),
            Arc::clone(&self.cache),
        )
    }

    fn retriever_provider(&self) -> String {
        // The provider id lives on the embedder; the retriever shares it.
        match self.config.embedding.provider {
            crate::config::EmbeddingProviderKind::Ollama => "ollama".into(),
            crate::config::EmbeddingProviderKind::Litellm => "litellm".into(),
            crate::config::EmbeddingProviderKind::Lmstudio => "lmstudio".into(),
            crate::config::EmbeddingProviderKind::Off => "off".into(),
        }
    }

    /// Read the source text behind each of the first `top_k` results,
    /// keyed by result ID, for the reranker's pairwise scoring.
    fn result_texts(&self, results: &[SearchResult], top_k: usize) -> HashMap<String, String> {
        let mut file_cache: HashMap<String, Vec<String>> = HashMap::new();
        let mut texts = HashMap::new();

        for result in results.iter().take(top_k) {
            let lines = file_cache.entry(result.path.clone()).or_insert_with(|| {
                std::fs::read_to_string(self.config.repo_path.join(&result.path))
                    .map(|content| content.lines().map(str::to_string).collect())
                    .unwrap_or_default()
            });
            if lines.is_empty() {
                continue;
            }
            let start = result.start_line.saturating_sub(1) as usize;
            let end = (result.end_line as usize).min(lines.len());
            if start >= end {
                continue;
            }
            texts.insert(result.id.clone(), lines[start..end].join("\n"));
        }
        texts
    }
}
