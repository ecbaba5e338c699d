//! Configuration loading and validation.
//!
//! Configuration is resolved with the following precedence (highest wins):
//!
//! 1. Environment variables (`DB_*`, `EMBEDDING_*`, `SEARCH_*`, `RERANK_*`, `LOG_*`)
//! 2. Project config (`<repo>/.codetect/config.toml`)
//! 3. User config (`~/.config/codetect/config.toml`)
//! 4. Compiled-in defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CodetectError, CodetectResult};

/// Name of the per-repository data directory.
pub const DATA_DIR_NAME: &str = ".codetect";

/// Top-level configuration for codetect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Repository root path to index.
    pub repo_path: PathBuf,

    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Embedding provider configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Indexing configuration.
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Search configuration.
    #[serde(default)]
    pub search: SearchConfig,

    /// Reranker configuration.
    #[serde(default)]
    pub rerank: RerankConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which database backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbBackend {
    /// Embedded single-file SQLite store.
    Sqlite,
    /// Networked PostgreSQL store with the pgvector extension.
    Postgres,
}

/// Storage backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend selector (`DB_TYPE`).
    #[serde(default = "StorageConfig::default_backend")]
    pub backend: DbBackend,

    /// Network DSN for the postgres backend (`DB_DSN`).
    #[serde(default)]
    pub dsn: Option<String>,

    /// Override path for the sqlite database file (`DB_PATH`). When unset,
    /// the file lives at `<repo>/.codetect/index.db`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Self::default_backend(),
            dsn: None,
            db_path: None,
        }
    }
}

impl StorageConfig {
    fn default_backend() -> DbBackend {
        DbBackend::Sqlite
    }
}

/// Embedding provider selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Ollama `/api/embed` endpoint.
    Ollama,
    /// LiteLLM proxy (`/v1/embeddings`, optional bearer key).
    Litellm,
    /// LM Studio local server (`/v1/embeddings`).
    Lmstudio,
    /// Embedding disabled; semantic search degrades to empty.
    Off,
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider selector (`EMBEDDING_PROVIDER`).
    #[serde(default = "EmbeddingConfig::default_provider")]
    pub provider: EmbeddingProviderKind,

    /// Model name passed to the provider (`EMBEDDING_MODEL`).
    #[serde(default = "EmbeddingConfig::default_model")]
    pub model: String,

    /// Output vector dimensions (`VECTOR_DIMENSIONS`).
    #[serde(default = "EmbeddingConfig::default_dimensions")]
    pub dimensions: usize,

    /// Base URL for the ollama provider (`OLLAMA_URL`).
    #[serde(default = "EmbeddingConfig::default_ollama_url")]
    pub ollama_url: String,

    /// Base URL for the litellm / lmstudio providers (`LITELLM_URL`).
    #[serde(default)]
    pub litellm_url: Option<String>,

    /// Bearer key for the litellm provider (`LITELLM_API_KEY`).
    #[serde(default)]
    pub litellm_api_key: Option<String>,

    /// Prefix prepended to single-text (query) embedding calls. Some
    /// models distinguish query and document inputs; the prefix is a
    /// provider option, never inferred from the model name.
    #[serde(default)]
    pub query_prefix: Option<String>,

    /// Batch size for provider calls.
    #[serde(default = "EmbeddingConfig::default_batch_size")]
    pub batch_size: usize,

    /// Worker threads for parallel batch embedding (1 = sequential).
    #[serde(default = "EmbeddingConfig::default_workers")]
    pub workers: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: Self::default_provider(),
            model: Self::default_model(),
            dimensions: Self::default_dimensions(),
            ollama_url: Self::default_ollama_url(),
            litellm_url: None,
            litellm_api_key: None,
            query_prefix: None,
            batch_size: Self::default_batch_size(),
            workers: Self::default_workers(),
        }
    }
}

impl EmbeddingConfig {
    fn default_provider() -> EmbeddingProviderKind {
        EmbeddingProviderKind::Ollama
    }
    fn default_model() -> String {
        "nomic-embed-text".into()
    }
    fn default_dimensions() -> usize {
        768
    }
    fn default_ollama_url() -> String {
        "http://localhost:11434".into()
    }
    fn default_batch_size() -> usize {
        32
    }
    fn default_workers() -> usize {
        4
    }
}

/// Indexing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Maximum file size to index (in bytes). Larger files are skipped.
    #[serde(default = "IndexingConfig::default_max_file_size")]
    pub max_file_size: u64,

    /// Extra glob patterns excluded from indexing, on top of gitignore
    /// rules and the builtin deny-list.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// External symbol extractor binary. Emits one JSON tag record per
    /// line on stdout. An absent binary degrades the symbol signal.
    #[serde(default = "IndexingConfig::default_symbol_bin")]
    pub symbol_bin: String,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_file_size: Self::default_max_file_size(),
            exclude_patterns: Vec::new(),
            symbol_bin: Self::default_symbol_bin(),
        }
    }
}

impl IndexingConfig {
    fn default_max_file_size() -> u64 {
        5 * 1024 * 1024 // 5MB
    }
    fn default_symbol_bin() -> String {
        "ctags".into()
    }
}

/// Search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Maximum literal (regex) results (`SEARCH_KEYWORD_LIMIT`).
    #[serde(default = "SearchConfig::default_keyword_limit")]
    pub keyword_limit: usize,

    /// Maximum semantic (vector) results (`SEARCH_SEMANTIC_LIMIT`).
    #[serde(default = "SearchConfig::default_semantic_limit")]
    pub semantic_limit: usize,

    /// Maximum symbol results (`SEARCH_SYMBOL_LIMIT`).
    #[serde(default = "SearchConfig::default_symbol_limit")]
    pub symbol_limit: usize,

    /// RRF weight for the literal signal (`SEARCH_WEIGHT_KEYWORD`).
    #[serde(default = "SearchConfig::default_weight")]
    pub weight_keyword: f64,

    /// RRF weight for the semantic signal (`SEARCH_WEIGHT_SEMANTIC`).
    #[serde(default = "SearchConfig::default_weight")]
    pub weight_semantic: f64,

    /// RRF weight for the symbol signal (`SEARCH_WEIGHT_SYMBOL`).
    #[serde(default = "SearchConfig::default_weight")]
    pub weight_symbol: f64,

    /// Run the three signals concurrently (`SEARCH_PARALLEL`).
    #[serde(default = "SearchConfig::default_parallel")]
    pub parallel: bool,

    /// Per-query deadline in milliseconds (`SEARCH_TIMEOUT_MS`).
    #[serde(default = "SearchConfig::default_timeout_ms")]
    pub timeout_ms: u64,

    /// RRF constant k.
    #[serde(default = "SearchConfig::default_rrf_k")]
    pub rrf_k: u32,

    /// External literal search binary (ripgrep-compatible output:
    /// `path:line:text`, paths relative to the search root).
    #[serde(default = "SearchConfig::default_literal_bin")]
    pub literal_bin: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            keyword_limit: Self::default_keyword_limit(),
            semantic_limit: Self::default_semantic_limit(),
            symbol_limit: Self::default_symbol_limit(),
            weight_keyword: Self::default_weight(),
            weight_semantic: Self::default_weight(),
            weight_symbol: Self::default_weight(),
            parallel: Self::default_parallel(),
            timeout_ms: Self::default_timeout_ms(),
            rrf_k: Self::default_rrf_k(),
            literal_bin: Self::default_literal_bin(),
        }
    }
}

impl SearchConfig {
    fn default_keyword_limit() -> usize {
        20
    }
    fn default_semantic_limit() -> usize {
        20
    }
    fn default_symbol_limit() -> usize {
        20
    }
    fn default_weight() -> f64 {
        1.0
    }
    fn default_parallel() -> bool {
        true
    }
    fn default_timeout_ms() -> u64 {
        5_000
    }
    fn default_rrf_k() -> u32 {
        60
    }
    fn default_literal_bin() -> String {
        "rg".into()
    }
}

/// Reranker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    /// Whether reranking is enabled (`RERANK_ENABLED`). Off by default.
    #[serde(default)]
    pub enabled: bool,

    /// Rerank model name (`RERANK_MODEL`).
    #[serde(default = "RerankConfig::default_model")]
    pub model: String,

    /// Number of fused candidates to rescore (`RERANK_TOP_K`).
    #[serde(default = "RerankConfig::default_top_k")]
    pub top_k: usize,

    /// Minimum rerank score to keep a rescored result (`RERANK_THRESHOLD`).
    #[serde(default = "RerankConfig::default_threshold")]
    pub threshold: f64,

    /// Base URL of the pairwise scoring endpoint (`RERANK_BASE_URL`).
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: Self::default_model(),
            top_k: Self::default_top_k(),
            threshold: Self::default_threshold(),
            base_url: None,
        }
    }
}

impl RerankConfig {
    fn default_model() -> String {
        "bge-reranker-v2-m3".into()
    }
    fn default_top_k() -> usize {
        10
    }
    fn default_threshold() -> f64 {
        0.0
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (`LOG_LEVEL`: debug, info, warn, error).
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Output format (`LOG_FORMAT`: text or json).
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: Self::default_format(),
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".into()
    }
    fn default_format() -> String {
        "text".into()
    }
}

impl Config {
    /// Load configuration for a repository: defaults, then the project
    /// config file, then environment overrides.
    pub fn load(repo_path: &Path) -> CodetectResult<Self> {
        let mut config = Self::defaults(repo_path);

        if let Some(user_config_dir) = dirs::config_dir() {
            let user_config = user_config_dir.join("codetect").join("config.toml");
            if user_config.exists() {
                config.merge_from_file(&user_config)?;
            }
        }

        let project_config = repo_path.join(DATA_DIR_NAME).join("config.toml");
        if project_config.exists() {
            config.merge_from_file(&project_config)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Create a default configuration for the given repo path.
    pub fn defaults(repo_path: &Path) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            indexing: IndexingConfig::default(),
            search: SearchConfig::default(),
            rerank: RerankConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Returns the per-repository data directory (`<repo>/.codetect`).
    pub fn data_dir(&self) -> PathBuf {
        self.repo_path.join(DATA_DIR_NAME)
    }

    /// Returns the effective sqlite database path.
    pub fn db_path(&self) -> PathBuf {
        self.storage
            .db_path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("index.db"))
    }

    /// Merge values from a TOML config file (non-destructive overlay).
    fn merge_from_file(&mut self, path: &Path) -> CodetectResult<()> {
        let content = std::fs::read_to_string(path)?;
        let overlay: toml::Value = toml::from_str(&content).map_err(|e| CodetectError::Config {
            details: format!("invalid TOML in {}: {e}", path.display()),
        })?;

        if let Some(storage) = overlay.get("storage") {
            if let Ok(parsed) = storage.clone().try_into::<StorageConfig>() {
                self.storage = parsed;
            }
        }
        if let Some(embedding) = overlay.get("embedding") {
            if let Ok(parsed) = embedding.clone().try_into::<EmbeddingConfig>() {
                self.embedding = parsed;
            }
        }
        if let Some(indexing) = overlay.get("indexing") {
            if let Ok(parsed) = indexing.clone().try_into::<IndexingConfig>() {
                self.indexing = parsed;
            }
        }
        if let Some(search) = overlay.get("search") {
            if let Ok(parsed) = search.clone().try_into::<SearchConfig>() {
                self.search = parsed;
            }
        }
        if let Some(rerank) = overlay.get("rerank") {
            if let Ok(parsed) = rerank.clone().try_into::<RerankConfig>() {
                self.rerank = parsed;
            }
        }
        if let Some(logging) = overlay.get("logging") {
            if let Ok(parsed) = logging.clone().try_into::<LoggingConfig>() {
                self.logging = parsed;
            }
        }

        Ok(())
    }

    /// Apply environment variable overrides.
    #[allow(clippy::too_many_lines)]
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DB_TYPE") {
            match v.as_str() {
                "postgres" => self.storage.backend = DbBackend::Postgres,
                "sqlite" => self.storage.backend = DbBackend::Sqlite,
                other => tracing::warn!(value = other, "unknown DB_TYPE, keeping default"),
            }
        }
        if let Ok(v) = std::env::var("DB_DSN") {
            self.storage.dsn = Some(v);
        }
        if let Ok(v) = std::env::var("DB_PATH") {
            self.storage.db_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env_parse::<usize>("VECTOR_DIMENSIONS") {
            self.embedding.dimensions = v;
        }

        if let Ok(v) = std::env::var("EMBEDDING_PROVIDER") {
            match v.as_str() {
                "ollama" => self.embedding.provider = EmbeddingProviderKind::Ollama,
                "litellm" => self.embedding.provider = EmbeddingProviderKind::Litellm,
                "lmstudio" => self.embedding.provider = EmbeddingProviderKind::Lmstudio,
                "off" => self.embedding.provider = EmbeddingProviderKind::Off,
                other => {
                    tracing::warn!(value = other, "unknown EMBEDDING_PROVIDER, keeping default");
                }
            }
        }
        if let Ok(v) = std::env::var("EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("OLLAMA_URL") {
            self.embedding.ollama_url = v;
        }
        if let Ok(v) = std::env::var("LITELLM_URL") {
            self.embedding.litellm_url = Some(v);
        }
        if let Ok(v) = std::env::var("LITELLM_API_KEY") {
            self.embedding.litellm_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("EMBEDDING_QUERY_PREFIX") {
            self.embedding.query_prefix = Some(v);
        }

        if let Some(v) = env_parse::<usize>("SEARCH_KEYWORD_LIMIT") {
            self.search.keyword_limit = v;
        }
        if let Some(v) = env_parse::<usize>("SEARCH_SEMANTIC_LIMIT") {
            self.search.semantic_limit = v;
        }
        if let Some(v) = env_parse::<usize>("SEARCH_SYMBOL_LIMIT") {
            self.search.symbol_limit = v;
        }
        if let Some(v) = env_parse::<f64>("SEARCH_WEIGHT_KEYWORD") {
            self.search.weight_keyword = v;
        }
        if let Some(v) = env_parse::<f64>("SEARCH_WEIGHT_SEMANTIC") {
            self.search.weight_semantic = v;
        }
        if let Some(v) = env_parse::<f64>("SEARCH_WEIGHT_SYMBOL") {
            self.search.weight_symbol = v;
        }
        if let Some(v) = env_parse::<bool>("SEARCH_PARALLEL") {
            self.search.parallel = v;
        }
        if let Some(v) = env_parse::<u64>("SEARCH_TIMEOUT_MS") {
            self.search.timeout_ms = v;
        }

        if let Some(v) = env_parse::<bool>("RERANK_ENABLED") {
            self.rerank.enabled = v;
        }
        if let Ok(v) = std::env::var("RERANK_MODEL") {
            self.rerank.model = v;
        }
        if let Some(v) = env_parse::<usize>("RERANK_TOP_K") {
            self.rerank.top_k = v;
        }
        if let Some(v) = env_parse::<f64>("RERANK_THRESHOLD") {
            self.rerank.threshold = v;
        }
        if let Ok(v) = std::env::var("RERANK_BASE_URL") {
            self.rerank.base_url = Some(v);
        }

        if let Ok(v) = std::env::var("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Ok(v) = std::env::var("LOG_FORMAT") {
            self.logging.format = v;
        }
    }
}

/// Parse an environment variable, logging and ignoring malformed values.
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "ignoring unparsable environment override");
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::defaults(Path::new("/tmp/test-repo"));
        assert_eq!(config.storage.backend, DbBackend::Sqlite);
        assert_eq!(config.embedding.dimensions, 768);
        assert_eq!(config.search.rrf_k, 60);
        assert!(!config.rerank.enabled);
        assert_eq!(config.embedding.ollama_url, "http://localhost:11434");
    }

    #[test]
    fn test_data_dir_and_db_path() {
        let config = Config::defaults(Path::new("/tmp/test-repo"));
        assert_eq!(config.data_dir(), Path::new("/tmp/test-repo/.codetect"));
        assert_eq!(
            config.db_path(),
            Path::new("/tmp/test-repo/.codetect/index.db")
        );
    }

    #[test]
    fn test_merge_from_file_overlay() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let data_dir = dir.path().join(DATA_DIR_NAME);
        std::fs::create_dir_all(&data_dir).expect("mkdir");
        std::fs::write(
            data_dir.join("config.toml"),
            "[search]\nkeyword_limit = 7\n[embedding]\nmodel = \"custom-model\"\n",
        )
        .expect("write config");

        let config = Config::load(dir.path()).expect("load config");
        assert_eq!(config.search.keyword_limit, 7);
        assert_eq!(config.embedding.model, "custom-model");
        // Untouched sections keep defaults.
        assert_eq!(config.storage.backend, DbBackend::Sqlite);
    }
}
