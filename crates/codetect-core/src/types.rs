//! Core domain types shared across all codetect-core subsystems.
//!
//! These types form the API contract between modules. Changing them
//! requires updating all consumers, so they should be stable and minimal.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Source languages with a registered tree-sitter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Python (.py)
    Python,
    /// TypeScript (.ts, .tsx)
    TypeScript,
    /// JavaScript (.js, .jsx)
    JavaScript,
    /// Rust (.rs)
    Rust,
    /// Go (.go)
    Go,
    /// Java (.java)
    Java,
    /// C (.c, .h)
    C,
    /// C++ (.cpp, .cc, .cxx, .hpp, .hxx)
    Cpp,
    /// C# (.cs)
    CSharp,
    /// Ruby (.rb)
    Ruby,
    /// Unknown / unsupported -- falls back to line-window chunking.
    Unknown,
}

impl Language {
    /// Detect language from file extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "py" => Self::Python,
            "ts" | "tsx" => Self::TypeScript,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "rs" => Self::Rust,
            "go" => Self::Go,
            "java" => Self::Java,
            "c" | "h" => Self::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => Self::Cpp,
            "cs" => Self::CSharp,
            "rb" => Self::Ruby,
            _ => Self::Unknown,
        }
    }

    /// Returns the language identifier string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::TypeScript => "typescript",
            Self::JavaScript => "javascript",
            Self::Rust => "rust",
            Self::Go => "go",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Ruby => "ruby",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// An immutable, hashable region of a source file.
///
/// Two chunks with identical content share one cache entry regardless of
/// where they occur; `content_hash` is purely a function of `content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Path relative to the repository root.
    pub path: PathBuf,
    /// Starting line (1-indexed, inclusive).
    pub start_line: u32,
    /// Ending line (1-indexed, inclusive).
    pub end_line: u32,
    /// Starting byte offset into the file.
    pub start_byte: usize,
    /// Ending byte offset (exclusive).
    pub end_byte: usize,
    /// Verbatim source content of this chunk.
    pub content: String,
    /// SHA-256 of `content` as lowercase hex.
    pub content_hash: String,
    /// AST node type that produced this chunk (`function_item`, `gap`,
    /// `block`, ...).
    pub node_type: String,
    /// Symbol name extracted from the node's name field, if any.
    pub node_name: Option<String>,
    /// Language tag for this chunk.
    pub language: Language,
}

/// Compute the SHA-256 content hash of a chunk body as lowercase hex.
pub fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Cache and location rows
// ---------------------------------------------------------------------------

/// A row in the content-addressed embedding cache.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// SHA-256 content hash (primary key within one dimension table).
    pub content_hash: String,
    /// The embedding vector.
    pub vector: Vec<f32>,
    /// Model that produced the vector.
    pub model: String,
    /// Vector dimensionality.
    pub dimensions: usize,
    /// Unix seconds when the entry was first inserted.
    pub created_at: i64,
    /// Number of cache hits recorded for this entry.
    pub access_count: i64,
    /// Unix seconds of the most recent hit.
    pub last_accessed: i64,
}

/// An occurrence of cached content at a concrete file location.
#[derive(Debug, Clone)]
pub struct Location {
    /// Database ID.
    pub id: i64,
    /// Absolute repository root this location belongs to.
    pub repo_root: String,
    /// Path relative to the repository root.
    pub path: String,
    /// Starting line (1-indexed, inclusive).
    pub start_line: u32,
    /// Ending line (1-indexed, inclusive).
    pub end_line: u32,
    /// Content hash of the chunk stored at this location.
    pub content_hash: String,
    /// AST node type of the chunk, if known.
    pub node_type: Option<String>,
    /// Symbol name of the chunk, if known.
    pub node_name: Option<String>,
    /// Language tag of the chunk, if known.
    pub language: Option<String>,
    /// Unix seconds when the row was inserted.
    pub created_at: i64,
}

/// A symbol record produced by the external extractor subprocess.
#[derive(Debug, Clone)]
pub struct SymbolRecord {
    /// Short symbol name.
    pub name: String,
    /// Path relative to the repository root.
    pub path: String,
    /// Symbol kind reported by the extractor (`function`, `struct`, ...).
    pub kind: String,
    /// Line of the definition (1-indexed).
    pub line: u32,
    /// Language reported by the extractor.
    pub language: Option<String>,
    /// Enclosing scope, if any.
    pub scope: Option<String>,
    /// Signature string, if the extractor emits one.
    pub signature: Option<String>,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Report produced by one `embed_chunks` run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EmbedReport {
    /// Number of non-empty chunks handed to the pipeline.
    pub total: usize,
    /// Chunks whose hash was already cached.
    pub cache_hits: usize,
    /// Unique contents actually sent to the provider.
    pub embedded: usize,
    /// Empty chunks skipped before hashing.
    pub skipped: usize,
    /// Data errors tolerated during the run.
    pub errors: usize,
    /// Seconds spent in provider calls.
    pub embed_time: f64,
    /// Seconds spent in cache lookups and upserts.
    pub cache_time: f64,
    /// Wall-clock seconds for the whole run.
    pub duration: f64,
    /// `cache_hits / total * 100`, or 0 when total is 0.
    pub hit_rate: f64,
    /// `total / duration`, or 0 when duration is 0.
    pub chunks_per_sec: f64,
}

impl EmbedReport {
    /// Fill in the derived rate fields from the counters.
    pub fn finalize(&mut self) {
        if self.total > 0 {
            #[allow(clippy::cast_precision_loss)]
            {
                self.hit_rate = self.cache_hits as f64 / self.total as f64 * 100.0;
            }
        }
        if self.duration > 0.0 {
            #[allow(clippy::cast_precision_loss)]
            {
                self.chunks_per_sec = self.total as f64 / self.duration;
            }
        }
    }
}

/// How much of the repository an indexing run touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Root hashes matched; nothing to do.
    None,
    /// A prior tree existed and only the diff was re-indexed.
    Incremental,
    /// No prior tree (or `force`); every file was treated as added.
    Full,
}

/// Report produced by one indexing run.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    /// Whether the run was a no-op, incremental, or full.
    pub change_type: ChangeType,
    /// Added or modified files that were re-chunked and embedded.
    pub files_processed: usize,
    /// Deleted files whose locations were removed.
    pub files_deleted: usize,
    /// Chunks produced across all processed files.
    pub chunks_created: usize,
    /// Cache hits reported by the pipeline.
    pub cache_hits: usize,
    /// Chunks embedded by the pipeline.
    pub chunks_embedded: usize,
    /// Wall-clock seconds for the run.
    pub duration: f64,
}

// ---------------------------------------------------------------------------
// Retrieval types
// ---------------------------------------------------------------------------

/// One of the three retrieval producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    /// Regex match from the external search subprocess.
    Literal,
    /// Vector KNN neighbour resolved through the location store.
    Semantic,
    /// LIKE match on the symbol index.
    Symbol,
}

impl Signal {
    /// Stable identifier used in result payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Literal => "literal",
            Self::Semantic => "semantic",
            Self::Symbol => "symbol",
        }
    }
}

/// A raw hit from a single retrieval signal, before fusion.
#[derive(Debug, Clone)]
pub struct SignalHit {
    /// Fusion ID; stable within one query so duplicate hits merge.
    pub id: String,
    /// Path relative to the repository root.
    pub path: String,
    /// Starting line of the hit.
    pub start_line: u32,
    /// Ending line of the hit (equals `start_line` for line hits).
    pub end_line: u32,
    /// Signal-native score (similarity, 1/rank, ...).
    pub score: f64,
    /// Short preview text for the hit.
    pub preview: String,
}

/// A fused search result returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// Fusion ID of the winning hit.
    pub id: String,
    /// Path relative to the repository root.
    pub path: String,
    /// Starting line.
    pub start_line: u32,
    /// Ending line.
    pub end_line: u32,
    /// Fused score (RRF, possibly replaced by the reranker).
    pub score: f64,
    /// Signals that contributed to this result.
    pub sources: Vec<Signal>,
    /// Preview text from the best-ranked contributing hit.
    pub preview: String,
}

// ---------------------------------------------------------------------------
// Clock helper
// ---------------------------------------------------------------------------

/// Current time as Unix seconds. Saturates to 0 before the epoch.
pub fn now_epoch() -> i64 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    i64::try_from(secs).unwrap_or(i64::MAX)
}
