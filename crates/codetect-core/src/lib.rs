//! # codetect-core
//!
//! Indexing and retrieval core for codetect, a local code-intelligence
//! service for LLM coding agents.
//!
//! The engine turns a source repository into a persistent, incrementally
//! updatable index with three retrieval signals -- literal (regex),
//! lexical symbol lookup, and semantic vector similarity -- fused into a
//! single ranked list.
//!
//! ## Architecture
//!
//! - **`config`** -- Configuration loading and environment overrides
//! - **`storage`** -- SQL dialect abstraction over SQLite and PostgreSQL
//! - **`merkle`** -- Content-hash tree for change detection
//! - **`chunker`** -- AST-boundary chunking with gap filling and fallback
//! - **`cache`** -- Content-addressed embedding cache
//! - **`locations`** -- Location rows mapping code spans to cache hashes
//! - **`symbols`** -- Symbol index fed by the external extractor
//! - **`vector`** -- Native / brute-force KNN over cached vectors
//! - **`embedder`** -- HTTP embedding providers
//! - **`pipeline`** -- Hash, look up, embed, upsert
//! - **`indexer`** -- Per-repository indexing workflow
//! - **`retriever`** -- Three-signal retrieval with RRF fusion
//! - **`reranker`** -- Optional pairwise rescoring of fused results
//! - **`repocfg`** -- Per-repo embedding model bookkeeping
//!
//! Each module exposes a struct the engine wires together; modules
//! communicate via the types in the `types` module.

pub mod config;
pub mod error;
pub mod types;

// Core subsystems
pub mod cache;
pub mod chunker;
pub mod embedder;
pub mod engine;
pub mod indexer;
pub mod locations;
pub mod merkle;
pub mod pipeline;
pub mod repocfg;
pub mod reranker;
pub mod retriever;
pub mod storage;
pub mod symbols;
pub mod vector;

/// Re-export the primary engine interface.
pub use config::Config;
pub use engine::Engine;
pub use error::CodetectError;
