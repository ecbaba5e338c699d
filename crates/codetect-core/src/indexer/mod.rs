//! Indexer orchestrator.
//!
//! Top-level write workflow for one repository: walk files honoring
//! ignore rules, build the new Merkle tree, diff against the stored tree,
//! re-chunk changed files through the embedding pipeline, refresh the
//! symbol index, and persist the tree -- with backup -- only on full
//! success, so a failed or canceled run retries the same changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use ignore::WalkBuilder;
use tokio_util::sync::CancellationToken;

use crate::cache::EmbeddingCache;
use crate::chunker;
use crate::error::{CodetectError, CodetectResult};
use crate::locations::LocationStore;
use crate::merkle::{self, ChangeSet, MerkleTree};
use crate::pipeline::EmbeddingPipeline;
use crate::repocfg::RepoConfigStore;
use crate::symbols::{SymbolExtractor, SymbolStore};
use crate::types::{ChangeType, Chunk, IndexReport};

/// Per-repository indexing workflow.
pub struct Indexer {
    repo_root: PathBuf,
    repo_key: String,
    data_dir: PathBuf,
    max_file_size: u64,
    exclude_patterns: Vec<String>,
    symbol_bin: String,
    model: String,
    dimensions: usize,
    pipeline: Arc<EmbeddingPipeline>,
    locations: Arc<LocationStore>,
    symbols: Arc<SymbolStore>,
    repocfg: Arc<RepoConfigStore>,
    cache: Arc<EmbeddingCache>,
}

impl Indexer {
    /// Wire an indexer over its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo_root: PathBuf,
        repo_key: String,
        data_dir: PathBuf,
        max_file_size: u64,
        exclude_patterns: Vec<String>,
        symbol_bin: String,
        model: String,
        dimensions: usize,
        pipeline: Arc<EmbeddingPipeline>,
        locations: Arc<LocationStore>,
        symbols: Arc<SymbolStore>,
        repocfg: Arc<RepoConfigStore>,
        cache: Arc<EmbeddingCache>,
    ) -> Self {
        Self {
            repo_root,
            repo_key,
            data_dir,
            max_file_size,
            exclude_patterns,
            symbol_bin,
            model,
            dimensions,
            pipeline,
            locations,
            symbols,
            repocfg,
            cache,
        }
    }

    /// Run one indexing pass. `force` treats every file as added.
    pub fn index(&self, force: bool, cancel: &CancellationToken) -> CodetectResult<IndexReport> {
        let started = Instant::now();
        std::fs::create_dir_all(&self.data_dir)?;

        // A model or dimension change invalidates the repo's embeddings
        // before anything else happens.
        let mut force = force;
        if let Some(stale) =
            self.repocfg
                .detect_mismatch(&self.repo_key, &self.model, self.dimensions)?
        {
            tracing::warn!(
                repo = %self.repo_key,
                stored_model = %stale.model,
                stored_dimensions = stale.dimensions,
                model = %self.model,
                dimensions = self.dimensions,
                "embedding config changed, migrating and forcing full index"
            );
            self.repocfg.migrate(&stale, &self.cache, &self.locations)?;
            self.symbols.delete_by_repo(&self.repo_key)?;
            force = true;
        }

        let included = self.collect_files();
        let new_tree = MerkleTree::build(&self.repo_root, &included)?;
        let tree_path = self.data_dir.join(merkle::TREE_FILE_NAME);
        let old_tree = MerkleTree::load(&tree_path)?;

        let (change_type, changes) = match (&old_tree, force) {
            (Some(old), false) => {
                let changes = MerkleTree::diff(old, &new_tree);
                if changes.is_empty() {
                    tracing::info!(repo = %self.repo_key, "root hash unchanged, nothing to index");
                    return Ok(IndexReport {
                        change_type: ChangeType::None,
                        files_processed: 0,
                        files_deleted: 0,
                        chunks_created: 0,
                        cache_hits: 0,
                        chunks_embedded: 0,
                        duration: started.elapsed().as_secs_f64(),
                    });
                }
                (ChangeType::Incremental, changes)
            }
            _ => {
                let changes = ChangeSet {
                    added: new_tree.file_map().keys().cloned().collect(),
                    modified: Vec::new(),
                    deleted: old_tree
                        .as_ref()
                        .map(|old| {
                            let new_files = new_tree.file_map();
                            old.file_map()
                                .keys()
                                .filter(|p| !new_files.contains_key(*p))
                                .cloned()
                                .collect()
                        })
                        .unwrap_or_default(),
                };
                (ChangeType::Full, changes)
            }
        };

        tracing::info!(
            repo = %self.repo_key,
            added = changes.added.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            "indexing change set"
        );

        // Deleted paths lose their locations and symbols; cache entries
        // stay until orphan cleanup.
        for path in &changes.deleted {
            self.locations.delete_by_path(&self.repo_key, path)?;
            self.symbols.delete_by_path(&self.repo_key, path)?;
        }

        // Chunk every added or modified file. Unreadable files are data
        // errors: skipped with a warning, the run continues.
        let mut files: HashMap<String, Vec<Chunk>> = HashMap::new();
        let mut chunks_created = 0usize;
        let mut changed_paths: Vec<String> = Vec::new();
        for path in changes.added.iter().chain(&changes.modified) {
            if cancel.is_cancelled() {
                return Err(CodetectError::Canceled);
            }
            let abs = self.repo_root.join(path);
            let content = match std::fs::read_to_string(&abs) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(path = %abs.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };
            match chunker::chunk_file(Path::new(path), &content) {
                Ok(chunks) => {
                    chunks_created += chunks.len();
                    changed_paths.push(path.clone());
                    files.insert(path.clone(), chunks);
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "chunker failed for file");
                }
            }
        }

        let embed_report = self.pipeline.reindex_files(&self.repo_key, &files, cancel)?;

        // Refresh the symbol index for the changed files. A missing
        // extractor degrades the symbol signal, never the run.
        if !changed_paths.is_empty() {
            let extractor = SymbolExtractor::new(&self.symbol_bin);
            let records = extractor.extract(&self.repo_root, &changed_paths);
            self.symbols
                .replace_for_paths(&self.repo_key, &changed_paths, &records)?;
        }

        self.repocfg
            .set(&self.repo_key, &self.model, self.dimensions)?;
        new_tree.save_with_backup(&tree_path)?;

        let report = IndexReport {
            change_type,
            files_processed: changed_paths.len(),
            files_deleted: changes.deleted.len(),
            chunks_created,
            cache_hits: embed_report.cache_hits,
            chunks_embedded: embed_report.embedded,
            duration: started.elapsed().as_secs_f64(),
        };
        tracing::info!(
            repo = %self.repo_key,
            files = report.files_processed,
            deleted = report.files_deleted,
            chunks = report.chunks_created,
            embedded = report.chunks_embedded,
            cache_hits = report.cache_hits,
            "indexing complete"
        );
        Ok(report)
    }

    /// Walk the repository honoring gitignore rules, the builtin
    /// deny-list, configured exclude globs, and the hidden-entry rule.
    /// Returns sorted relative paths of regular files under the size
    /// limit.
    pub fn collect_files(&self) -> Vec<PathBuf> {
        let excludes = build_globset(&self.exclude_patterns);
        let walker = WalkBuilder::new(&self.repo_root)
            .hidden(false) // hidden filtering is ours: allowlist-aware
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .require_git(false)
            .ignore(true)
            .follow_links(false)
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                merkle::is_walkable(&name, is_dir)
            })
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "walker error, skipping entry");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            if let Ok(metadata) = entry.metadata() {
                if metadata.len() > self.max_file_size {
                    tracing::debug!(path = %entry.path().display(), size = metadata.len(), "file over size limit, skipping");
                    continue;
                }
            }
            if let Ok(rel) = entry.path().strip_prefix(&self.repo_root) {
                if let Some(excludes) = &excludes {
                    if excludes.is_match(rel) {
                        continue;
                    }
                }
                files.push(rel.to_path_buf());
            }
        }
        files.sort();
        files
    }
}

/// Compile configured exclude patterns; malformed globs are dropped with
/// a warning.
fn build_globset(patterns: &[String]) -> Option<globset::GlobSet> {
    if patterns.is_empty() {
        return None;
    }
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        match globset::Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "ignoring malformed exclude pattern");
            }
        }
    }
    builder.build().ok()
}
