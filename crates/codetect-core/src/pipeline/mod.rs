//! Embedding pipeline.
//!
//! Takes chunks for one repository and guarantees that, on success, every
//! non-empty chunk's hash is in the cache and a corresponding location row
//! exists. Identical content appearing in multiple chunks is embedded
//! exactly once; content already cached is never re-embedded.
//!
//! Batch embedding optionally fans out across worker threads bounded by
//! the configured worker count; errors are collected after the workers
//! drain and the first one aborts the run (the Merkle tree is then not
//! persisted, so the next run retries the same changes).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::cache::EmbeddingCache;
use crate::embedder::Embedder;
use crate::error::{CodetectError, CodetectResult};
use crate::locations::LocationStore;
use crate::types::{Chunk, EmbedReport};
use crate::vector::VectorIndex;

/// Orchestrates hash -> cache lookup -> embed -> upsert for chunk sets.
pub struct EmbeddingPipeline {
    cache: Arc<EmbeddingCache>,
    locations: Arc<LocationStore>,
    vector_index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    workers: usize,
}

impl EmbeddingPipeline {
    /// Wire the pipeline over its collaborators.
    pub fn new(
        cache: Arc<EmbeddingCache>,
        locations: Arc<LocationStore>,
        vector_index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
        workers: usize,
    ) -> Self {
        Self {
            cache,
            locations,
            vector_index,
            embedder,
            batch_size: batch_size.max(1),
            workers: workers.max(1),
        }
    }

    /// Embed a chunk set and record its locations.
    pub fn embed_chunks(
        &self,
        repo_root: &str,
        chunks: &[Chunk],
        cancel: &CancellationToken,
    ) -> CodetectResult<EmbedReport> {
        let started = Instant::now();
        let mut report = EmbedReport::default();

        let non_empty: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| {
                if c.content.is_empty() {
                    report.skipped += 1;
                    false
                } else {
                    true
                }
            })
            .collect();
        report.total = non_empty.len();

        // Deduplicate hashes and look them up in one batch.
        let unique_hashes: Vec<String> = {
            let mut seen = HashSet::new();
            non_empty
                .iter()
                .filter(|c| seen.insert(c.content_hash.clone()))
                .map(|c| c.content_hash.clone())
                .collect()
        };
        let cache_started = Instant::now();
        let cached = self.cache.get_batch(&unique_hashes)?;
        report.cache_time = cache_started.elapsed().as_secs_f64();
        report.cache_hits = non_empty
            .iter()
            .filter(|c| cached.contains_key(&c.content_hash))
            .count();

        // Contents still missing, deduplicated by hash.
        let mut to_embed: Vec<(String, String)> = Vec::new();
        let mut queued = HashSet::new();
        for chunk in &non_empty {
            if !cached.contains_key(&chunk.content_hash) && queued.insert(chunk.content_hash.clone())
            {
                to_embed.push((chunk.content_hash.clone(), chunk.content.clone()));
            }
        }

        if !to_embed.is_empty() {
            if self.embedder.available() {
                let embed_started = Instant::now();
                let embedded = self.embed_batches(&to_embed, cancel)?;
                report.embed_time = embed_started.elapsed().as_secs_f64();
                report.embedded = embedded.len();

                let upsert_started = Instant::now();
                self.cache.put_batch(&embedded)?;
                let vectors: Vec<(String, Vec<f32>)> = embedded.into_iter().collect();
                self.vector_index.insert_batch(&vectors)?;
                report.cache_time += upsert_started.elapsed().as_secs_f64();
            } else {
                // No provider: locations are still recorded so literal and
                // symbol search work; the semantic signal stays empty.
                tracing::debug!(
                    count = to_embed.len(),
                    "embedding provider unavailable, indexing without vectors"
                );
            }
        }

        // One transaction for all location rows.
        let owned: Vec<Chunk> = non_empty.iter().map(|c| (*c).clone()).collect();
        self.locations.upsert_chunks(repo_root, &owned)?;

        report.duration = started.elapsed().as_secs_f64();
        report.finalize();
        tracing::debug!(
            repo = repo_root,
            total = report.total,
            cache_hits = report.cache_hits,
            embedded = report.embedded,
            hit_rate = report.hit_rate,
            "embed_chunks complete"
        );
        Ok(report)
    }

    /// Incremental per-file variant: unchanged files (same hash multiset)
    /// skip re-indexing entirely and count as cache hits; changed files
    /// are deleted by path and re-embedded.
    pub fn reindex_files(
        &self,
        repo_root: &str,
        files: &HashMap<String, Vec<Chunk>>,
        cancel: &CancellationToken,
    ) -> CodetectResult<EmbedReport> {
        let started = Instant::now();
        let mut aggregate = EmbedReport::default();

        // Deterministic file order keeps per-path serialization observable.
        let mut paths: Vec<&String> = files.keys().collect();
        paths.sort();

        for path in paths {
            if cancel.is_cancelled() {
                return Err(CodetectError::Canceled);
            }
            let chunks = &files[path];

            let mut new_hashes: Vec<&str> = chunks
                .iter()
                .filter(|c| !c.content.is_empty())
                .map(|c| c.content_hash.as_str())
                .collect();
            new_hashes.sort_unstable();
            let mut existing = self.locations.hashes_for_path(repo_root, path)?;
            existing.sort_unstable();

            if !existing.is_empty()
                && existing.len() == new_hashes.len()
                && existing.iter().map(String::as_str).eq(new_hashes.iter().copied())
            {
                aggregate.total += new_hashes.len();
                aggregate.cache_hits += new_hashes.len();
                tracing::debug!(repo = repo_root, path = %path, "file unchanged, skipping");
                continue;
            }

            self.locations.delete_by_path(repo_root, path)?;
            let report = self.embed_chunks(repo_root, chunks, cancel)?;
            aggregate.total += report.total;
            aggregate.cache_hits += report.cache_hits;
            aggregate.embedded += report.embedded;
            aggregate.skipped += report.skipped;
            aggregate.errors += report.errors;
            aggregate.embed_time += report.embed_time;
            aggregate.cache_time += report.cache_time;
        }

        aggregate.duration = started.elapsed().as_secs_f64();
        aggregate.finalize();
        Ok(aggregate)
    }

    /// Delete cache entries no location references any more. Exposed for
    /// callers; never run automatically.
    pub fn cleanup_orphans(&self) -> CodetectResult<usize> {
        let all = self.cache.all_hashes()?;
        let orphans = self.locations.orphan_hashes(&all)?;
        if orphans.is_empty() {
            return Ok(0);
        }
        self.cache.delete_batch(&orphans)?;
        self.vector_index.delete_batch(&orphans)?;
        tracing::info!(count = orphans.len(), "removed orphaned cache entries");
        Ok(orphans.len())
    }

    /// Embed `(hash, content)` pairs in batches, optionally across worker
    /// threads. Returns `hash -> vector` for every pair on success.
    fn embed_batches(
        &self,
        to_embed: &[(String, String)],
        cancel: &CancellationToken,
    ) -> CodetectResult<HashMap<String, Vec<f32>>> {
        let batches: Vec<&[(String, String)]> = to_embed.chunks(self.batch_size).collect();
        let workers = self.workers.min(batches.len());

        if workers <= 1 {
            let mut out = HashMap::with_capacity(to_embed.len());
            for batch in &batches {
                if cancel.is_cancelled() {
                    return Err(CodetectError::Canceled);
                }
                self.embed_one_batch(batch, &mut out)?;
            }
            return Ok(out);
        }

        // Fan out: workers pull batch indexes from a shared counter and
        // report results over a channel. All errors are collected once the
        // workers drain; the first aborts the run.
        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<CodetectResult<(usize, Vec<Vec<f32>>)>>();

        let results = std::thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let next = &next;
                let batches = &batches;
                scope.spawn(move || loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let idx = next.fetch_add(1, Ordering::SeqCst);
                    let Some(batch) = batches.get(idx) else {
                        break;
                    };
                    let texts: Vec<String> = batch.iter().map(|(_, c)| c.clone()).collect();
                    let result = self.embedder.embed(&texts).map(|vectors| (idx, vectors));
                    if tx.send(result).is_err() {
                        break;
                    }
                });
            }
            drop(tx);
            rx.into_iter().collect::<Vec<_>>()
        });

        if cancel.is_cancelled() {
            return Err(CodetectError::Canceled);
        }

        let mut out = HashMap::with_capacity(to_embed.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok((idx, vectors)) => {
                    let batch = batches[idx];
                    if vectors.len() != batch.len() {
                        first_error.get_or_insert(CodetectError::Internal(format!(
                            "provider returned {} vectors for a batch of {}",
                            vectors.len(),
                            batch.len()
                        )));
                        continue;
                    }
                    for ((hash, _), vector) in batch.iter().zip(vectors) {
                        out.insert(hash.clone(), vector);
                    }
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    fn embed_one_batch(
        &self,
        batch: &[(String, String)],
        out: &mut HashMap<String, Vec<f32>>,
    ) -> CodetectResult<()> {
        let texts: Vec<String> = batch.iter().map(|(_, c)| c.clone()).collect();
        let vectors = self.embedder.embed(&texts)?;
        if vectors.len() != batch.len() {
            return Err(CodetectError::Internal(format!(
                "provider returned {} vectors for a batch of {}",
                vectors.len(),
                batch.len()
            )));
        }
        for ((hash, _), vector) in batch.iter().zip(vectors) {
            out.insert(hash.clone(), vector);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SqliteStore, Store};
    use crate::types::{content_hash, Language};
    use crate::vector::DistanceMetric;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    /// Deterministic in-process embedder counting its calls.
    struct MockEmbedder {
        calls: AtomicUsize,
        texts_seen: parking_lot::Mutex<Vec<String>>,
        fail: bool,
    }

    impl MockEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                texts_seen: parking_lot::Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        fn vector_for(text: &str) -> Vec<f32> {
            // Fixed function of content so tests are deterministic.
            let mut v = vec![0.0f32; 4];
            for (i, b) in text.bytes().enumerate() {
                v[i % 4] += f32::from(b) / 255.0;
            }
            v
        }
    }

    impl Embedder for MockEmbedder {
        fn provider_id(&self) -> &str {
            "mock"
        }
        fn dimensions(&self) -> usize {
            4
        }
        fn available(&self) -> bool {
            true
        }
        fn embed(&self, texts: &[String]) -> CodetectResult<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CodetectError::Provider {
                    provider: "mock".into(),
                    message: "boom".into(),
                });
            }
            self.texts_seen.lock().extend(texts.iter().cloned());
            Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
        }
        fn embed_query(&self, text: &str) -> CodetectResult<Vec<f32>> {
            Ok(Self::vector_for(text))
        }
    }

    struct Fixture {
        pipeline: EmbeddingPipeline,
        embedder: Arc<MockEmbedder>,
        cache: Arc<EmbeddingCache>,
        locations: Arc<LocationStore>,
    }

    fn fixture_with(embedder: MockEmbedder, workers: usize) -> Fixture {
        let store: Arc<dyn Store> =
            Arc::new(SqliteStore::open_in_memory().expect("open in-memory store"));
        let cache =
            Arc::new(EmbeddingCache::open(Arc::clone(&store), "mock", 4).expect("open cache"));
        let locations = Arc::new(LocationStore::open(Arc::clone(&store)).expect("open locations"));
        let vector_index = Arc::new(VectorIndex::for_store(
            Arc::clone(&store),
            cache.table_name(),
            DistanceMetric::Cosine,
        ));
        let embedder = Arc::new(embedder);
        let pipeline = EmbeddingPipeline::new(
            Arc::clone(&cache),
            Arc::clone(&locations),
            vector_index,
            Arc::clone(&embedder) as Arc<dyn Embedder>,
            2,
            workers,
        );
        Fixture {
            pipeline,
            embedder,
            cache,
            locations,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockEmbedder::new(), 1)
    }

    fn chunk(path: &str, content: &str) -> Chunk {
        Chunk {
            path: PathBuf::from(path),
            start_line: 1,
            end_line: 10,
            start_byte: 0,
            end_byte: content.len(),
            content: content.to_string(),
            content_hash: content_hash(content),
            node_type: "function_declaration".to_string(),
            node_name: None,
            language: Language::Go,
        }
    }

    fn seed_chunks() -> Vec<Chunk> {
        vec![chunk("a.go", "func a() {}"), chunk("b.go", "func b() {}")]
    }

    #[test]
    fn test_first_run_embeds_everything() {
        let f = fixture();
        let report = f
            .pipeline
            .embed_chunks("/repo", &seed_chunks(), &CancellationToken::new())
            .expect("embed");

        assert_eq!(report.total, 2);
        assert_eq!(report.embedded, 2);
        assert_eq!(report.cache_hits, 0);
        assert_eq!(f.locations.get_by_repo("/repo").expect("locations").len(), 2);
        assert!(f.cache.get(&content_hash("func a() {}")).expect("get").is_some());
        assert!(f.cache.get(&content_hash("func b() {}")).expect("get").is_some());
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let f = fixture();
        let cancel = CancellationToken::new();
        f.pipeline
            .embed_chunks("/repo", &seed_chunks(), &cancel)
            .expect("first");
        let calls_after_first = f.embedder.calls.load(Ordering::SeqCst);

        let report = f
            .pipeline
            .embed_chunks("/repo", &seed_chunks(), &cancel)
            .expect("second");
        assert_eq!(report.total, 2);
        assert_eq!(report.embedded, 0);
        assert_eq!(report.cache_hits, 2);
        assert!((report.hit_rate - 100.0).abs() < f64::EPSILON);
        assert_eq!(f.embedder.calls.load(Ordering::SeqCst), calls_after_first);
    }

    #[test]
    fn test_duplicate_content_embedded_once() {
        let f = fixture();
        let mut chunks = seed_chunks();
        chunks.push(chunk("c.go", "func a() {}"));

        let report = f
            .pipeline
            .embed_chunks("/repo", &chunks, &CancellationToken::new())
            .expect("embed");
        assert_eq!(report.total, 3);
        assert_eq!(report.embedded, 2, "duplicate content is embedded once");

        let seen = f.embedder.texts_seen.lock();
        assert_eq!(
            seen.iter().filter(|t| t.as_str() == "func a() {}").count(),
            1
        );
        drop(seen);

        let hash = content_hash("func a() {}");
        assert_eq!(f.locations.get_by_hash("/repo", &hash).expect("by hash").len(), 2);
    }

    #[test]
    fn test_empty_chunks_are_skipped() {
        let f = fixture();
        let chunks = vec![chunk("a.go", "func a() {}"), chunk("empty.go", "")];
        let report = f
            .pipeline
            .embed_chunks("/repo", &chunks, &CancellationToken::new())
            .expect("embed");
        assert_eq!(report.total, 1);
        assert_eq!(report.skipped, 1);
        assert!(f.locations.get_by_path("/repo", "empty.go").expect("get").is_empty());
    }

    #[test]
    fn test_provider_failure_aborts_run() {
        let f = fixture_with(MockEmbedder::failing(), 1);
        let result = f
            .pipeline
            .embed_chunks("/repo", &seed_chunks(), &CancellationToken::new());
        assert!(matches!(result, Err(CodetectError::Provider { .. })));
    }

    #[test]
    fn test_worker_fanout_embeds_all_batches() {
        let f = fixture_with(MockEmbedder::new(), 4);
        let chunks: Vec<Chunk> = (0..11)
            .map(|i| chunk(&format!("f{i}.go"), &format!("func f{i}() {{}}")))
            .collect();

        let report = f
            .pipeline
            .embed_chunks("/repo", &chunks, &CancellationToken::new())
            .expect("embed");
        assert_eq!(report.total, 11);
        assert_eq!(report.embedded, 11);
        // batch_size 2 -> 6 batches regardless of worker interleaving.
        assert_eq!(f.embedder.calls.load(Ordering::SeqCst), 6);
        assert_eq!(f.locations.get_by_repo("/repo").expect("locations").len(), 11);
    }

    #[test]
    fn test_cancellation_before_embedding() {
        let f = fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = f.pipeline.embed_chunks("/repo", &seed_chunks(), &cancel);
        assert!(matches!(result, Err(CodetectError::Canceled)));
    }

    #[test]
    fn test_reindex_skips_unchanged_files() {
        let f = fixture();
        let cancel = CancellationToken::new();
        let mut files = HashMap::new();
        files.insert("a.go".to_string(), vec![chunk("a.go", "func a() {}")]);
        files.insert("b.go".to_string(), vec![chunk("b.go", "func b() {}")]);

        f.pipeline
            .reindex_files("/repo", &files, &cancel)
            .expect("first reindex");
        let calls_after_first = f.embedder.calls.load(Ordering::SeqCst);

        let report = f
            .pipeline
            .reindex_files("/repo", &files, &cancel)
            .expect("second reindex");
        assert_eq!(report.embedded, 0);
        assert_eq!(report.cache_hits, 2);
        assert_eq!(f.embedder.calls.load(Ordering::SeqCst), calls_after_first);
    }

    #[test]
    fn test_reindex_replaces_changed_file() {
        let f = fixture();
        let cancel = CancellationToken::new();
        let mut files = HashMap::new();
        files.insert("a.go".to_string(), vec![chunk("a.go", "func a() {}")]);
        f.pipeline
            .reindex_files("/repo", &files, &cancel)
            .expect("first");

        files.insert("a.go".to_string(), vec![chunk("a.go", "func a() { changed() }")]);
        let report = f
            .pipeline
            .reindex_files("/repo", &files, &cancel)
            .expect("second");
        assert!(report.embedded >= 1);

        let rows = f.locations.get_by_path("/repo", "a.go").expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content_hash, content_hash("func a() { changed() }"));
    }

    #[test]
    fn test_orphan_cleanup_after_delete() {
        let f = fixture();
        let cancel = CancellationToken::new();
        f.pipeline
            .embed_chunks("/repo", &seed_chunks(), &cancel)
            .expect("embed");

        // Deleting b.go leaves its cache entry orphaned until GC.
        f.locations.delete_by_path("/repo", "b.go").expect("delete");
        let hash_b = content_hash("func b() {}");
        assert!(f.cache.get(&hash_b).expect("get").is_some());

        let removed = f.pipeline.cleanup_orphans().expect("cleanup");
        assert_eq!(removed, 1);
        assert!(f.cache.get(&hash_b).expect("get").is_none());
        assert!(f.cache.get(&content_hash("func a() {}")).expect("get").is_some());
    }
}
