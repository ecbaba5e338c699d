//! End-to-end indexing scenarios over a real temp repository and the
//! embedded backend, with a deterministic in-process embedder.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use codetect_core::cache::EmbeddingCache;
use codetect_core::embedder::Embedder;
use codetect_core::error::CodetectResult;
use codetect_core::indexer::Indexer;
use codetect_core::locations::LocationStore;
use codetect_core::pipeline::EmbeddingPipeline;
use codetect_core::repocfg::RepoConfigStore;
use codetect_core::storage::{SqliteStore, Store};
use codetect_core::symbols::SymbolStore;
use codetect_core::types::{content_hash, ChangeType};
use codetect_core::vector::{DistanceMetric, VectorIndex};

/// Maps content `x` to a fixed vector `v(x)` and counts provider calls.
struct MockEmbedder {
    calls: AtomicUsize,
}

impl MockEmbedder {
    fn vector_for(text: &str) -> Vec<f32> {
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
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }
    fn embed_query(&self, text: &str) -> CodetectResult<Vec<f32>> {
        Ok(Self::vector_for(text))
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    repo_root: PathBuf,
    repo_key: String,
    cache: Arc<EmbeddingCache>,
    locations: Arc<LocationStore>,
    symbols: Arc<SymbolStore>,
    repocfg: Arc<RepoConfigStore>,
    pipeline: Arc<EmbeddingPipeline>,
    embedder: Arc<MockEmbedder>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let repo_root = dir.path().to_path_buf();

        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&repo_root.join(".codetect").join("index.db"))
                .expect("open sqlite store"),
        );
        let cache =
            Arc::new(EmbeddingCache::open(Arc::clone(&store), "mock", 4).expect("open cache"));
        let locations = Arc::new(LocationStore::open(Arc::clone(&store)).expect("open locations"));
        let symbols = Arc::new(SymbolStore::open(Arc::clone(&store)).expect("open symbols"));
        let repocfg = Arc::new(RepoConfigStore::open(Arc::clone(&store)).expect("open repocfg"));
        let vector_index = Arc::new(VectorIndex::for_store(
            Arc::clone(&store),
            cache.table_name(),
            DistanceMetric::Cosine,
        ));
        let embedder = Arc::new(MockEmbedder {
            calls: AtomicUsize::new(0),
        });
        let pipeline = Arc::new(EmbeddingPipeline::new(
            Arc::clone(&cache),
            Arc::clone(&locations),
            vector_index,
            Arc::clone(&embedder) as Arc<dyn Embedder>,
            32,
            1,
        ));

        let repo_key = repo_root.to_string_lossy().replace('\\', "/");
        Self {
            _dir: dir,
            repo_root,
            repo_key,
            cache,
            locations,
            symbols,
            repocfg,
            pipeline,
            embedder,
        }
    }

    fn indexer(&self) -> Indexer {
        Indexer::new(
            self.repo_root.clone(),
            self.repo_key.clone(),
            self.repo_root.join(".codetect"),
            5 * 1024 * 1024,
            Vec::new(),
            // A binary that cannot exist keeps the symbol extractor inert.
            "codetect-test-missing-binary".to_string(),
            "mock".to_string(),
            4,
            Arc::clone(&self.pipeline),
            Arc::clone(&self.locations),
            Arc::clone(&self.symbols),
            Arc::clone(&self.repocfg),
            Arc::clone(&self.cache),
        )
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.repo_root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(path, content).expect("write file");
    }
}

const FUNC_A: &str = "package main\n\nfunc a() {\n\tprintln(\"a\")\n}\n";
const FUNC_B: &str = "package main\n\nfunc b() {\n\tprintln(\"b\")\n}\n";

#[test]
fn first_index_is_full_and_embeds_everything() {
    let f = Fixture::new();
    f.write("a.go", FUNC_A);
    f.write("b.go", FUNC_B);

    let report = f
        .indexer()
        .index(false, &CancellationToken::new())
        .expect("index");
    assert_eq!(report.change_type, ChangeType::Full);
    assert_eq!(report.files_processed, 2);
    assert_eq!(report.files_deleted, 0);
    assert!(report.chunks_created >= 2);
    assert!(report.chunks_embedded >= 2);

    // Every chunk has a location and a cache entry.
    let locations = f.locations.get_by_repo(&f.repo_key).expect("locations");
    assert!(!locations.is_empty());
    for location in &locations {
        assert!(f
            .cache
            .get(&location.content_hash)
            .expect("cache get")
            .is_some());
    }

    // The repo embedding config was recorded.
    let config = f.repocfg.get(&f.repo_key).expect("get").expect("present");
    assert_eq!(config.model, "mock");
    assert_eq!(config.dimensions, 4);

    // Tree persisted.
    assert!(f.repo_root.join(".codetect/merkle-tree.json").exists());
}

#[test]
fn unchanged_repo_reindexes_nothing() {
    let f = Fixture::new();
    f.write("a.go", FUNC_A);
    f.write("b.go", FUNC_B);
    let cancel = CancellationToken::new();

    f.indexer().index(false, &cancel).expect("first index");
    let calls_after_first = f.embedder.calls.load(Ordering::SeqCst);

    let report = f.indexer().index(false, &cancel).expect("second index");
    assert_eq!(report.change_type, ChangeType::None);
    assert_eq!(report.files_processed, 0);
    assert_eq!(report.chunks_embedded, 0);
    assert_eq!(f.embedder.calls.load(Ordering::SeqCst), calls_after_first);
}

#[test]
fn modified_file_is_reindexed_incrementally() {
    let f = Fixture::new();
    f.write("a.go", FUNC_A);
    f.write("b.go", FUNC_B);
    let cancel = CancellationToken::new();
    f.indexer().index(false, &cancel).expect("first index");

    let old_hashes: Vec<String> = f
        .locations
        .get_by_path(&f.repo_key, "a.go")
        .expect("locations")
        .iter()
        .map(|l| l.content_hash.clone())
        .collect();
    assert!(!old_hashes.is_empty());

    let modified = "package main\n\nfunc a() {\n\tprintln(\"changed\")\n}\n";
    f.write("a.go", modified);

    let report = f.indexer().index(false, &cancel).expect("second index");
    assert_eq!(report.change_type, ChangeType::Incremental);
    assert_eq!(report.files_processed, 1);
    assert!(report.chunks_embedded >= 1);

    let new_hashes: Vec<String> = f
        .locations
        .get_by_path(&f.repo_key, "a.go")
        .expect("locations")
        .iter()
        .map(|l| l.content_hash.clone())
        .collect();
    assert!(!new_hashes.is_empty());
    assert_ne!(old_hashes, new_hashes, "old locations were replaced");

    // b.go untouched.
    assert!(!f
        .locations
        .get_by_path(&f.repo_key, "b.go")
        .expect("locations")
        .is_empty());
}

#[test]
fn deleted_file_loses_locations_but_cache_entry_stays() {
    let f = Fixture::new();
    f.write("a.go", FUNC_A);
    f.write("b.go", FUNC_B);
    let cancel = CancellationToken::new();
    f.indexer().index(false, &cancel).expect("first index");

    let b_hashes: Vec<String> = f
        .locations
        .get_by_path(&f.repo_key, "b.go")
        .expect("locations")
        .iter()
        .map(|l| l.content_hash.clone())
        .collect();
    assert!(!b_hashes.is_empty());

    std::fs::remove_file(f.repo_root.join("b.go")).expect("remove b.go");

    let report = f.indexer().index(false, &cancel).expect("second index");
    assert_eq!(report.change_type, ChangeType::Incremental);
    assert_eq!(report.files_deleted, 1);
    assert!(f
        .locations
        .get_by_path(&f.repo_key, "b.go")
        .expect("locations")
        .is_empty());

    // Orphan until GC.
    for hash in &b_hashes {
        assert!(f.cache.get(hash).expect("cache get").is_some());
    }
    let removed = f.pipeline.cleanup_orphans().expect("cleanup");
    assert!(removed >= 1);
    for hash in &b_hashes {
        assert!(f.cache.get(hash).expect("cache get").is_none());
    }
}

#[test]
fn duplicate_content_across_files_shares_one_cache_entry() {
    let f = Fixture::new();
    f.write("a.go", FUNC_A);
    f.write("copy_of_a.go", FUNC_A);

    f.indexer()
        .index(false, &CancellationToken::new())
        .expect("index");

    let locations = f.locations.get_by_repo(&f.repo_key).expect("locations");
    let mut by_hash: HashMap<&str, usize> = HashMap::new();
    for location in &locations {
        *by_hash.entry(location.content_hash.as_str()).or_default() += 1;
    }
    // The function chunk appears in both files with one shared hash.
    let func_hash = content_hash("func a() {\n\tprintln(\"a\")\n}");
    assert_eq!(by_hash.get(func_hash.as_str()), Some(&2));
}

#[test]
fn force_reindex_treats_everything_as_added_but_hits_cache() {
    let f = Fixture::new();
    f.write("a.go", FUNC_A);
    let cancel = CancellationToken::new();
    f.indexer().index(false, &cancel).expect("first index");

    let report = f.indexer().index(true, &cancel).expect("forced index");
    assert_eq!(report.change_type, ChangeType::Full);
    assert_eq!(report.files_processed, 1);
    assert_eq!(report.chunks_embedded, 0, "unchanged content comes from the cache");
    assert!(report.cache_hits >= 1);
}

#[test]
fn model_change_migrates_and_forces_full_index() {
    let f = Fixture::new();
    f.write("a.go", FUNC_A);
    let cancel = CancellationToken::new();
    f.indexer().index(false, &cancel).expect("first index");

    // Simulate a prior run with a different model.
    f.repocfg
        .set(&f.repo_key, "old-model", 4)
        .expect("set stale config");

    let report = f.indexer().index(false, &cancel).expect("reindex");
    assert_eq!(report.change_type, ChangeType::Full);
    assert!(report.chunks_embedded >= 1, "repo rows were re-embedded");

    let config = f.repocfg.get(&f.repo_key).expect("get").expect("present");
    assert_eq!(config.model, "mock");
}

#[test]
fn canceled_run_keeps_previous_tree() {
    let f = Fixture::new();
    f.write("a.go", FUNC_A);
    let cancel = CancellationToken::new();
    f.indexer().index(false, &cancel).expect("first index");

    let tree_path = f.repo_root.join(".codetect/merkle-tree.json");
    let before = std::fs::read_to_string(&tree_path).expect("read tree");

    f.write("a.go", "package main\n\nfunc a() {\n\tprintln(\"v2\")\n}\n");
    let canceled = CancellationToken::new();
    canceled.cancel();
    let result = f.indexer().index(false, &canceled);
    assert!(result.is_err(), "canceled run returns an error");

    let after = std::fs::read_to_string(&tree_path).expect("read tree");
    assert_eq!(before, after, "tree is persisted only on full success");

    // The next run retries the same change.
    let report = f.indexer().index(false, &cancel).expect("retry");
    assert_eq!(report.files_processed, 1);
}

#[test]
fn gitignored_files_are_not_indexed() {
    let f = Fixture::new();
    f.write(".gitignore", "generated.go\n");
    f.write("a.go", FUNC_A);
    f.write("generated.go", FUNC_B);

    f.indexer()
        .index(false, &CancellationToken::new())
        .expect("index");

    assert!(f
        .locations
        .get_by_path(&f.repo_key, "generated.go")
        .expect("locations")
        .is_empty());
    assert!(!f
        .locations
        .get_by_path(&f.repo_key, "a.go")
        .expect("locations")
        .is_empty());
}

/// Scenario S1/S2 at the tree-file level: the `.codetect` data directory
/// itself never shows up in the index.
#[test]
fn data_directory_is_excluded_from_the_tree() {
    let f = Fixture::new();
    f.write("a.go", FUNC_A);
    let cancel = CancellationToken::new();
    f.indexer().index(false, &cancel).expect("first index");

    // index.db and merkle-tree.json now exist under .codetect; a second
    // run must still see no changes.
    let report = f.indexer().index(false, &cancel).expect("second index");
    assert_eq!(report.change_type, ChangeType::None);

    let paths: Vec<String> = f
        .locations
        .get_by_repo(&f.repo_key)
        .expect("locations")
        .iter()
        .map(|l| l.path.clone())
        .collect();
    assert!(paths.iter().all(|p| !p.starts_with(".codetect")));
}
