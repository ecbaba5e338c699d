//! Multi-signal retriever.
//!
//! Fans out three independent producers for one query -- literal
//! (subprocess), semantic (vector KNN resolved through the location
//! store), and symbol (LIKE on the symbol index) -- under one wall-clock
//! deadline, then fuses their ranked lists with weighted RRF.
//!
//! A failing or absent signal logs and degrades to an empty list; the
//! query itself never aborts. When the deadline elapses or the caller's
//! cancellation token fires, in-flight signals are abandoned (their
//! threads finish into a closed channel) and whatever completed is fused.

pub mod fusion;
pub mod literal;

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::SearchConfig;
use crate::embedder::Embedder;
use crate::error::CodetectResult;
use crate::locations::LocationStore;
use crate::symbols::SymbolStore;
use crate::types::{SearchResult, Signal, SignalHit};
use crate::vector::VectorIndex;

use fusion::RankedList;
use literal::LiteralSearch;

/// Hybrid retrieval over one repository.
pub struct Retriever {
    repo_root: PathBuf,
    repo_key: String,
    config: SearchConfig,
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<VectorIndex>,
    locations: Arc<LocationStore>,
    symbols: Arc<SymbolStore>,
}

impl Retriever {
    /// Wire the retriever over its collaborators. `repo_key` is the
    /// repo_root string used for database partitioning.
    pub fn new(
        repo_root: PathBuf,
        repo_key: String,
        config: SearchConfig,
        embedder: Arc<dyn Embedder>,
        vector_index: Arc<VectorIndex>,
        locations: Arc<LocationStore>,
        symbols: Arc<SymbolStore>,
    ) -> Self {
        Self {
            repo_root,
            repo_key,
            config,
            embedder,
            vector_index,
            locations,
            symbols,
        }
    }

    /// Run all three signals and fuse their results. `limit` caps the
    /// fused list.
    ///
    /// Both the wall-clock deadline and the caller's cancellation token
    /// stop the wait for outstanding signals; either way the results
    /// that did complete are still fused.
    pub fn retrieve(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Vec<SearchResult> {
        let deadline = Instant::now() + Duration::from_millis(self.config.timeout_ms);
        let lists = if self.config.parallel {
            self.run_signals_parallel(query, deadline, cancel)
        } else {
            self.run_signals_sequential(query, cancel)
        };

        let mut fused = fusion::fuse(&lists, self.config.rrf_k);
        fused.truncate(limit);
        fused
    }

    fn ranked(&self, signal: Signal, hits: Vec<SignalHit>) -> RankedList {
        let weight = match signal {
            Signal::Literal => self.config.weight_keyword,
            Signal::Semantic => self.config.weight_semantic,
            Signal::Symbol => self.config.weight_symbol,
        };
        RankedList {
            signal,
            weight,
            hits,
        }
    }

    fn run_signals_sequential(&self, query: &str, cancel: &CancellationToken) -> Vec<RankedList> {
        let mut lists = Vec::with_capacity(3);
        for signal in [Signal::Literal, Signal::Semantic, Signal::Symbol] {
            if cancel.is_cancelled() {
                tracing::debug!(
                    completed = lists.len(),
                    "retrieval canceled, fusing partial signals"
                );
                break;
            }
            let hits = degrade(signal, self.run_signal(signal, query));
            lists.push(self.ranked(signal, hits));
        }
        lists
    }

    /// One detached thread per signal; the channel is drained until all
    /// three report, the deadline elapses, or the caller cancels.
    /// Abandoned threads run to completion and send into a closed
    /// channel.
    fn run_signals_parallel(
        &self,
        query: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Vec<RankedList> {
        /// Poll slice so cancellation is noticed while blocked on recv.
        const CANCEL_POLL: Duration = Duration::from_millis(25);

        let (tx, rx) = mpsc::channel::<(Signal, Vec<SignalHit>)>();

        for signal in [Signal::Literal, Signal::Semantic, Signal::Symbol] {
            let tx = tx.clone();
            let job = self.signal_job(signal, query);
            std::thread::spawn(move || {
                let hits = degrade(signal, job());
                let _ = tx.send((signal, hits));
            });
        }
        drop(tx);

        let mut lists = Vec::with_capacity(3);
        while lists.len() < 3 {
            if cancel.is_cancelled() {
                tracing::debug!(
                    completed = lists.len(),
                    "retrieval canceled, fusing partial signals"
                );
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(
                    completed = lists.len(),
                    "retrieval deadline elapsed, fusing partial signals"
                );
                break;
            }
            match rx.recv_timeout(remaining.min(CANCEL_POLL)) {
                Ok((signal, hits)) => lists.push(self.ranked(signal, hits)),
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        lists
    }

    /// Build an owned closure for one signal so its thread outlives this
    /// call. Shared components are Arc-cloned; the subprocess runner only
    /// needs owned strings.
    fn signal_job(
        &self,
        signal: Signal,
        query: &str,
    ) -> Box<dyn FnOnce() -> CodetectResult<Vec<SignalHit>> + Send + 'static> {
        let query = query.to_string();
        match signal {
            Signal::Literal => {
                let binary = self.config.literal_bin.clone();
                let root = self.repo_root.clone();
                let limit = self.config.keyword_limit;
                Box::new(move || LiteralSearch::new(&binary).search(&root, &query, limit))
            }
            Signal::Semantic => {
                let embedder = Arc::clone(&self.embedder);
                let vector_index = Arc::clone(&self.vector_index);
                let locations = Arc::clone(&self.locations);
                let repo_key = self.repo_key.clone();
                let limit = self.config.semantic_limit;
                Box::new(move || {
                    semantic_hits(&*embedder, &vector_index, &locations, &repo_key, &query, limit)
                })
            }
            Signal::Symbol => {
                let symbols = Arc::clone(&self.symbols);
                let repo_key = self.repo_key.clone();
                let limit = self.config.symbol_limit;
                Box::new(move || symbol_hits(&symbols, &repo_key, &query, limit))
            }
        }
    }

    fn run_signal(&self, signal: Signal, query: &str) -> CodetectResult<Vec<SignalHit>> {
        match signal {
            Signal::Literal => LiteralSearch::new(&self.config.literal_bin).search(
                &self.repo_root,
                query,
                self.config.keyword_limit,
            ),
            Signal::Semantic => semantic_hits(
                &*self.embedder,
                &self.vector_index,
                &self.locations,
                &self.repo_key,
                query,
                self.config.semantic_limit,
            ),
            Signal::Symbol => {
                symbol_hits(&self.symbols, &self.repo_key, query, self.config.symbol_limit)
            }
        }
    }
}

/// Downgrade a signal failure to an empty list with a warning.
fn degrade(signal: Signal, result: CodetectResult<Vec<SignalHit>>) -> Vec<SignalHit> {
    match result {
        Ok(hits) => hits,
        Err(e) => {
            tracing::warn!(signal = signal.as_str(), error = %e, "signal failed, continuing without it");
            Vec::new()
        }
    }
}

/// Embed the query once (the provider applies its query prefix), ask the
/// vector index for neighbours, and resolve each hash back to locations.
fn semantic_hits(
    embedder: &dyn Embedder,
    vector_index: &VectorIndex,
    locations: &LocationStore,
    repo_key: &str,
    query: &str,
    limit: usize,
) -> CodetectResult<Vec<SignalHit>> {
    if !embedder.available() {
        tracing::debug!("embedder unavailable, semantic signal skipped");
        return Ok(Vec::new());
    }
    let vector = embedder.embed_query(query)?;
    let neighbours = vector_index.search_knn(&vector, limit)?;

    let mut hits = Vec::new();
    for neighbour in neighbours {
        for location in locations.get_by_hash(repo_key, &neighbour.id)? {
            hits.push(SignalHit {
                id: format!(
                    "{}:{}:{}",
                    location.path, location.start_line, location.end_line
                ),
                path: location.path.clone(),
                start_line: location.start_line,
                end_line: location.end_line,
                score: neighbour.score,
                preview: location.node_name.or(location.node_type).unwrap_or_default(),
            });
            if hits.len() >= limit {
                return Ok(hits);
            }
        }
    }
    Ok(hits)
}

/// Lexical LIKE lookup on the symbol index.
#[allow(clippy::cast_precision_loss)]
fn symbol_hits(
    symbols: &SymbolStore,
    repo_key: &str,
    query: &str,
    limit: usize,
) -> CodetectResult<Vec<SignalHit>> {
    let records = symbols.search(repo_key, query, limit)?;
    Ok(records
        .into_iter()
        .enumerate()
        .map(|(idx, record)| SignalHit {
            id: format!("{}:{}:{}", record.path, record.line, record.name),
            path: record.path,
            start_line: record.line,
            end_line: record.line,
            score: 1.0 / (idx as f64 + 1.0),
            preview: record
                .signature
                .unwrap_or_else(|| format!("{} {}", record.kind, record.name)),
        })
        .collect())
}
