//! Vector index with two interchangeable variants.
//!
//! The native variant issues backend KNN queries through the dialect's
//! distance operator (pgvector HNSW); the brute-force variant holds an
//! in-memory `hash -> vector` map loaded from the cache table and scans
//! all entries. Both expose the same capability set, so the retriever is
//! agnostic to which one is active.
//!
//! Row lifecycle is owned by the embedding cache: the native backend keeps
//! its index consistent with the table automatically, so the native
//! variant's insert/delete are bookkeeping no-ops.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::CodetectResult;
use crate::storage::{Store, Value};

/// Distance metric for KNN search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - dot / (|a| * |b|)`.
    #[default]
    Cosine,
    /// `sqrt(sum((a_i - b_i)^2))`.
    Euclidean,
    /// `-dot(a, b)`.
    NegativeDot,
    /// `sum(|a_i - b_i|)`.
    Manhattan,
}

impl DistanceMetric {
    /// Compute the distance between two equal-length vectors.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            Self::Cosine => {
                let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
                for (x, y) in a.iter().zip(b) {
                    dot += f64::from(*x) * f64::from(*y);
                    na += f64::from(*x) * f64::from(*x);
                    nb += f64::from(*y) * f64::from(*y);
                }
                let norm = na.sqrt() * nb.sqrt();
                if norm == 0.0 {
                    1.0
                } else {
                    1.0 - dot / norm
                }
            }
            Self::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| {
                    let d = f64::from(*x) - f64::from(*y);
                    d * d
                })
                .sum::<f64>()
                .sqrt(),
            Self::NegativeDot => {
                -a.iter()
                    .zip(b)
                    .map(|(x, y)| f64::from(*x) * f64::from(*y))
                    .sum::<f64>()
            }
            Self::Manhattan => a
                .iter()
                .zip(b)
                .map(|(x, y)| (f64::from(*x) - f64::from(*y)).abs())
                .sum(),
        }
    }
}

/// Normalized similarity from a distance: `1 / (1 + dist)`, clamped into
/// `[0, 1]`. Monotonically decreasing in distance.
pub fn similarity_score(distance: f64) -> f64 {
    (1.0 / (1.0 + distance)).clamp(0.0, 1.0)
}

/// One KNN result.
#[derive(Debug, Clone)]
pub struct KnnHit {
    /// Content hash of the matched vector.
    pub id: String,
    /// Distance under the index's metric.
    pub distance: f64,
    /// Normalized similarity score in `[0, 1]`.
    pub score: f64,
}

/// Polymorphic vector index.
pub enum VectorIndex {
    /// Backend KNN through the dialect's distance operator.
    Native(NativeIndex),
    /// In-memory full scan over cache entries.
    BruteForce(BruteForceIndex),
}

impl VectorIndex {
    /// Pick the variant the backend supports.
    pub fn for_store(store: Arc<dyn Store>, table: String, metric: DistanceMetric) -> Self {
        if store.dialect().supports_native_vector() {
            Self::Native(NativeIndex { store, table, metric })
        } else {
            Self::BruteForce(BruteForceIndex {
                store,
                table,
                metric,
                vectors: RwLock::new(HashMap::new()),
                loaded: RwLock::new(false),
            })
        }
    }

    /// Whether the backend KNN path is active.
    pub fn supports_native(&self) -> bool {
        matches!(self, Self::Native(_))
    }

    /// Create the backend vector index (HNSW) where supported.
    pub fn create_index(&self) -> CodetectResult<()> {
        match self {
            Self::Native(idx) => idx.create_index(),
            Self::BruteForce(_) => Ok(()),
        }
    }

    /// Record one vector.
    pub fn insert(&self, id: &str, vector: &[f32]) -> CodetectResult<()> {
        match self {
            Self::Native(_) => Ok(()),
            Self::BruteForce(idx) => {
                idx.vectors.write().insert(id.to_string(), vector.to_vec());
                Ok(())
            }
        }
    }

    /// Record a batch of vectors.
    pub fn insert_batch(&self, entries: &[(String, Vec<f32>)]) -> CodetectResult<()> {
        match self {
            Self::Native(_) => Ok(()),
            Self::BruteForce(idx) => {
                let mut map = idx.vectors.write();
                for (id, vector) in entries {
                    map.insert(id.clone(), vector.clone());
                }
                Ok(())
            }
        }
    }

    /// Remove one vector.
    pub fn delete(&self, id: &str) -> CodetectResult<()> {
        match self {
            Self::Native(_) => Ok(()),
            Self::BruteForce(idx) => {
                idx.vectors.write().remove(id);
                Ok(())
            }
        }
    }

    /// Remove a batch of vectors.
    pub fn delete_batch(&self, ids: &[String]) -> CodetectResult<()> {
        match self {
            Self::Native(_) => Ok(()),
            Self::BruteForce(idx) => {
                let mut map = idx.vectors.write();
                for id in ids {
                    map.remove(id);
                }
                Ok(())
            }
        }
    }

    /// Top-k nearest neighbours, ascending by distance.
    pub fn search_knn(&self, query: &[f32], k: usize) -> CodetectResult<Vec<KnnHit>> {
        match self {
            Self::Native(idx) => idx.search_knn(query, k),
            Self::BruteForce(idx) => idx.search_knn(query, k),
        }
    }
}

/// Backend-native KNN over a vector column.
pub struct NativeIndex {
    store: Arc<dyn Store>,
    table: String,
    metric: DistanceMetric,
}

impl NativeIndex {
    fn create_index(&self) -> CodetectResult<()> {
        if let Some(sql) = self
            .store
            .dialect()
            .create_vector_index_sql(&self.table, "embedding", self.metric)
        {
            self.store.execute(&sql, &[])?;
        }
        Ok(())
    }

    fn search_knn(&self, query: &[f32], k: usize) -> CodetectResult<Vec<KnnHit>> {
        let Some(sql) = self.store.dialect().knn_sql(&self.table, self.metric) else {
            return Ok(Vec::new());
        };
        #[allow(clippy::cast_possible_wrap)]
        let rows = self.store.query(
            &sql,
            &[
                Value::Vector(query.to_vec()),
                Value::Vector(query.to_vec()),
                Value::Integer(k as i64),
            ],
        )?;
        rows.iter()
            .map(|row| {
                let id = row.get_string(0)?;
                let distance = row.get_f64(1)?;
                Ok(KnnHit {
                    id,
                    distance,
                    score: similarity_score(distance),
                })
            })
            .collect()
    }
}

/// In-memory full-scan KNN over cache entries.
///
/// The map is lazily loaded from the cache table on first search and kept
/// current by `insert`/`delete` calls from the pipeline. Vectors are
/// copied on insert so the map never aliases caller slices.
pub struct BruteForceIndex {
    store: Arc<dyn Store>,
    table: String,
    metric: DistanceMetric,
    vectors: RwLock<HashMap<String, Vec<f32>>>,
    loaded: RwLock<bool>,
}

impl BruteForceIndex {
    /// Load all vectors from the cache table if not yet loaded.
    fn ensure_loaded(&self) -> CodetectResult<()> {
        if *self.loaded.read() {
            return Ok(());
        }
        let mut loaded = self.loaded.write();
        if *loaded {
            return Ok(());
        }
        let sql = format!("SELECT content_hash, embedding FROM {}", self.table);
        let rows = match self.store.query(&sql, &[]) {
            Ok(rows) => rows,
            // Table may not exist before the first embed run.
            Err(e) => {
                tracing::debug!(error = %e, table = %self.table, "vector table not readable yet");
                *loaded = true;
                return Ok(());
            }
        };
        let mut map = self.vectors.write();
        for row in &rows {
            map.insert(row.get_string(0)?, row.get_vector(1)?);
        }
        *loaded = true;
        tracing::debug!(count = map.len(), "loaded brute-force vector index");
        Ok(())
    }

    fn search_knn(&self, query: &[f32], k: usize) -> CodetectResult<Vec<KnnHit>> {
        self.ensure_loaded()?;
        let map = self.vectors.read();
        let mut hits: Vec<KnnHit> = map
            .iter()
            .filter(|(_, v)| v.len() == query.len())
            .map(|(id, v)| {
                let distance = self.metric.distance(query, v);
                KnnHit {
                    id: id.clone(),
                    distance,
                    score: similarity_score(distance),
                }
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}
