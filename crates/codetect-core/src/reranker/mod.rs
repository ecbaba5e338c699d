//! Optional cross-encoder reranking over fused results.
//!
//! Disabled by default. When enabled, the top-k fused candidates with
//! retrievable text are rescored by a pairwise scoring endpoint
//! (`POST {base_url}/rerank` with `{model, query, documents}`); scores
//! below the threshold are dropped, and candidates without text plus the
//! tail beyond top-k are appended unchanged to preserve coverage.
//!
//! Any reranking failure is swallowed: the fused order stands.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::RerankConfig;
use crate::error::{CodetectError, CodetectResult};
use crate::types::SearchResult;

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RerankRow {
    index: usize,
    relevance_score: f64,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    #[serde(default)]
    results: Vec<RerankRow>,
}

/// Pairwise scoring client over fused search results.
pub struct Reranker {
    config: RerankConfig,
    client: Option<reqwest::blocking::Client>,
}

impl Reranker {
    /// Build the reranker; stays inert unless enabled with a base URL.
    pub fn new(config: &RerankConfig) -> Self {
        let client = if config.enabled && config.base_url.is_some() {
            reqwest::blocking::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .map_err(|e| {
                    tracing::warn!(error = %e, "rerank client unavailable, reranking disabled");
                    e
                })
                .ok()
        } else {
            None
        };
        Self {
            config: config.clone(),
            client,
        }
    }

    /// Whether reranking will actually run.
    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Rescore the top-k candidates against the query using `texts`
    /// (`result_id -> document text`). Falls back to the fused order on
    /// any failure.
    pub fn rerank(
        &self,
        query: &str,
        results: Vec<SearchResult>,
        texts: &HashMap<String, String>,
    ) -> Vec<SearchResult> {
        if !self.is_enabled() || results.is_empty() {
            return results;
        }
        match self.try_rerank(query, &results, texts) {
            Ok(reranked) => reranked,
            Err(e) => {
                tracing::warn!(error = %e, "reranking failed, keeping fused order");
                results
            }
        }
    }

    fn try_rerank(
        &self,
        query: &str,
        results: &[SearchResult],
        texts: &HashMap<String, String>,
    ) -> CodetectResult<Vec<SearchResult>> {
        let top_k = self.config.top_k.min(results.len());

        // Candidates within top-k that have text are scored; the rest are
        // appended unchanged.
        let mut scored_idx: Vec<usize> = Vec::new();
        let mut documents: Vec<&str> = Vec::new();
        for (idx, result) in results.iter().take(top_k).enumerate() {
            if let Some(text) = texts.get(&result.id) {
                scored_idx.push(idx);
                documents.push(text.as_str());
            }
        }
        if documents.is_empty() {
            return Ok(results.to_vec());
        }

        let scores = self.score(query, documents)?;
        if scores.len() != scored_idx.len() {
            return Err(CodetectError::Internal(format!(
                "rerank returned {} scores for {} documents",
                scores.len(),
                scored_idx.len()
            )));
        }

        let mut rescored: Vec<SearchResult> = Vec::new();
        let mut passthrough: Vec<SearchResult> = Vec::new();
        let mut scores_by_idx: HashMap<usize, f64> = HashMap::new();
        for (pos, idx) in scored_idx.iter().enumerate() {
            scores_by_idx.insert(*idx, scores[pos]);
        }

        for (idx, result) in results.iter().enumerate() {
            match scores_by_idx.get(&idx) {
                Some(score) if *score >= self.config.threshold => {
                    let mut updated = result.clone();
                    updated.score = *score;
                    rescored.push(updated);
                }
                Some(_) => {} // below threshold, dropped
                None => passthrough.push(result.clone()),
            }
        }

        rescored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        rescored.extend(passthrough);
        Ok(rescored)
    }

    fn score(&self, query: &str, documents: Vec<&str>) -> CodetectResult<Vec<f64>> {
        let (Some(client), Some(base_url)) = (&self.client, &self.config.base_url) else {
            return Err(CodetectError::Internal("rerank client not built".into()));
        };
        let endpoint = format!("{}/rerank", base_url.trim_end_matches('/'));
        let expected = documents.len();
        let request = RerankRequest {
            model: &self.config.model,
            query,
            documents,
        };
        let response = client
            .post(&endpoint)
            .json(&request)
            .send()
            .map_err(|e| CodetectError::Internal(format!("rerank request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CodetectError::Internal(format!("rerank HTTP {status}")));
        }
        let body: RerankResponse = response
            .json()
            .map_err(|e| CodetectError::Internal(format!("malformed rerank response: {e}")))?;

        let mut scores = vec![0.0f64; expected];
        let mut seen = vec![false; expected];
        for row in body.results {
            if row.index >= expected || seen[row.index] {
                return Err(CodetectError::Internal(
                    "rerank response indexes out of range".into(),
                ));
            }
            seen[row.index] = true;
            scores[row.index] = row.relevance_score;
        }
        if seen.iter().any(|s| !s) {
            return Err(CodetectError::Internal(
                "rerank response missing document scores".into(),
            ));
        }
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Signal;

    fn result(id: &str, score: f64) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            path: id.to_string(),
            start_line: 1,
            end_line: 5,
            score,
            sources: vec![Signal::Semantic],
            preview: String::new(),
        }
    }

    #[test]
    fn test_disabled_reranker_is_passthrough() {
        let reranker = Reranker::new(&RerankConfig::default());
        assert!(!reranker.is_enabled());

        let results = vec![result("a", 0.9), result("b", 0.5)];
        let out = reranker.rerank("query", results.clone(), &HashMap::new());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "a");
    }

    #[test]
    fn test_enabled_without_base_url_is_passthrough() {
        let config = RerankConfig {
            enabled: true,
            base_url: None,
            ..RerankConfig::default()
        };
        let reranker = Reranker::new(&config);
        assert!(!reranker.is_enabled());
    }

    #[test]
    fn test_unreachable_endpoint_falls_back_to_fused_order() {
        let config = RerankConfig {
            enabled: true,
            base_url: Some("http://127.0.0.1:1".to_string()),
            ..RerankConfig::default()
        };
        let reranker = Reranker::new(&config);
        assert!(reranker.is_enabled());

        let results = vec![result("a", 0.9), result("b", 0.5)];
        let mut texts = HashMap::new();
        texts.insert("a".to_string(), "fn a() {}".to_string());
        let out = reranker.rerank("query", results.clone(), &texts);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "a");
        assert!((out[0].score - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rerank_response_shape_parses() {
        let body = r#"{"results":[{"index":1,"relevance_score":0.92},{"index":0,"relevance_score":0.13}]}"#;
        let parsed: RerankResponse = serde_json::from_str(body).expect("parse");
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].index, 1);
    }
}
