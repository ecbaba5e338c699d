//! Embedding provider port and its HTTP implementations.
//!
//! A provider is a stateless function mapping a batch of strings to
//! equal-length vectors of a declared dimension, reached over HTTP:
//! POST `{model, input: [...]}`, response `{data: [{embedding, index}],
//! error?}`. Responses are reordered by `index` before returning, since
//! providers may permute.
//!
//! Single-text (query) calls receive the provider's optional query prefix;
//! multi-text (document) calls never do. The prefix is a provider option
//! surfaced through configuration rather than inferred from model names,
//! since models like nomic-embed-code require one and others reject it.

use serde::{Deserialize, Serialize};

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::error::{CodetectError, CodetectResult};

/// Embedding provider port.
pub trait Embedder: Send + Sync {
    /// Short provider identifier (`ollama`, `litellm`, `lmstudio`, `off`).
    fn provider_id(&self) -> &str;

    /// Declared output dimensionality.
    fn dimensions(&self) -> usize;

    /// Whether the provider can serve requests.
    fn available(&self) -> bool;

    /// Embed a batch of document texts. The result has exactly one vector
    /// per input, in input order.
    fn embed(&self, texts: &[String]) -> CodetectResult<Vec<Vec<f32>>>;

    /// Embed a single query text, applying the provider's query prefix.
    fn embed_query(&self, text: &str) -> CodetectResult<Vec<f32>>;
}

/// Build the configured provider.
pub fn create_embedder(config: &EmbeddingConfig) -> CodetectResult<Box<dyn Embedder>> {
    match config.provider {
        EmbeddingProviderKind::Off => Ok(Box::new(DisabledEmbedder {
            dimensions: config.dimensions,
        })),
        EmbeddingProviderKind::Ollama => Ok(Box::new(HttpEmbedder::new(
            "ollama",
            &config.ollama_url,
            None,
            config,
        )?)),
        EmbeddingProviderKind::Litellm => {
            let base = config.litellm_url.as_deref().ok_or_else(|| CodetectError::Config {
                details: "EMBEDDING_PROVIDER=litellm requires LITELLM_URL".into(),
            })?;
            Ok(Box::new(HttpEmbedder::new(
                "litellm",
                base,
                config.litellm_api_key.clone(),
                config,
            )?))
        }
        EmbeddingProviderKind::Lmstudio => {
            let base = config
                .litellm_url
                .as_deref()
                .unwrap_or("http://localhost:1234");
            Ok(Box::new(HttpEmbedder::new("lmstudio", base, None, config)?))
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(rename = "type")]
    #[allow(dead_code)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingRow>,
    error: Option<ApiError>,
}

/// Reorder provider rows by their `index` and validate shape: one vector
/// per input, each of the declared dimension.
fn reorder_rows(
    mut rows: Vec<EmbeddingRow>,
    expected: usize,
    dimensions: usize,
    provider: &str,
) -> CodetectResult<Vec<Vec<f32>>> {
    if rows.len() != expected {
        return Err(CodetectError::Provider {
            provider: provider.to_string(),
            message: format!("response row count {} does not match input {expected}", rows.len()),
        });
    }
    rows.sort_by_key(|r| r.index);
    for (pos, row) in rows.iter().enumerate() {
        if row.index != pos {
            return Err(CodetectError::Provider {
                provider: provider.to_string(),
                message: format!("response indexes are not a permutation of 0..{expected}"),
            });
        }
        if row.embedding.len() != dimensions {
            return Err(CodetectError::Provider {
                provider: provider.to_string(),
                message: format!(
                    "row {pos} has {} dimensions, expected {dimensions}",
                    row.embedding.len()
                ),
            });
        }
    }
    Ok(rows.into_iter().map(|r| r.embedding).collect())
}

// ---------------------------------------------------------------------------
// HTTP provider
// ---------------------------------------------------------------------------

/// OpenAI-compatible `/v1/embeddings` provider.
pub struct HttpEmbedder {
    provider: &'static str,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    query_prefix: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpEmbedder {
    fn new(
        provider: &'static str,
        base_url: &str,
        api_key: Option<String>,
        config: &EmbeddingConfig,
    ) -> CodetectResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| CodetectError::Internal(format!("HTTP client error: {e}")))?;
        Ok(Self {
            provider,
            endpoint: join_endpoint(base_url),
            api_key,
            model: config.model.clone(),
            dimensions: config.dimensions,
            query_prefix: config.query_prefix.clone(),
            client,
        })
    }

    fn post(&self, texts: &[String]) -> CodetectResult<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().map_err(|e| CodetectError::Provider {
            provider: self.provider.to_string(),
            message: format!("request to {} failed: {e}", self.endpoint),
        })?;

        let status = response.status();
        let body: EmbeddingResponse = response.json().map_err(|e| CodetectError::Provider {
            provider: self.provider.to_string(),
            message: format!("malformed response (HTTP {status}): {e}"),
        })?;

        if let Some(error) = body.error {
            return Err(CodetectError::Provider {
                provider: self.provider.to_string(),
                message: error.message,
            });
        }
        if !status.is_success() {
            return Err(CodetectError::Provider {
                provider: self.provider.to_string(),
                message: format!("HTTP {status}"),
            });
        }

        reorder_rows(body.data, texts.len(), self.dimensions, self.provider)
    }
}

impl Embedder for HttpEmbedder {
    fn provider_id(&self) -> &str {
        self.provider
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn available(&self) -> bool {
        // HTTP providers are assumed reachable; per-call failures carry
        // the detail.
        true
    }

    fn embed(&self, texts: &[String]) -> CodetectResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.post(texts)
    }

    fn embed_query(&self, text: &str) -> CodetectResult<Vec<f32>> {
        let prefixed = match &self.query_prefix {
            Some(prefix) => format!("{prefix}{text}"),
            None => text.to_string(),
        };
        let mut vectors = self.post(&[prefixed])?;
        vectors
            .pop()
            .ok_or_else(|| CodetectError::Provider {
                provider: self.provider.to_string(),
                message: "empty response for query embedding".into(),
            })
    }
}

/// Provider used when embedding is switched off; the semantic signal
/// degrades to empty.
pub struct DisabledEmbedder {
    dimensions: usize,
}

impl Embedder for DisabledEmbedder {
    fn provider_id(&self) -> &str {
        "off"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn available(&self) -> bool {
        false
    }

    fn embed(&self, _texts: &[String]) -> CodetectResult<Vec<Vec<f32>>> {
        Err(CodetectError::ProviderUnavailable {
            reason: "embedding provider is off".into(),
        })
    }

    fn embed_query(&self, _text: &str) -> CodetectResult<Vec<f32>> {
        Err(CodetectError::ProviderUnavailable {
            reason: "embedding provider is off".into(),
        })
    }
}

/// Normalize a base URL into the embeddings endpoint.
fn join_endpoint(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.ends_with("/embeddings") {
        trimmed.to_string()
    } else if trimmed.ends_with("/v1") {
        format!("{trimmed}/embeddings")
    } else {
        format!("{trimmed}/v1/embeddings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(index: usize, embedding: Vec<f32>) -> EmbeddingRow {
        EmbeddingRow { embedding, index }
    }

    #[test]
    fn test_reorder_rows_handles_permutation() {
        let rows = vec![row(2, vec![3.0, 3.0]), row(0, vec![1.0, 1.0]), row(1, vec![2.0, 2.0])];
        let out = reorder_rows(rows, 3, 2, "test").expect("reorder");
        assert_eq!(out, vec![vec![1.0, 1.0], vec![2.0, 2.0], vec![3.0, 3.0]]);
    }

    #[test]
    fn test_reorder_rows_rejects_count_mismatch() {
        let rows = vec![row(0, vec![1.0, 1.0])];
        assert!(reorder_rows(rows, 2, 2, "test").is_err());
    }

    #[test]
    fn test_reorder_rows_rejects_dimension_mismatch() {
        let rows = vec![row(0, vec![1.0, 1.0, 1.0])];
        assert!(reorder_rows(rows, 1, 2, "test").is_err());
    }

    #[test]
    fn test_reorder_rows_rejects_duplicate_indexes() {
        let rows = vec![row(0, vec![1.0]), row(0, vec![2.0])];
        assert!(reorder_rows(rows, 2, 1, "test").is_err());
    }

    #[test]
    fn test_join_endpoint() {
        assert_eq!(
            join_endpoint("http://localhost:11434"),
            "http://localhost:11434/v1/embeddings"
        );
        assert_eq!(
            join_endpoint("http://proxy:4000/v1/"),
            "http://proxy:4000/v1/embeddings"
        );
        assert_eq!(
            join_endpoint("http://proxy:4000/v1/embeddings"),
            "http://proxy:4000/v1/embeddings"
        );
    }

    #[test]
    fn test_disabled_embedder() {
        let embedder = DisabledEmbedder { dimensions: 768 };
        assert!(!embedder.available());
        assert_eq!(embedder.dimensions(), 768);
        assert!(matches!(
            embedder.embed(&["x".into()]),
            Err(CodetectError::ProviderUnavailable { .. })
        ));
    }

    #[test]
    fn test_create_embedder_off_and_missing_litellm_url() {
        let off = EmbeddingConfig {
            provider: EmbeddingProviderKind::Off,
            ..EmbeddingConfig::default()
        };
        assert_eq!(create_embedder(&off).expect("off").provider_id(), "off");

        let litellm = EmbeddingConfig {
            provider: EmbeddingProviderKind::Litellm,
            litellm_url: None,
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&litellm).is_err());
    }

    #[test]
    fn test_error_payload_parses() {
        let body = r#"{"error":{"message":"model not found","type":"invalid_request_error"}}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(body).expect("parse");
        assert!(parsed.data.is_empty());
        assert_eq!(parsed.error.expect("error").message, "model not found");
    }
}
