//! MCP tool definitions for codetect.
//!
//! Each tool is annotated with `#[tool]` and exposes one engine operation
//! to AI agents over the line-delimited JSON-RPC stdio transport. Tool
//! results are UTF-8 JSON payloads.
//!
//! ## Thread Safety
//!
//! `Engine` performs blocking I/O (SQLite, subprocesses, HTTP), so
//! long-running operations run under `spawn_blocking`. A `tokio::sync::
//! Mutex` serializes engine access: no two indexing runs against the same
//! repository may overlap.

use std::path::Path;
use std::sync::Arc;

use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*, tool,
    tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use codetect_core::Engine;

// -----------------------------------------------------------------------
// Parameter structs for each tool
// -----------------------------------------------------------------------

/// Parameters for the index tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct IndexParams {
    /// Repository path to index (defaults to the server's repository).
    pub path: Option<String>,
    /// Force a full re-index, ignoring the stored Merkle tree.
    pub force: Option<bool>,
}

/// Parameters for the embed tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct EmbedParams {
    /// File path relative to the repository root. Embeds the whole
    /// repository when omitted.
    pub path: Option<String>,
}

/// Parameters for the stats tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct StatsParams {
    /// Repository path (defaults to the server's repository).
    pub path: Option<String>,
}

/// Parameters for hybrid_search_v2.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct HybridSearchParams {
    /// Search query -- natural language, symbol name, or regex.
    pub query: String,
    /// Maximum number of results to return (default: 10).
    pub limit: Option<usize>,
    /// Rescore the top candidates with the configured reranker.
    pub rerank: Option<bool>,
}

// -----------------------------------------------------------------------
// MCP Server
// -----------------------------------------------------------------------

/// codetect MCP server.
#[derive(Clone)]
pub struct CodetectServer {
    engine: Arc<Mutex<Engine>>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl CodetectServer {
    /// Create a new MCP server backed by the given engine.
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            tool_router: Self::tool_router(),
        }
    }

    /// Resolve the engine for an optional path override. A path other
    /// than the server's repository opens a transient engine against the
    /// same backend.
    async fn engine_for(&self, path: Option<&str>) -> Result<Arc<Mutex<Engine>>, McpError> {
        let Some(path) = path else {
            return Ok(Arc::clone(&self.engine));
        };
        let default_key = self.engine.lock().await.repo_key().to_string();
        let requested = Path::new(path)
            .canonicalize()
            .map_err(|e| McpError::invalid_params(format!("bad path '{path}': {e}"), None))?;
        if requested.to_string_lossy().replace('\\', "/") == default_key {
            return Ok(Arc::clone(&self.engine));
        }
        let engine = tokio::task::spawn_blocking(move || Engine::new(&requested))
            .await
            .map_err(|e| McpError::internal_error(format!("engine task failed: {e}"), None))?
            .map_err(|e| McpError::internal_error(format!("engine init failed: {e}"), None))?;
        Ok(Arc::new(Mutex::new(engine)))
    }

    #[tool(
        name = "index",
        description = "Index a repository incrementally: detect changed files via the Merkle tree, re-chunk and re-embed them, and refresh the symbol index. Returns a JSON report."
    )]
    async fn index(&self, params: Parameters<IndexParams>) -> Result<CallToolResult, McpError> {
        let force = params.0.force.unwrap_or(false);
        let engine = self.engine_for(params.0.path.as_deref()).await?;

        let report = tokio::task::spawn_blocking(move || {
            let engine = engine.blocking_lock();
            engine.index(force, &CancellationToken::new())
        })
        .await
        .map_err(|e| McpError::internal_error(format!("index task failed: {e}"), None))?
        .map_err(|e| McpError::internal_error(format!("index failed: {e}"), None))?;

        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| McpError::internal_error(format!("serialize report: {e}"), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(
        name = "embed",
        description = "Chunk and embed one file (or the whole repository when no path is given), bypassing change detection. Returns a JSON report with cache hit statistics."
    )]
    async fn embed(&self, params: Parameters<EmbedParams>) -> Result<CallToolResult, McpError> {
        let engine = Arc::clone(&self.engine);
        let path = params.0.path;

        let report = tokio::task::spawn_blocking(move || {
            let engine = engine.blocking_lock();
            engine.embed(path.as_deref(), &CancellationToken::new())
        })
        .await
        .map_err(|e| McpError::internal_error(format!("embed task failed: {e}"), None))?
        .map_err(|e| McpError::internal_error(format!("embed failed: {e}"), None))?;

        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| McpError::internal_error(format!("serialize report: {e}"), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(
        name = "stats",
        description = "Report index statistics: location counts by node type and language, cache size and access counts, symbol count, and the active backend and embedding provider."
    )]
    async fn stats(&self, params: Parameters<StatsParams>) -> Result<CallToolResult, McpError> {
        let engine = self.engine_for(params.0.path.as_deref()).await?;
        let engine = engine.lock().await;
        let stats = engine
            .stats()
            .map_err(|e| McpError::internal_error(format!("stats failed: {e}"), None))?;
        let json = serde_json::to_string_pretty(&stats)
            .map_err(|e| McpError::internal_error(format!("serialize stats: {e}"), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(
        name = "hybrid_search_v2",
        description = "Search the indexed codebase with three fused signals: literal (regex), symbol lookup, and semantic similarity. Returns ranked JSON results; each carries the signals that contributed."
    )]
    async fn hybrid_search_v2(
        &self,
        params: Parameters<HybridSearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let limit = params.0.limit.unwrap_or(10);
        let rerank = params.0.rerank.unwrap_or(false);
        let query = params.0.query;
        let engine = Arc::clone(&self.engine);

        let results = tokio::task::spawn_blocking(move || {
            let engine = engine.blocking_lock();
            engine.search(&query, limit, rerank, &CancellationToken::new())
        })
        .await
        .map_err(|e| McpError::internal_error(format!("search task failed: {e}"), None))?
        .map_err(|e| McpError::internal_error(format!("search failed: {e}"), None))?;

        let json = serde_json::to_string_pretty(&results)
            .map_err(|e| McpError::internal_error(format!("serialize results: {e}"), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }
}

#[tool_handler]
impl ServerHandler for CodetectServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "codetect indexes a source repository into a hybrid search index. \
                 Run `index` after changing files, then `hybrid_search_v2` with natural \
                 language or symbol queries. `stats` reports index health; `embed` \
                 refreshes embeddings for one file without full change detection."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            ..Default::default()
        }
    }
}
