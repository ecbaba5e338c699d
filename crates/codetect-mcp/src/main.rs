//! codetect MCP server.
//!
//! Exposes the indexing and hybrid-search tools to AI coding agents over
//! the stdio transport (line-delimited JSON-RPC).

use anyhow::Result;
use clap::Parser;

use codetect_core::Engine;

/// codetect MCP server
#[derive(Parser, Debug)]
#[command(name = "codetect-mcp", version, about)]
struct Args {
    /// Path to the repository to serve.
    #[arg(long, default_value = ".")]
    repo: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // LOG_LEVEL / LOG_FORMAT control verbosity and shape. Logs go to
    // stderr; stdout belongs to the JSON-RPC transport.
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json");
    let builder = tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr);
    if json_logs {
        builder.json().init();
    } else {
        builder.init();
    }

    let repo_path = std::path::Path::new(&args.repo);
    if !repo_path.exists() {
        anyhow::bail!("repository path does not exist: {}", args.repo);
    }

    let engine = tokio::task::spawn_blocking({
        let repo_path = repo_path.to_path_buf();
        move || Engine::new(&repo_path)
    })
    .await??;

    tracing::info!(repo = %args.repo, "codetect MCP server starting on stdio");

    codetect_mcp::serve_stdio(engine).await
}
