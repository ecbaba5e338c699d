//! codetect CLI.
//!
//! Command-line interface for indexing, searching, and inspecting
//! codetect indexes. Exits 0 on success and 1 on fatal errors.

use std::path::Path;

use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use codetect_core::Engine;

/// codetect -- local code intelligence for AI coding agents
#[derive(Parser, Debug)]
#[command(name = "codetect", version, about = "Hybrid code search: literal, symbol, and semantic")]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index a repository incrementally.
    Index {
        /// Path to the repository root.
        #[arg(default_value = ".")]
        path: String,

        /// Force full reindex, ignoring the stored Merkle tree.
        #[arg(long)]
        force: bool,
    },

    /// Re-embed one file or the whole repository, bypassing change
    /// detection.
    Embed {
        /// Path to the repository root.
        #[arg(long, default_value = ".")]
        repo: String,

        /// File to embed (relative to the repo root); all files when
        /// omitted.
        path: Option<String>,
    },

    /// Search the indexed codebase.
    Search {
        /// Search query (natural language, symbol, or regex).
        query: String,

        /// Path to the repository root.
        #[arg(long, default_value = ".")]
        repo: String,

        /// Maximum number of results.
        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Rescore top candidates with the configured reranker.
        #[arg(long)]
        rerank: bool,

        /// Print raw JSON instead of formatted results.
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics.
    Stats {
        /// Path to the repository root.
        #[arg(default_value = ".")]
        path: String,
    },

    /// Start the MCP stdio server for AI agent integration.
    Mcp {
        /// Path to the repository root.
        #[arg(long, default_value = ".")]
        repo: String,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    match cli.command {
        Commands::Index { path, force } => {
            let engine = Engine::new(Path::new(&path))?;
            let spinner = spinner("indexing");
            let cancel = CancellationToken::new();
            let report = engine.index(force, &cancel)?;
            spinner.finish_and_clear();
            println!(
                "{:?}: {} files processed, {} deleted, {} chunks ({} embedded, {} cache hits) in {:.2}s",
                report.change_type,
                report.files_processed,
                report.files_deleted,
                report.chunks_created,
                report.chunks_embedded,
                report.cache_hits,
                report.duration,
            );
        }
        Commands::Embed { repo, path } => {
            let engine = Engine::new(Path::new(&repo))?;
            let spinner = spinner("embedding");
            let report = engine.embed(path.as_deref(), &CancellationToken::new())?;
            spinner.finish_and_clear();
            println!(
                "{} chunks: {} embedded, {} cache hits ({:.1}% hit rate) in {:.2}s",
                report.total, report.embedded, report.cache_hits, report.hit_rate, report.duration,
            );
        }
        Commands::Search {
            query,
            repo,
            limit,
            rerank,
            json,
        } => {
            let engine = Engine::new(Path::new(&repo))?;
            let results = engine.search(&query, limit, rerank, &CancellationToken::new())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("no results -- has this repository been indexed? (codetect index)");
            } else {
                for (rank, result) in results.iter().enumerate() {
                    let sources: Vec<&str> =
                        result.sources.iter().map(|s| s.as_str()).collect();
                    println!(
                        "{:2}. {}:{}-{}  [{:.4}] ({})",
                        rank + 1,
                        result.path,
                        result.start_line,
                        result.end_line,
                        result.score,
                        sources.join("+"),
                    );
                    if !result.preview.is_empty() {
                        println!("      {}", result.preview);
                    }
                }
            }
        }
        Commands::Stats { path } => {
            let engine = Engine::new(Path::new(&path))?;
            let stats = engine.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Mcp { repo } => {
            let repo_path = Path::new(&repo);
            if !repo_path.exists() {
                anyhow::bail!("repository path does not exist: {repo}");
            }
            // Logs already go to stderr; stdout belongs to the JSON-RPC
            // transport from here on.
            let engine = Engine::new(repo_path)?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(codetect_mcp::serve_stdio(engine))?;
        }
    }

    Ok(())
}

fn init_logging() {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "warn".into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json");
    let builder = tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr);
    if json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn spinner(message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_message(message);
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} {elapsed}") {
        bar.set_style(style);
    }
    bar.enable_steady_tick(std::time::Duration::from_millis(120));
    bar
}
