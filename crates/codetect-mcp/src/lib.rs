//! MCP surface for codetect.
//!
//! Exposes the [`CodetectServer`] tool router and a [`serve_stdio`]
//! entry point so both the `codetect-mcp` binary and the CLI's `mcp`
//! subcommand can run the stdio transport over one engine.

pub mod tools;

use anyhow::Result;
use rmcp::{transport::stdio, ServiceExt};

use codetect_core::Engine;

pub use tools::CodetectServer;

/// Serve the MCP tools over stdio until the client disconnects.
///
/// stdout belongs to the JSON-RPC transport; callers must route their
/// logging to stderr before invoking this.
pub async fn serve_stdio(engine: Engine) -> Result<()> {
    let service = CodetectServer::new(engine).serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
