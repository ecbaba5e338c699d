//! Error types for codetect-core.
//!
//! Uses a hierarchical error enum so callers can pattern-match on
//! the subsystem that failed. Environmental failures (database gone,
//! provider unreachable) carry a human-readable reason; data failures
//! (one unreadable file, one malformed record) are downgraded to
//! warnings at the call site and never surface here.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for all codetect-core operations.
#[derive(Debug, Error)]
pub enum CodetectError {
    // ---- Recoverable (operation failed, system healthy) ----
    /// The embedding provider rejected or failed a request.
    #[error("embedding provider error ({provider}): {message}")]
    Provider {
        /// Provider identifier (e.g. `ollama`, `litellm`).
        provider: String,
        /// Human-readable error description.
        message: String,
    },

    // ---- Degraded (system works with reduced capability) ----
    /// No embedding provider is configured or reachable. Literal and
    /// symbol search still work.
    #[error("embedding provider unavailable: {reason}")]
    ProviderUnavailable {
        /// Why no provider could be used.
        reason: String,
    },

    // ---- Fatal (system cannot operate) ----
    /// The persisted Merkle tree file exists but cannot be decoded.
    #[error("corrupt merkle tree at {path}: {message}")]
    CorruptTree {
        /// Path of the tree file.
        path: PathBuf,
        /// Decode failure description.
        message: String,
    },

    /// Configuration is invalid or missing required fields.
    #[error("configuration error: {details}")]
    Config {
        /// What's wrong with the config.
        details: String,
    },

    /// The operation was canceled via its cancellation token or deadline.
    #[error("operation canceled")]
    Canceled,

    // ---- Wrapped external errors ----
    /// Database error from either backend, flattened to a string so the
    /// variant is backend-agnostic.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic internal error for unexpected conditions.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for CodetectError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<postgres::Error> for CodetectError {
    fn from(e: postgres::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<r2d2::Error> for CodetectError {
    fn from(e: r2d2::Error) -> Self {
        Self::Database(format!("connection pool: {e}"))
    }
}

impl From<serde_json::Error> for CodetectError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Convenience type alias for Results in codetect-core.
pub type CodetectResult<T> = Result<T, CodetectError>;
