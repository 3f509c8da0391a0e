//! # Reqlog - Request log aggregation into SQLite
//!
//! Persists parsed log requests into a relational store whose schema is
//! derived at runtime from a declarative format description.
//!
//! Reqlog provides:
//! - Schema synthesis from line types and their typed captures
//! - Atomic persistence of one request and all of its lines
//! - Per-file read progress so re-runs resume instead of duplicating
//! - A retry policy for writer contention on the shared database file

pub mod format;
pub mod request;
pub mod storage;
pub mod aggregator;
pub mod pipeline;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use format::{CaptureSpec, FormatDescription, LineDefinition};
pub use request::{FieldValue, ParsedLine, ParsedUnit, Watermark};
pub use storage::{Database, SchemaRegistry};
pub use aggregator::{Aggregator, Summary};

/// Result type alias for Reqlog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Reqlog operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Integrity error{}: {message}", line_suffix(.line))]
    Integrity {
        message: String,
        line: Option<u64>,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Database still busy after {attempts} attempts: {source}")]
    ContentionExhausted {
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Event decode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Every error that escapes the core aborts the run. Contention is
    /// handled inside the retry policy and only surfaces once exhausted.
    pub fn is_fatal(&self) -> bool {
        true
    }

    /// Offending input line, where one is known
    pub fn line_number(&self) -> Option<u64> {
        match self {
            Error::Integrity { line, .. } => *line,
            _ => None,
        }
    }
}

fn line_suffix(line: &Option<u64>) -> String {
    line.map(|l| format!(" on line {}", l)).unwrap_or_default()
}
