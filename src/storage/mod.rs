//! Storage Layer - SQLite-backed persistence
//!
//! System of record is SQLite with tables:
//! - requests(first_line, last_line, content_hash)
//! - warnings(kind, message, line_number)
//! - files(filename, line_number, position)
//! - one <line_type>_lines table per line type in the format description

pub mod types;
pub mod retry;
pub mod sqlite;
pub mod schema;
pub mod files;
pub mod warnings;
pub mod requests;

pub use types::ColumnType;
pub use retry::RetryPolicy;
pub use sqlite::{Database, DatabaseOptions, DbStats};
pub use schema::{ensure_schema, SchemaRegistry, TableDescriptor};
pub use files::{existing_files, FileProgress, FileTracker};
pub use warnings::{WarningRecord, WarningSink};
pub use requests::{insert_request, PendingLine, PendingRequest};
