//! Record assembler
//!
//! Turns parsed units into request rows plus line rows and commits each
//! unit atomically. Also owns the file progress cache and the warning
//! sink for the lifetime of one run.

use std::collections::{BTreeMap, HashMap};
use rusqlite::ErrorCode;
use crate::format::{FormatDescription, RESERVED_COLUMNS};
use crate::request::{ParsedUnit, Watermark};
use crate::storage::sqlite::sql_int;
use crate::storage::{
    ensure_schema, existing_files, insert_request, Database, FileTracker, PendingLine,
    PendingRequest, SchemaRegistry, WarningSink,
};
use crate::{Error, Result};

/// Totals reported when a run finishes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub requests: usize,
    pub lines: usize,
    pub skipped_lines: usize,
    pub dropped_fields: usize,
    pub warnings: usize,
    pub retries: u64,
    pub files: usize,
}

/// Persists parsed requests into the store
pub struct Aggregator {
    db: Database,
    registry: SchemaRegistry,
    files: FileTracker,
    warnings: WarningSink,
    summary: Summary,
}

impl Aggregator {
    /// Set up the schema for `format` and start a run against `db`
    pub fn prepare(mut db: Database, format: &FormatDescription) -> Result<Self> {
        let registry = ensure_schema(&mut db, format)?;
        Ok(Self {
            db,
            registry,
            files: FileTracker::new(),
            warnings: WarningSink::new(),
            summary: Summary::default(),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Stored progress per file, for the reader to skip committed spans
    pub fn existing_files(&self) -> Result<BTreeMap<String, Watermark>> {
        existing_files(&self.db)
    }

    /// In-memory (possibly unflushed) progress for a file
    pub fn file_progress(&self, filename: &str) -> Option<Watermark> {
        self.files.get(filename).map(|f| f.watermark)
    }

    /// Persist one unit. `watermark` is the reader's durable position in
    /// the unit's source file and may lag behind the unit's own lines.
    pub fn aggregate(&mut self, unit: &ParsedUnit, watermark: Watermark) -> Result<i64> {
        for value in [watermark.line, watermark.position] {
            sql_int(value).map_err(|err| classify(Error::Storage(err), unit.first_line))?;
        }

        let mut file_ids: HashMap<&str, i64> = HashMap::new();
        for line in &unit.lines {
            if !file_ids.contains_key(line.filename.as_str()) {
                let id = self.files.resolve(&mut self.db, &line.filename)?.id;
                file_ids.insert(line.filename.as_str(), id);
            }
        }

        let mut pending = PendingRequest {
            first_line: unit.first_line,
            last_line: unit.last_line,
            content_hash: unit.content_hash(),
            lines: Vec::with_capacity(unit.lines.len()),
        };
        let mut dropped = 0;
        let mut skipped = 0;
        for line in &unit.lines {
            let Some(table) = self.registry.line_table(&line.line_type) else {
                tracing::debug!("Skipping line {} of unknown type {}", line.line_number, line.line_type);
                skipped += 1;
                continue;
            };
            let mut values = Vec::with_capacity(line.fields.len());
            for (name, value) in &line.fields {
                if table.has_column(name) && !RESERVED_COLUMNS.contains(&name.as_str()) {
                    values.push((name.clone(), value.clone()));
                } else {
                    dropped += 1;
                }
            }
            pending.lines.push(PendingLine {
                table: table.name.clone(),
                line_number: line.line_number,
                file_id: file_ids.get(line.filename.as_str()).copied(),
                values,
            });
        }

        let request_id = self
            .db
            .write(|conn| insert_request(conn, &pending))
            .map_err(|err| classify(err, unit.first_line))?;

        if let Some(source) = unit.source_filename() {
            if let Some(file) = self.files.get_mut(source) {
                file.advance(watermark);
            }
        }

        self.summary.requests += 1;
        self.summary.lines += pending.lines.len();
        self.summary.skipped_lines += skipped;
        self.summary.dropped_fields += dropped;
        tracing::debug!(
            "Committed request {} (lines {}-{}, {} rows)",
            request_id,
            unit.first_line,
            unit.last_line,
            pending.lines.len()
        );
        Ok(request_id)
    }

    /// Record a parser warning right away
    pub fn warning(&mut self, kind: &str, message: &str, line_number: Option<u64>) -> Result<i64> {
        self.warnings.record(&mut self.db, kind, message, line_number)
    }

    /// Write pending file progress to the store
    pub fn flush(&mut self) -> Result<usize> {
        self.files.flush_all(&mut self.db)
    }

    /// Totals so far
    pub fn summary(&self) -> Summary {
        Summary {
            warnings: self.warnings.recorded(),
            retries: self.db.retry_policy().retries(),
            files: self.files.len(),
            ..self.summary.clone()
        }
    }

    /// Flush progress and release the connection
    pub fn finalize(mut self) -> Result<Summary> {
        self.flush()?;
        let summary = self.summary();
        tracing::info!(
            "Finished: {} requests, {} lines, {} warnings",
            summary.requests,
            summary.lines,
            summary.warnings
        );
        Ok(summary)
    }
}

/// Constraint violations and out-of-range integers are integrity errors
/// tied to the unit's first line
fn classify(err: Error, line: u64) -> Error {
    match err {
        Error::Storage(source) if is_integrity(&source) => {
            Error::Integrity {
                message: source.to_string(),
                line: Some(line),
                source,
            }
        }
        other => other,
    }
}

fn is_integrity(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::ToSqlConversionFailure(_))
        || err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
}
