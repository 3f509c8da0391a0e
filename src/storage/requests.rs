//! Request persistence
//!
//! A request row and all of its line rows are written in one immediate
//! transaction. Dropping the transaction on any error rolls back every
//! row of the request.

use rusqlite::types::ToSql;
use rusqlite::{params, Connection, TransactionBehavior};
use crate::request::FieldValue;
use super::sqlite::{quote, sql_int};

/// A line row waiting to be written
#[derive(Debug, Clone)]
pub struct PendingLine {
    pub table: String,
    pub line_number: u64,
    pub file_id: Option<i64>,
    /// Column -> value, restricted to columns the table really has
    pub values: Vec<(String, FieldValue)>,
}

impl PendingLine {
    fn insert_sql(&self) -> String {
        let mut columns = vec!["request_id", "line_number", "file_id"];
        columns.extend(self.values.iter().map(|(name, _)| name.as_str()));
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(&self.table),
            columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "),
            placeholders.join(", ")
        )
    }
}

/// A request row plus its pending line rows
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub first_line: u64,
    pub last_line: u64,
    pub content_hash: String,
    pub lines: Vec<PendingLine>,
}

/// Write the request and every line, or nothing. Returns the request id.
pub fn insert_request(conn: &mut Connection, request: &PendingRequest) -> rusqlite::Result<i64> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute(
        "INSERT INTO requests (first_line, last_line, content_hash) VALUES (?1, ?2, ?3)",
        params![sql_int(request.first_line)?, sql_int(request.last_line)?, request.content_hash],
    )?;
    let request_id = tx.last_insert_rowid();

    for line in &request.lines {
        let line_number = sql_int(line.line_number)?;
        let mut values: Vec<&dyn ToSql> = vec![&request_id as &dyn ToSql, &line_number, &line.file_id];
        values.extend(line.values.iter().map(|(_, v)| v as &dyn ToSql));

        let mut stmt = tx.prepare_cached(&line.insert_sql())?;
        stmt.execute(values.as_slice())?;
    }

    tx.commit()?;
    Ok(request_id)
}
