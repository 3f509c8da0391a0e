//! Warning sink - one `warnings` row per parser warning

use rusqlite::params;
use crate::Result;
use super::sqlite::{sql_int, Database};

/// A stored warning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarningRecord {
    pub id: i64,
    pub kind: String,
    pub message: Option<String>,
    pub line_number: Option<u64>,
}

/// Appends warnings immediately, outside of any request transaction
#[derive(Debug, Default)]
pub struct WarningSink {
    recorded: usize,
}

impl WarningSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        db: &mut Database,
        kind: &str,
        message: &str,
        line_number: Option<u64>,
    ) -> Result<i64> {
        let id = db.write(|conn| {
            let line = line_number.map(sql_int).transpose()?;
            conn.execute(
                "INSERT INTO warnings (kind, message, line_number) VALUES (?1, ?2, ?3)",
                params![kind, message, line],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        self.recorded += 1;
        tracing::debug!("Warning {} recorded: {}", kind, message);
        Ok(id)
    }

    /// Warnings recorded during this run
    pub fn recorded(&self) -> usize {
        self.recorded
    }
}

/// All stored warnings in insertion order
pub fn all_warnings(db: &Database) -> Result<Vec<WarningRecord>> {
    let mut stmt = db
        .connection()
        .prepare("SELECT id, kind, message, line_number FROM warnings ORDER BY id")?;
    let warnings = stmt
        .query_map([], |row| {
            Ok(WarningRecord {
                id: row.get(0)?,
                kind: row.get(1)?,
                message: row.get(2)?,
                line_number: row.get::<_, Option<i64>>(3)?.map(|l| l as u64),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(warnings)
}
