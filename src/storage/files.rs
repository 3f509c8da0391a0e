//! Per-file read progress
//!
//! One `files` row per source file. A row is inserted the first time a
//! file is referenced so its id can be used as a foreign key right away;
//! progress updates stay in memory until [`FileTracker::flush_all`].

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use rusqlite::{params, OptionalExtension};
use crate::request::Watermark;
use crate::{Error, Result};
use super::sqlite::{sql_int, Database};

/// In-memory state of one `files` row
#[derive(Debug, Clone)]
pub struct FileProgress {
    pub id: i64,
    pub filename: String,
    pub watermark: Watermark,
    dirty: bool,
}

impl FileProgress {
    /// Move the watermark forward. Never moves it back.
    pub fn advance(&mut self, to: Watermark) -> bool {
        let next = Watermark {
            line: self.watermark.line.max(to.line),
            position: self.watermark.position.max(to.position),
        };
        if next == self.watermark {
            return false;
        }
        self.watermark = next;
        self.dirty = true;
        true
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Cache of file progress records for one run
#[derive(Debug, Default)]
pub struct FileTracker {
    files: HashMap<String, FileProgress>,
}

impl FileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or create the record for `filename`.
    ///
    /// Another run may register the same file between the lookup and the
    /// insert; its row is adopted, progress included.
    pub fn resolve(&mut self, db: &mut Database, filename: &str) -> Result<&mut FileProgress> {
        let entry = match self.files.entry(filename.to_string()) {
            Entry::Occupied(entry) => return Ok(entry.into_mut()),
            Entry::Vacant(entry) => entry,
        };

        let progress = match load(db, filename)? {
            Some(progress) => progress,
            None => {
                let inserted = db.write(|conn| {
                    conn.execute(
                        "INSERT INTO files (filename, line_number, position) VALUES (?1, 0, 0)
                         ON CONFLICT(filename) DO NOTHING",
                        [filename],
                    )
                })?;
                let progress = load(db, filename)?
                    .ok_or(Error::Storage(rusqlite::Error::QueryReturnedNoRows))?;
                if inserted == 0 {
                    tracing::debug!("File {} registered concurrently (id {})", filename, progress.id);
                } else {
                    tracing::debug!("Tracking new file {} (id {})", filename, progress.id);
                }
                progress
            }
        };
        Ok(entry.insert(progress))
    }

    pub fn get(&self, filename: &str) -> Option<&FileProgress> {
        self.files.get(filename)
    }

    pub fn get_mut(&mut self, filename: &str) -> Option<&mut FileProgress> {
        self.files.get_mut(filename)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Write every changed watermark back to the store in one transaction
    pub fn flush_all(&mut self, db: &mut Database) -> Result<usize> {
        let dirty: Vec<(i64, Watermark)> = self
            .files
            .values()
            .filter(|f| f.dirty)
            .map(|f| (f.id, f.watermark))
            .collect();
        if dirty.is_empty() {
            return Ok(0);
        }

        db.write(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "UPDATE files SET line_number = MAX(line_number, ?2), position = MAX(position, ?3) WHERE id = ?1",
                )?;
                for (id, watermark) in &dirty {
                    stmt.execute(params![id, sql_int(watermark.line)?, sql_int(watermark.position)?])?;
                }
            }
            tx.commit()
        })?;

        for file in self.files.values_mut() {
            file.dirty = false;
        }
        tracing::debug!("Flushed progress for {} files", dirty.len());
        Ok(dirty.len())
    }
}

fn load(db: &Database, filename: &str) -> Result<Option<FileProgress>> {
    let progress = db
        .connection()
        .query_row(
            "SELECT id, line_number, position FROM files WHERE filename = ?1",
            [filename],
            |row| {
                Ok(FileProgress {
                    id: row.get(0)?,
                    filename: filename.to_string(),
                    watermark: Watermark::new(row.get::<_, i64>(1)? as u64, row.get::<_, i64>(2)? as u64),
                    dirty: false,
                })
            },
        )
        .optional()?;
    Ok(progress)
}

/// Last committed watermark of every known file, as stored
pub fn existing_files(db: &Database) -> Result<BTreeMap<String, Watermark>> {
    let mut stmt = db
        .connection()
        .prepare("SELECT filename, line_number, position FROM files ORDER BY filename")?;
    let files = stmt
        .query_map([], |row| {
            let line: i64 = row.get(1)?;
            let position: i64 = row.get(2)?;
            Ok((row.get::<_, String>(0)?, Watermark::new(line as u64, position as u64)))
        })?
        .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
    Ok(files)
}
