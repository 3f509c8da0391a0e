//! SQLite connection wrapper
//!
//! Owns the single connection used for a run together with the retry
//! policy applied to every write.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use rusqlite::Connection;
use crate::Result;
use super::retry::RetryPolicy;
use super::types::ColumnType;

/// Connection settings
#[derive(Debug, Clone, Default)]
pub struct DatabaseOptions {
    /// SQLite's own busy handler. Zero hands contention straight to `retry`.
    pub busy_timeout: Duration,
    pub retry: RetryPolicy,
}

/// A column as it exists in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
}

impl ColumnInfo {
    pub fn column_type(&self) -> ColumnType {
        ColumnType::from_sql_type(&self.declared_type)
    }
}

/// SQLite-backed store for one run
pub struct Database {
    conn: Connection,
    retry: RetryPolicy,
}

impl Database {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, DatabaseOptions::default())
    }

    pub fn open_with(path: &Path, options: DatabaseOptions) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::configure(conn, options)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(conn, DatabaseOptions::default())
    }

    fn configure(conn: Connection, options: DatabaseOptions) -> Result<Self> {
        conn.busy_timeout(options.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        Ok(Self {
            conn,
            retry: options.retry,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Schema DDL runs outside the retry policy
    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run a mutating operation under the retry policy
    pub fn write<T, F>(&mut self, mut op: F) -> Result<T>
    where
        F: FnMut(&mut Connection) -> rusqlite::Result<T>,
    {
        let Self { conn, retry } = self;
        retry.run(|| op(&mut *conn))
    }

    // ========== Introspection ==========

    /// Names of all user tables
    pub fn table_names(&self) -> Result<BTreeSet<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'"
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(names)
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Columns of `table` in declaration order
    pub fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let mut stmt = self.conn.prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")?;
        let columns = stmt
            .query_map([table], |row| {
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    declared_type: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }

    /// Index names defined on `table`
    pub fn indexes(&self, table: &str) -> Result<BTreeSet<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND name NOT LIKE 'sqlite_%'"
        )?;
        let names = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(names)
    }

    /// Count rows in a table
    pub fn count(&self, table: &str) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote(table));
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let mut tables = Vec::new();
        for name in self.table_names()? {
            let rows = self.count(&name)?;
            tables.push((name, rows));
        }
        Ok(DbStats { tables })
    }
}

/// Line numbers and byte positions are stored as SQLite integers, which
/// are signed 64-bit.
pub fn sql_int(value: u64) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

/// Quote an identifier for use in SQL
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DbStats {
    pub tables: Vec<(String, usize)>,
}

impl DbStats {
    pub fn rows(&self, table: &str) -> Option<usize> {
        self.tables.iter().find(|(name, _)| name == table).map(|(_, rows)| *rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_introspection_on_plain_table() {
        let db = Database::open_in_memory().unwrap();
        db.connection()
            .execute_batch(
                "CREATE TABLE things (id INTEGER PRIMARY KEY, label VARCHAR(255), weight DOUBLE);
                 CREATE INDEX index_things_on_label ON things (label);
                 INSERT INTO things (label, weight) VALUES ('a', 1.5), ('b', 2.0);",
            )
            .unwrap();

        assert!(db.table_exists("things").unwrap());
        assert!(!db.table_exists("missing").unwrap());

        let columns = db.columns("things").unwrap();
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "label", "weight"]);
        assert_eq!(columns[2].column_type(), ColumnType::Double);

        assert!(db.indexes("things").unwrap().contains("index_things_on_label"));
        assert_eq!(db.count("things").unwrap(), 2);
        assert_eq!(db.stats().unwrap().rows("things"), Some(2));
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("access_lines"), "\"access_lines\"");
        assert_eq!(quote("a\"b"), "\"a\"\"b\"");
    }
}
