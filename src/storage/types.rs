//! Capture type tags -> SQLite column types

use std::fmt;

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    String,
    Integer,
    Double,
    DateTime,
    Date,
}

impl ColumnType {
    /// Map a capture type tag (case-insensitive). Unknown tags become strings.
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "text" | "eval" => ColumnType::Text,
            "integer" | "int" => ColumnType::Integer,
            "sec" | "msec" | "duration" | "float" | "double" => ColumnType::Double,
            "timestamp" | "datetime" => ColumnType::DateTime,
            "date" => ColumnType::Date,
            _ => ColumnType::String,
        }
    }

    /// Declared SQL type used in `CREATE TABLE`
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::String => "VARCHAR(255)",
            ColumnType::Integer => "INTEGER",
            ColumnType::Double => "DOUBLE",
            ColumnType::DateTime => "DATETIME",
            ColumnType::Date => "DATE",
        }
    }

    /// Recover the column type from a declared SQL type read back from the store
    pub fn from_sql_type(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        match upper.as_str() {
            "INTEGER" | "INT" | "BIGINT" => ColumnType::Integer,
            "DOUBLE" | "REAL" | "FLOAT" => ColumnType::Double,
            "DATETIME" | "TIMESTAMP" => ColumnType::DateTime,
            "DATE" => ColumnType::Date,
            "TEXT" => ColumnType::Text,
            _ => ColumnType::String,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_type())
    }
}
