//! Parsed units as handed over by the parsing layer

use rusqlite::types::{ToSql, ToSqlOutput, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A captured scalar value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Null => ToSqlOutput::Owned(Value::Null),
            FieldValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(*b as i64)),
            FieldValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            FieldValue::Float(f) => ToSqlOutput::Owned(Value::Real(*f)),
            FieldValue::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Integer(v as i64)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

/// Durable read progress within one source file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Watermark {
    pub line: u64,
    pub position: u64,
}

impl Watermark {
    pub fn new(line: u64, position: u64) -> Self {
        Self { line, position }
    }
}

/// One parsed line of a given line type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedLine {
    pub line_type: String,
    pub filename: String,
    pub line_number: u64,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl ParsedLine {
    pub fn new(
        line_type: impl Into<String>,
        filename: impl Into<String>,
        line_number: u64,
    ) -> Self {
        Self {
            line_type: line_type.into(),
            filename: filename.into(),
            line_number,
            hash: String::new(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Hash the raw text of the line
    pub fn with_raw(mut self, raw: &str) -> Self {
        self.hash = Self::content_hash(raw);
        self
    }

    pub fn content_hash(raw: &str) -> String {
        blake3::hash(raw.as_bytes()).to_string()
    }
}

/// One logical request: related lines persisted together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedUnit {
    pub first_line: u64,
    pub last_line: u64,
    pub lines: Vec<ParsedLine>,
}

impl ParsedUnit {
    pub fn new(lines: Vec<ParsedLine>) -> Self {
        let first_line = lines.iter().map(|l| l.line_number).min().unwrap_or(0);
        let last_line = lines.iter().map(|l| l.line_number).max().unwrap_or(0);
        Self {
            first_line,
            last_line,
            lines,
        }
    }

    /// Digest over the hashes of all lines, in order
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for line in &self.lines {
            hasher.update(line.hash.as_bytes());
            hasher.update(b"\n");
        }
        hasher.finalize().to_string()
    }

    /// File the upstream reader was positioned in when the unit completed
    pub fn source_filename(&self) -> Option<&str> {
        self.lines.last().map(|l| l.filename.as_str())
    }
}

/// One event of the newline-delimited stream produced by the parser
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IngestEvent {
    Unit {
        unit: ParsedUnit,
        #[serde(default)]
        watermark: Watermark,
    },
    Warning {
        kind: String,
        message: String,
        #[serde(default)]
        line_number: Option<u64>,
    },
}
