//! Format description - the declarative shape of a log format
//!
//! Supplied by the parsing layer. Each line type lists its captures in
//! order; a capture may declare derived ("provides") fields that become
//! extra columns next to it.

use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

/// Columns every line table carries before its captures
pub const RESERVED_COLUMNS: &[&str] = &["id", "request_id", "line_number", "file_id"];

/// A complete format description: line types in declaration order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatDescription {
    #[serde(default)]
    pub line_types: Vec<LineDefinition>,
}

/// One line type and its ordered captures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineDefinition {
    pub name: String,
    #[serde(default)]
    pub captures: Vec<CaptureSpec>,
}

/// One named, typed field extracted from a line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_capture_type")]
    pub type_tag: String,
    #[serde(default)]
    pub indexed: bool,
    /// Derived field name -> type tag
    #[serde(default)]
    pub provides: BTreeMap<String, String>,
}

fn default_capture_type() -> String {
    "string".to_string()
}

impl CaptureSpec {
    pub fn new(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.into(),
            indexed: false,
            provides: BTreeMap::new(),
        }
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn provides(mut self, name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        self.provides.insert(name.into(), type_tag.into());
        self
    }
}

impl LineDefinition {
    pub fn new(name: impl Into<String>, captures: Vec<CaptureSpec>) -> Self {
        Self {
            name: name.into(),
            captures,
        }
    }

    /// Table backing this line type
    pub fn table_name(&self) -> String {
        format!("{}_lines", self.name)
    }
}

impl FormatDescription {
    pub fn new(line_types: Vec<LineDefinition>) -> Self {
        Self { line_types }
    }

    /// Look up a line type by name
    pub fn line_type(&self, name: &str) -> Option<&LineDefinition> {
        self.line_types.iter().find(|l| l.name == name)
    }

    /// Load a format description from a `.toml` or `.json` file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let parsed: std::result::Result<FormatDescription, String> = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&contents).map_err(|e| e.to_string()),
            _ => toml::from_str(&contents).map_err(|e| e.to_string()),
        };
        let format: FormatDescription = parsed.map_err(|e| {
            Error::Schema(format!("Invalid format description {}: {}", path.display(), e))
        })?;
        format.validate()?;
        Ok(format)
    }

    /// Reject descriptions that cannot be mapped onto tables.
    ///
    /// SQLite identifiers are case-insensitive, so names are compared
    /// case-insensitively too.
    pub fn validate(&self) -> Result<()> {
        let mut seen_types = HashSet::new();
        for line in &self.line_types {
            check_identifier(&line.name)?;
            if !seen_types.insert(line.name.to_ascii_lowercase()) {
                return Err(Error::Schema(format!("Duplicate line type: {}", line.name)));
            }

            let mut columns: HashSet<String> = RESERVED_COLUMNS.iter().map(|c| c.to_string()).collect();
            for capture in &line.captures {
                let derived = capture.provides.keys().map(String::as_str);
                for column in std::iter::once(capture.name.as_str()).chain(derived) {
                    check_identifier(column)?;
                    if !columns.insert(column.to_ascii_lowercase()) {
                        return Err(Error::Schema(format!(
                            "Column '{}' declared twice on line type '{}'",
                            column, line.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"))
}

/// Names are spliced into DDL, so only plain identifiers are allowed
pub fn check_identifier(name: &str) -> Result<()> {
    if identifier_pattern().is_match(name) {
        Ok(())
    } else {
        Err(Error::Schema(format!("Invalid identifier: {:?}", name)))
    }
}
