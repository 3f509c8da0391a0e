//! Schema synthesis
//!
//! Three fixed tables plus one `<line_type>_lines` table per line type:
//! - requests(id, first_line, last_line, content_hash)
//! - warnings(id, kind, message, line_number)
//! - files(id, filename, line_number, position)
//! - <line_type>_lines(id, request_id, line_number, file_id, ...captures, ...provides)
//!
//! Tables are only ever added. A table that already exists is read back
//! from the store and registered as-is.

use std::collections::BTreeMap;
use crate::format::{FormatDescription, LineDefinition, RESERVED_COLUMNS};
use crate::{Error, Result};
use super::sqlite::{quote, Database};
use super::types::ColumnType;

pub const REQUESTS_TABLE: &str = "requests";
pub const WARNINGS_TABLE: &str = "warnings";
pub const FILES_TABLE: &str = "files";

/// SQL to create the requests table
pub const CREATE_REQUESTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    first_line INTEGER NOT NULL,
    last_line INTEGER NOT NULL,
    content_hash VARCHAR(255)
)
"#;

/// SQL to create the warnings table
pub const CREATE_WARNINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS warnings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind VARCHAR(255) NOT NULL,
    message TEXT,
    line_number INTEGER
)
"#;

/// SQL to create the files table
pub const CREATE_FILES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename VARCHAR(255) NOT NULL UNIQUE,
    line_number INTEGER NOT NULL DEFAULT 0,
    position INTEGER NOT NULL DEFAULT 0
)
"#;

/// Fixed tables with their DDL and index statements
const FIXED_TABLES: &[(&str, &str, &[&str])] = &[
    (REQUESTS_TABLE, CREATE_REQUESTS_TABLE, &[]),
    (
        WARNINGS_TABLE,
        CREATE_WARNINGS_TABLE,
        &["CREATE INDEX IF NOT EXISTS index_warnings_on_kind ON warnings (kind)"],
    ),
    (FILES_TABLE, CREATE_FILES_TABLE, &[]),
];

/// A column in a registered table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

/// Static description of one table, built once at setup
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<Column>,
}

impl TableDescriptor {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Capture and derived columns `line` declares that this table lacks
    pub fn missing_columns<'a>(&self, line: &'a LineDefinition) -> Vec<&'a str> {
        line.captures
            .iter()
            .flat_map(|c| std::iter::once(c.name.as_str()).chain(c.provides.keys().map(String::as_str)))
            .filter(|name| !self.has_column(name))
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns that carry captured values rather than bookkeeping
    pub fn field_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns
            .iter()
            .filter(|c| !RESERVED_COLUMNS.contains(&c.name.as_str()))
    }

    fn read(db: &Database, table: &str) -> Result<Self> {
        let columns = db
            .columns(table)?
            .into_iter()
            .map(|info| Column {
                column_type: info.column_type(),
                name: info.name,
            })
            .collect();
        Ok(Self {
            name: table.to_string(),
            columns,
        })
    }
}

/// Live handles for every table of one run
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    pub requests: TableDescriptor,
    pub warnings: TableDescriptor,
    pub files: TableDescriptor,
    lines: BTreeMap<String, TableDescriptor>,
}

impl SchemaRegistry {
    /// Table for a line type, if the format declares it
    pub fn line_table(&self, line_type: &str) -> Option<&TableDescriptor> {
        self.lines.get(line_type)
    }

    pub fn line_types(&self) -> impl Iterator<Item = &str> {
        self.lines.keys().map(String::as_str)
    }
}

/// `CREATE TABLE` plus index statements for a line type
pub fn line_table_statements(line: &LineDefinition) -> Vec<String> {
    let table = line.table_name();
    let mut columns = vec![
        "id INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
        "request_id INTEGER NOT NULL REFERENCES requests(id)".to_string(),
        "line_number INTEGER NOT NULL".to_string(),
        "file_id INTEGER REFERENCES files(id)".to_string(),
    ];
    let mut indexed = vec!["request_id".to_string()];

    for capture in &line.captures {
        let ty = ColumnType::from_tag(&capture.type_tag);
        columns.push(format!("{} {}", quote(&capture.name), ty.sql_type()));
        if capture.indexed {
            indexed.push(capture.name.clone());
        }
        for (derived, tag) in &capture.provides {
            let ty = ColumnType::from_tag(tag);
            columns.push(format!("{} {}", quote(derived), ty.sql_type()));
        }
    }

    let mut stmts = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote(&table),
        columns.join(",\n    ")
    )];
    for column in indexed {
        stmts.push(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote(&format!("index_{}_on_{}", table, column)),
            quote(&table),
            quote(&column)
        ));
    }
    stmts
}

/// Create one table and its indexes atomically
fn create_table(db: &mut Database, table: &str, statements: &[String]) -> Result<()> {
    let schema_err = |e: rusqlite::Error| Error::Schema(format!("Failed to create table {}: {}", table, e));

    let tx = db.connection_mut().transaction().map_err(schema_err)?;
    for stmt in statements {
        tx.execute(stmt, []).map_err(schema_err)?;
    }
    tx.commit().map_err(schema_err)?;
    tracing::debug!("Created table {} ({} statements)", table, statements.len());
    Ok(())
}

/// Make sure every table the format needs exists and register it.
///
/// Safe to call against a store that already holds the tables: existing
/// tables are never dropped, altered, or truncated.
pub fn ensure_schema(db: &mut Database, format: &FormatDescription) -> Result<SchemaRegistry> {
    format.validate()?;
    let existing = db.table_names()?;

    for (table, create, indexes) in FIXED_TABLES {
        if existing.contains(*table) {
            tracing::debug!("Table {} already exists", table);
            continue;
        }
        let mut stmts = vec![create.to_string()];
        stmts.extend(indexes.iter().map(|s| s.to_string()));
        create_table(db, table, &stmts)?;
    }

    let mut lines = BTreeMap::new();
    for line in &format.line_types {
        let table = line.table_name();
        if existing.contains(&table) {
            tracing::debug!("Table {} already exists", table);
        } else {
            create_table(db, &table, &line_table_statements(line))?;
        }

        let descriptor = TableDescriptor::read(db, &table)?;
        for column in descriptor.missing_columns(line) {
            tracing::warn!(
                "Column {}.{} is missing from the existing table; values will be dropped",
                table,
                column
            );
        }
        lines.insert(line.name.clone(), descriptor);
    }

    let registry = SchemaRegistry {
        requests: TableDescriptor::read(db, REQUESTS_TABLE)?,
        warnings: TableDescriptor::read(db, WARNINGS_TABLE)?,
        files: TableDescriptor::read(db, FILES_TABLE)?,
        lines,
    };
    tracing::info!("Schema ready: {} line tables", registry.lines.len());
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::CaptureSpec;

    fn access_format() -> FormatDescription {
        FormatDescription::new(vec![LineDefinition::new(
            "access",
            vec![CaptureSpec::new("status", "int"), CaptureSpec::new("duration", "sec")],
        )])
    }

    fn column_layout(db: &Database, table: &str) -> Vec<(String, String)> {
        db.columns(table)
            .unwrap()
            .into_iter()
            .map(|c| (c.name, c.declared_type))
            .collect()
    }

    #[test]
    fn test_access_table_layout() {
        let mut db = Database::open_in_memory().unwrap();
        let registry = ensure_schema(&mut db, &access_format()).unwrap();

        let layout = column_layout(&db, "access_lines");
        let expected = [
            ("id", "INTEGER"),
            ("request_id", "INTEGER"),
            ("line_number", "INTEGER"),
            ("file_id", "INTEGER"),
            ("status", "INTEGER"),
            ("duration", "DOUBLE"),
        ];
        let expected: Vec<_> = expected.iter().map(|(n, t)| (n.to_string(), t.to_string())).collect();
        assert_eq!(layout, expected);

        let table = registry.line_table("access").unwrap();
        assert_eq!(table.column("duration").unwrap().column_type, ColumnType::Double);
        assert_eq!(table.field_columns().count(), 2);
        assert!(db.indexes("access_lines").unwrap().contains("index_access_lines_on_request_id"));
    }

    #[test]
    fn test_fixed_tables_created() {
        let mut db = Database::open_in_memory().unwrap();
        ensure_schema(&mut db, &FormatDescription::default()).unwrap();
        let tables = db.table_names().unwrap();
        for table in [REQUESTS_TABLE, WARNINGS_TABLE, FILES_TABLE] {
            assert!(tables.contains(table), "missing {table}");
        }
    }

    #[test]
    fn test_indexed_capture_and_provides() {
        let format = FormatDescription::new(vec![LineDefinition::new(
            "processing",
            vec![
                CaptureSpec::new("controller", "string").indexed(),
                CaptureSpec::new("timestamp", "timestamp").provides("day", "date"),
            ],
        )]);
        let mut db = Database::open_in_memory().unwrap();
        let registry = ensure_schema(&mut db, &format).unwrap();

        let indexes = db.indexes("processing_lines").unwrap();
        assert!(indexes.contains("index_processing_lines_on_controller"));
        assert!(indexes.contains("index_processing_lines_on_request_id"));
        assert_eq!(indexes.len(), 2);

        let table = registry.line_table("processing").unwrap();
        assert_eq!(table.column("timestamp").unwrap().column_type, ColumnType::DateTime);
        assert_eq!(table.column("day").unwrap().column_type, ColumnType::Date);
    }

    #[test]
    fn test_second_run_is_noop() {
        let mut db = Database::open_in_memory().unwrap();
        ensure_schema(&mut db, &access_format()).unwrap();
        db.connection()
            .execute("INSERT INTO requests (first_line, last_line) VALUES (1, 1)", [])
            .unwrap();
        let before = (db.table_names().unwrap(), column_layout(&db, "access_lines"), db.indexes("access_lines").unwrap());

        ensure_schema(&mut db, &access_format()).unwrap();
        let after = (db.table_names().unwrap(), column_layout(&db, "access_lines"), db.indexes("access_lines").unwrap());

        assert_eq!(before, after);
        assert_eq!(db.count(REQUESTS_TABLE).unwrap(), 1);
    }

    #[test]
    fn test_existing_table_columns_win() {
        let mut db = Database::open_in_memory().unwrap();
        ensure_schema(&mut db, &access_format()).unwrap();

        // A later format adds a capture the stored table does not have
        let drifted = FormatDescription::new(vec![LineDefinition::new(
            "access",
            vec![CaptureSpec::new("status", "int"), CaptureSpec::new("agent", "string")],
        )]);
        let registry = ensure_schema(&mut db, &drifted).unwrap();
        let table = registry.line_table("access").unwrap();
        assert!(!table.has_column("agent"));
        assert!(table.has_column("duration"));
        assert_eq!(table.missing_columns(drifted.line_type("access").unwrap()), vec!["agent"]);
    }

    #[test]
    fn test_missing_derived_column_reported() {
        let mut db = Database::open_in_memory().unwrap();
        ensure_schema(&mut db, &access_format()).unwrap();

        let drifted = FormatDescription::new(vec![LineDefinition::new(
            "access",
            vec![
                CaptureSpec::new("status", "int").provides("status_class", "string"),
                CaptureSpec::new("duration", "sec"),
            ],
        )]);
        let registry = ensure_schema(&mut db, &drifted).unwrap();
        let table = registry.line_table("access").unwrap();
        assert!(!table.has_column("status_class"));
        assert_eq!(table.missing_columns(drifted.line_type("access").unwrap()), vec!["status_class"]);
        assert!(table.missing_columns(access_format().line_type("access").unwrap()).is_empty());
    }

    #[test]
    fn test_failed_creation_leaves_nothing_behind() {
        let mut db = Database::open_in_memory().unwrap();
        // Occupy the index name so the second statement fails
        db.connection()
            .execute_batch(
                "CREATE TABLE decoy (x INTEGER);
                 CREATE INDEX index_broken_lines_on_request_id ON decoy (x);",
            )
            .unwrap();
        let stmts = vec![
            "CREATE TABLE broken_lines (id INTEGER PRIMARY KEY, request_id INTEGER)".to_string(),
            "CREATE INDEX index_broken_lines_on_request_id ON broken_lines (request_id)".to_string(),
        ];
        let result = create_table(&mut db, "broken_lines", &stmts);
        assert!(matches!(result, Err(Error::Schema(_))));
        assert!(!db.table_exists("broken_lines").unwrap());
    }

    #[test]
    fn test_invalid_format_rejected_before_ddl() {
        let format = FormatDescription::new(vec![LineDefinition::new("bad name", vec![])]);
        let mut db = Database::open_in_memory().unwrap();
        assert!(matches!(ensure_schema(&mut db, &format), Err(Error::Schema(_))));
        assert!(db.table_names().unwrap().is_empty());
    }
}
