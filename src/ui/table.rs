use std::collections::BTreeMap;
use tabled::{settings::Style, Table, Tabled};
use crate::request::Watermark;

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Tabled)]
pub struct FileRow {
    #[tabled(rename = "File")]
    pub filename: String,
    #[tabled(rename = "Line")]
    pub line: u64,
    #[tabled(rename = "Position")]
    pub position: u64,
}

pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

pub fn stats_table(stats: &[(&str, &str)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

/// Committed watermark per file
pub fn files_table(files: &BTreeMap<String, Watermark>) -> String {
    if files.is_empty() {
        return String::new();
    }
    let rows: Vec<FileRow> = files
        .iter()
        .map(|(filename, mark)| FileRow {
            filename: filename.clone(),
            line: mark.line,
            position: mark.position,
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}
