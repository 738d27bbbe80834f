//! The parameter data table.
//!
//! Loaded once at startup from a CSV or whitespace-separated file and shared
//! read-only with every worker; `value` generators index into it.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::debug;

use crate::error::{DriverError, Result};

/// Rows of string columns, immutable after loading.
#[derive(Debug, Default)]
pub struct DataTable {
    rows: Vec<Vec<String>>,
}

impl DataTable {
    /// Load a file. A suffix starting with `.csv` (case-insensitive) selects
    /// CSV parsing; anything else splits lines on runs of whitespace.
    /// Loading stops at the first empty line.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| DriverError::io(path.display().to_string(), e))?;
        let csv = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase().starts_with("csv"))
            .unwrap_or(false);

        let mut rows = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| DriverError::io(path.display().to_string(), e))?;
            if line.is_empty() {
                break;
            }
            rows.push(if csv {
                parse_csv(&line)
            } else {
                line.split_whitespace().map(str::to_string).collect()
            });
        }

        debug!(rows = rows.len(), path = %path.display(), "data file loaded");
        Ok(Self { rows })
    }

    /// A table built directly from rows (used by callers embedding data).
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column).map(String::as_str)
    }

    /// True when every row from `start_row` on has more than `column` columns.
    pub fn column_in_range(&self, start_row: usize, column: usize) -> bool {
        self.rows[start_row.min(self.rows.len())..]
            .iter()
            .all(|row| column < row.len())
    }
}

/// Split one CSV line into fields. A double quote starts and ends a quoted
/// section, `""` inside quotes is a literal quote, and commas inside quotes
/// do not separate fields. Unquoted fields are trimmed.
pub fn parse_csv(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut was_quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => {
                in_quotes = true;
                was_quoted = true;
            }
            ',' if !in_quotes => {
                fields.push(finish_field(field, was_quoted));
                field = String::new();
                was_quoted = false;
            }
            _ => field.push(c),
        }
    }
    fields.push(finish_field(field, was_quoted));
    fields
}

fn finish_field(field: String, was_quoted: bool) -> String {
    if was_quoted {
        field
    } else {
        field.trim().to_string()
    }
}
