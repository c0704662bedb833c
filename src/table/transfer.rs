//! Comma-delimited export and import of table rows.
//!
//! The header line holds column labels. Cells containing a comma, a quote or
//! a line break are quoted on export with inner quotes doubled; import accepts
//! the same and strips one pair of surrounding quotes from every cell.

use serde_json::Value;
use thiserror::Error;

use crate::schema::FieldDescriptor;
use crate::value::{FieldValue, RowRecord};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImportError {
    #[error("Import needs a header line and at least one data line")]
    TooFewLines,

    #[error("No header cell matches a column of {0}")]
    NoMatchingColumns(String),
}

fn exported_columns(columns: &[FieldDescriptor]) -> impl Iterator<Item = &FieldDescriptor> {
    columns.iter().filter(|c| c.field_type.holds_value())
}

fn quote(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// Header of column labels, then one line per row in declared column order.
pub fn export_rows(columns: &[FieldDescriptor], rows: &[RowRecord]) -> String {
    let header: Vec<String> = exported_columns(columns)
        .map(|c| quote(c.display_label()))
        .collect();

    let mut lines = vec![header.join(",")];
    for row in rows {
        let cells: Vec<String> = exported_columns(columns)
            .map(|c| quote(&row.get(&c.name).map(FieldValue::display_text).unwrap_or_default()))
            .collect();
        lines.push(cells.join(","));
    }
    lines.join("\n")
}

/// Split text into records at line breaks outside quoted cells, so a quoted
/// cell may span lines. A trailing `\r` is dropped from each record.
fn split_records(text: &str) -> Vec<&str> {
    let mut records = Vec::new();
    let mut start = 0;
    let mut quoted = false;

    for (at, c) in text.char_indices() {
        match c {
            // a doubled quote toggles twice, leaving the state unchanged
            '"' => quoted = !quoted,
            '\n' if !quoted => {
                records.push(&text[start..at]);
                start = at + 1;
            }
            _ => {}
        }
    }
    records.push(&text[start..]);
    records
        .into_iter()
        .map(|r| r.strip_suffix('\r').unwrap_or(r))
        .collect()
}

/// Split one record into cells, honouring quoted cells.
fn split_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => cells.push(std::mem::take(&mut cell)),
            _ => cell.push(c),
        }
    }
    cells.push(cell);
    cells.into_iter().map(|c| c.trim().to_string()).collect()
}

/// Parse delimited text into fresh rows. Header cells are matched to columns
/// by label (or name), ignoring case; unmatched header cells are ignored and
/// columns absent from the header start at their initial value.
pub fn parse_rows(
    table: &FieldDescriptor,
    text: &str,
) -> Result<Vec<RowRecord>, ImportError> {
    let lines: Vec<&str> = split_records(text)
        .into_iter()
        .filter(|l| !l.trim().is_empty())
        .collect();
    if lines.len() < 2 {
        return Err(ImportError::TooFewLines);
    }

    let columns = table.columns();
    let mapping: Vec<Option<&FieldDescriptor>> = split_line(lines[0])
        .iter()
        .map(|header| {
            exported_columns(columns).find(|c| {
                c.display_label().eq_ignore_ascii_case(header) || c.name.eq_ignore_ascii_case(header)
            })
        })
        .collect();

    if mapping.iter().all(Option::is_none) {
        return Err(ImportError::NoMatchingColumns(table.name.clone()));
    }

    Ok(lines[1..]
        .iter()
        .map(|line| {
            let cells = split_line(line);
            let mut row = RowRecord::seeded(columns);
            for (position, column) in mapping.iter().enumerate() {
                let Some(column) = column else {
                    continue;
                };
                let cell = cells.get(position).cloned().unwrap_or_default();
                row.set(column.name.clone(), FieldValue::from_json(column, &Value::String(cell)));
            }
            row
        })
        .collect())
}
