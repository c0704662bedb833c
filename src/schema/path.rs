//! Typed field references.
//!
//! Field names in conditions and `fetchFrom` declarations come in three
//! shapes: a plain name (`qty`), a parent escape from inside a table row
//! (`parent.stage`) and an indexed table cell (`items.0.qty`). They are parsed
//! once into a [`FieldRef`] and resolved through [`Scope`].

use std::fmt;

use crate::value::{FieldValue, FormValues, RowRecord};

const PARENT_PREFIX: &str = "parent.";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldRef {
    /// A field of the current scope (the form, or the row when inside one).
    Local(String),
    /// A form-level field referenced from inside a table row.
    ParentScope(String),
    /// A single cell of a table field.
    RowPath {
        table: String,
        index: usize,
        column: String,
    },
}

impl FieldRef {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        if let Some(rest) = raw.strip_prefix(PARENT_PREFIX) {
            if !rest.is_empty() {
                return Self::ParentScope(rest.to_string());
            }
        }

        let mut parts = raw.splitn(3, '.');
        if let (Some(table), Some(index), Some(column)) = (parts.next(), parts.next(), parts.next())
        {
            if let Ok(index) = index.parse::<usize>() {
                if !table.is_empty() && !column.is_empty() {
                    return Self::RowPath {
                        table: table.to_string(),
                        index,
                        column: column.to_string(),
                    };
                }
            }
        }

        Self::Local(raw.to_string())
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self::Local(name.into())
    }

    pub fn parent(name: impl Into<String>) -> Self {
        Self::ParentScope(name.into())
    }

    pub fn cell(table: impl Into<String>, index: usize, column: impl Into<String>) -> Self {
        Self::RowPath {
            table: table.into(),
            index,
            column: column.into(),
        }
    }

    /// The innermost field name: the column for a cell, the name otherwise.
    pub fn leaf(&self) -> &str {
        match self {
            Self::Local(name) | Self::ParentScope(name) => name,
            Self::RowPath { column, .. } => column,
        }
    }

    pub fn is_parent_scope(&self) -> bool {
        matches!(self, Self::ParentScope(_))
    }
}

impl From<&str> for FieldRef {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(name) => write!(f, "{}", name),
            Self::ParentScope(name) => write!(f, "{}{}", PARENT_PREFIX, name),
            Self::RowPath {
                table,
                index,
                column,
            } => write!(f, "{}.{}.{}", table, index, column),
        }
    }
}

/// Where a [`FieldRef`] is resolved: the form tree, optionally narrowed to
/// one row of a table.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    form: &'a FormValues,
    row: Option<&'a RowRecord>,
}

impl<'a> Scope<'a> {
    pub fn form(form: &'a FormValues) -> Self {
        Self { form, row: None }
    }

    pub fn row(form: &'a FormValues, row: &'a RowRecord) -> Self {
        Self {
            form,
            row: Some(row),
        }
    }

    pub fn resolve(&self, field: &FieldRef) -> Option<&'a FieldValue> {
        match field {
            FieldRef::Local(name) => match self.row {
                Some(row) => row.get(name),
                None => self.form.get(name),
            },
            FieldRef::ParentScope(name) => self.form.get(name),
            FieldRef::RowPath {
                table,
                index,
                column,
            } => self
                .form
                .rows(table)
                .and_then(|rows| rows.get(*index))
                .and_then(|row| row.get(column)),
        }
    }

    /// Resolve a raw field name, parsing it first.
    pub fn lookup(&self, raw: &str) -> Option<FieldValue> {
        self.resolve(&FieldRef::parse(raw)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shapes() {
        assert_eq!(FieldRef::parse("qty"), FieldRef::local("qty"));
        assert_eq!(FieldRef::parse(" parent.stage "), FieldRef::parent("stage"));
        assert_eq!(FieldRef::parse("items.2.qty"), FieldRef::cell("items", 2, "qty"));
        // Not an index, so it stays a plain (dotted) name.
        assert_eq!(FieldRef::parse("a.b.c"), FieldRef::local("a.b.c"));
        assert_eq!(FieldRef::parse("parent."), FieldRef::local("parent."));
    }

    #[test]
    fn test_display_round_trips() {
        for raw in ["qty", "parent.stage", "items.0.qty"] {
            assert_eq!(FieldRef::parse(raw).to_string(), raw);
        }
    }

    #[test]
    fn test_scope_resolution() {
        let mut form = FormValues::new();
        form.set("stage", FieldValue::text("Design"));
        let mut row = RowRecord::new();
        row.set("qty", FieldValue::Int(4));
        form.set("items", FieldValue::Rows(vec![row.clone()]));

        let top = Scope::form(&form);
        assert_eq!(top.lookup("stage"), Some(FieldValue::text("Design")));
        assert_eq!(top.lookup("items.0.qty"), Some(FieldValue::Int(4)));
        assert_eq!(top.lookup("items.3.qty"), None);

        let in_row = Scope::row(&form, &row);
        assert_eq!(in_row.lookup("qty"), Some(FieldValue::Int(4)));
        assert_eq!(in_row.lookup("stage"), None);
        assert_eq!(in_row.lookup("parent.stage"), Some(FieldValue::text("Design")));
    }
}
