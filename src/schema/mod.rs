//! Field descriptors and the tabbed layout they are grouped into.
//!
//! A form is declared as a list of [`TabbedLayout`]s. Each tab holds
//! [`FieldDescriptor`]s; Table fields nest further descriptors as columns.
//! Descriptors can be built in code or deserialized from the camelCase JSON a
//! page collaborator emits.

mod field;
mod field_type;
mod path;

pub use field::{
    flatten_tabs, ButtonAction, FetchFrom, FieldDescriptor, FieldOptions, FilterBuilder,
    FilterMapping, Lookup, TabbedLayout,
};
pub use field_type::FieldType;
pub use path::{FieldRef, Scope};

use std::collections::HashSet;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Duplicate field name: {0}")]
    DuplicateField(String),

    #[error("Table field {0} declares no columns")]
    MissingColumns(String),

    #[error("Field {0} declares columns but is not a Table")]
    UnexpectedColumns(String),

    #[error("Field {0} needs a link target")]
    MissingLinkTarget(String),

    #[error("Field {0} declares a link target but is not a Link or Table MultiSelect")]
    UnexpectedLinkTarget(String),

    #[error("Field {field} fetches from unknown source {source_field}")]
    UnknownFetchSource { field: String, source_field: String },

    #[error("Field {field} has an invalid pattern: {message}")]
    InvalidPattern { field: String, message: String },

    #[error("Schema decode error: {0}")]
    Decode(String),
}

/// Parse a tab list from JSON.
pub fn tabs_from_json(raw: &str) -> Result<Vec<TabbedLayout>, SchemaError> {
    serde_json::from_str(raw).map_err(|e| SchemaError::Decode(e.to_string()))
}

/// Check the structural invariants of one field list.
///
/// `parent` is the enclosing form's field list when `fields` are table
/// columns; `parent.<name>` fetch sources are checked against it.
pub fn check_fields(
    fields: &[FieldDescriptor],
    parent: Option<&[FieldDescriptor]>,
) -> Result<(), SchemaError> {
    let mut seen = HashSet::new();

    for field in fields {
        if field.field_type.holds_value() && !seen.insert(field.name.as_str()) {
            return Err(SchemaError::DuplicateField(field.name.clone()));
        }

        match (field.field_type == FieldType::Table, field.columns.is_some()) {
            (true, false) => return Err(SchemaError::MissingColumns(field.name.clone())),
            (false, true) => return Err(SchemaError::UnexpectedColumns(field.name.clone())),
            _ => {}
        }

        match (field.field_type.is_link(), field.link_target.is_some()) {
            (true, false) => return Err(SchemaError::MissingLinkTarget(field.name.clone())),
            (false, true) => return Err(SchemaError::UnexpectedLinkTarget(field.name.clone())),
            _ => {}
        }

        if let Some(fetch) = &field.fetch_from {
            let known = match fetch.source() {
                FieldRef::Local(name) => {
                    name != field.name && fields.iter().any(|f| f.name == name)
                }
                FieldRef::ParentScope(name) => {
                    parent.is_some_and(|parent| parent.iter().any(|f| f.name == name))
                }
                FieldRef::RowPath { .. } => false,
            };
            if !known {
                return Err(SchemaError::UnknownFetchSource {
                    field: field.name.clone(),
                    source_field: fetch.source_field.clone(),
                });
            }
        }

        if let Some(pattern) = &field.pattern {
            regex::Regex::new(pattern).map_err(|e| SchemaError::InvalidPattern {
                field: field.name.clone(),
                message: e.to_string(),
            })?;
        }

        if let Some(columns) = &field.columns {
            check_fields(columns, Some(fields))?;
        }
    }

    Ok(())
}
