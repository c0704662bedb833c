//! Typed values held by the form tree.
//!
//! Every field value is a [`FieldValue`]; Table fields hold [`RowRecord`]s
//! keyed by column name. Conversion to and from the Doctype JSON shape is
//! guided by the field's descriptor.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::schema::{FieldDescriptor, FieldRef, FieldType};

/// Synthetic row identity used for list rendering and editor addressing.
/// Never part of the submitted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(Uuid);

impl RowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DurationValue {
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl DurationValue {
    pub fn from_seconds(total: u64) -> Self {
        Self {
            hours: total / 3600,
            minutes: (total % 3600) / 60,
            seconds: total % 60,
        }
    }

    pub fn total_seconds(&self) -> u64 {
        self.hours * 3600 + self.minutes * 60 + self.seconds
    }
}

impl fmt::Display for DurationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

/// Content of an Attach field: bytes the user picked that still need
/// uploading, or the URL of an already uploaded file.
#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    Pending { file_name: String, bytes: Vec<u8> },
    Url(String),
}

/// Bytes waiting to be uploaded, with the field path they belong to: the
/// field name for a form field, `table.index.column` for a table cell.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpload {
    pub path: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Duration(DurationValue),
    Rows(Vec<RowRecord>),
    /// Table MultiSelect entries, each a row object such as `{"warehouse": "WH-1"}`.
    Entries(Vec<Map<String, Value>>),
    Attachment(Attachment),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// The value a field of this type holds before anyone touches it.
    pub fn empty_for(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Check => Self::Bool(false),
            FieldType::Table => Self::Rows(Vec::new()),
            FieldType::TableMultiSelect => Self::Entries(Vec::new()),
            FieldType::Duration => Self::Duration(DurationValue::default()),
            _ => Self::Text(String::new()),
        }
    }

    /// No user-meaningful content, as far as `required` is concerned.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            Self::Rows(rows) => rows.is_empty(),
            Self::Entries(entries) => entries.is_empty(),
            _ => false,
        }
    }

    /// Falsy in the loose sense used for fetch sources: empty, `""`, `0`, `false`.
    pub fn is_falsy(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.is_empty(),
            Self::Int(n) => *n == 0,
            Self::Float(f) => *f == 0.0 || f.is_nan(),
            Self::Bool(b) => !b,
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view; numeric text is parsed, blank text is not a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Text(s) if !s.trim().is_empty() => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn rows(&self) -> Option<&[RowRecord]> {
        match self {
            Self::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// Plain text rendering, used for search text and delimited export.
    pub fn display_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(s) => s.clone(),
            Self::Int(n) => n.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Duration(d) => d.to_string(),
            Self::Rows(rows) => rows.len().to_string(),
            Self::Entries(entries) => entries
                .iter()
                .filter_map(|entry| entry.values().next())
                .map(json_display)
                .collect::<Vec<_>>()
                .join(";"),
            Self::Attachment(Attachment::Url(url)) => url.clone(),
            Self::Attachment(Attachment::Pending { file_name, .. }) => file_name.clone(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Text(s) => Value::String(s.clone()),
            Self::Int(n) => Value::from(*n),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Bool(b) => Value::Bool(*b),
            Self::Duration(d) => serde_json::to_value(d).unwrap_or(Value::Null),
            Self::Rows(rows) => Value::Array(
                rows.iter()
                    .map(|row| Value::Object(row.to_json()))
                    .collect(),
            ),
            Self::Entries(entries) => {
                Value::Array(entries.iter().cloned().map(Value::Object).collect())
            }
            Self::Attachment(Attachment::Url(url)) => Value::String(url.clone()),
            // Pending uploads are resolved by the collaborator before save.
            Self::Attachment(Attachment::Pending { file_name, .. }) => {
                serde_json::json!({ "pending_upload": file_name })
            }
        }
    }

    /// Decode a Doctype JSON value for `field`.
    pub fn from_json(field: &FieldDescriptor, value: &Value) -> Self {
        if value.is_null() {
            return Self::empty_for(field.field_type);
        }

        match field.field_type {
            FieldType::Check => Self::Bool(match value {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
                Value::String(s) => matches!(s.trim(), "1" | "true" | "True"),
                _ => false,
            }),
            FieldType::Int => match value {
                Value::Number(n) => match n.as_i64() {
                    Some(i) => Self::Int(i),
                    None => Self::Float(n.as_f64().unwrap_or_default()),
                },
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Self::Int)
                    .unwrap_or_else(|_| Self::Text(s.clone())),
                other => Self::Text(json_display(other)),
            },
            FieldType::Float | FieldType::Currency | FieldType::Percent | FieldType::Rating => {
                match value {
                    Value::Number(n) => Self::Float(n.as_f64().unwrap_or_default()),
                    Value::String(s) => s
                        .trim()
                        .parse::<f64>()
                        .map(Self::Float)
                        .unwrap_or_else(|_| Self::Text(s.clone())),
                    other => Self::Text(json_display(other)),
                }
            }
            FieldType::Duration => match value {
                Value::Number(n) => {
                    Self::Duration(DurationValue::from_seconds(n.as_f64().unwrap_or_default() as u64))
                }
                other => serde_json::from_value(other.clone())
                    .map(Self::Duration)
                    .unwrap_or_else(|_| Self::Duration(DurationValue::default())),
            },
            FieldType::Table => match value {
                Value::Array(items) => Self::Rows(
                    items
                        .iter()
                        .filter_map(Value::as_object)
                        .map(|object| RowRecord::from_json(field.columns(), object))
                        .collect(),
                ),
                _ => Self::Rows(Vec::new()),
            },
            FieldType::TableMultiSelect => {
                let key = field.entry_key();
                match value {
                    Value::Array(items) => Self::Entries(
                        items
                            .iter()
                            .filter_map(|item| match item {
                                Value::Object(object) => Some(object.clone()),
                                Value::String(s) => {
                                    let mut entry = Map::new();
                                    entry.insert(key.clone(), Value::String(s.clone()));
                                    Some(entry)
                                }
                                _ => None,
                            })
                            .collect(),
                    ),
                    _ => Self::Entries(Vec::new()),
                }
            }
            FieldType::Attach => match value {
                Value::String(s) if !s.is_empty() => Self::Attachment(Attachment::Url(s.clone())),
                _ => Self::Text(String::new()),
            },
            _ => plain_value(value),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Decode a value that has no descriptor (system keys such as `name`).
fn plain_value(value: &Value) -> FieldValue {
    match value {
        Value::String(s) => FieldValue::Text(s.clone()),
        Value::Number(n) => match n.as_i64() {
            Some(i) => FieldValue::Int(i),
            None => FieldValue::Float(n.as_f64().unwrap_or_default()),
        },
        Value::Bool(b) => FieldValue::Bool(*b),
        Value::Null => FieldValue::Empty,
        other => FieldValue::Text(other.to_string()),
    }
}

fn json_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// One row of a Table field.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowRecord {
    id: RowId,
    cells: BTreeMap<String, FieldValue>,
}

impl RowRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh row with every column at its initial value.
    pub fn seeded(columns: &[FieldDescriptor]) -> Self {
        let mut row = Self::new();
        for column in columns.iter().filter(|c| c.field_type.holds_value()) {
            row.set(column.name.clone(), column.initial_value());
        }
        row
    }

    pub fn id(&self) -> RowId {
        self.id
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.cells.get(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: FieldValue) {
        self.cells.insert(column.into(), value);
    }

    pub fn cells(&self) -> &BTreeMap<String, FieldValue> {
        &self.cells
    }

    pub fn remove(&mut self, column: &str) -> Option<FieldValue> {
        self.cells.remove(column)
    }

    /// Same cells under a new identity.
    pub fn with_fresh_id(&self) -> Self {
        Self {
            id: RowId::new(),
            cells: self.cells.clone(),
        }
    }

    /// Same cells, ignoring row identity.
    pub fn same_cells(&self, other: &RowRecord) -> bool {
        self.cells == other.cells
    }

    pub fn to_json(&self) -> Map<String, Value> {
        self.cells
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }

    /// Decode a row object; keys without a matching column are kept as text.
    pub fn from_json(columns: &[FieldDescriptor], object: &Map<String, Value>) -> Self {
        let mut row = Self::new();
        for (key, value) in object {
            let decoded = match columns.iter().find(|c| &c.name == key) {
                Some(column) => FieldValue::from_json(column, value),
                None => plain_value(value),
            };
            row.set(key.clone(), decoded);
        }
        row
    }
}

/// The form value tree: field name → value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FormValues {
    values: BTreeMap<String, FieldValue>,
}

impl FormValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial values for a flattened field list.
    pub fn seeded(fields: &[FieldDescriptor]) -> Self {
        let mut values = Self::new();
        for field in fields.iter().filter(|f| f.field_type.holds_value()) {
            values.set(field.name.clone(), field.initial_value());
        }
        values
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        self.values.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.values.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.values.iter()
    }

    pub fn rows(&self, table: &str) -> Option<&[RowRecord]> {
        self.values.get(table).and_then(FieldValue::rows)
    }

    /// Mutable rows of a table field, turning a non-table value into an empty table.
    pub fn rows_mut(&mut self, table: &str) -> &mut Vec<RowRecord> {
        let slot = self
            .values
            .entry(table.to_string())
            .or_insert_with(|| FieldValue::Rows(Vec::new()));
        if !matches!(slot, FieldValue::Rows(_)) {
            *slot = FieldValue::Rows(Vec::new());
        }
        match slot {
            FieldValue::Rows(rows) => rows,
            _ => unreachable!("slot was just replaced with rows"),
        }
    }

    /// Overlay a Doctype JSON object; keys with a descriptor are decoded by
    /// type, other keys are kept as plain values.
    pub fn merge_json(&mut self, fields: &[FieldDescriptor], object: &Map<String, Value>) {
        for (key, value) in object {
            let decoded = match fields.iter().find(|f| &f.name == key) {
                Some(field) => FieldValue::from_json(field, value),
                None => plain_value(value),
            };
            self.set(key.clone(), decoded);
        }
    }

    /// Request payload for the Doctype API. Pending attachments appear as
    /// `{"pending_upload": file_name}`; their bytes come from
    /// [`pending_uploads`](Self::pending_uploads).
    pub fn to_payload(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }

    /// Every attachment still holding picked bytes, in form fields and in
    /// table cells.
    pub fn pending_uploads(&self) -> Vec<PendingUpload> {
        let mut uploads = Vec::new();
        for (name, value) in &self.values {
            match value {
                FieldValue::Attachment(Attachment::Pending { file_name, bytes }) => {
                    uploads.push(PendingUpload {
                        path: name.clone(),
                        file_name: file_name.clone(),
                        bytes: bytes.clone(),
                    });
                }
                FieldValue::Rows(rows) => {
                    for (index, row) in rows.iter().enumerate() {
                        for (column, cell) in row.cells() {
                            if let FieldValue::Attachment(Attachment::Pending { file_name, bytes }) = cell {
                                uploads.push(PendingUpload {
                                    path: FieldRef::cell(name.as_str(), index, column.as_str()).to_string(),
                                    file_name: file_name.clone(),
                                    bytes: bytes.clone(),
                                });
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        uploads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items_field() -> FieldDescriptor {
        FieldDescriptor::new("items", "Items", FieldType::Table).with_columns(vec![
            FieldDescriptor::new("item_code", "Item", FieldType::Data),
            FieldDescriptor::new("qty", "Qty", FieldType::Float),
            FieldDescriptor::new("received", "Received", FieldType::Check),
        ])
    }

    #[test]
    fn test_falsy_and_blank() {
        assert!(FieldValue::Empty.is_falsy());
        assert!(FieldValue::text("").is_falsy());
        assert!(FieldValue::Int(0).is_falsy());
        assert!(!FieldValue::text("0").is_falsy());
        assert!(!FieldValue::Rows(Vec::new()).is_falsy());

        assert!(FieldValue::text("  ").is_blank());
        assert!(FieldValue::Rows(Vec::new()).is_blank());
        assert!(!FieldValue::Int(0).is_blank());
    }

    #[test]
    fn test_table_json_drops_row_ids() {
        let field = items_field();
        let value = FieldValue::from_json(
            &field,
            &json!([{ "item_code": "PIPE-90", "qty": "2.5", "received": 1 }]),
        );

        let rows = value.rows().unwrap();
        assert_eq!(rows[0].get("qty"), Some(&FieldValue::Float(2.5)));
        assert_eq!(rows[0].get("received"), Some(&FieldValue::Bool(true)));
        assert_eq!(
            value.to_json(),
            json!([{ "item_code": "PIPE-90", "qty": 2.5, "received": true }])
        );
    }

    #[test]
    fn test_multiselect_accepts_bare_keys() {
        let field = FieldDescriptor::new("warehouses", "Warehouses", FieldType::TableMultiSelect)
            .link_to("Warehouse");
        let value = FieldValue::from_json(&field, &json!(["WH-1", { "warehouse": "WH-2" }]));
        assert_eq!(
            value.to_json(),
            json!([{ "warehouse": "WH-1" }, { "warehouse": "WH-2" }])
        );
    }

    #[test]
    fn test_duration_from_seconds() {
        let field = FieldDescriptor::new("run", "Run", FieldType::Duration);
        assert_eq!(
            FieldValue::from_json(&field, &json!(3725)),
            FieldValue::Duration(DurationValue {
                hours: 1,
                minutes: 2,
                seconds: 5
            })
        );
    }

    #[test]
    fn test_attach_keeps_url_or_pending_bytes() {
        let field = FieldDescriptor::new("drawing", "Drawing", FieldType::Attach);
        assert_eq!(
            FieldValue::from_json(&field, &json!("/files/canal.pdf")),
            FieldValue::Attachment(Attachment::Url("/files/canal.pdf".into()))
        );
        let pending = FieldValue::Attachment(Attachment::Pending {
            file_name: "gate.jpg".into(),
            bytes: vec![1, 2, 3],
        });
        assert_eq!(pending.display_text(), "gate.jpg");
    }

    #[test]
    fn test_seeded_rows_get_distinct_ids() {
        let columns = items_field().columns().to_vec();
        let a = RowRecord::seeded(&columns);
        let b = RowRecord::seeded(&columns);
        assert_ne!(a.id(), b.id());
        assert!(a.same_cells(&b));
        assert_eq!(a.get("received"), Some(&FieldValue::Bool(false)));
    }

    #[test]
    fn test_merge_json_and_payload() {
        let fields = vec![
            FieldDescriptor::new("qty", "Qty", FieldType::Int),
            items_field(),
        ];
        let mut values = FormValues::seeded(&fields);
        values.merge_json(
            &fields,
            json!({ "qty": 4, "name": "STE-0001", "items": [{ "item_code": "GATE", "qty": 1 }] })
                .as_object()
                .unwrap(),
        );

        assert_eq!(values.get("qty"), Some(&FieldValue::Int(4)));
        assert_eq!(values.get("name"), Some(&FieldValue::text("STE-0001")));
        assert_eq!(values.rows("items").map(<[RowRecord]>::len), Some(1));
        assert_eq!(values.to_payload()["qty"], json!(4));
    }

    #[test]
    fn test_pending_uploads_keep_their_bytes() {
        let fields = vec![
            FieldDescriptor::new("drawing", "Drawing", FieldType::Attach),
            FieldDescriptor::new("photos", "Photos", FieldType::Table).with_columns(vec![
                FieldDescriptor::new("caption", "Caption", FieldType::Data),
                FieldDescriptor::new("image", "Image", FieldType::Attach),
            ]),
        ];
        let mut values = FormValues::seeded(&fields);
        values.set(
            "drawing",
            FieldValue::Attachment(Attachment::Pending {
                file_name: "gate.jpg".into(),
                bytes: vec![1, 2, 3],
            }),
        );
        let mut uploaded = RowRecord::seeded(fields[1].columns());
        uploaded.set("image", FieldValue::Attachment(Attachment::Url("/files/weir.jpg".into())));
        let mut picked = RowRecord::seeded(fields[1].columns());
        picked.set(
            "image",
            FieldValue::Attachment(Attachment::Pending {
                file_name: "sluice.png".into(),
                bytes: vec![9, 8],
            }),
        );
        values.rows_mut("photos").extend([uploaded, picked]);

        assert_eq!(
            values.pending_uploads(),
            vec![
                PendingUpload {
                    path: "drawing".into(),
                    file_name: "gate.jpg".into(),
                    bytes: vec![1, 2, 3],
                },
                PendingUpload {
                    path: "photos.1.image".into(),
                    file_name: "sluice.png".into(),
                    bytes: vec![9, 8],
                },
            ]
        );
        let payload = values.to_payload();
        assert_eq!(payload["drawing"], json!({ "pending_upload": "gate.jpg" }));
        assert_eq!(payload["photos"][0]["image"], json!("/files/weir.jpg"));
    }
}
