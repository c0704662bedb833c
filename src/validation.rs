//! Field validation.
//!
//! Rules come from the descriptor: `required`, numeric bounds (Percent is
//! 0..=100 unless overridden), a regex `pattern`, and well-formed Date,
//! Datetime and Time text. Blank values only answer to `required`. Hidden
//! fields and hidden row cells are skipped. Table cells are reported under
//! `table.index.column` keys.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;

use crate::expression::is_visible;
use crate::schema::{FieldDescriptor, FieldRef, FieldType, SchemaError, Scope};
use crate::value::{FieldValue, FormValues};

/// Field-keyed error messages. Empty means valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    fn insert(&mut self, key: String, message: String) {
        self.0.entry(key).or_insert(message);
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, message) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", key, message)?;
            first = false;
        }
        Ok(())
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"];
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

fn well_formed(field_type: FieldType, text: &str) -> bool {
    match field_type {
        FieldType::Date => NaiveDate::parse_from_str(text, DATE_FORMAT).is_ok(),
        FieldType::DateTime => {
            DateTime::parse_from_rfc3339(text).is_ok()
                || DATETIME_FORMATS
                    .iter()
                    .any(|format| NaiveDateTime::parse_from_str(text, format).is_ok())
        }
        FieldType::Time => TIME_FORMATS
            .iter()
            .any(|format| NaiveTime::parse_from_str(text, format).is_ok()),
        _ => true,
    }
}

/// Compiled rules for one form.
pub struct Validator {
    fields: Vec<FieldDescriptor>,
    patterns: HashMap<String, Regex>,
}

impl Validator {
    /// Compile the patterns of `fields` and their table columns.
    pub fn new(fields: &[FieldDescriptor]) -> Result<Self, SchemaError> {
        let mut patterns = HashMap::new();
        for field in fields {
            compile(&mut patterns, field.name.clone(), field)?;
            for column in field.columns() {
                compile(&mut patterns, format!("{}.{}", field.name, column.name), column)?;
            }
        }
        Ok(Self {
            fields: fields.to_vec(),
            patterns,
        })
    }

    pub fn validate(&self, values: &FormValues) -> ValidationErrors {
        let mut errors = ValidationErrors::default();
        let top = Scope::form(values);

        for field in self.fields.iter().filter(|f| f.field_type.holds_value()) {
            if !is_visible(field, &top) {
                continue;
            }
            let value = top.resolve(&FieldRef::local(field.name.clone()));
            if let Some(message) = self.check(&field.name, field, value) {
                errors.insert(field.name.clone(), message);
            }

            if field.field_type != FieldType::Table {
                continue;
            }
            for (index, row) in values.rows(&field.name).unwrap_or_default().iter().enumerate() {
                let scope = Scope::row(values, row);
                for column in field.columns().iter().filter(|c| c.field_type.holds_value()) {
                    if !is_visible(column, &scope) {
                        continue;
                    }
                    let pattern_key = format!("{}.{}", field.name, column.name);
                    if let Some(message) = self.check(&pattern_key, column, row.get(&column.name)) {
                        errors.insert(FieldRef::cell(&field.name, index, &column.name).to_string(), message);
                    }
                }
            }
        }
        errors
    }

    fn check(&self, pattern_key: &str, field: &FieldDescriptor, value: Option<&FieldValue>) -> Option<String> {
        let label = field.display_label();
        let blank = value.map_or(true, FieldValue::is_blank);
        if blank {
            return field.required.then(|| format!("{} is required", label));
        }
        let value = value?;

        if field.field_type.is_numeric() {
            let Some(number) = value.as_f64() else {
                return Some(format!("{} must be a number", label));
            };
            if field.field_type == FieldType::Int && number.fract() != 0.0 {
                return Some(format!("{} must be a whole number", label));
            }
            let (min, max) = field.bounds();
            if let Some(min) = min.filter(|min| number < *min) {
                return Some(format!("{} must be at least {}", label, min));
            }
            if let Some(max) = max.filter(|max| number > *max) {
                return Some(format!("{} must be at most {}", label, max));
            }
        }

        if let Some(text) = value.as_str() {
            if !well_formed(field.field_type, text.trim()) {
                return Some(format!("{} is not a valid {}", label, field.field_type));
            }
            if let Some(pattern) = self.patterns.get(pattern_key) {
                if !pattern.is_match(text) {
                    return Some(format!("{} does not match the expected format", label));
                }
            }
        }
        None
    }
}

fn compile(
    patterns: &mut HashMap<String, Regex>,
    key: String,
    field: &FieldDescriptor,
) -> Result<(), SchemaError> {
    if let Some(pattern) = &field.pattern {
        let regex = Regex::new(pattern).map_err(|e| SchemaError::InvalidPattern {
            field: field.name.clone(),
            message: e.to_string(),
        })?;
        patterns.insert(key, regex);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(fields: &[FieldDescriptor]) -> Validator {
        Validator::new(fields).unwrap()
    }

    #[test]
    fn test_required_and_min() {
        let fields = vec![FieldDescriptor::new("qty", "Qty", FieldType::Int).required().with_min(1.0)];
        let v = validator(&fields);
        let mut values = FormValues::seeded(&fields);

        assert_eq!(v.validate(&values).get("qty"), Some("Qty is required"));
        values.set("qty", FieldValue::Int(0));
        assert_eq!(v.validate(&values).get("qty"), Some("Qty must be at least 1"));
        values.set("qty", FieldValue::Int(3));
        assert!(v.validate(&values).is_empty());
    }

    #[test]
    fn test_percent_bounds_by_default() {
        let fields = vec![FieldDescriptor::new("done", "Done", FieldType::Percent)];
        let v = validator(&fields);
        let mut values = FormValues::new();
        values.set("done", FieldValue::Float(120.0));
        assert_eq!(v.validate(&values).get("done"), Some("Done must be at most 100"));
        values.set("done", FieldValue::Float(-1.0));
        assert!(v.validate(&values).contains("done"));
        values.set("done", FieldValue::Float(55.5));
        assert!(v.validate(&values).is_empty());
    }

    #[test]
    fn test_pattern_and_numbers() {
        let fields = vec![
            FieldDescriptor::new("code", "Code", FieldType::Data).with_pattern("^[A-Z]{3}-\\d+$"),
            FieldDescriptor::new("count", "Count", FieldType::Int),
        ];
        let v = validator(&fields);
        let mut values = FormValues::new();
        values.set("code", FieldValue::text("abc-1"));
        values.set("count", FieldValue::text("many"));

        let errors = v.validate(&values);
        assert_eq!(errors.get("code"), Some("Code does not match the expected format"));
        assert_eq!(errors.get("count"), Some("Count must be a number"));

        values.set("code", FieldValue::text("CNL-12"));
        values.set("count", FieldValue::Float(2.5));
        let errors = v.validate(&values);
        assert!(!errors.contains("code"));
        assert_eq!(errors.get("count"), Some("Count must be a whole number"));
    }

    #[test]
    fn test_dates() {
        let fields = vec![
            FieldDescriptor::new("installed", "Installed", FieldType::Date),
            FieldDescriptor::new("inspected", "Inspected", FieldType::DateTime),
            FieldDescriptor::new("opens", "Opens", FieldType::Time),
        ];
        let v = validator(&fields);
        let mut values = FormValues::new();
        values.set("installed", FieldValue::text("2024-02-30"));
        values.set("inspected", FieldValue::text("2024-03-01 08:30:00"));
        values.set("opens", FieldValue::text("06:15"));

        let errors = v.validate(&values);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.get("installed"), Some("Installed is not a valid Date"));
    }

    #[test]
    fn test_hidden_fields_are_skipped() {
        let fields = vec![
            FieldDescriptor::new("lined", "Lined", FieldType::Check),
            FieldDescriptor::new("lining", "Lining", FieldType::Data)
                .required()
                .display_depends_on("lined == true"),
        ];
        let v = validator(&fields);
        let mut values = FormValues::seeded(&fields);
        assert!(v.validate(&values).is_empty());

        values.set("lined", FieldValue::Bool(true));
        assert!(v.validate(&values).contains("lining"));
    }

    #[test]
    fn test_table_cells_are_keyed_by_row() {
        let table = FieldDescriptor::new("items", "Items", FieldType::Table)
            .required()
            .with_columns(vec![
                FieldDescriptor::new("qty", "Qty", FieldType::Float).required(),
                FieldDescriptor::new("note", "Note", FieldType::Data)
                    .required()
                    .display_depends_on("qty > 10"),
            ]);
        let fields = vec![table.clone()];
        let v = validator(&fields);
        let mut values = FormValues::seeded(&fields);
        assert_eq!(v.validate(&values).get("items"), Some("Items is required"));

        let rows = values.rows_mut("items");
        let mut ok = crate::value::RowRecord::seeded(table.columns());
        ok.set("qty", FieldValue::Float(2.0));
        rows.push(ok);
        rows.push(crate::value::RowRecord::seeded(table.columns()));

        let errors = v.validate(&values);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.get("items.1.qty"), Some("Qty is required"));
        assert_eq!(errors.to_string(), "items.1.qty: Qty is required");
    }

    #[test]
    fn test_invalid_pattern_is_a_schema_error() {
        let fields = vec![FieldDescriptor::new("code", "Code", FieldType::Data).with_pattern("(")];
        assert!(matches!(Validator::new(&fields), Err(SchemaError::InvalidPattern { .. })));
    }
}
