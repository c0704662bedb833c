use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::field_type::FieldType;
use super::path::FieldRef;
use crate::remote::Filter;
use crate::store::FormStore;
use crate::value::FieldValue;

/// Select options, either a literal list or the Doctype newline-delimited form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldOptions {
    List(Vec<String>),
    Delimited(String),
}

impl FieldOptions {
    pub fn values(&self) -> Vec<String> {
        match self {
            Self::List(items) => items.clone(),
            Self::Delimited(raw) => raw
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Pull a value from a related record whenever `source_field` changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchFrom {
    pub source_field: String,
    #[serde(alias = "targetCollection")]
    pub target_doctype: String,
    pub target_field: String,
}

impl FetchFrom {
    pub fn new(
        source_field: impl Into<String>,
        target_doctype: impl Into<String>,
        target_field: impl Into<String>,
    ) -> Self {
        Self {
            source_field: source_field.into(),
            target_doctype: target_doctype.into(),
            target_field: target_field.into(),
        }
    }

    pub fn source(&self) -> FieldRef {
        FieldRef::parse(&self.source_field)
    }
}

/// Constrain a link search: `target_field` on the linked collection must
/// equal the current value of `source_field` in this form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterMapping {
    pub source_field: String,
    pub target_field: String,
}

/// Value lookup handed to filter builders.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<FieldValue>;

type FilterFn = dyn Fn(Lookup<'_>) -> Vec<Filter> + Send + Sync;

/// Collaborator-supplied closure producing ad-hoc link filters.
#[derive(Clone)]
pub struct FilterBuilder(Arc<FilterFn>);

impl FilterBuilder {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Lookup<'_>) -> Vec<Filter> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn build(&self, lookup: Lookup<'_>) -> Vec<Filter> {
        (self.0)(lookup)
    }
}

impl fmt::Debug for FilterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FilterBuilder(..)")
    }
}

/// Callback bound to a Button field.
#[derive(Clone)]
pub struct ButtonAction(Arc<dyn Fn(&FormStore) + Send + Sync>);

impl ButtonAction {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&FormStore) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn invoke(&self, store: &FormStore) {
        (self.0)(store)
    }
}

impl fmt::Debug for ButtonAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ButtonAction(..)")
    }
}

/// Declarative description of one form control.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<FieldOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<FieldDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_depends_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_from: Option<FetchFrom>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_mapping: Option<Vec<FilterMapping>>,
    #[serde(skip)]
    pub filters: Option<FilterBuilder>,
    #[serde(default)]
    pub show_download_upload: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_element: Option<String>,
    /// Key under which a Table MultiSelect stores each picked record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_field: Option<String>,
    #[serde(skip)]
    pub action: Option<ButtonAction>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, label: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            field_type,
            required: false,
            read_only: false,
            min: None,
            max: None,
            step: None,
            pattern: None,
            options: None,
            default_value: None,
            link_target: None,
            columns: None,
            display_depends_on: None,
            fetch_from: None,
            filter_mapping: None,
            filters: None,
            show_download_upload: false,
            custom_element: None,
            entry_field: None,
            action: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = Some(FieldOptions::List(
            options.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn link_to(mut self, target: impl Into<String>) -> Self {
        self.link_target = Some(target.into());
        self
    }

    pub fn with_columns(mut self, columns: Vec<FieldDescriptor>) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn display_depends_on(mut self, condition: impl Into<String>) -> Self {
        self.display_depends_on = Some(condition.into());
        self
    }

    pub fn fetch_from(
        mut self,
        source_field: impl Into<String>,
        target_doctype: impl Into<String>,
        target_field: impl Into<String>,
    ) -> Self {
        self.fetch_from = Some(FetchFrom::new(source_field, target_doctype, target_field));
        self
    }

    pub fn map_filter(
        mut self,
        source_field: impl Into<String>,
        target_field: impl Into<String>,
    ) -> Self {
        self.filter_mapping
            .get_or_insert_with(Vec::new)
            .push(FilterMapping {
                source_field: source_field.into(),
                target_field: target_field.into(),
            });
        self
    }

    pub fn with_filters<F>(mut self, f: F) -> Self
    where
        F: Fn(Lookup<'_>) -> Vec<Filter> + Send + Sync + 'static,
    {
        self.filters = Some(FilterBuilder::new(f));
        self
    }

    pub fn with_download_upload(mut self) -> Self {
        self.show_download_upload = true;
        self
    }

    pub fn with_custom_element(mut self, key: impl Into<String>) -> Self {
        self.custom_element = Some(key.into());
        self
    }

    pub fn with_entry_field(mut self, key: impl Into<String>) -> Self {
        self.entry_field = Some(key.into());
        self
    }

    pub fn on_click<F>(mut self, f: F) -> Self
    where
        F: Fn(&FormStore) + Send + Sync + 'static,
    {
        self.action = Some(ButtonAction::new(f));
        self
    }

    pub fn columns(&self) -> &[FieldDescriptor] {
        self.columns.as_deref().unwrap_or(&[])
    }

    pub fn column(&self, name: &str) -> Option<&FieldDescriptor> {
        self.columns().iter().find(|c| c.name == name)
    }

    pub fn option_values(&self) -> Vec<String> {
        self.options
            .as_ref()
            .map(FieldOptions::values)
            .unwrap_or_default()
    }

    /// Label shown to the user, falling back to the field name.
    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.name
        } else {
            &self.label
        }
    }

    /// Key used for each Table MultiSelect entry. Defaults to the link
    /// target in snake case (`Warehouse` → `warehouse`).
    pub fn entry_key(&self) -> String {
        if let Some(key) = &self.entry_field {
            return key.clone();
        }
        match &self.link_target {
            Some(target) => target.trim().to_lowercase().replace([' ', '-'], "_"),
            None => "name".to_string(),
        }
    }

    /// Value a fresh form (or a fresh table row) starts with.
    pub fn initial_value(&self) -> FieldValue {
        match &self.default_value {
            Some(default) => FieldValue::from_json(self, default),
            None => FieldValue::empty_for(self.field_type),
        }
    }

    /// Effective numeric bounds; Percent implies 0..=100 unless overridden.
    pub fn bounds(&self) -> (Option<f64>, Option<f64>) {
        match self.field_type {
            FieldType::Percent => (self.min.or(Some(0.0)), self.max.or(Some(100.0))),
            _ => (self.min, self.max),
        }
    }
}

/// A named group of fields shown as one screen section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TabbedLayout {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl TabbedLayout {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }
}

/// All fields of all tabs, in declaration order.
pub fn flatten_tabs(tabs: &[TabbedLayout]) -> Vec<FieldDescriptor> {
    tabs.iter().flat_map(|tab| tab.fields.iter().cloned()).collect()
}
