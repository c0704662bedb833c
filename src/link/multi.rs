//! Table MultiSelect picker: a chip list of linked keys.
//!
//! The value is a list of row objects `{<entry key>: <linked key>}`, the shape
//! the Doctype API expects for a Table MultiSelect child table.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::{spawn_now, LinkOption, LinkSearchState, SearchCore, ValueTarget};
use crate::config::EngineConfig;
use crate::debounce::Debouncer;
use crate::remote::{Filter, RecordResolver};
use crate::schema::{FieldDescriptor, SchemaError};
use crate::store::FormStore;
use crate::value::FieldValue;

pub struct MultiSelectField {
    core: Arc<SearchCore>,
    debouncer: Debouncer,
    entry_key: String,
}

impl MultiSelectField {
    pub fn new(
        field: &FieldDescriptor,
        store: &FormStore,
        resolver: Arc<dyn RecordResolver>,
        config: &EngineConfig,
    ) -> Result<Self, SchemaError> {
        let target = ValueTarget::Field(field.name.clone());
        Ok(Self {
            core: Arc::new(SearchCore::new(field, target, store, resolver, config)?),
            debouncer: Debouncer::new(config.search_debounce()),
            entry_key: field.entry_key(),
        })
    }

    pub fn field(&self) -> &FieldDescriptor {
        &self.core.field
    }

    pub fn entry_key(&self) -> &str {
        &self.entry_key
    }

    pub fn state(&self) -> LinkSearchState {
        self.core.state().clone()
    }

    pub fn filters(&self) -> Vec<Filter> {
        self.core.filters()
    }

    fn entries(&self) -> Vec<Map<String, Value>> {
        match self.core.target.read(&self.core.store) {
            FieldValue::Entries(entries) => entries,
            _ => Vec::new(),
        }
    }

    fn entry_value(&self, entry: &Map<String, Value>) -> Option<String> {
        match entry.get(&self.entry_key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Linked keys in selection order.
    pub fn selected(&self) -> Vec<String> {
        self.entries()
            .iter()
            .filter_map(|entry| self.entry_value(entry))
            .collect()
    }

    pub fn is_selected(&self, key: &str) -> bool {
        self.selected().iter().any(|k| k == key)
    }

    fn write(&self, entries: Vec<Map<String, Value>>) {
        self.core
            .target
            .write(&self.core.store, FieldValue::Entries(entries));
    }

    pub fn input(&self, term: &str) {
        {
            let mut state = self.core.state();
            state.search_term = term.to_string();
            state.is_open = true;
        }
        let core = self.core.clone();
        let term = term.to_string();
        self.debouncer.schedule(async move {
            core.run(term).await;
        });
    }

    pub fn open(&self) {
        self.debouncer.cancel();
        let term = {
            let mut state = self.core.state();
            state.is_open = true;
            state.search_term.clone()
        };
        let core = self.core.clone();
        spawn_now(async move {
            core.run(term).await;
        });
    }

    pub async fn search_now(&self) {
        self.debouncer.cancel();
        let term = self.core.state().search_term.clone();
        self.core.run(term).await;
    }

    /// Add or remove `option`. The dropdown stays open.
    pub fn toggle(&self, option: &LinkOption) {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|entry| self.entry_value(entry).as_deref() != Some(option.value.as_str()));
        if entries.len() == before {
            let mut entry = Map::new();
            entry.insert(self.entry_key.clone(), Value::String(option.value.clone()));
            entries.push(entry);
        }
        self.write(entries);
    }

    /// Remove one chip.
    pub fn remove(&self, key: &str) {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|entry| self.entry_value(entry).as_deref() != Some(key));
        if entries.len() != before {
            self.write(entries);
        }
    }

    pub fn clear_all(&self) {
        self.write(Vec::new());
        self.core.state().search_term.clear();
    }

    pub fn escape(&self) {
        self.core.state().is_open = false;
    }

    pub fn close(&self) {
        self.debouncer.cancel();
        self.core.supersede();
        let mut state = self.core.state();
        state.is_open = false;
        state.search_term.clear();
    }
}
