//! In-process resolver backed by a map of collections.
//!
//! Useful for tests and for offline tooling. Records every call so tests can
//! assert on how many round trips the engine made, and can be told to fail or
//! to answer slowly.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{Filter, FilterOp, RecordResolver, ResolverError, SearchQuery};

/// A recorded `fetch_record` call.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub collection: String,
    pub key: String,
    pub fields: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryResolver {
    collections: RwLock<HashMap<String, BTreeMap<String, Map<String, Value>>>>,
    fetches: Mutex<Vec<FetchCall>>,
    searches: Mutex<Vec<SearchQuery>>,
    fetch_count: AtomicUsize,
    search_count: AtomicUsize,
    failing: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a record. Non-object values are stored as empty records.
    pub fn insert(&self, collection: &str, key: &str, record: Value) {
        let record = match record {
            Value::Object(object) => object,
            _ => Map::new(),
        };
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), record);
    }

    pub fn with_record(self, collection: &str, key: &str, record: Value) -> Self {
        self.insert(collection, key, record);
        self
    }

    /// Make every following call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every answer by `latency` (tokio time, so it pauses in tests).
    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.latency) = latency;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn search_count(&self) -> usize {
        self.search_count.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> Vec<FetchCall> {
        lock(&self.fetches).clone()
    }

    pub fn searches(&self) -> Vec<SearchQuery> {
        lock(&self.searches).clone()
    }

    async fn answer_delay(&self) -> Result<(), ResolverError> {
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ResolverError::Decode("simulated resolver failure".into()));
        }
        Ok(())
    }
}

fn field_value<'a>(key: &'a str, record: &'a Map<String, Value>, field: &str) -> Option<Value> {
    if field == "name" {
        return Some(Value::String(key.to_string()));
    }
    record.get(field).cloned()
}

fn matches_filter(key: &str, record: &Map<String, Value>, filter: &Filter) -> bool {
    let actual = field_value(key, record, &filter.field);
    match filter.op {
        FilterOp::Equals => actual.as_ref() == Some(&filter.value),
        FilterOp::NotEquals => actual.as_ref() != Some(&filter.value),
        FilterOp::In => match (&filter.value, actual) {
            (Value::Array(set), Some(actual)) => set.contains(&actual),
            _ => false,
        },
        FilterOp::Like => {
            let needle = filter
                .value
                .as_str()
                .unwrap_or_default()
                .trim_matches('%')
                .to_lowercase();
            actual
                .as_ref()
                .and_then(Value::as_str)
                .is_some_and(|s| s.to_lowercase().contains(&needle))
        }
    }
}

#[async_trait]
impl RecordResolver for InMemoryResolver {
    async fn fetch_record(
        &self,
        collection: &str,
        key: &str,
        fields: &[String],
    ) -> Result<Map<String, Value>, ResolverError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.fetches).push(FetchCall {
            collection: collection.to_string(),
            key: key.to_string(),
            fields: fields.to_vec(),
        });
        self.answer_delay().await?;

        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let record = collections
            .get(collection)
            .and_then(|records| records.get(key))
            .ok_or_else(|| ResolverError::NotFound {
                collection: collection.to_string(),
                key: key.to_string(),
            })?;

        Ok(fields
            .iter()
            .filter_map(|field| field_value(key, record, field).map(|v| (field.clone(), v)))
            .collect())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>, ResolverError> {
        self.search_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.searches).push(query.clone());
        self.answer_delay().await?;

        let term = query.term.to_lowercase();
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(records) = collections.get(&query.collection) else {
            return Ok(Vec::new());
        };

        Ok(records
            .iter()
            .filter(|(key, _)| key.to_lowercase().contains(&term))
            .filter(|(key, record)| query.filters.iter().all(|f| matches_filter(key, record, f)))
            .map(|(key, _)| key.clone())
            .take(query.limit)
            .collect())
    }
}
