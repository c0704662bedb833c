//! Remote record resolution.
//!
//! The engine never talks HTTP directly. Link searches and `fetchFrom`
//! lookups go through the [`RecordResolver`] trait; [`HttpResolver`] speaks the
//! Doctype REST API and [`InMemoryResolver`] serves tests and offline tools.

pub mod auth;
pub mod http;
pub mod memory;

pub use auth::{AuthProvider, AuthState, StaticAuth};
pub use http::HttpResolver;
pub use memory::InMemoryResolver;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Maximum number of link candidates fetched per search.
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Resolver not ready: authentication is not initialized")]
    NotReady,

    #[error("Record {collection}/{key} not found")]
    NotFound { collection: String, key: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),

    #[error("Malformed response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equals,
    NotEquals,
    Like,
    In,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "=",
            Self::NotEquals => "!=",
            Self::Like => "like",
            Self::In => "in",
        }
    }
}

/// One `[field, op, value]` constraint on a collection query.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Equals,
            value: value.into(),
        }
    }

    pub fn not_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::NotEquals,
            value: value.into(),
        }
    }

    /// Case-insensitive substring match.
    pub fn contains(field: impl Into<String>, term: &str) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Like,
            value: Value::String(format!("%{}%", term)),
        }
    }

    pub fn in_set<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Value>,
    {
        Self {
            field: field.into(),
            op: FilterOp::In,
            value: Value::Array(values.into_iter().map(Into::into).collect()),
        }
    }

    /// Wire form: `[collection, field, op, value]`.
    pub fn to_wire(&self, collection: &str) -> Value {
        Value::Array(vec![
            Value::String(collection.to_string()),
            Value::String(self.field.clone()),
            Value::String(self.op.as_str().to_string()),
            self.value.clone(),
        ])
    }
}

/// A link search: keys of `collection` matching `term`, narrowed by `filters`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub collection: String,
    pub term: String,
    pub filters: Vec<Filter>,
    pub limit: usize,
}

impl SearchQuery {
    pub fn new(collection: impl Into<String>, term: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            term: term.into(),
            filters: Vec::new(),
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }

    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// All constraints sent to the server, the key match first.
    pub fn wire_filters(&self) -> Value {
        let mut filters = Vec::with_capacity(self.filters.len() + 1);
        if !self.term.is_empty() {
            filters.push(Filter::contains("name", &self.term).to_wire(&self.collection));
        }
        filters.extend(self.filters.iter().map(|f| f.to_wire(&self.collection)));
        Value::Array(filters)
    }
}

/// Source of remote records.
#[async_trait]
pub trait RecordResolver: Send + Sync {
    /// Fetch `fields` of the record `key` in `collection`.
    async fn fetch_record(
        &self,
        collection: &str,
        key: &str,
        fields: &[String],
    ) -> Result<Map<String, Value>, ResolverError>;

    /// Primary keys matching `query`, ordered by key ascending.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>, ResolverError>;
}
