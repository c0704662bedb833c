//! Doctype REST resolver.
//!
//! ```text
//! GET {base}/api/resource/{collection}/{key}?fields=[...]      -> {"data": {...}}
//! GET {base}/api/resource/{collection}?filters=[...]&fields=["name"]
//!     &limit_page_length=20&order_by=name asc                  -> {"data": [{"name": ..}]}
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{StatusCode, Url};
use serde_json::{Map, Value};

use super::auth::{AuthProvider, AuthState};
use super::{RecordResolver, ResolverError, SearchQuery};
use crate::config::ResolverConfig;

pub struct HttpResolver {
    client: reqwest::Client,
    base_url: Url,
    auth: Arc<dyn AuthProvider>,
}

impl HttpResolver {
    pub fn new(config: &ResolverConfig, auth: Arc<dyn AuthProvider>) -> Result<Self, ResolverError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ResolverError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    fn ready_auth(&self) -> Result<AuthState, ResolverError> {
        let state = self.auth.state();
        if state.is_ready() {
            Ok(state)
        } else {
            Err(ResolverError::NotReady)
        }
    }

    fn resource_url(&self, parts: &[&str]) -> Result<Url, ResolverError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ResolverError::InvalidUrl(self.base_url.to_string()))?;
            segments.pop_if_empty().push("api").push("resource");
            segments.extend(parts);
        }
        Ok(url)
    }

    async fn get_json(&self, url: Url, query: &[(&str, String)]) -> Result<Value, ResolverError> {
        let auth = self.ready_auth()?;
        let response = self
            .client
            .get(url.clone())
            .header(AUTHORIZATION, auth.authorization())
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolverError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl RecordResolver for HttpResolver {
    async fn fetch_record(
        &self,
        collection: &str,
        key: &str,
        fields: &[String],
    ) -> Result<Map<String, Value>, ResolverError> {
        let url = self.resource_url(&[collection, key])?;
        let fields = serde_json::to_string(fields)
            .map_err(|e| ResolverError::Decode(e.to_string()))?;

        let body = match self.get_json(url, &[("fields", fields)]).await {
            Err(ResolverError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                return Err(ResolverError::NotFound {
                    collection: collection.to_string(),
                    key: key.to_string(),
                })
            }
            other => other?,
        };

        // Doctype responses wrap the record in `data`; accept a bare object too.
        let record = match body {
            Value::Object(mut object) => match object.remove("data") {
                Some(Value::Object(data)) => data,
                Some(other) => {
                    object.insert("data".to_string(), other);
                    object
                }
                None => object,
            },
            other => {
                return Err(ResolverError::Decode(format!(
                    "expected an object for {}/{}, got {}",
                    collection, key, other
                )))
            }
        };
        Ok(record)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>, ResolverError> {
        let url = self.resource_url(&[query.collection.as_str()])?;
        let params = [
            ("filters", query.wire_filters().to_string()),
            ("fields", r#"["name"]"#.to_string()),
            ("limit_page_length", query.limit.to_string()),
            ("order_by", "name asc".to_string()),
        ];

        let body = self.get_json(url, &params).await?;
        let rows = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| ResolverError::Decode("search response has no data array".into()))?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get("name"))
            .filter_map(|name| match name {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect())
    }
}
