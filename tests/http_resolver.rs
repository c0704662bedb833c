//! HTTP resolver against a mock Doctype API.

use std::sync::Arc;

use doctype_forms::remote::{AuthState, Filter, ResolverError, SearchQuery, StaticAuth};
use doctype_forms::{HttpResolver, RecordResolver, ResolverConfig};
use serde_json::json;
use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn resolver_for(server: &MockServer, auth: AuthState) -> HttpResolver {
    HttpResolver::new(&ResolverConfig::new(server.uri()), Arc::new(StaticAuth::new(auth))).unwrap()
}

fn signed_in() -> AuthState {
    AuthState::authenticated("key123", "secret456")
}

#[tokio::test]
async fn fetch_record_unwraps_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/resource/Item/PIPE-100"))
        .and(header("Authorization", "token key123:secret456"))
        .and(query_param("fields", r#"["stock_uom","valuation_rate"]"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "stock_uom": "Meter", "valuation_rate": 12.5 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver_for(&server, signed_in());
    let record = resolver
        .fetch_record(
            "Item",
            "PIPE-100",
            &["stock_uom".to_string(), "valuation_rate".to_string()],
        )
        .await
        .unwrap();

    assert_eq!(record.get("stock_uom"), Some(&json!("Meter")));
    assert_eq!(record.get("valuation_rate"), Some(&json!(12.5)));
}

#[tokio::test]
async fn missing_record_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/resource/Item/NOPE"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let resolver = resolver_for(&server, signed_in());
    let result = resolver.fetch_record("Item", "NOPE", &["stock_uom".to_string()]).await;
    assert!(matches!(result, Err(ResolverError::NotFound { .. })));
}

#[tokio::test]
async fn server_error_is_reported_with_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let resolver = resolver_for(&server, signed_in());
    let result = resolver.search(&SearchQuery::new("Item", "pipe")).await;
    assert!(matches!(result, Err(ResolverError::Status { status: 500, .. })));
}

#[tokio::test]
async fn search_sends_filters_and_returns_keys() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/resource/Warehouse"))
        .and(query_param(
            "filters",
            r#"[["Warehouse","name","like","%stores%"],["Warehouse","company","=","Water Dept"]]"#,
        ))
        .and(query_param("fields", r#"["name"]"#))
        .and(query_param("limit_page_length", "20"))
        .and(query_param("order_by", "name asc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "name": "Stores - WD" }, { "name": "Stores - WD2" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver_for(&server, signed_in());
    let query = SearchQuery::new("Warehouse", "stores")
        .with_filters(vec![Filter::equals("company", "Water Dept")]);
    let keys = resolver.search(&query).await.unwrap();
    assert_eq!(keys, vec!["Stores - WD", "Stores - WD2"]);
}

#[tokio::test]
async fn no_calls_before_auth_is_ready() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .expect(0)
        .mount(&server)
        .await;

    let pending = AuthState {
        is_initialized: false,
        ..signed_in()
    };
    let resolver = resolver_for(&server, pending);
    let result = resolver.search(&SearchQuery::new("Item", "")).await;
    assert!(matches!(result, Err(ResolverError::NotReady)));

    let signed_out = AuthState {
        is_authenticated: false,
        ..signed_in()
    };
    let resolver = resolver_for(&server, signed_out);
    let result = resolver.fetch_record("Item", "PIPE", &[]).await;
    assert!(matches!(result, Err(ResolverError::NotReady)));
}
