//! Form lifecycle integration tests
//!
//! Drives a complete form (tabs, fetchFrom dependents, a child table, a link
//! picker) through an in-memory resolver with paused tokio time, the way a
//! host page would.
//!
//! Run with:
//!   cargo test --test form_lifecycle

use std::sync::{Arc, Mutex};
use std::time::Duration;

use doctype_forms::form::{FocusTarget, FormAction, KeyChord};
use doctype_forms::remote::Filter;
use doctype_forms::{
    EngineConfig, FieldDescriptor, FieldType, FieldValue, FormOrchestrator, FormSeed, InMemoryResolver,
    SeedSlot, SubmitError, TabbedLayout,
};

use serde_json::{json, Map, Value};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn request_tabs() -> Vec<TabbedLayout> {
    vec![
        TabbedLayout::new(
            "Details",
            vec![
                FieldDescriptor::new("company", "Company", FieldType::Data),
                FieldDescriptor::new("item", "Item", FieldType::Link).link_to("Item"),
                FieldDescriptor::new("uom", "UOM", FieldType::Data)
                    .read_only()
                    .fetch_from("item", "Item", "stock_uom"),
                FieldDescriptor::new("rate", "Rate", FieldType::Currency)
                    .fetch_from("item", "Item", "valuation_rate"),
                FieldDescriptor::new("warehouse", "Warehouse", FieldType::Link)
                    .link_to("Warehouse")
                    .map_filter("company", "company"),
                FieldDescriptor::new("qty", "Qty", FieldType::Int).required().with_min(1.0),
            ],
        ),
        TabbedLayout::new(
            "Lines",
            vec![FieldDescriptor::new("lines", "Lines", FieldType::Table).with_columns(vec![
                FieldDescriptor::new("item", "Item", FieldType::Link).link_to("Item"),
                FieldDescriptor::new("uom", "UOM", FieldType::Data).fetch_from("item", "Item", "stock_uom"),
                FieldDescriptor::new("qty", "Qty", FieldType::Float),
            ])],
        ),
    ]
}

fn resolver() -> Arc<InMemoryResolver> {
    Arc::new(
        InMemoryResolver::new()
            .with_record("Item", "PIPE-100", json!({ "stock_uom": "Meter", "valuation_rate": 12.5 }))
            .with_record("Item", "GATE-20", json!({ "stock_uom": "Nos", "valuation_rate": 900 }))
            .with_record("Warehouse", "Stores - CB", json!({ "company": "Canal Board" }))
            .with_record("Warehouse", "Stores - WD", json!({ "company": "Water Dept" }))
            .with_record("Warehouse", "Transit - WD", json!({ "company": "Water Dept" })),
    )
}

type Submitted = Arc<Mutex<Vec<(Map<String, Value>, bool)>>>;

async fn submit_into(form: &FormOrchestrator, sink: &Submitted) -> Result<(), SubmitError> {
    let sink = sink.clone();
    form.submit(move |submission| async move {
        sink.lock().unwrap().push((submission.payload, submission.dirty));
        Ok(())
    })
    .await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_qty_validation_then_submit() {
    let tabs = vec![TabbedLayout::new(
        "Details",
        vec![FieldDescriptor::new("qty", "Qty", FieldType::Int).required().with_min(1.0)],
    )];
    let form = FormOrchestrator::new(tabs, None, EngineConfig::default()).unwrap();
    let store = form.handle();
    let submitted: Submitted = Arc::default();

    store.set("qty", FieldValue::Int(0));
    match submit_into(&form, &submitted).await {
        Err(SubmitError::Validation(errors)) => assert!(errors.contains("qty")),
        other => panic!("expected a validation failure, got {:?}", other),
    }
    assert!(submitted.lock().unwrap().is_empty());

    store.set("qty", FieldValue::Int(1));
    store.set("qty", FieldValue::Int(3));
    submit_into(&form, &submitted).await.unwrap();

    let calls = submitted.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(Value::Object(calls[0].0.clone()), json!({ "qty": 3 }));
    assert!(calls[0].1);
    assert!(!form.is_dirty());
}

#[tokio::test(start_paused = true)]
async fn test_dependents_fill_in_without_dirtying() {
    let mut form = FormOrchestrator::new(request_tabs(), None, EngineConfig::default()).unwrap();
    let resolver = resolver();
    form.attach_resolver(resolver.clone());
    form.prime_dependencies().await;
    assert_eq!(resolver.fetch_count(), 0);

    let store = form.handle();
    store.set("item", FieldValue::text("PIPE-100"));
    store.mark_clean();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // uom and rate share one lookup
    assert_eq!(resolver.fetch_count(), 1);
    assert_eq!(store.get("uom"), Some(FieldValue::text("Meter")));
    assert_eq!(store.get("rate"), Some(FieldValue::Float(12.5)));
    assert!(!form.is_dirty());

    store.set("item", FieldValue::text(""));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(resolver.fetch_count(), 1);
    assert_eq!(store.get("uom"), Some(FieldValue::text("")));
}

#[tokio::test(start_paused = true)]
async fn test_table_rows_resolve_their_own_dependents() {
    let mut form = FormOrchestrator::new(request_tabs(), None, EngineConfig::default()).unwrap();
    let resolver = resolver();
    form.attach_resolver(resolver.clone());

    let lines = form.table_field("lines").unwrap();
    lines.add_row();
    lines.add_row();
    assert!(lines.update_cell(0, "item", FieldValue::text("GATE-20")));
    assert!(lines.update_cell(1, "item", FieldValue::text("PIPE-100")));
    tokio::time::sleep(Duration::from_millis(300)).await;

    let rows = lines.rows();
    assert_eq!(rows[0].get("uom"), Some(&FieldValue::text("Nos")));
    assert_eq!(rows[1].get("uom"), Some(&FieldValue::text("Meter")));

    lines.toggle_row_selected(0);
    assert_eq!(lines.delete_selected(), 1);
    assert_eq!(lines.rows()[0].get("item"), Some(&FieldValue::text("PIPE-100")));
    assert!(lines.selection().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_link_search_debounces_and_filters() {
    let mut form = FormOrchestrator::new(request_tabs(), None, EngineConfig::default()).unwrap();
    let resolver = resolver();
    form.attach_resolver(resolver.clone());
    form.handle().set("company", FieldValue::text("Water Dept"));

    let warehouse = form.link_field("warehouse").unwrap();
    for term in ["s", "st", "sto", "stor", "store"] {
        warehouse.input(term);
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
    tokio::time::sleep(Duration::from_millis(500)).await;

    let searches = resolver.searches();
    assert_eq!(searches.len(), 1);
    assert_eq!(searches[0].term, "store");
    assert_eq!(searches[0].filters, vec![Filter::equals("company", "Water Dept")]);

    let candidates = warehouse.state().candidates;
    assert_eq!(candidates.len(), 1);
    warehouse.select(&candidates[0]);
    assert_eq!(form.values().get("warehouse"), Some(&FieldValue::text("Stores - WD")));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_hands_seed_to_next_form_once() {
    let doc = json!({
        "name": "MR-0042",
        "owner": "clerk@example.org",
        "docstatus": 1,
        "company": "Canal Board",
        "qty": 4,
        "lines": [{ "name": "row-1", "idx": 1, "item": "PIPE-100", "qty": 2 }],
    });
    let form = FormOrchestrator::with_document(
        request_tabs(),
        doc.as_object().unwrap(),
        None,
        EngineConfig::default(),
    )
    .unwrap();

    assert_eq!(
        form.handle_key(KeyChord::new('d').ctrl().shift(), FocusTarget::Body),
        Some(FormAction::Duplicate)
    );
    let slot = SeedSlot::new();
    slot.store(form.duplicate());

    let copy = FormOrchestrator::new(request_tabs(), slot.take(), EngineConfig::default()).unwrap();
    let values = copy.values();
    assert!(!values.contains("name"));
    assert!(!values.contains("owner"));
    assert_eq!(values.get("company"), Some(&FieldValue::text("Canal Board")));
    assert_eq!(values.get("qty"), Some(&FieldValue::Int(4)));
    let lines = values.rows("lines").unwrap();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].get("name").is_none());
    assert!(lines[0].get("idx").is_none());
    assert!(!copy.is_dirty());

    // the slot is spent; the next form starts from defaults
    let fresh = FormOrchestrator::new(request_tabs(), slot.take(), EngineConfig::default()).unwrap();
    assert_eq!(fresh.values().get("company"), Some(&FieldValue::text("")));
    assert_eq!(fresh.values().rows("lines").map(|rows| rows.len()), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_import_replaces_rows() {
    let form = FormOrchestrator::new(request_tabs(), Some(FormSeed::default()), EngineConfig::default())
        .unwrap();
    let lines = form.table_field("lines").unwrap();
    lines.add_row();

    let count = lines.import("Item,Qty\nPIPE-100,3\nGATE-20,1\n").unwrap();
    assert_eq!(count, 2);
    let rows = lines.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].get("item"), Some(&FieldValue::text("GATE-20")));
    assert_eq!(rows[0].get("qty"), Some(&FieldValue::Float(3.0)));

    assert!(lines.import("only a header").is_err());
    assert_eq!(lines.len(), 2);
}
