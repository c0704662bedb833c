//! `fetchFrom` propagation.
//!
//! Fields declaring `fetchFrom` are grouped by (source field, target doctype).
//! When a group's source value changes, the group makes one
//! [`RecordResolver::fetch_record`] call for the union of its target fields
//! and writes every dependent from the response. A falsy source clears the
//! dependents without calling out.
//!
//! Every group carries a generation counter. A response that comes back after
//! the source moved on is dropped, so an old lookup can never overwrite a
//! newer one. All writes are made under the programmatic guard.
//!
//! [`FormDependencies`] watches form-level sources. [`RowDependencies`] does the
//! same per row of one Table field, keyed by [`RowId`], and re-resolves every
//! row when a `parent.` source changes on the form.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::debounce::Debouncer;
use crate::remote::RecordResolver;
use crate::schema::{FieldDescriptor, FieldRef, Scope};
use crate::store::FormStore;
use crate::value::{FieldValue, RowId};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A field filled from a related record.
#[derive(Debug, Clone)]
pub struct Dependent {
    pub field: FieldDescriptor,
    pub target_field: String,
}

/// Dependents sharing one source field and one target doctype.
#[derive(Debug, Clone)]
pub struct FetchGroup {
    pub source: FieldRef,
    pub target_doctype: String,
    pub dependents: Vec<Dependent>,
}

impl FetchGroup {
    /// Union of the target fields, in declaration order.
    pub fn requested_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        for dependent in &self.dependents {
            if !fields.contains(&dependent.target_field) {
                fields.push(dependent.target_field.clone());
            }
        }
        fields
    }

    fn cleared(&self) -> Vec<(String, FieldValue)> {
        self.dependents
            .iter()
            .map(|d| (d.field.name.clone(), FieldValue::text("")))
            .collect()
    }

    fn decode(&self, key: &str, record: &Map<String, Value>) -> Vec<(String, FieldValue)> {
        self.dependents
            .iter()
            .filter_map(|d| match record.get(&d.target_field) {
                Some(value) => Some((d.field.name.clone(), FieldValue::from_json(&d.field, value))),
                None => {
                    log::warn!(
                        "{} {} has no field {}; {} left unchanged",
                        self.target_doctype,
                        key,
                        d.target_field,
                        d.field.name
                    );
                    None
                }
            })
            .collect()
    }
}

/// All fetch groups of one field list.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    groups: Vec<FetchGroup>,
}

impl DependencyGraph {
    pub fn build(fields: &[FieldDescriptor]) -> Self {
        let mut groups: Vec<FetchGroup> = Vec::new();
        for field in fields {
            let Some(fetch) = &field.fetch_from else {
                continue;
            };
            let source = fetch.source();
            let dependent = Dependent {
                field: field.clone(),
                target_field: fetch.target_field.clone(),
            };
            match groups
                .iter_mut()
                .find(|g| g.source == source && g.target_doctype == fetch.target_doctype)
            {
                Some(group) => group.dependents.push(dependent),
                None => groups.push(FetchGroup {
                    source,
                    target_doctype: fetch.target_doctype.clone(),
                    dependents: vec![dependent],
                }),
            }
        }
        Self { groups }
    }

    pub fn groups(&self) -> &[FetchGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Names of same-scope source fields.
    pub fn local_sources(&self) -> BTreeSet<String> {
        self.groups
            .iter()
            .filter_map(|g| match &g.source {
                FieldRef::Local(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Names of form fields referenced as `parent.<name>`.
    pub fn parent_sources(&self) -> BTreeSet<String> {
        self.groups
            .iter()
            .filter_map(|g| match &g.source {
                FieldRef::ParentScope(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}

struct GroupState {
    last_seen: Option<FieldValue>,
    generation: u64,
}

/// Last seen source value and generation, per group key.
struct Tracker<K> {
    states: Mutex<HashMap<K, GroupState>>,
}

impl<K: Hash + Eq> Tracker<K> {
    fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Record `current`. Returns the new generation when it differs from the
    /// last value seen, `None` when nothing changed.
    fn observe(&self, key: K, current: &FieldValue) -> Option<u64> {
        let mut states = lock(&self.states);
        let state = states.entry(key).or_insert(GroupState {
            last_seen: None,
            generation: 0,
        });
        if state.last_seen.as_ref() == Some(current) {
            return None;
        }
        state.last_seen = Some(current.clone());
        state.generation += 1;
        Some(state.generation)
    }

    fn is_current(&self, key: &K, generation: u64) -> bool {
        lock(&self.states)
            .get(key)
            .is_some_and(|state| state.generation == generation)
    }

    /// Forget the value seen at `generation` so the next observation of it
    /// counts as a change. A newer generation is left alone.
    fn forget(&self, key: &K, generation: u64) {
        if let Some(state) = lock(&self.states).get_mut(key) {
            if state.generation == generation {
                state.last_seen = None;
            }
        }
    }

    fn retain(&self, keep: impl Fn(&K) -> bool) {
        lock(&self.states).retain(|key, _| keep(key));
    }
}

/// Fetch a group's target fields for `key`. Errors are logged.
async fn fetch_group(
    resolver: &dyn RecordResolver,
    group: &FetchGroup,
    key: &str,
) -> Option<Vec<(String, FieldValue)>> {
    match resolver
        .fetch_record(&group.target_doctype, key, &group.requested_fields())
        .await
    {
        Ok(record) => Some(group.decode(key, &record)),
        Err(e) => {
            log::warn!(
                "fetchFrom {} -> {} failed for {}: {}",
                group.source,
                group.target_doctype,
                key,
                e
            );
            None
        }
    }
}

struct FormInner {
    store: FormStore,
    resolver: Arc<dyn RecordResolver>,
    graph: DependencyGraph,
    tracker: Tracker<usize>,
    debouncers: HashMap<String, Debouncer>,
}

impl FormInner {
    async fn resolve_source(&self, source: &str) {
        for (index, group) in self.graph.groups().iter().enumerate() {
            if matches!(&group.source, FieldRef::Local(name) if name == source) {
                self.resolve_group(index, group).await;
            }
        }
    }

    async fn resolve_all(&self) {
        for (index, group) in self.graph.groups().iter().enumerate() {
            self.resolve_group(index, group).await;
        }
    }

    async fn resolve_group(&self, index: usize, group: &FetchGroup) {
        let current = self
            .store
            .with_values(|values| Scope::form(values).resolve(&group.source).cloned())
            .unwrap_or_default();

        let Some(generation) = self.tracker.observe(index, &current) else {
            return;
        };

        let updates = if current.is_falsy() {
            group.cleared()
        } else {
            let key = current.display_text();
            let Some(updates) = fetch_group(self.resolver.as_ref(), group, &key).await else {
                self.tracker.forget(&index, generation);
                return;
            };
            if !self.tracker.is_current(&index, generation) {
                log::debug!("Dropping stale {} result for {}", group.target_doctype, key);
                return;
            }
            updates
        };

        let _guard = self.store.programmatic();
        for (field, value) in updates {
            self.store.set(&field, value);
        }
    }
}

/// Form-level `fetchFrom` watcher. Unsubscribes when dropped.
pub struct FormDependencies {
    inner: Arc<FormInner>,
    subscriptions: Vec<Uuid>,
}

impl FormDependencies {
    pub fn attach(
        store: &FormStore,
        resolver: Arc<dyn RecordResolver>,
        fields: &[FieldDescriptor],
        config: &EngineConfig,
    ) -> Self {
        let graph = DependencyGraph::build(fields);
        let sources = graph.local_sources();
        let debouncers = sources
            .iter()
            .map(|source| (source.clone(), Debouncer::new(config.watch_debounce())))
            .collect();

        let inner = Arc::new(FormInner {
            store: store.clone(),
            resolver,
            graph,
            tracker: Tracker::new(),
            debouncers,
        });

        let subscriptions = sources
            .into_iter()
            .map(|source| {
                let weak = Arc::downgrade(&inner);
                let name = source.clone();
                store.subscribe(&source, move |_| {
                    if let Some(inner) = weak.upgrade() {
                        Self::schedule(&inner, &name);
                    }
                })
            })
            .collect();

        Self {
            inner,
            subscriptions,
        }
    }

    fn schedule(inner: &Arc<FormInner>, source: &str) {
        let Some(debouncer) = inner.debouncers.get(source) else {
            return;
        };
        let task_inner = inner.clone();
        let source = source.to_string();
        debouncer.schedule(async move {
            task_inner.resolve_source(&source).await;
        });
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.inner.graph
    }

    /// Resolve every group now. Called once on mount.
    pub async fn prime(&self) {
        self.inner.resolve_all().await;
    }

    /// Resolve the groups watching `source` now, skipping the debounce.
    pub async fn resolve_source(&self, source: &str) {
        self.inner.resolve_source(source).await;
    }
}

impl Drop for FormDependencies {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.inner.store.unsubscribe(id);
        }
    }
}

struct RowInner {
    store: FormStore,
    resolver: Arc<dyn RecordResolver>,
    table: String,
    graph: DependencyGraph,
    tracker: Tracker<(RowId, usize)>,
    debouncers: Mutex<HashMap<RowId, Debouncer>>,
    delay: Duration,
}

impl RowInner {
    fn row_ids(&self) -> Vec<RowId> {
        self.store
            .rows(&self.table)
            .iter()
            .map(|row| row.id())
            .collect()
    }

    fn schedule_row(self: &Arc<Self>, row: RowId) {
        let task_inner = self.clone();
        lock(&self.debouncers)
            .entry(row)
            .or_insert_with(|| Debouncer::new(self.delay))
            .schedule(async move {
                task_inner.resolve_row(row).await;
            });
    }

    fn schedule_all(self: &Arc<Self>) {
        let rows = self.row_ids();
        lock(&self.debouncers).retain(|id, _| rows.contains(id));
        self.tracker.retain(|(id, _)| rows.contains(id));
        for row in rows {
            self.schedule_row(row);
        }
    }

    fn sources(&self, row_id: RowId) -> Option<Vec<FieldValue>> {
        self.store.with_values(|values| {
            let row = values.rows(&self.table)?.iter().find(|r| r.id() == row_id)?;
            let scope = Scope::row(values, row);
            Some(
                self.graph
                    .groups()
                    .iter()
                    .map(|g| scope.resolve(&g.source).cloned().unwrap_or_default())
                    .collect(),
            )
        })
    }

    async fn resolve_row(&self, row_id: RowId) {
        // Row removed in the meantime.
        let Some(sources) = self.sources(row_id) else {
            return;
        };

        for (index, (group, current)) in self.graph.groups().iter().zip(sources).enumerate() {
            let key = (row_id, index);
            let Some(generation) = self.tracker.observe(key, &current) else {
                continue;
            };

            let updates = if current.is_falsy() {
                group.cleared()
            } else {
                let lookup = current.display_text();
                let Some(updates) = fetch_group(self.resolver.as_ref(), group, &lookup).await
                else {
                    self.tracker.forget(&key, generation);
                    continue;
                };
                if !self.tracker.is_current(&key, generation) {
                    log::debug!("Dropping stale row result for {}", lookup);
                    continue;
                }
                updates
            };
            self.write_row(row_id, updates);
        }
    }

    fn write_row(&self, row_id: RowId, updates: Vec<(String, FieldValue)>) {
        if updates.is_empty() {
            return;
        }
        let _guard = self.store.programmatic();
        self.store.update_rows(&self.table, |rows| {
            if let Some(row) = rows.iter_mut().find(|r| r.id() == row_id) {
                for (column, value) in updates {
                    row.set(column, value);
                }
            }
        });
    }
}

/// Row-scoped `fetchFrom` watcher for one Table field.
pub struct RowDependencies {
    inner: Arc<RowInner>,
    subscriptions: Vec<Uuid>,
}

impl RowDependencies {
    pub fn attach(
        store: &FormStore,
        resolver: Arc<dyn RecordResolver>,
        table: &FieldDescriptor,
        config: &EngineConfig,
    ) -> Self {
        let graph = DependencyGraph::build(table.columns());
        let mut watched: Vec<String> = vec![table.name.clone()];
        watched.extend(graph.parent_sources());

        let inner = Arc::new(RowInner {
            store: store.clone(),
            resolver,
            table: table.name.clone(),
            graph,
            tracker: Tracker::new(),
            debouncers: Mutex::new(HashMap::new()),
            delay: config.row_fetch_debounce(),
        });

        let subscriptions = if inner.graph.is_empty() {
            Vec::new()
        } else {
            watched
                .iter()
                .map(|field| {
                    let weak: Weak<RowInner> = Arc::downgrade(&inner);
                    store.subscribe(field, move |_| {
                        if let Some(inner) = weak.upgrade() {
                            inner.schedule_all();
                        }
                    })
                })
                .collect()
        };

        Self {
            inner,
            subscriptions,
        }
    }

    pub fn table(&self) -> &str {
        &self.inner.table
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.inner.graph
    }

    /// Re-resolve one row after the row debounce.
    pub fn schedule_row(&self, row: RowId) {
        if !self.inner.graph.is_empty() {
            self.inner.schedule_row(row);
        }
    }

    /// Resolve one row now.
    pub async fn resolve_row(&self, row: RowId) {
        self.inner.resolve_row(row).await;
    }

    /// Resolve every current row now. Called once on mount.
    pub async fn prime(&self) {
        for row in self.inner.row_ids() {
            self.inner.resolve_row(row).await;
        }
    }
}

impl Drop for RowDependencies {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.inner.store.unsubscribe(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryResolver;
    use crate::schema::FieldType;
    use crate::value::{FormValues, RowRecord};
    use serde_json::json;

    fn item_fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("item", "Item", FieldType::Link).link_to("Item"),
            FieldDescriptor::new("uom", "UOM", FieldType::Data).fetch_from("item", "Item", "stock_uom"),
            FieldDescriptor::new("rate", "Rate", FieldType::Currency)
                .fetch_from("item", "Item", "valuation_rate"),
            FieldDescriptor::new("group", "Group", FieldType::Data)
                .fetch_from("item", "Item Group", "item_group_name"),
        ]
    }

    fn resolver() -> Arc<InMemoryResolver> {
        Arc::new(
            InMemoryResolver::new()
                .with_record("Item", "PIPE", json!({ "stock_uom": "Meter", "valuation_rate": 12.5 }))
                .with_record("Item", "GATE", json!({ "stock_uom": "Nos", "valuation_rate": 900 }))
                .with_record("Item Group", "PIPE", json!({ "item_group_name": "Pipes" })),
        )
    }

    fn store_for(fields: &[FieldDescriptor]) -> FormStore {
        FormStore::new(FormValues::seeded(fields))
    }

    #[test]
    fn test_groups_by_source_and_target() {
        let graph = DependencyGraph::build(&item_fields());
        assert_eq!(graph.groups().len(), 2);
        assert_eq!(
            graph.groups()[0].requested_fields(),
            vec!["stock_uom", "valuation_rate"]
        );
        assert_eq!(graph.local_sources().into_iter().collect::<Vec<_>>(), vec!["item"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_source_makes_one_call_per_target() {
        let fields = item_fields();
        let store = store_for(&fields);
        let resolver = resolver();
        let deps = FormDependencies::attach(&store, resolver.clone(), &fields, &EngineConfig::default());

        store.set("item", FieldValue::text("PIPE"));
        tokio::time::sleep(Duration::from_millis(100)).await;

        // one for Item, one for Item Group
        assert_eq!(resolver.fetch_count(), 2);
        assert_eq!(resolver.fetches()[0].fields, vec!["stock_uom", "valuation_rate"]);
        assert_eq!(store.get("uom"), Some(FieldValue::text("Meter")));
        assert_eq!(store.get("rate"), Some(FieldValue::Float(12.5)));
        assert_eq!(store.get("group"), Some(FieldValue::text("Pipes")));
        drop(deps);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falsy_source_clears_without_call() {
        let fields = item_fields();
        let store = store_for(&fields);
        store.set_programmatic("uom", FieldValue::text("Stale"));
        let resolver = resolver();
        let deps = FormDependencies::attach(&store, resolver.clone(), &fields, &EngineConfig::default());

        deps.prime().await;
        assert_eq!(resolver.fetch_count(), 0);
        assert_eq!(store.get("uom"), Some(FieldValue::text("")));
        assert!(!store.is_dirty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_source_does_not_refetch() {
        let fields = item_fields();
        let store = store_for(&fields);
        let resolver = resolver();
        let deps = FormDependencies::attach(&store, resolver.clone(), &fields, &EngineConfig::default());

        store.set("item", FieldValue::text("GATE"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        let calls = resolver.fetch_count();

        store.set("item", FieldValue::text("GATE"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(resolver.fetch_count(), calls);
        drop(deps);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_result_is_dropped() {
        let fields = item_fields()[..2].to_vec();
        let store = store_for(&fields);
        let resolver = resolver();
        resolver.set_latency(Some(Duration::from_millis(200)));
        let deps = FormDependencies::attach(&store, resolver.clone(), &fields, &EngineConfig::default());

        store.set("item", FieldValue::text("PIPE"));
        // past the debounce, PIPE lookup in flight until t=250
        tokio::time::sleep(Duration::from_millis(60)).await;
        store.set("item", FieldValue::text("GATE"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.get("uom"), Some(FieldValue::text("")));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.get("uom"), Some(FieldValue::text("Nos")));
        assert_eq!(resolver.fetch_count(), 2);
        drop(deps);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_leaves_dependent_untouched() {
        let fields = item_fields()[..2].to_vec();
        let store = store_for(&fields);
        store.set_programmatic("uom", FieldValue::text("Box"));
        let resolver = resolver();
        resolver.set_failing(true);
        let deps = FormDependencies::attach(&store, resolver.clone(), &fields, &EngineConfig::default());

        store.set("item", FieldValue::text("PIPE"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(resolver.fetch_count(), 1);
        assert_eq!(store.get("uom"), Some(FieldValue::text("Box")));
        drop(deps);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_lookup_is_retried_on_next_prime() {
        let fields = item_fields()[..2].to_vec();
        let store = store_for(&fields);
        store.set_programmatic("item", FieldValue::text("PIPE"));
        let resolver = resolver();
        resolver.set_failing(true);
        let deps = FormDependencies::attach(&store, resolver.clone(), &fields, &EngineConfig::default());

        deps.prime().await;
        assert_eq!(resolver.fetch_count(), 1);
        assert_eq!(store.get("uom"), Some(FieldValue::text("")));

        resolver.set_failing(false);
        deps.prime().await;
        assert_eq!(resolver.fetch_count(), 2);
        assert_eq!(store.get("uom"), Some(FieldValue::text("Meter")));

        // settled now, so a third prime has nothing to do
        deps.prime().await;
        assert_eq!(resolver.fetch_count(), 2);
    }

    fn items_table() -> FieldDescriptor {
        FieldDescriptor::new("items", "Items", FieldType::Table).with_columns(vec![
            FieldDescriptor::new("item", "Item", FieldType::Link).link_to("Item"),
            FieldDescriptor::new("uom", "UOM", FieldType::Data).fetch_from("item", "Item", "stock_uom"),
            FieldDescriptor::new("group", "Group", FieldType::Data)
                .fetch_from("parent.category", "Item Group", "item_group_name"),
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn test_row_scope_resolves_per_row() {
        let table = items_table();
        let fields = vec![FieldDescriptor::new("category", "Category", FieldType::Data), table.clone()];
        let store = store_for(&fields);
        let resolver = resolver();
        let deps = RowDependencies::attach(&store, resolver.clone(), &table, &EngineConfig::default());

        let mut first = RowRecord::seeded(table.columns());
        first.set("item", FieldValue::text("PIPE"));
        let mut second = RowRecord::seeded(table.columns());
        second.set("item", FieldValue::text("GATE"));
        store.update_rows("items", |rows| {
            rows.push(first);
            rows.push(second);
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        let rows = store.rows("items");
        assert_eq!(rows[0].get("uom"), Some(&FieldValue::text("Meter")));
        assert_eq!(rows[1].get("uom"), Some(&FieldValue::text("Nos")));
        assert_eq!(rows[0].get("group"), Some(&FieldValue::text("")));

        store.set("category", FieldValue::text("PIPE"));
        tokio::time::sleep(Duration::from_millis(150)).await;
        let rows = store.rows("items");
        assert_eq!(rows[0].get("group"), Some(&FieldValue::text("Pipes")));
        assert_eq!(rows[1].get("group"), Some(&FieldValue::text("Pipes")));
        // item lookups were not repeated for the parent change
        assert_eq!(
            resolver.fetches().iter().filter(|f| f.collection == "Item").count(),
            2
        );
        drop(deps);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_row_lookup_is_retried_on_next_edit() {
        let table = items_table();
        let fields = vec![FieldDescriptor::new("category", "Category", FieldType::Data), table.clone()];
        let store = store_for(&fields);
        let resolver = resolver();
        resolver.set_failing(true);
        let deps = RowDependencies::attach(&store, resolver.clone(), &table, &EngineConfig::default());

        let mut row = RowRecord::seeded(table.columns());
        row.set("item", FieldValue::text("PIPE"));
        store.update_rows("items", |rows| rows.push(row));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(resolver.fetch_count(), 1);
        assert_eq!(store.rows("items")[0].get("uom"), Some(&FieldValue::text("")));

        // an unrelated edit reschedules the row; the item source did not change
        resolver.set_failing(false);
        store.update_rows("items", |rows| rows[0].set("group", FieldValue::text("x")));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(resolver.fetch_count(), 2);
        assert_eq!(store.rows("items")[0].get("uom"), Some(&FieldValue::text("Meter")));
        drop(deps);
    }
}
