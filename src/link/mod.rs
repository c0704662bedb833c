//! Link and Table MultiSelect pickers.
//!
//! Typing schedules a debounced search against the field's link target.
//! Only the last term of a burst of keystrokes reaches the resolver, and a
//! search result is dropped when a newer search was started after it.
//!
//! A [`LinkField`] commits a single key; [`MultiSelectField`] keeps a list of
//! entries. Both narrow their search with the field's `filterMapping` (other
//! fields' current values) or, when no mapping is declared, the `filters`
//! closure.

pub mod dropdown;
pub mod multi;

pub use dropdown::{place, DropdownPlacement, Rect, Side, Viewport};
pub use multi::MultiSelectField;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::EngineConfig;
use crate::debounce::Debouncer;
use crate::remote::{Filter, RecordResolver, SearchQuery};
use crate::schema::{FieldDescriptor, SchemaError, Scope};
use crate::store::FormStore;
use crate::value::{FieldValue, FormValues, RowId};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run `task` now on the current runtime, if there is one.
pub(crate) fn spawn_now<F>(task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(task);
        }
        Err(_) => log::warn!("No tokio runtime, search dropped"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOption {
    pub value: String,
    pub label: String,
}

impl LinkOption {
    pub fn new(key: impl Into<String>) -> Self {
        let value = key.into();
        Self {
            label: value.clone(),
            value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkSearchState {
    pub search_term: String,
    pub candidates: Vec<LinkOption>,
    pub is_open: bool,
    pub is_loading: bool,
}

/// Where a picker's value lives: a form field, or one cell of a table row.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueTarget {
    Field(String),
    Cell {
        table: String,
        row: RowId,
        column: String,
    },
}

impl ValueTarget {
    pub fn read(&self, store: &FormStore) -> FieldValue {
        match self {
            Self::Field(name) => store.get(name).unwrap_or_default(),
            Self::Cell { table, row, column } => store.with_values(|values| {
                values
                    .rows(table)
                    .and_then(|rows| rows.iter().find(|r| r.id() == *row))
                    .and_then(|r| r.get(column))
                    .cloned()
                    .unwrap_or_default()
            }),
        }
    }

    /// Write as the user; under an engaged guard this is programmatic.
    pub fn write(&self, store: &FormStore, value: FieldValue) {
        match self {
            Self::Field(name) => store.set(name, value),
            Self::Cell { table, row, column } => store.update_rows(table, |rows| {
                if let Some(r) = rows.iter_mut().find(|r| r.id() == *row) {
                    r.set(column.clone(), value);
                }
            }),
        }
    }

    /// Resolve `name` in this target's scope: the row for a cell, else the form.
    fn lookup(&self, values: &FormValues, name: &str) -> Option<FieldValue> {
        match self {
            Self::Field(_) => Scope::form(values).lookup(name),
            Self::Cell { table, row, .. } => {
                let record = values.rows(table)?.iter().find(|r| r.id() == *row)?;
                Scope::row(values, record).lookup(name)
            }
        }
    }
}

/// State and remote access shared by both picker kinds.
pub(crate) struct SearchCore {
    pub(crate) field: FieldDescriptor,
    pub(crate) collection: String,
    pub(crate) target: ValueTarget,
    pub(crate) store: FormStore,
    resolver: Arc<dyn RecordResolver>,
    pub(crate) limit: usize,
    state: Mutex<LinkSearchState>,
    generation: AtomicU64,
}

impl SearchCore {
    pub(crate) fn new(
        field: &FieldDescriptor,
        target: ValueTarget,
        store: &FormStore,
        resolver: Arc<dyn RecordResolver>,
        config: &EngineConfig,
    ) -> Result<Self, SchemaError> {
        let collection = field
            .link_target
            .clone()
            .ok_or_else(|| SchemaError::MissingLinkTarget(field.name.clone()))?;
        Ok(Self {
            field: field.clone(),
            collection,
            target,
            store: store.clone(),
            resolver,
            limit: config.search_limit,
            state: Mutex::new(LinkSearchState::default()),
            generation: AtomicU64::new(0),
        })
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, LinkSearchState> {
        lock(&self.state)
    }

    /// Active search filters. A declared `filterMapping` wins over the
    /// `filters` closure; mapping entries whose source is empty are skipped.
    pub(crate) fn filters(&self) -> Vec<Filter> {
        let values = self.store.snapshot();
        let lookup = |name: &str| self.target.lookup(&values, name);

        match (&self.field.filter_mapping, &self.field.filters) {
            (Some(mapping), _) if !mapping.is_empty() => mapping
                .iter()
                .filter_map(|entry| {
                    let value = lookup(entry.source_field.as_str())?;
                    if value.is_falsy() || value.is_blank() {
                        return None;
                    }
                    Some(Filter::equals(entry.target_field.clone(), value.to_json()))
                })
                .collect(),
            (_, Some(builder)) => builder.build(&lookup),
            _ => Vec::new(),
        }
    }

    /// Search for `term` and publish the candidates. Returns the keys unless
    /// the search failed or was superseded.
    pub(crate) async fn run(&self, term: String) -> Option<Vec<String>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state().is_loading = true;

        let query = SearchQuery::new(self.collection.clone(), term)
            .with_filters(self.filters())
            .with_limit(self.limit);
        let result = self.resolver.search(&query).await;

        if self.generation.load(Ordering::SeqCst) != generation {
            log::debug!("Dropping superseded {} search", self.collection);
            return None;
        }

        let mut state = self.state();
        state.is_loading = false;
        match result {
            Ok(keys) => {
                state.candidates = keys.iter().cloned().map(LinkOption::new).collect();
                Some(keys)
            }
            Err(e) => {
                log::warn!("Search in {} failed: {}", self.collection, e);
                state.candidates.clear();
                None
            }
        }
    }

    /// Forget any search still in flight.
    pub(crate) fn supersede(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state().is_loading = false;
    }
}

struct LinkInner {
    core: SearchCore,
    committed_label: Mutex<String>,
    placement: Mutex<Option<DropdownPlacement>>,
}

impl LinkInner {
    async fn search(&self, term: String) {
        let browsing = term.is_empty();
        let Some(keys) = self.core.run(term).await else {
            return;
        };
        if browsing && keys.len() < self.core.limit {
            self.invalidate(&keys);
        }
    }

    /// An unfiltered listing that came back complete and without the committed
    /// key means the key is no longer valid under the current filters.
    fn invalidate(&self, keys: &[String]) {
        let committed = self.core.target.read(&self.core.store).display_text();
        if committed.is_empty() || keys.contains(&committed) {
            return;
        }
        log::debug!(
            "{} no longer offers {}; clearing {}",
            self.core.collection,
            committed,
            self.core.field.name
        );
        {
            let _guard = self.core.store.programmatic();
            self.core.target.write(&self.core.store, FieldValue::text(""));
        }
        lock(&self.committed_label).clear();
        let mut state = self.core.state();
        if state.search_term == committed {
            state.search_term.clear();
        }
    }
}

/// Single-valued Link picker.
pub struct LinkField {
    inner: Arc<LinkInner>,
    debouncer: Debouncer,
}

impl LinkField {
    pub fn new(
        field: &FieldDescriptor,
        store: &FormStore,
        resolver: Arc<dyn RecordResolver>,
        config: &EngineConfig,
    ) -> Result<Self, SchemaError> {
        Self::bound(field, ValueTarget::Field(field.name.clone()), store, resolver, config)
    }

    /// A picker for one cell of a table row.
    pub fn in_row(
        column: &FieldDescriptor,
        table: &str,
        row: RowId,
        store: &FormStore,
        resolver: Arc<dyn RecordResolver>,
        config: &EngineConfig,
    ) -> Result<Self, SchemaError> {
        let target = ValueTarget::Cell {
            table: table.to_string(),
            row,
            column: column.name.clone(),
        };
        Self::bound(column, target, store, resolver, config)
    }

    fn bound(
        field: &FieldDescriptor,
        target: ValueTarget,
        store: &FormStore,
        resolver: Arc<dyn RecordResolver>,
        config: &EngineConfig,
    ) -> Result<Self, SchemaError> {
        let core = SearchCore::new(field, target, store, resolver, config)?;
        let committed = core.target.read(store).display_text();
        core.state().search_term = committed.clone();
        Ok(Self {
            inner: Arc::new(LinkInner {
                core,
                committed_label: Mutex::new(committed),
                placement: Mutex::new(None),
            }),
            debouncer: Debouncer::new(config.search_debounce()),
        })
    }

    pub fn field(&self) -> &FieldDescriptor {
        &self.inner.core.field
    }

    pub fn state(&self) -> LinkSearchState {
        self.inner.core.state().clone()
    }

    /// The committed key.
    pub fn value(&self) -> String {
        self.inner
            .core
            .target
            .read(&self.inner.core.store)
            .display_text()
    }

    pub fn committed_label(&self) -> String {
        lock(&self.inner.committed_label).clone()
    }

    pub fn filters(&self) -> Vec<Filter> {
        self.inner.core.filters()
    }

    /// The user typed: open and search for `term` once typing pauses.
    pub fn input(&self, term: &str) {
        {
            let mut state = self.inner.core.state();
            state.search_term = term.to_string();
            state.is_open = true;
        }
        let inner = self.inner.clone();
        let term = term.to_string();
        self.debouncer.schedule(async move {
            inner.search(term).await;
        });
    }

    /// Trigger clicked or focused: open and list candidates for the current
    /// text right away.
    pub fn open(&self) {
        self.debouncer.cancel();
        let term = {
            let mut state = self.inner.core.state();
            state.is_open = true;
            // committed text lists everything
            if state.search_term == self.committed_label() {
                String::new()
            } else {
                state.search_term.clone()
            }
        };
        let inner = self.inner.clone();
        spawn_now(async move {
            inner.search(term).await;
        });
    }

    /// Search for the current text now, skipping the debounce.
    pub async fn search_now(&self) {
        self.debouncer.cancel();
        let term = self.inner.core.state().search_term.clone();
        self.inner.search(term).await;
    }

    /// Commit `option`: user write of the key, text shows the label.
    pub fn select(&self, option: &LinkOption) {
        self.debouncer.cancel();
        self.inner.core.supersede();
        self.inner
            .core
            .target
            .write(&self.inner.core.store, FieldValue::text(option.value.clone()));
        *lock(&self.inner.committed_label) = option.label.clone();

        let mut state = self.inner.core.state();
        state.search_term = option.label.clone();
        state.is_open = false;
    }

    /// Focus left. Unmatched text that differs from the committed value
    /// reverts to the committed label; the value never changes here.
    pub fn blur(&self) {
        let committed_value = self.value();
        let committed_label = self.committed_label();
        let mut state = self.inner.core.state();
        let matched = state
            .candidates
            .iter()
            .any(|c| c.label == state.search_term);
        if !matched && state.search_term != committed_value {
            state.search_term = committed_label;
        }
        state.is_open = false;
    }

    /// Empty text, value and candidates.
    pub fn clear(&self) {
        self.debouncer.cancel();
        self.inner.core.supersede();
        self.inner
            .core
            .target
            .write(&self.inner.core.store, FieldValue::text(""));
        lock(&self.inner.committed_label).clear();

        let mut state = self.inner.core.state();
        state.search_term.clear();
        state.candidates.clear();
        state.is_open = false;
    }

    pub fn escape(&self) {
        self.inner.core.state().is_open = false;
    }

    /// Pointer pressed at (x, y). Outside the trigger and the dropdown this
    /// closes the picker like a blur.
    pub fn pointer_down(&self, trigger: Rect, x: f64, y: f64) {
        let inside_dropdown = lock(&self.inner.placement)
            .map(|p| p.rect().contains(x, y))
            .unwrap_or(false);
        if !trigger.contains(x, y) && !inside_dropdown {
            self.blur();
        }
    }

    /// Recompute placement on open, scroll or resize. `None` while closed.
    pub fn reposition(&self, trigger: Rect, viewport: Viewport) -> Option<DropdownPlacement> {
        let placement = self
            .inner
            .core
            .state()
            .is_open
            .then(|| place(trigger, viewport, dropdown::PREFERRED_HEIGHT));
        *lock(&self.inner.placement) = placement;
        placement
    }
}
