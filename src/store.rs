//! The shared form value store.
//!
//! [`FormStore`] owns the [`FormValues`] tree, the dirty flag and the
//! per-field subscriber lists. It is cheap to clone; every clone is a handle
//! onto the same state, which is what collaborators receive through
//! `on_form_init`.
//!
//! Writes come in two flavours. User writes mark the form dirty and fire the
//! field's subscribers. Writes made while a [`ProgrammaticGuard`] is alive
//! (dependency results, server echoes) do neither. Every write, whatever its
//! origin, is published on the [`FormStore::changes`] channel so a host can
//! redraw.
//!
//! Subscribers run after the store lock has been released, so a callback may
//! read or write the store again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::value::{FieldValue, FormValues, RowRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    User,
    Programmatic,
}

/// A single write, as published on [`FormStore::changes`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub value: FieldValue,
    pub origin: WriteOrigin,
}

type Callback = Arc<dyn Fn(&FieldValue) + Send + Sync>;

struct Subscription {
    field: String,
    callback: Callback,
}

#[derive(Default)]
struct StoreState {
    values: FormValues,
    dirty: bool,
    guard_depth: usize,
}

#[derive(Clone)]
pub struct FormStore {
    state: Arc<Mutex<StoreState>>,
    subscribers: Arc<Mutex<HashMap<Uuid, Subscription>>>,
    update_tx: broadcast::Sender<FieldChange>,
}

impl FormStore {
    pub fn new(initial: FormValues) -> Self {
        let (update_tx, _) = broadcast::channel(256);
        Self {
            state: Arc::new(Mutex::new(StoreState {
                values: initial,
                dirty: false,
                guard_depth: 0,
            })),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            update_tx,
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subs(&self) -> MutexGuard<'_, HashMap<Uuid, Subscription>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, field: &str) -> Option<FieldValue> {
        self.state().values.get(field).cloned()
    }

    pub fn snapshot(&self) -> FormValues {
        self.state().values.clone()
    }

    /// Run `f` against the current tree without cloning it.
    pub fn with_values<R>(&self, f: impl FnOnce(&FormValues) -> R) -> R {
        f(&self.state().values)
    }

    pub fn rows(&self, table: &str) -> Vec<RowRecord> {
        self.state()
            .values
            .rows(table)
            .map(<[RowRecord]>::to_vec)
            .unwrap_or_default()
    }

    pub fn is_dirty(&self) -> bool {
        self.state().dirty
    }

    pub fn mark_clean(&self) {
        self.state().dirty = false;
    }

    pub fn is_programmatic(&self) -> bool {
        self.state().guard_depth > 0
    }

    /// Engage the programmatic-update guard until the returned value drops.
    pub fn programmatic(&self) -> ProgrammaticGuard {
        self.state().guard_depth += 1;
        ProgrammaticGuard {
            store: self.clone(),
        }
    }

    /// Write a value. Outside a guard this is a user write.
    pub fn set(&self, field: &str, value: FieldValue) {
        self.write(field, move |values| values.set(field.to_string(), value));
    }

    /// Write a value with the guard engaged for just this call.
    pub fn set_programmatic(&self, field: &str, value: FieldValue) {
        let _guard = self.programmatic();
        self.set(field, value);
    }

    /// Replace several values at once under the guard, e.g. a server echo.
    pub fn load(&self, values: FormValues) {
        let _guard = self.programmatic();
        for (field, value) in values.iter() {
            self.set(field, value.clone());
        }
    }

    /// Mutate the rows of a table field in place. Subscribers of the table
    /// field see the resulting row list.
    pub fn update_rows<R>(&self, table: &str, f: impl FnOnce(&mut Vec<RowRecord>) -> R) -> R {
        self.write(table, |values| f(values.rows_mut(table)))
    }

    fn write<R>(&self, field: &str, apply: impl FnOnce(&mut FormValues) -> R) -> R {
        let (result, value, origin) = {
            let mut state = self.state();
            let result = apply(&mut state.values);
            let origin = if state.guard_depth > 0 {
                WriteOrigin::Programmatic
            } else {
                state.dirty = true;
                WriteOrigin::User
            };
            (result, state.values.get(field).cloned().unwrap_or_default(), origin)
        };

        let _ = self.update_tx.send(FieldChange {
            field: field.to_string(),
            value: value.clone(),
            origin,
        });

        if origin == WriteOrigin::User {
            self.notify(field, &value);
        }
        result
    }

    fn notify(&self, field: &str, value: &FieldValue) {
        let callbacks: Vec<Callback> = self
            .subs()
            .values()
            .filter(|sub| sub.field == field)
            .map(|sub| sub.callback.clone())
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }

    /// Call `callback` after every user write to `field`.
    pub fn subscribe<F>(&self, field: &str, callback: F) -> Uuid
    where
        F: Fn(&FieldValue) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.subs().insert(
            id,
            Subscription {
                field: field.to_string(),
                callback: Arc::new(callback),
            },
        );
        id
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.subs().remove(&id);
    }

    /// Every write, user or programmatic.
    pub fn changes(&self) -> broadcast::Receiver<FieldChange> {
        self.update_tx.subscribe()
    }
}

impl Default for FormStore {
    fn default() -> Self {
        Self::new(FormValues::new())
    }
}

/// RAII handle for the programmatic-update guard. Guards nest.
pub struct ProgrammaticGuard {
    store: FormStore,
}

impl Drop for ProgrammaticGuard {
    fn drop(&mut self) {
        let mut state = self.store.state();
        state.guard_depth = state.guard_depth.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_user_write_marks_dirty() {
        let store = FormStore::default();
        assert!(!store.is_dirty());
        store.set("qty", FieldValue::Int(3));
        assert!(store.is_dirty());
        assert_eq!(store.get("qty"), Some(FieldValue::Int(3)));
        store.mark_clean();
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_guarded_write_stays_clean() {
        let store = FormStore::default();
        store.set_programmatic("uom", FieldValue::text("Nos"));
        assert!(!store.is_dirty());

        {
            let _guard = store.programmatic();
            let _nested = store.programmatic();
            store.set("uom", FieldValue::text("Box"));
        }
        assert!(!store.is_dirty());
        assert!(!store.is_programmatic());

        store.set("uom", FieldValue::text("Kg"));
        assert!(store.is_dirty());
    }

    #[test]
    fn test_subscribers_only_fire_for_user_writes() {
        let store = FormStore::default();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let id = store.subscribe("item", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.set("item", FieldValue::text("PIPE"));
        store.set_programmatic("item", FieldValue::text("GATE"));
        store.set("other", FieldValue::text("x"));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        store.unsubscribe(id);
        store.set("item", FieldValue::text("VALVE"));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscriber_may_write_back() {
        let store = FormStore::default();
        let handle = store.clone();
        store.subscribe("item", move |value| {
            handle.set_programmatic("echo", value.clone());
        });
        store.set("item", FieldValue::text("PIPE"));
        assert_eq!(store.get("echo"), Some(FieldValue::text("PIPE")));
    }

    #[test]
    fn test_changes_carry_origin() {
        let store = FormStore::default();
        let mut rx = store.changes();
        store.set("a", FieldValue::Int(1));
        store.set_programmatic("b", FieldValue::Int(2));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.origin, WriteOrigin::User);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.field, "b");
        assert_eq!(second.origin, WriteOrigin::Programmatic);
    }

    #[test]
    fn test_update_rows() {
        let store = FormStore::default();
        let len = store.update_rows("items", |rows| {
            rows.push(RowRecord::new());
            rows.push(RowRecord::new());
            rows.len()
        });
        assert_eq!(len, 2);
        assert_eq!(store.rows("items").len(), 2);
        assert!(store.is_dirty());
    }
}
