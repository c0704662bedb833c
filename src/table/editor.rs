//! Row editor: a local copy of one table row.
//!
//! Edits land in the copy first. Touched columns are written back to the
//! table after a quiet period, and once more when the editor closes. Cells the
//! editor never touched always show the table's current value, so values
//! fetched into the row while it is open stay visible.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::EngineConfig;
use crate::debounce::Debouncer;
use crate::expression::is_visible;
use crate::render::{render_row, LayoutBlock};
use crate::schema::{FieldDescriptor, Scope};
use crate::store::FormStore;
use crate::value::{FieldValue, RowId, RowRecord};

struct Draft {
    row: RowRecord,
    touched: BTreeSet<String>,
}

struct EditorInner {
    table: FieldDescriptor,
    store: FormStore,
    row_id: RowId,
    draft: Mutex<Draft>,
}

impl EditorInner {
    fn draft(&self) -> MutexGuard<'_, Draft> {
        self.draft.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stored_row(&self) -> Option<RowRecord> {
        self.store
            .rows(&self.table.name)
            .into_iter()
            .find(|r| r.id() == self.row_id)
    }

    /// Table row with the touched cells of the copy laid over it.
    fn view(&self) -> Option<RowRecord> {
        let mut row = self.stored_row()?;
        let draft = self.draft();
        for column in &draft.touched {
            if let Some(value) = draft.row.get(column) {
                row.set(column.clone(), value.clone());
            }
        }
        Some(row)
    }

    /// Write the touched cells back as a user edit of the table.
    fn write_back(&self) {
        let updates: Vec<(String, FieldValue)> = {
            let draft = self.draft();
            draft
                .touched
                .iter()
                .filter_map(|c| draft.row.get(c).map(|v| (c.clone(), v.clone())))
                .collect()
        };
        if updates.is_empty() {
            return;
        }

        let unchanged = self.stored_row().is_some_and(|stored| {
            updates
                .iter()
                .all(|(column, value)| stored.get(column) == Some(value))
        });
        if unchanged {
            return;
        }

        let row_id = self.row_id;
        self.store.update_rows(&self.table.name, |rows| {
            match rows.iter_mut().find(|r| r.id() == row_id) {
                Some(row) => {
                    for (column, value) in updates {
                        row.set(column, value);
                    }
                }
                None => log::warn!("Row {} was removed while being edited", row_id),
            }
        });
    }
}

pub struct RowEditor {
    inner: Arc<EditorInner>,
    debouncer: Debouncer,
    grid_columns: usize,
}

impl RowEditor {
    /// Open an editor on the row `row_id` of `table`. `None` if there is no
    /// such row.
    pub fn open(
        table: &FieldDescriptor,
        store: &FormStore,
        row_id: RowId,
        config: &EngineConfig,
    ) -> Option<Self> {
        let row = store
            .rows(&table.name)
            .into_iter()
            .find(|r| r.id() == row_id)?;
        Some(Self {
            inner: Arc::new(EditorInner {
                table: table.clone(),
                store: store.clone(),
                row_id,
                draft: Mutex::new(Draft {
                    row,
                    touched: BTreeSet::new(),
                }),
            }),
            debouncer: Debouncer::new(config.row_writeback_debounce()),
            grid_columns: config.grid_columns,
        })
    }

    pub fn row_id(&self) -> RowId {
        self.inner.row_id
    }

    /// What the editor shows. `None` once the row is gone from the table.
    pub fn row(&self) -> Option<RowRecord> {
        self.inner.view()
    }

    pub fn get(&self, column: &str) -> Option<FieldValue> {
        self.inner.view()?.get(column).cloned()
    }

    /// Edit one cell of the copy and schedule the write-back.
    pub fn set_cell(&self, column: &str, value: FieldValue) {
        {
            let mut draft = self.inner.draft();
            draft.row.set(column, value);
            draft.touched.insert(column.to_string());
        }
        let inner = self.inner.clone();
        self.debouncer.schedule(async move {
            inner.write_back();
        });
    }

    pub fn has_pending_write(&self) -> bool {
        self.debouncer.is_pending()
    }

    /// Write back now.
    pub fn commit(&self) {
        self.debouncer.cancel();
        self.inner.write_back();
    }

    pub fn column_visible(&self, column: &str) -> bool {
        let Some(descriptor) = self.inner.table.column(column) else {
            return false;
        };
        let Some(row) = self.inner.view() else {
            return true;
        };
        self.inner
            .store
            .with_values(|values| is_visible(descriptor, &Scope::row(values, &row)))
    }

    /// The row's columns through rendering dispatch, in the row scope.
    pub fn render(&self) -> Vec<LayoutBlock> {
        let Some(row) = self.inner.view() else {
            return Vec::new();
        };
        self.inner
            .store
            .with_values(|values| render_row(&self.inner.table, values, &row, self.grid_columns))
    }
}

impl Drop for RowEditor {
    fn drop(&mut self) {
        self.commit();
    }
}
