//! Repeating-row (Table field) state.
//!
//! [`TableField`] edits the rows of one Table field inside the shared
//! [`FormStore`]. Every row edit is a user write of the table field, so it
//! marks the form dirty and reaches the table's subscribers, among them the
//! row-scoped `fetchFrom` watcher ([`crate::dependency::RowDependencies`]).

pub mod editor;
pub mod transfer;

pub use editor::RowEditor;
pub use transfer::{export_rows, parse_rows, ImportError};

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::EngineConfig;
use crate::expression::is_visible;
use crate::schema::{FieldDescriptor, FieldType, SchemaError, Scope};
use crate::store::FormStore;
use crate::value::{FieldValue, RowId, RowRecord};

/// Checked row indices of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedRowSet(BTreeSet<usize>);

impl SelectedRowSet {
    pub fn contains(&self, index: usize) -> bool {
        self.0.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.0.iter().copied().collect()
    }

    fn toggle(&mut self, index: usize) {
        if !self.0.remove(&index) {
            self.0.insert(index);
        }
    }

    /// Keep indices pointing at the same rows after `removed` is deleted.
    fn shift_after_removal(&mut self, removed: usize) {
        self.0 = self
            .0
            .iter()
            .filter(|&&i| i != removed)
            .map(|&i| if i > removed { i - 1 } else { i })
            .collect();
    }
}

pub struct TableField {
    field: FieldDescriptor,
    store: FormStore,
    config: EngineConfig,
    selection: Mutex<SelectedRowSet>,
    editor: Mutex<Option<RowEditor>>,
}

impl TableField {
    pub fn new(
        field: &FieldDescriptor,
        store: &FormStore,
        config: &EngineConfig,
    ) -> Result<Self, SchemaError> {
        if field.field_type != FieldType::Table || field.columns.is_none() {
            return Err(SchemaError::MissingColumns(field.name.clone()));
        }
        Ok(Self {
            field: field.clone(),
            store: store.clone(),
            config: config.clone(),
            selection: Mutex::new(SelectedRowSet::default()),
            editor: Mutex::new(None),
        })
    }

    fn selection_mut(&self) -> MutexGuard<'_, SelectedRowSet> {
        self.selection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn editor_slot(&self) -> MutexGuard<'_, Option<RowEditor>> {
        self.editor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn field(&self) -> &FieldDescriptor {
        &self.field
    }

    pub fn columns(&self) -> &[FieldDescriptor] {
        self.field.columns()
    }

    pub fn rows(&self) -> Vec<RowRecord> {
        self.store.rows(&self.field.name)
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a row seeded from the column defaults.
    pub fn add_row(&self) -> RowId {
        let row = RowRecord::seeded(self.columns());
        let id = row.id();
        self.store.update_rows(&self.field.name, |rows| rows.push(row));
        id
    }

    pub fn remove_row(&self, index: usize) -> Option<RowRecord> {
        let removed = self.store.update_rows(&self.field.name, |rows| {
            (index < rows.len()).then(|| rows.remove(index))
        });
        if removed.is_some() {
            self.selection_mut().shift_after_removal(index);
        }
        removed
    }

    /// Set one cell as a user edit. Returns false when the row does not exist.
    pub fn update_cell(&self, index: usize, column: &str, value: FieldValue) -> bool {
        if index >= self.len() {
            return false;
        }
        self.store.update_rows(&self.field.name, |rows| match rows.get_mut(index) {
            Some(row) => {
                row.set(column, value);
                true
            }
            None => false,
        })
    }

    pub fn selection(&self) -> SelectedRowSet {
        self.selection_mut().clone()
    }

    pub fn toggle_row_selected(&self, index: usize) {
        if index < self.len() {
            self.selection_mut().toggle(index);
        }
    }

    pub fn all_selected(&self) -> bool {
        let len = self.len();
        len > 0 && self.selection_mut().len() == len
    }

    /// Select every row, or none when all are already selected.
    pub fn toggle_select_all(&self) {
        let len = self.len();
        let all = self.all_selected();
        let mut selection = self.selection_mut();
        *selection = if all {
            SelectedRowSet::default()
        } else {
            SelectedRowSet((0..len).collect())
        };
    }

    /// Remove the selected rows, highest index first, and clear the selection.
    /// Returns how many rows were removed.
    pub fn delete_selected(&self) -> usize {
        let indices = std::mem::take(&mut *self.selection_mut()).indices();
        if indices.is_empty() {
            return 0;
        }
        self.store.update_rows(&self.field.name, |rows| {
            let mut removed = 0;
            for index in indices.into_iter().rev() {
                if index < rows.len() {
                    rows.remove(index);
                    removed += 1;
                }
            }
            removed
        })
    }

    /// Whether `column` is shown for the row at `index`, evaluating its
    /// condition against the row with `parent.` escaping to the form.
    pub fn column_visible(&self, index: usize, column: &str) -> bool {
        let Some(descriptor) = self.field.column(column) else {
            return false;
        };
        self.store.with_values(|values| {
            match values.rows(&self.field.name).and_then(|rows| rows.get(index)) {
                Some(row) => is_visible(descriptor, &Scope::row(values, row)),
                None => true,
            }
        })
    }

    /// Open the row editor on the row at `index`, committing any editor that
    /// was already open. Returns false when there is no such row.
    pub fn open_row_editor(&self, index: usize) -> bool {
        let Some(row_id) = self.rows().get(index).map(RowRecord::id) else {
            return false;
        };
        let editor = RowEditor::open(&self.field, &self.store, row_id, &self.config);
        let previous = std::mem::replace(&mut *self.editor_slot(), editor);
        // dropping commits
        drop(previous);
        true
    }

    /// Commit and close the row editor.
    pub fn close_row_editor(&self) {
        let editor = self.editor_slot().take();
        drop(editor);
    }

    /// Run `f` against the open row editor.
    pub fn with_editor<R>(&self, f: impl FnOnce(&RowEditor) -> R) -> Option<R> {
        self.editor_slot().as_ref().map(f)
    }

    pub fn export(&self) -> String {
        export_rows(self.columns(), &self.rows())
    }

    /// Replace all rows with the parsed text. On error nothing changes.
    pub fn import(&self, text: &str) -> Result<usize, ImportError> {
        let rows = parse_rows(&self.field, text)?;
        let count = rows.len();
        self.close_row_editor();
        *self.selection_mut() = SelectedRowSet::default();
        self.store.set(&self.field.name, FieldValue::Rows(rows));
        Ok(count)
    }
}
