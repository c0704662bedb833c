//! One-shot hand-off of initial values between forms.

use std::sync::{Arc, Mutex, PoisonError};

use crate::value::{FieldValue, FormValues};

/// Keys the backend owns; never copied into a duplicate.
pub const SYSTEM_FIELDS: [&str; 10] = [
    "name",
    "creation",
    "modified",
    "modified_by",
    "owner",
    "docstatus",
    "idx",
    "parent",
    "parentfield",
    "parenttype",
];

/// Values a new form starts from, merged over its defaults exactly once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormSeed {
    values: FormValues,
}

impl FormSeed {
    pub fn new(values: FormValues) -> Self {
        Self { values }
    }

    /// A copy of `values` with system keys removed, at the top level and in
    /// every table row. Rows get fresh identities.
    pub fn duplicate_of(values: &FormValues) -> Self {
        let mut copy = FormValues::new();
        for (name, value) in values.iter() {
            if SYSTEM_FIELDS.contains(&name.as_str()) {
                continue;
            }
            let value = match value {
                FieldValue::Rows(rows) => FieldValue::Rows(
                    rows.iter()
                        .map(|row| {
                            let mut row = row.with_fresh_id();
                            for key in SYSTEM_FIELDS {
                                row.remove(key);
                            }
                            row
                        })
                        .collect(),
                ),
                FieldValue::Entries(entries) => FieldValue::Entries(
                    entries
                        .iter()
                        .map(|entry| {
                            let mut entry = entry.clone();
                            for key in SYSTEM_FIELDS {
                                entry.remove(key);
                            }
                            entry
                        })
                        .collect(),
                ),
                other => other.clone(),
            };
            copy.set(name.clone(), value);
        }
        Self { values: copy }
    }

    pub fn values(&self) -> &FormValues {
        &self.values
    }

    pub fn into_values(self) -> FormValues {
        self.values
    }
}

/// Shared slot a host parks a seed in while it navigates to the new form.
/// The first [`SeedSlot::take`] empties it.
#[derive(Clone, Default)]
pub struct SeedSlot {
    seed: Arc<Mutex<Option<FormSeed>>>,
}

impl SeedSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, seed: FormSeed) {
        *self.seed.lock().unwrap_or_else(PoisonError::into_inner) = Some(seed);
    }

    pub fn take(&self) -> Option<FormSeed> {
        self.seed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_empty(&self) -> bool {
        self.seed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
