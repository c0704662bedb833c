//! The form orchestrator.
//!
//! [`FormOrchestrator`] ties the pieces together for one form instance: it
//! flattens the tabs, checks the schema, builds the initial value tree
//! (defaults, then an optional fetched document, then an optional one-shot
//! seed), owns the [`FormStore`], and hands out the field controllers that
//! need more than a plain value (link pickers, multi-selects, tables).
//!
//! Record lookups are optional. Without a resolver the form still renders,
//! validates and submits; `fetchFrom` dependents simply stay as they are.

mod keys;
mod seed;

pub use keys::{shortcut, FocusTarget, FormAction, KeyChord};
pub use seed::{FormSeed, SeedSlot, SYSTEM_FIELDS};

use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::EngineConfig;
use crate::dependency::{FormDependencies, RowDependencies};
use crate::error::FormError;
use crate::expression;
use crate::link::{LinkField, MultiSelectField};
use crate::remote::RecordResolver;
use crate::render::{self, LayoutBlock};
use crate::schema::{check_fields, flatten_tabs, FieldDescriptor, FieldType, Scope, TabbedLayout};
use crate::store::FormStore;
use crate::table::TableField;
use crate::validation::{ValidationErrors, Validator};
use crate::value::{FormValues, PendingUpload, RowId};

/// What a successful validation hands to the submit callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub payload: Map<String, Value>,
    /// Picked files the payload only names; upload these before saving.
    pub uploads: Vec<PendingUpload>,
    pub dirty: bool,
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Submit rejected: {0}")]
    Rejected(anyhow::Error),
}

pub struct FormOrchestrator {
    tabs: Vec<TabbedLayout>,
    fields: Vec<FieldDescriptor>,
    store: FormStore,
    validator: Validator,
    config: EngineConfig,
    resolver: Option<Arc<dyn RecordResolver>>,
    dependencies: Option<FormDependencies>,
    row_dependencies: Vec<RowDependencies>,
}

impl FormOrchestrator {
    /// A new-record form: defaults, then `seed` if one was handed over.
    pub fn new(
        tabs: Vec<TabbedLayout>,
        seed: Option<FormSeed>,
        config: EngineConfig,
    ) -> Result<Self, FormError> {
        Self::build(tabs, None, seed, config)
    }

    /// A form over an existing document.
    pub fn with_document(
        tabs: Vec<TabbedLayout>,
        document: &Map<String, Value>,
        seed: Option<FormSeed>,
        config: EngineConfig,
    ) -> Result<Self, FormError> {
        Self::build(tabs, Some(document), seed, config)
    }

    fn build(
        tabs: Vec<TabbedLayout>,
        document: Option<&Map<String, Value>>,
        seed: Option<FormSeed>,
        config: EngineConfig,
    ) -> Result<Self, FormError> {
        let fields = flatten_tabs(&tabs);
        check_fields(&fields, None)?;
        let validator = Validator::new(&fields)?;

        let mut values = FormValues::seeded(&fields);
        if let Some(document) = document {
            values.merge_json(&fields, document);
        }
        if let Some(seed) = seed {
            log::debug!("Merging seed over initial values");
            for (name, value) in seed.into_values().iter() {
                values.set(name.clone(), value.clone());
            }
        }

        Ok(Self {
            tabs,
            fields,
            store: FormStore::new(values),
            validator,
            config,
            resolver: None,
            dependencies: None,
            row_dependencies: Vec::new(),
        })
    }

    /// The shared store handle collaborators read, write and subscribe through.
    pub fn handle(&self) -> FormStore {
        self.store.clone()
    }

    /// Give a collaborator the store handle once the form is built.
    pub fn on_form_init(&self, init: impl FnOnce(FormStore)) {
        init(self.handle());
    }

    pub fn tabs(&self) -> &[TabbedLayout] {
        &self.tabs
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn values(&self) -> FormValues {
        self.store.snapshot()
    }

    pub fn is_dirty(&self) -> bool {
        self.store.is_dirty()
    }

    /// Start watching `fetchFrom` sources at form level and in every table.
    /// Replaces any previously attached resolver.
    pub fn attach_resolver(&mut self, resolver: Arc<dyn RecordResolver>) {
        self.dependencies = Some(FormDependencies::attach(
            &self.store,
            resolver.clone(),
            &self.fields,
            &self.config,
        ));
        self.row_dependencies = self
            .fields
            .iter()
            .filter(|f| f.field_type == FieldType::Table)
            .map(|table| RowDependencies::attach(&self.store, resolver.clone(), table, &self.config))
            .filter(|deps| !deps.graph().is_empty())
            .collect();
        self.resolver = Some(resolver);
    }

    /// Resolve every dependent once, as on mount.
    pub async fn prime_dependencies(&self) {
        if let Some(dependencies) = &self.dependencies {
            dependencies.prime().await;
        }
        for rows in &self.row_dependencies {
            rows.prime().await;
        }
    }

    fn field(&self, name: &str) -> Result<&FieldDescriptor, FormError> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| FormError::UnknownField(name.to_string()))
    }

    fn field_of_type(&self, name: &str, expected: FieldType) -> Result<&FieldDescriptor, FormError> {
        let field = self.field(name)?;
        if field.field_type != expected {
            return Err(FormError::WrongFieldType {
                field: name.to_string(),
                expected,
                actual: field.field_type,
            });
        }
        Ok(field)
    }

    fn resolver(&self) -> Result<Arc<dyn RecordResolver>, FormError> {
        self.resolver.clone().ok_or(FormError::NoResolver)
    }

    pub fn link_field(&self, name: &str) -> Result<LinkField, FormError> {
        let field = self.field_of_type(name, FieldType::Link)?;
        Ok(LinkField::new(field, &self.store, self.resolver()?, &self.config)?)
    }

    /// A link picker bound to one cell of a table row.
    pub fn row_link_field(&self, table: &str, row: RowId, column: &str) -> Result<LinkField, FormError> {
        let table_field = self.field_of_type(table, FieldType::Table)?;
        let column = table_field
            .column(column)
            .ok_or_else(|| FormError::UnknownField(format!("{}.{}", table, column)))?;
        if column.field_type != FieldType::Link {
            return Err(FormError::WrongFieldType {
                field: column.name.clone(),
                expected: FieldType::Link,
                actual: column.field_type,
            });
        }
        Ok(LinkField::in_row(column, table, row, &self.store, self.resolver()?, &self.config)?)
    }

    pub fn multi_select_field(&self, name: &str) -> Result<MultiSelectField, FormError> {
        let field = self.field_of_type(name, FieldType::TableMultiSelect)?;
        Ok(MultiSelectField::new(field, &self.store, self.resolver()?, &self.config)?)
    }

    pub fn table_field(&self, name: &str) -> Result<TableField, FormError> {
        let field = self.field_of_type(name, FieldType::Table)?;
        Ok(TableField::new(field, &self.store, &self.config)?)
    }

    pub fn validate(&self) -> ValidationErrors {
        self.store.with_values(|values| self.validator.validate(values))
    }

    /// Validate, then hand the payload, the pending uploads and the dirty
    /// flag to `callback`. The form is marked clean only when the callback
    /// succeeds.
    pub async fn submit<F, Fut>(&self, callback: F) -> Result<(), SubmitError>
    where
        F: FnOnce(Submission) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let values = self.store.snapshot();
        let errors = self.validator.validate(&values);
        if !errors.is_empty() {
            log::debug!("Submit blocked by {} validation error(s)", errors.len());
            return Err(SubmitError::Validation(errors));
        }

        let submission = Submission {
            payload: values.to_payload(),
            uploads: values.pending_uploads(),
            dirty: self.store.is_dirty(),
        };
        if !submission.uploads.is_empty() {
            log::debug!("Submitting with {} pending upload(s)", submission.uploads.len());
        }
        if let Err(e) = callback(submission).await {
            log::warn!("Submit callback failed: {}", e);
            return Err(SubmitError::Rejected(e));
        }
        self.store.mark_clean();
        Ok(())
    }

    /// A seed for a new record carrying this form's values minus the
    /// backend-owned keys.
    pub fn duplicate(&self) -> FormSeed {
        self.store.with_values(FormSeed::duplicate_of)
    }

    /// Overlay a server echo without dirtying the form or firing watchers.
    pub fn apply_document(&self, document: &Map<String, Value>) {
        let mut values = FormValues::new();
        values.merge_json(&self.fields, document);
        self.store.load(values);
    }

    /// Run a Button field's action with the store handle.
    pub fn press_button(&self, name: &str) -> Result<(), FormError> {
        let field = self.field_of_type(name, FieldType::Button)?;
        match &field.action {
            Some(action) => action.invoke(&self.store),
            None => log::debug!("Button {} has no action", name),
        }
        Ok(())
    }

    pub fn handle_key(&self, chord: KeyChord, focus: FocusTarget) -> Option<FormAction> {
        shortcut(chord, focus)
    }

    /// Whether `name` is currently shown. Unknown fields are not.
    pub fn is_visible(&self, name: &str) -> bool {
        let Ok(field) = self.field(name) else {
            return false;
        };
        self.store
            .with_values(|values| expression::is_visible(field, &Scope::form(values)))
    }

    pub fn render_tab(&self, index: usize) -> Option<Vec<LayoutBlock>> {
        let tab = self.tabs.get(index)?;
        Some(
            self.store
                .with_values(|values| render::render_tab(tab, values, self.config.grid_columns)),
        )
    }
}
