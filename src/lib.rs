// Doctype Forms - metadata-driven forms and child tables over a Doctype REST API

pub mod config;
pub mod debounce;
pub mod dependency;
pub mod error;
pub mod expression;
pub mod form;
pub mod link;
pub mod remote;
pub mod render;
pub mod schema;
pub mod store;
pub mod table;
pub mod validation;
pub mod value;

pub use config::{EngineConfig, ResolverConfig};
pub use error::FormError;
pub use form::{FormOrchestrator, FormSeed, SeedSlot, SubmitError, Submission};
pub use remote::{HttpResolver, InMemoryResolver, RecordResolver};
pub use schema::{FieldDescriptor, FieldType, TabbedLayout};
pub use store::FormStore;
pub use value::{FieldValue, FormValues, PendingUpload, RowRecord};
