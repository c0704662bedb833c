use thiserror::Error;

use crate::config::ConfigError;
use crate::expression::ExpressionError;
use crate::remote::ResolverError;
use crate::schema::{FieldType, SchemaError};
use crate::table::ImportError;

#[derive(Error, Debug)]
pub enum FormError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Field {field} is {actual}, expected {expected}")]
    WrongFieldType {
        field: String,
        expected: FieldType,
        actual: FieldType,
    },

    #[error("No record resolver attached")]
    NoResolver,
}
