use thiserror::Error;

use crate::types::{DataType, Value};

/// Errors surfaced by the SQLite utility layer.
///
/// Nothing is recovered inside the engine; every failure reaches the caller.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// Table/column creation or introspection failed.
    #[error("schema error on {table}.{field}: {source}")]
    Schema {
        table: String,
        field: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("table {0} has not been registered")]
    TableNotRegistered(String),

    #[error("field {field} has not been registered on table {table}")]
    FieldNotRegistered { table: String, field: String },

    /// A value could not be parsed into the declared type.
    #[error("cannot coerce {value:?} to {data_type}")]
    Coercion { value: Value, data_type: DataType },

    #[error("invalid statement: {0}")]
    InvalidStatement(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Driver(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, SqliteError>;
