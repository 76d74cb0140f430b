//! Errors of the SQL and catalog layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SqlError>;

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("invalid values")]
    InvalidValues,

    #[error("invalid field type: {0}")]
    InvalidField(String),

    #[error("invalid logic operator: {0}")]
    InvalidLogOp(String),

    #[error("field not found: {0}")]
    FieldNotFound(String),

    #[error("field not indexed: {0}")]
    FieldNotIndexed(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableDuplicated(String),

    #[error("table has no index")]
    TableNoIndex,

    #[error("nested transactions are not supported")]
    NestedTransaction,

    #[error("no transaction in progress")]
    NoTransaction,

    #[error(transparent)]
    Engine(#[from] shaledb_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
