//! Error types for the SQLite backend.

use oxide_query_core::QueryError;

/// Errors raised while setting up or using a SQLite executor.
#[derive(Debug, thiserror::Error)]
pub enum SqliteError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Translation, materialization or change tracking failed.
    #[error("Query error: {0}")]
    Query(#[from] QueryError),
}

/// Result type for SQLite operations.
pub type Result<T> = std::result::Result<T, SqliteError>;

/// Reports a driver failure through the engine's error type.
pub(crate) fn execution(err: sqlx::Error) -> QueryError {
    QueryError::Execution(err.to_string())
}
