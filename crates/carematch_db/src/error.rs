use carematch_common::CareMatchError;
use thiserror::Error;

/// Failures raised by [`crate::DbClient`] and the SQL repositories.
#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),

    #[error("invalid database configuration: {0}")]
    ConfigError(String),

    #[error("invalid database URL: {0}")]
    UrlError(String),

    #[error("connection pool unavailable: {0}")]
    PoolError(String),

    #[error("query failed: {0}")]
    QueryError(String),

    #[error("transaction failed: {0}")]
    TransactionError(String),

    /// A stored value could not be turned back into a domain type.
    #[error("column {column} holds an unreadable value: {message}")]
    DecodeError { column: String, message: String },

    #[error("{0} not found")]
    NotFound(String),
}

impl From<DbError> for CareMatchError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::ConfigError(msg) | DbError::UrlError(msg) => CareMatchError::Config(msg),
            DbError::NotFound(what) => CareMatchError::NotFound(what),
            other => CareMatchError::Database(other.to_string()),
        }
    }
}
