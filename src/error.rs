use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by a [`StorageAdapter`](crate::storage::StorageAdapter).
///
/// A missing row is never an error: reads return `Option`, updates and
/// deletes return `bool`.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend unreachable, pool exhausted or a round trip timed out.
    /// Callers may retry; adapters never do.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Adapter is not connected; call connect() first")]
    NotConnected,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate {field}: {value}")]
    Duplicate { field: &'static str, value: String },

    /// A stored value falls outside its closed domain.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[source] sqlx::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl StorageError {
    pub fn validation(msg: impl Into<String>) -> Self {
        StorageError::Validation(msg.into())
    }

    /// True for the connection class of failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Connection(_))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(code, msg) => match code.code {
                ErrorCode::CannotOpen
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase => StorageError::Connection(
                    msg.clone().unwrap_or_else(|| code.to_string()),
                ),
                ErrorCode::ConstraintViolation
                    if code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
                {
                    StorageError::Validation("referenced application does not exist".to_string())
                }
                ErrorCode::ConstraintViolation
                    if code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_CHECK =>
                {
                    StorageError::Validation(
                        msg.clone().unwrap_or_else(|| "check constraint failed".to_string()),
                    )
                }
                _ => StorageError::Sqlite(err),
            },
            rusqlite::Error::FromSqlConversionFailure(_, _, cause) => {
                StorageError::Corrupt(cause.to_string())
            }
            _ => StorageError::Sqlite(err),
        }
    }
}

/// SQLSTATE codes the networked adapter classifies.
const PG_FOREIGN_KEY_VIOLATION: &str = "23503";
const PG_CHECK_VIOLATION: &str = "23514";
const PG_QUERY_CANCELED: &str = "57014";
const PG_ADMIN_SHUTDOWN: &str = "57P01";

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => {
                StorageError::Connection("timed out acquiring a pooled connection".to_string())
            }
            sqlx::Error::PoolClosed => StorageError::Connection("connection pool is closed".to_string()),
            sqlx::Error::Io(e) => StorageError::Connection(e.to_string()),
            sqlx::Error::Tls(e) => StorageError::Connection(e.to_string()),
            sqlx::Error::WorkerCrashed => {
                StorageError::Connection("connection worker crashed".to_string())
            }
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some(PG_FOREIGN_KEY_VIOLATION) => {
                    StorageError::Validation("referenced application does not exist".to_string())
                }
                Some(PG_CHECK_VIOLATION) => StorageError::Validation(db.message().to_string()),
                Some(PG_QUERY_CANCELED) => {
                    StorageError::Connection(format!("statement timed out: {}", db.message()))
                }
                Some(PG_ADMIN_SHUTDOWN) => StorageError::Connection(db.message().to_string()),
                _ => StorageError::Postgres(err),
            },
            sqlx::Error::ColumnDecode { source, .. } => StorageError::Corrupt(source.to_string()),
            _ => StorageError::Postgres(err),
        }
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Task(err.to_string())
    }
}

/// Errors raised while reading storage configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown storage kind '{0}'. Available: embedded (sqlite), networked (postgres)")]
    UnknownStorageKind(String),

    #[error("Networked storage requires {0} to be set")]
    MissingConnectionString(&'static str),

    #[error("Invalid connection string in {var}: {reason}")]
    InvalidConnectionString { var: &'static str, reason: String },

    #[error("Invalid value for {var}: '{value}'")]
    InvalidSetting { var: &'static str, value: String },

    #[error("Could not determine a data directory; set {0}")]
    NoDataDir(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_retryable() {
        let err: StorageError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_retryable());
        assert!(matches!(err, StorageError::Connection(_)));
    }

    #[test]
    fn test_not_found_rows_are_not_connection_errors() {
        let err: StorageError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_validation_helper() {
        let err = StorageError::validation("company_name must not be blank");
        assert_eq!(
            err.to_string(),
            "Validation error: company_name must not be blank"
        );
    }
}
