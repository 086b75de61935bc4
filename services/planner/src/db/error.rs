//! Database error types.

use roster_commit::StoreError;
use thiserror::Error;

/// SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("migration directory not found; tried {tried}. Last error: {last_error}. Run from repo root or services/planner.")]
    MigrationDirNotFound { tried: String, last_error: String },

    /// A write hit the natural-key or primary-key constraint.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    /// Wraps a query error, singling out unique violations.
    pub fn query(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
                return DbError::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                };
            }
        }
        DbError::Query(err)
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        let message = err.to_string();
        match err {
            DbError::Connect(_) | DbError::Migration(_) | DbError::MigrationDirNotFound { .. } => {
                StoreError::Unavailable(message)
            }
            DbError::Query(e) => match e {
                sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::Io(_)
                | sqlx::Error::Tls(_) => StoreError::Unavailable(message),
                sqlx::Error::RowNotFound => StoreError::NotFound(message),
                sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                    StoreError::Serialization(message)
                }
                _ => StoreError::Transaction(message),
            },
            DbError::UniqueViolation { .. } => StoreError::UniqueViolation(message),
            DbError::Serialization(_) => StoreError::Serialization(message),
        }
    }
}
