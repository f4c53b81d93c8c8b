//! Error types for the note store.

use thiserror::Error;

use notewise_reminders::StoreError;

/// Errors that can occur in note store operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A previous holder of the connection panicked.
    #[error("database connection lock poisoned")]
    Poisoned,

    /// The blocking query task did not complete.
    #[error("database task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Row not found.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: i64 },

    /// Stored reminder timestamp cannot be represented.
    #[error("invalid reminder timestamp on note {note_id}: {millis}")]
    InvalidReminder { note_id: i64, millis: i64 },
}

impl DbError {
    /// Whether the failure is about reaching the database rather than the query.
    fn is_unavailable(&self) -> bool {
        match self {
            DbError::Poisoned | DbError::Join(_) => true,
            DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        if err.is_unavailable() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Query(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_database_is_unavailable() {
        let err = DbError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(matches!(StoreError::from(err), StoreError::Unavailable(_)));
    }

    #[test]
    fn test_other_sqlite_errors_are_query_failures() {
        let err = DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(StoreError::from(err), StoreError::Query(_)));
    }

    #[test]
    fn test_poisoned_lock_is_unavailable() {
        assert!(matches!(
            StoreError::from(DbError::Poisoned),
            StoreError::Unavailable(_)
        ));
    }
}
