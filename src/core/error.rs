/// Userstore Error Module
///
/// This module defines the error type shared by the handler abstraction,
/// the SQLite driver and the user repository.
use thiserror::Error;

/// Boxed driver error. Kept opaque so any handler implementation can report
/// its own failures without the repository knowing the concrete client.
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for every userstore operation.
///
/// Driver errors pass through untouched; the repository never inspects or
/// reclassifies them. The remaining variants are raised by the repository,
/// the cursor abstractions, or configuration loading.
///
/// # Rollback suppression
///
/// When a transactional write fails and the follow-up rollback fails too,
/// only the first error is returned. The rollback error is logged at `warn`
/// level and otherwise dropped, so callers always see the failure that
/// caused the rollback.
#[derive(Error, Debug)]
pub enum RepoError {
    /// Failure reported by the underlying database client
    #[error("{0}")]
    Driver(#[source] DriverError),

    /// `find_user_by_id` matched no row
    #[error("user {0} not found")]
    NotFound(u64),

    /// A transactional insert touched a row count other than one
    #[error("unexpected rows affected: expected 1, got {0}")]
    UnexpectedRowsAffected(i64),

    /// A single-row query produced no row to scan
    #[error("query returned no rows")]
    NoRows,

    /// A scanned column was missing or could not be converted
    #[error("column {index}: {reason}")]
    Column { index: usize, reason: String },

    /// The driver handed back an identifier that does not fit a user id
    #[error("invalid generated id: {0}")]
    InvalidId(i64),

    /// Commit, rollback or execute on a transaction that already ended
    #[error("transaction already finished")]
    TransactionFinished,

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RepoError {
    /// Wraps an arbitrary message as a driver error.
    ///
    /// Test doubles use this to stand in for client failures; the message
    /// is displayed verbatim.
    pub fn driver(message: impl Into<String>) -> Self {
        let message: String = message.into();
        RepoError::Driver(message.into())
    }

    /// Returns true if this error came from the database client.
    pub fn is_driver(&self) -> bool {
        matches!(self, RepoError::Driver(_))
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(err: rusqlite::Error) -> Self {
        RepoError::Driver(Box::new(err))
    }
}

/// Type alias for Result to use RepoError as the error type.
pub type Result<T> = std::result::Result<T, RepoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display_is_verbatim() {
        let err = RepoError::driver("error execute");
        assert_eq!(err.to_string(), "error execute");
        assert!(err.is_driver());
    }

    #[test]
    fn test_rusqlite_error_conversion() {
        let err: RepoError = rusqlite::Error::ExecuteReturnedResults.into();
        assert!(err.is_driver());
        assert_eq!(
            err.to_string(),
            rusqlite::Error::ExecuteReturnedResults.to_string()
        );
    }

    #[test]
    fn test_error_display() {
        assert_eq!(RepoError::NotFound(999).to_string(), "user 999 not found");
        assert!(RepoError::UnexpectedRowsAffected(0)
            .to_string()
            .contains("got 0"));

        let config_err = RepoError::Config("Invalid config".to_string());
        assert!(config_err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RepoError = io_err.into();
        match err {
            RepoError::Io(_) => {}
            _ => panic!("Expected IO error"),
        }
    }
}
