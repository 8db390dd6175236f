//! Error types for the migration library.
//!
//! Expected partial failures (a row that does not parse, a table that fails to
//! clear) are modelled as data in result types. This enum covers the failures
//! that end an operation, and carries enough context for the HTTP layer to
//! pick a status code.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the migration library.
#[derive(Debug, Error)]
pub enum MigrationError {
    // Job control errors
    #[error("A migration is already in progress: {migration_id}")]
    Conflict { migration_id: String },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("SQL script error: {message}")]
    Sql { message: String },

    #[error("Dependency cycle detected between tables: {}", .tables.join(", "))]
    DependencyCycle { tables: Vec<String> },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("CSV error: {message}")]
    Csv { message: String, row: Option<usize> },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;

impl From<std::io::Error> for MigrationError {
    fn from(err: std::io::Error) -> Self {
        MigrationError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(err: serde_json::Error) -> Self {
        MigrationError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for MigrationError {
    fn from(err: rusqlite::Error) -> Self {
        MigrationError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<csv::Error> for MigrationError {
    fn from(err: csv::Error) -> Self {
        let row = err.position().map(|p| p.line() as usize);
        MigrationError::Csv {
            message: err.to_string(),
            row,
        }
    }
}

impl From<tokio::task::JoinError> for MigrationError {
    fn from(err: tokio::task::JoinError) -> Self {
        MigrationError::Other(format!("Task join error: {}", err))
    }
}

impl MigrationError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            return MigrationError::FileNotFound(path);
        }
        MigrationError::Io {
            message: err.to_string(),
            path: Some(path),
            source: Some(err),
        }
    }

    /// Shorthand for a `NotFound` error.
    pub fn not_found(what: impl Into<String>) -> Self {
        MigrationError::NotFound { what: what.into() }
    }

    /// Shorthand for an `InvalidState` error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        MigrationError::InvalidState {
            message: message.into(),
        }
    }

    /// Convert to an HTTP status code.
    ///
    /// - 400: the request cannot be honoured in the current state or is malformed
    /// - 404: the referenced migration, file or table does not exist
    /// - 409: another migration already owns the active slot
    /// - 504: a bounded operation ran out of time
    /// - 500: everything else
    pub fn status_code(&self) -> u16 {
        match self {
            MigrationError::Conflict { .. } => 409,

            MigrationError::NotFound { .. } | MigrationError::FileNotFound(_) => 404,

            MigrationError::InvalidState { .. }
            | MigrationError::Validation { .. }
            | MigrationError::Config { .. }
            | MigrationError::Csv { .. }
            | MigrationError::Sql { .. }
            | MigrationError::DependencyCycle { .. } => 400,

            MigrationError::Timeout { .. } => 504,

            _ => 500,
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrationError::Timeout { .. } => true,
            MigrationError::Database {
                source: Some(rusqlite::Error::SqliteFailure(e, _)),
                ..
            } => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            MigrationError::Io { source: Some(e), .. } => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Whether this error represents a cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MigrationError::Cancelled)
    }

    /// Render the error with its `source()` chain, one cause per line.
    pub fn chain_details(&self) -> String {
        let mut details = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            details.push_str("\n  caused by: ");
            details.push_str(&cause.to_string());
            source = cause.source();
        }
        details
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrationError::Conflict {
            migration_id: "abc".into(),
        };
        assert_eq!(err.to_string(), "A migration is already in progress: abc");

        let err = MigrationError::Csv {
            message: "bad field".into(),
            row: Some(3),
        };
        assert_eq!(err.to_string(), "CSV error: bad field");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            MigrationError::Conflict {
                migration_id: "x".into()
            }
            .status_code(),
            409
        );
        assert_eq!(MigrationError::not_found("Migration").status_code(), 404);
        assert_eq!(
            MigrationError::invalid_state("No migration is currently running").status_code(),
            400
        );
        assert_eq!(MigrationError::Other("boom".into()).status_code(), 500);
    }

    #[test]
    fn test_io_not_found_becomes_file_not_found() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let mapped = MigrationError::io_with_path(err, "/tmp/none.json");
        assert!(matches!(mapped, MigrationError::FileNotFound(_)));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(MigrationError::Timeout {
            operation: "batch".into(),
            after: Duration::from_secs(5)
        }
        .is_retryable());
        assert!(!MigrationError::not_found("Migration").is_retryable());
    }

    #[test]
    fn test_cycle_display_lists_tables() {
        let err = MigrationError::DependencyCycle {
            tables: vec!["A".into(), "B".into()],
        };
        assert!(err.to_string().contains("A, B"));
    }
}
