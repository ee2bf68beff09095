//! Error types for the database layer.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for driver, schema and migration operations.
#[derive(Error, Debug)]
pub enum DbError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection-level failure: dial, ping, pool setup, or creating the
    /// database directory. Fatal to the driver instance - the handle must
    /// not be reused after one of these.
    #[error("Connection error: {0}")]
    Connection(String),

    /// No schema source found for a dialect (neither the dialect-qualified
    /// file nor the generic fallback exists).
    #[error("No schema source for dialect '{dialect}' under {dir}")]
    SchemaNotFound { dialect: String, dir: PathBuf },

    /// A schema statement failed with something other than "already exists".
    /// Reports the 0-based index of the failing statement and its text.
    #[error("Schema statement {index} failed: {message}\n  Statement: {statement}")]
    Schema {
        index: usize,
        statement: String,
        message: String,
    },

    /// Opaque passthrough of an execution failure from the underlying
    /// engine. This layer does not interpret it.
    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),

    /// A migration batch exhausted its retry budget. Carries the table and
    /// the offset of the last committed batch so the job can be resumed.
    #[error("Migration failed for table '{table}' at committed offset {offset}: {message}")]
    Migration {
        table: String,
        offset: i64,
        message: String,
    },

    /// A single batch attempt exceeded its time budget. Batch-scoped and
    /// retried; only surfaces once the retry budget is exhausted.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Operation was cancelled (SIGINT, external deadline).
    #[error("Operation cancelled")]
    Cancelled,

    /// IO error (file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DbError {
    /// Create a Connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        DbError::Connection(message.into())
    }

    /// Create a Migration error.
    pub fn migration(table: impl Into<String>, offset: i64, message: impl Into<String>) -> Self {
        DbError::Migration {
            table: table.into(),
            offset,
            message: message.into(),
        }
    }

    /// Format error with full details including the error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            DbError::Config(_) | DbError::Yaml(_) => 2,
            DbError::Connection(_) => 3,
            DbError::SchemaNotFound { .. } | DbError::Schema { .. } => 4,
            DbError::Migration { .. } => 5,
            DbError::Cancelled => 130,
            _ => 1,
        }
    }
}

/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_error_names_table_and_offset() {
        let err = DbError::migration("loans", 400, "batch insert failed");
        let text = err.to_string();
        assert!(text.contains("loans"));
        assert!(text.contains("400"));
    }

    #[test]
    fn test_exit_codes_distinguish_classes() {
        assert_eq!(DbError::Config("x".into()).exit_code(), 2);
        assert_eq!(DbError::connection("x").exit_code(), 3);
        assert_eq!(DbError::migration("t", 0, "x").exit_code(), 5);
        assert_eq!(DbError::Cancelled.exit_code(), 130);
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = DbError::Io(io);
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: "));
        assert!(detailed.contains("denied"));
    }
}
