//! Migration result reporting and resume-state persistence.

use crate::error::{DbError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

/// Terminal (and transient) job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    PartiallyCompleted,
}

/// Per-table state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Pending,
    Copying,
    Completed,
    Failed,
}

/// Outcome for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableReport {
    pub status: TableStatus,

    /// Rows committed to the target during this run.
    pub rows_copied: i64,

    /// Offset of the last committed batch. A resumed job starts the table
    /// here, so no row is ever copied twice.
    pub committed_offset: i64,

    /// Error message if the table failed.
    pub error: Option<String>,
}

impl TableReport {
    pub(crate) fn pending(committed_offset: i64) -> Self {
        Self {
            status: TableStatus::Pending,
            rows_copied: 0,
            committed_offset,
            error: None,
        }
    }
}

/// Result of a migration run, also serving as the resume state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,

    pub status: JobStatus,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Per-table outcomes keyed by table name.
    pub tables: HashMap<String, TableReport>,
}

impl MigrationReport {
    pub(crate) fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            tables: HashMap::new(),
        }
    }

    /// Committed offsets per table, the input for a resumed job.
    pub fn cursors(&self) -> HashMap<String, i64> {
        self.tables
            .iter()
            .map(|(name, t)| (name.clone(), t.committed_offset))
            .collect()
    }

    /// Total rows committed across all tables in this run.
    pub fn total_rows(&self) -> i64 {
        self.tables.values().map(|t| t.rows_copied).sum()
    }

    /// The failure behind a non-`Completed` status, as a typed error.
    pub fn to_error(&self) -> Option<DbError> {
        if self.status == JobStatus::Completed {
            return None;
        }
        self.tables
            .iter()
            .find(|(_, t)| t.status == TableStatus::Failed)
            .map(|(name, t)| {
                DbError::migration(
                    name.clone(),
                    t.committed_offset,
                    t.error.clone().unwrap_or_else(|| "unknown failure".into()),
                )
            })
            .or(Some(DbError::Cancelled))
    }

    /// Load a report from a JSON state file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save the report to a JSON state file (atomic write: temp file,
    /// then rename).
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }
}
