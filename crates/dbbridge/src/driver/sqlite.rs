//! Embedded SQLite driver.

use super::{value, DbTransaction, Driver, Row, SqlValue};
use crate::config::DbConfig;
use crate::error::{DbError, Result};
use crate::schema;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Connection as _;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Driver for the embedded single-file engine.
pub struct SqliteDriver {
    pool: SqlitePool,
    schema_dir: PathBuf,
}

impl SqliteDriver {
    /// Open (creating if needed) the database file named in `config`.
    ///
    /// The parent directory is created if absent. The pool is opened in
    /// WAL journal mode with foreign-key enforcement on, and is hard-capped
    /// at one connection regardless of the configured maximum: SQLite
    /// supports a single concurrent writer, and a larger pool would only
    /// trade pool-acquire waits for busy-handler waits.
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    DbError::connection(format!(
                        "failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .max_lifetime(Some(Duration::from_secs(config.pool.max_lifetime_secs)))
            .connect_with(options)
            .await
            .map_err(|e| {
                DbError::connection(format!(
                    "failed to open sqlite database {}: {}",
                    config.path.display(),
                    e
                ))
            })?;

        debug!(path = %config.path.display(), "sqlite pool opened");
        Ok(Self {
            pool,
            schema_dir: config.schema_dir.clone(),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.pool.is_closed() {
            return Err(DbError::connection("connection pool is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_open()?;
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DbError::connection(format!("ping failed: {}", e)))?;
        conn.ping()
            .await
            .map_err(|e| DbError::connection(format!("ping failed: {}", e)))
    }

    async fn begin(&self, cancel: &CancellationToken) -> Result<DbTransaction> {
        self.ensure_open()?;
        tokio::select! {
            _ = cancel.cancelled() => Err(DbError::Cancelled),
            tx = self.pool.begin() => Ok(DbTransaction::Sqlite(tx.map_err(|e| {
                DbError::connection(format!("failed to begin transaction: {}", e))
            })?)),
        }
    }

    async fn execute(&self, sql: &str, args: &[SqlValue]) -> Result<u64> {
        self.ensure_open()?;
        let query = value::bind_sqlite(sqlx::query(sql), args);
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>> {
        self.ensure_open()?;
        let query = value::bind_sqlite(sqlx::query(sql), args);
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(value::from_sqlite_row).collect()
    }

    async fn query_one(&self, sql: &str, args: &[SqlValue]) -> Result<Row> {
        self.ensure_open()?;
        let query = value::bind_sqlite(sqlx::query(sql), args);
        let row = query.fetch_one(&self.pool).await?;
        value::from_sqlite_row(&row)
    }

    async fn init_schema(&self) -> Result<()> {
        schema::initialize(self, &self.schema_dir).await.map(|_| ())
    }

    fn dialect(&self) -> &'static str {
        "sqlite"
    }

    /// Identity: portable `?` placeholders are already native.
    fn transform_query(&self, sql: &str) -> String {
        sql.to_string()
    }
}
