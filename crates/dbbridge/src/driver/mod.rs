//! Backend drivers and the capability contract they implement.
//!
//! - [`sqlite`]: embedded single-file engine (WAL, single writer)
//! - [`postgres`]: client/server engine
//!
//! The backend set is closed, so [`connect`] dispatches on
//! [`BackendKind`](crate::config::BackendKind) directly; there is no
//! dynamic driver registry.

pub mod postgres;
pub mod sqlite;
mod value;

pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;
pub use value::{Row, SqlValue};

use crate::config::{BackendKind, DbConfig};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Capability set every backend implements.
///
/// A handle owns exactly one connection pool. It is unusable before a
/// successful [`connect`] and permanently unusable after [`close`]:
/// subsequent calls fail with a connection error.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Close the connection pool. Idempotent: a second call is a no-op.
    async fn close(&self) -> Result<()>;

    /// Check the connection. Fails with a connection error once the
    /// handle is closed.
    async fn ping(&self) -> Result<()>;

    /// Begin a transaction. The returned handle is exclusively owned by
    /// the caller until commit or rollback.
    async fn begin(&self, cancel: &CancellationToken) -> Result<DbTransaction>;

    /// Execute a statement, returning the affected row count.
    async fn execute(&self, sql: &str, args: &[SqlValue]) -> Result<u64>;

    /// Execute a query returning all matching rows.
    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>>;

    /// Execute a query expected to return exactly one row.
    async fn query_one(&self, sql: &str, args: &[SqlValue]) -> Result<Row>;

    /// Apply this backend's schema source (idempotent).
    async fn init_schema(&self) -> Result<()>;

    /// Canonical lowercase dialect name.
    fn dialect(&self) -> &'static str;

    /// Rewrite portable `?` placeholders into this backend's native
    /// placeholder syntax. Pure and deterministic; a statement with no
    /// portable placeholders comes back unchanged.
    fn transform_query(&self, sql: &str) -> String;
}

/// A live transaction on one backend. Commit and rollback consume the
/// handle; dropping it without committing rolls back.
pub enum DbTransaction {
    Sqlite(sqlx::Transaction<'static, sqlx::Sqlite>),
    Postgres(sqlx::Transaction<'static, sqlx::Postgres>),
}

impl DbTransaction {
    /// Execute a statement inside the transaction.
    pub async fn execute(&mut self, sql: &str, args: &[SqlValue]) -> Result<u64> {
        match self {
            DbTransaction::Sqlite(tx) => {
                let query = value::bind_sqlite(sqlx::query(sql), args);
                let result = query.execute(&mut **tx).await?;
                Ok(result.rows_affected())
            }
            DbTransaction::Postgres(tx) => {
                let query = value::bind_postgres(sqlx::query(sql), args);
                let result = query.execute(&mut **tx).await?;
                Ok(result.rows_affected())
            }
        }
    }

    /// Commit the transaction.
    pub async fn commit(self) -> Result<()> {
        match self {
            DbTransaction::Sqlite(tx) => tx.commit().await?,
            DbTransaction::Postgres(tx) => tx.commit().await?,
        }
        Ok(())
    }

    /// Roll the transaction back.
    pub async fn rollback(self) -> Result<()> {
        match self {
            DbTransaction::Sqlite(tx) => tx.rollback().await?,
            DbTransaction::Postgres(tx) => tx.rollback().await?,
        }
        Ok(())
    }
}

/// Build and connect the driver described by `config`.
///
/// A failed connect never yields a handle, so a half-initialized pool
/// cannot leak to callers.
pub async fn connect(config: &DbConfig) -> Result<Arc<dyn Driver>> {
    match config.backend {
        BackendKind::Sqlite => Ok(Arc::new(SqliteDriver::connect(config).await?)),
        BackendKind::Postgres => Ok(Arc::new(PostgresDriver::connect(config).await?)),
    }
}

/// Quote an identifier for inclusion in dynamic SQL. Double-quote syntax
/// is shared by both backends; embedded quotes are doubled.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("members"), "\"members\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }
}
