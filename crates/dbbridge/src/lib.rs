//! # dbbridge
//!
//! Dual-backend database layer: run the same application against an
//! embedded SQLite file or a PostgreSQL server, and move data between
//! the two.
//!
//! The crate provides:
//!
//! - A [`Driver`](driver::Driver) contract that hides placeholder syntax,
//!   DDL differences and pool semantics behind one capability set
//! - Backend drivers for SQLite (single-writer, WAL) and PostgreSQL
//! - Idempotent schema application from dialect-qualified SQL files
//! - A batched, retrying, resumable migration runner with exactly-once
//!   row transfer between two connected drivers
//!
//! ## Example
//!
//! ```rust,no_run
//! use dbbridge::{config::Config, driver, migrate::MigrationRunner};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> dbbridge::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     config.validate()?;
//!     let source = driver::connect(&config.source).await?;
//!     let target = driver::connect(&config.target).await?;
//!     target.init_schema().await?;
//!
//!     let job = config.migration.to_job();
//!     let mut runner = MigrationRunner::new(job);
//!     let report = runner.run(source, target, &CancellationToken::new()).await?;
//!     println!("migrated {} rows", report.total_rows());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod migrate;
pub mod schema;

pub use config::{BackendKind, Config, DbConfig, MigrationSettings, PoolConfig};
pub use driver::{connect, DbTransaction, Driver, Row, SqlValue};
pub use error::{DbError, Result};
pub use migrate::{JobStatus, MigrationJob, MigrationReport, MigrationRunner, TableStatus};
pub use schema::SchemaSource;
