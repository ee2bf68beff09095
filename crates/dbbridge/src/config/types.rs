//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::migrate::MigrationJob;

/// Which backend a [`DbConfig`] describes. The set is closed: dialect
/// polymorphism is two variants behind one trait, no dynamic registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Sqlite,
    Postgres,
}

impl BackendKind {
    /// Canonical lowercase dialect name.
    pub fn dialect(self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::Postgres => "postgres",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dialect())
    }
}

/// Connection pool limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum open connections.
    #[serde(default = "default_max_open")]
    pub max_open: u32,

    /// Connections kept idle in the pool.
    #[serde(default = "default_max_idle")]
    pub max_idle: u32,

    /// Maximum lifetime of a pooled connection, in seconds.
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: default_max_open(),
            max_idle: default_max_idle(),
            max_lifetime_secs: default_max_lifetime_secs(),
        }
    }
}

/// Connection parameters for one backend. Immutable once handed to a
/// driver: drivers keep their own copy and never re-read it.
#[derive(Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Backend kind tag.
    pub backend: BackendKind,

    /// Database file path (sqlite only).
    #[serde(default = "default_sqlite_path")]
    pub path: PathBuf,

    /// Database host (postgres only).
    #[serde(default = "default_host")]
    pub host: String,

    /// Database port (postgres only).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Username (postgres only).
    #[serde(default)]
    pub user: String,

    /// Password (postgres only).
    #[serde(default)]
    pub password: String,

    /// Database name (postgres only).
    #[serde(default)]
    pub database: String,

    /// SSL mode: disable, allow, prefer, require, verify-ca, verify-full
    /// (postgres only, default: prefer).
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,

    /// Pool limits.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Directory holding schema sources (`schema.<dialect>.sql` with a
    /// generic `schema.sql` fallback).
    #[serde(default = "default_schema_dir")]
    pub schema_dir: PathBuf,
}

impl DbConfig {
    /// Config for an embedded SQLite database at `path`.
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Sqlite,
            path: path.into(),
            host: default_host(),
            port: default_pg_port(),
            user: String::new(),
            password: String::new(),
            database: String::new(),
            ssl_mode: default_ssl_mode(),
            pool: PoolConfig::default(),
            schema_dir: default_schema_dir(),
        }
    }

    /// Config for a PostgreSQL server.
    pub fn postgres(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            backend: BackendKind::Postgres,
            path: default_sqlite_path(),
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database: database.into(),
            ssl_mode: default_ssl_mode(),
            pool: PoolConfig::default(),
            schema_dir: default_schema_dir(),
        }
    }
}

// Manual Debug so passwords never land in logs.
impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("backend", &self.backend)
            .field("path", &self.path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .field("pool", &self.pool)
            .field("schema_dir", &self.schema_dir)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    /// Tables to migrate, in foreign-key dependency order (parents first).
    /// Ordering is the caller's responsibility.
    #[serde(default)]
    pub tables: Vec<String>,

    /// Rows per batch (one target transaction per batch).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Timeout per batch attempt, in seconds. Applies to each attempt,
    /// not to the job as a whole.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Attempts per batch before the table is marked failed.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Delay between attempts, in milliseconds (grows linearly per attempt).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Concurrent batch writers. Forced to 1 when the target is a
    /// single-writer engine. Must not exceed the target pool's
    /// `max_open`: every writer holds one connection with an open
    /// transaction while waiting for its commit turn.
    #[serde(default = "default_writers")]
    pub writers: usize,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            tables: Vec::new(),
            batch_size: default_batch_size(),
            timeout_seconds: default_timeout_seconds(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            writers: default_writers(),
        }
    }
}

impl MigrationSettings {
    /// Build a fresh migration job (all cursors at zero).
    pub fn to_job(&self) -> MigrationJob {
        MigrationJob {
            tables: self.tables.clone(),
            batch_size: self.batch_size,
            attempt_timeout: Duration::from_secs(self.timeout_seconds),
            retry_attempts: self.retry_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            writers: self.writers,
            cursors: HashMap::new(),
        }
    }
}

/// Root configuration: source backend, target backend, migration behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: DbConfig,
    pub target: DbConfig,
    #[serde(default)]
    pub migration: MigrationSettings,
}

// Default value functions for serde

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("data/app.db")
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_ssl_mode() -> String {
    "prefer".to_string()
}

fn default_schema_dir() -> PathBuf {
    PathBuf::from("schema")
}

fn default_max_open() -> u32 {
    10
}

fn default_max_idle() -> u32 {
    5
}

fn default_max_lifetime_secs() -> u64 {
    1800
}

fn default_batch_size() -> usize {
    500
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_writers() -> usize {
    1
}
