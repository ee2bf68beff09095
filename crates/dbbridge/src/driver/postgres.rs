//! PostgreSQL driver.

use super::{value, DbTransaction, Driver, Row, SqlValue};
use crate::config::DbConfig;
use crate::error::{DbError, Result};
use crate::schema;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::Connection as _;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Driver for the client/server engine.
pub struct PostgresDriver {
    pool: PgPool,
    schema_dir: PathBuf,
}

impl PostgresDriver {
    /// Connect to the server described by `config`, sizing the pool from
    /// the configured limits and applying the maximum connection lifetime.
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
            .ssl_mode(parse_ssl_mode(&config.ssl_mode)?);

        let pool = PgPoolOptions::new()
            .max_connections(config.pool.max_open)
            .min_connections(config.pool.max_idle.min(config.pool.max_open))
            .max_lifetime(Some(Duration::from_secs(config.pool.max_lifetime_secs)))
            .connect_with(options)
            .await
            .map_err(|e| {
                DbError::connection(format!(
                    "failed to connect to postgres at {}:{}/{}: {}",
                    config.host, config.port, config.database, e
                ))
            })?;

        debug!(host = %config.host, database = %config.database, "postgres pool opened");
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
impl Driver for PostgresDriver {
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
            tx = self.pool.begin() => Ok(DbTransaction::Postgres(tx.map_err(|e| {
                DbError::connection(format!("failed to begin transaction: {}", e))
            })?)),
        }
    }

    async fn execute(&self, sql: &str, args: &[SqlValue]) -> Result<u64> {
        self.ensure_open()?;
        let query = value::bind_postgres(sqlx::query(sql), args);
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>> {
        self.ensure_open()?;
        let query = value::bind_postgres(sqlx::query(sql), args);
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(value::from_pg_row).collect()
    }

    async fn query_one(&self, sql: &str, args: &[SqlValue]) -> Result<Row> {
        self.ensure_open()?;
        let query = value::bind_postgres(sqlx::query(sql), args);
        let row = query.fetch_one(&self.pool).await?;
        value::from_pg_row(&row)
    }

    async fn init_schema(&self) -> Result<()> {
        schema::initialize(self, &self.schema_dir).await.map(|_| ())
    }

    fn dialect(&self) -> &'static str {
        "postgres"
    }

    fn transform_query(&self, sql: &str) -> String {
        rewrite_placeholders(sql)
    }
}

fn parse_ssl_mode(mode: &str) -> Result<PgSslMode> {
    match mode {
        "disable" => Ok(PgSslMode::Disable),
        "allow" => Ok(PgSslMode::Allow),
        "prefer" => Ok(PgSslMode::Prefer),
        "require" => Ok(PgSslMode::Require),
        "verify-ca" => Ok(PgSslMode::VerifyCa),
        "verify-full" => Ok(PgSslMode::VerifyFull),
        other => Err(DbError::Config(format!("ssl_mode '{}' is not valid", other))),
    }
}

/// Rewrite portable `?` placeholders into sequential `$1`, `$2`, ...
/// markers, left to right.
///
/// Question marks inside single-quoted strings (including `''` escapes),
/// double-quoted identifiers, `--` line comments and `/* */` block
/// comments are left untouched; splitting on every `?` would corrupt
/// statements containing literal question marks.
pub(crate) fn rewrite_placeholders(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut next_param = 1usize;
    let mut i = 0usize;

    #[derive(PartialEq)]
    enum State {
        Normal,
        Single,
        Double,
        LineComment,
        BlockComment,
    }
    let mut state = State::Normal;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match state {
            State::Normal => match c {
                '?' => {
                    out.push('$');
                    out.push_str(&next_param.to_string());
                    next_param += 1;
                    i += 1;
                    continue;
                }
                '\'' => state = State::Single,
                '"' => state = State::Double,
                '-' if next == Some('-') => {
                    state = State::LineComment;
                    out.push_str("--");
                    i += 2;
                    continue;
                }
                '/' if next == Some('*') => {
                    state = State::BlockComment;
                    out.push_str("/*");
                    i += 2;
                    continue;
                }
                _ => {}
            },
            State::Single => {
                if c == '\'' {
                    if next == Some('\'') {
                        // escaped quote, still inside the literal
                        out.push_str("''");
                        i += 2;
                        continue;
                    }
                    state = State::Normal;
                }
            }
            State::Double => {
                if c == '"' {
                    state = State::Normal;
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if c == '*' && next == Some('/') {
                    out.push_str("*/");
                    state = State::Normal;
                    i += 2;
                    continue;
                }
            }
        }

        out.push(c);
        i += 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_sequential() {
        assert_eq!(
            rewrite_placeholders("SELECT * FROM t WHERE a=? AND b=?"),
            "SELECT * FROM t WHERE a=$1 AND b=$2"
        );
    }

    #[test]
    fn test_rewrite_preserves_literal_question_mark() {
        assert_eq!(
            rewrite_placeholders("SELECT '?' FROM t WHERE a=?"),
            "SELECT '?' FROM t WHERE a=$1"
        );
    }

    #[test]
    fn test_rewrite_escaped_quote_inside_literal() {
        assert_eq!(
            rewrite_placeholders("SELECT 'it''s?' FROM t WHERE a=?"),
            "SELECT 'it''s?' FROM t WHERE a=$1"
        );
    }

    #[test]
    fn test_rewrite_quoted_identifier() {
        assert_eq!(
            rewrite_placeholders("SELECT \"odd?col\" FROM t WHERE a=?"),
            "SELECT \"odd?col\" FROM t WHERE a=$1"
        );
    }

    #[test]
    fn test_rewrite_comments_untouched() {
        assert_eq!(
            rewrite_placeholders("SELECT 1 -- what?\nFROM t WHERE a=?"),
            "SELECT 1 -- what?\nFROM t WHERE a=$1"
        );
        assert_eq!(
            rewrite_placeholders("SELECT 1 /* eh? */ FROM t WHERE a=?"),
            "SELECT 1 /* eh? */ FROM t WHERE a=$1"
        );
    }

    #[test]
    fn test_rewrite_no_placeholders_unchanged() {
        let sql = "SELECT count(*) FROM loans";
        assert_eq!(rewrite_placeholders(sql), sql);
    }

    #[test]
    fn test_rewrite_is_deterministic() {
        let sql = "INSERT INTO t (a, b, c) VALUES (?, ?, ?)";
        assert_eq!(rewrite_placeholders(sql), rewrite_placeholders(sql));
        assert_eq!(
            rewrite_placeholders(sql),
            "INSERT INTO t (a, b, c) VALUES ($1, $2, $3)"
        );
    }

    #[test]
    fn test_parse_ssl_mode() {
        assert!(parse_ssl_mode("require").is_ok());
        assert!(parse_ssl_mode("verify-full").is_ok());
        assert!(parse_ssl_mode("sometimes").is_err());
    }
}
