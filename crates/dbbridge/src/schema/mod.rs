//! Idempotent schema application.
//!
//! A schema source is an ordered sequence of SQL statements tied to a
//! dialect. Selection is dialect-specific file first
//! (`schema.<dialect>.sql`), generic `schema.sql` fallback second.
//! Statement ordering is the schema author's responsibility; no
//! dependency analysis happens here.

use crate::driver::Driver;
use crate::error::{DbError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// An ordered sequence of schema statements for one dialect.
#[derive(Debug, Clone)]
pub struct SchemaSource {
    pub dialect: String,
    pub path: PathBuf,
    pub statements: Vec<String>,
}

impl SchemaSource {
    /// Select and load the schema source for `dialect` from `dir`.
    pub fn locate(dir: &Path, dialect: &str) -> Result<Self> {
        let qualified = dir.join(format!("schema.{}.sql", dialect));
        let fallback = dir.join("schema.sql");

        let path = if qualified.is_file() {
            qualified
        } else if fallback.is_file() {
            fallback
        } else {
            return Err(DbError::SchemaNotFound {
                dialect: dialect.to_string(),
                dir: dir.to_path_buf(),
            });
        };

        let sql = std::fs::read_to_string(&path)?;
        Ok(Self {
            dialect: dialect.to_string(),
            statements: split_statements(&sql),
            path,
        })
    }
}

/// Locate the schema source for the driver's dialect and apply it.
/// Returns the number of statements that actually executed (skipped
/// "already exists" statements are not counted).
pub async fn initialize(driver: &dyn Driver, dir: &Path) -> Result<usize> {
    let source = SchemaSource::locate(dir, driver.dialect())?;
    apply(driver, &source).await
}

/// Apply a schema source through a driver, in source order.
///
/// Each statement passes through the driver's `transform_query` before
/// execution. An "object already exists" failure is swallowed, which is
/// what makes repeated application safe: nothing is persisted here, the
/// engine itself rejects duplicate creation non-fatally. Any other
/// failure aborts with the statement's 0-based index and text.
pub async fn apply(driver: &dyn Driver, source: &SchemaSource) -> Result<usize> {
    info!(
        dialect = %source.dialect,
        path = %source.path.display(),
        statements = source.statements.len(),
        "applying schema"
    );

    let mut applied = 0usize;
    for (index, statement) in source.statements.iter().enumerate() {
        let sql = driver.transform_query(statement);
        match driver.execute(&sql, &[]).await {
            Ok(_) => applied += 1,
            Err(err) if is_already_exists(&err) => {
                debug!(index, "schema object already exists, skipping");
            }
            Err(err) => {
                return Err(DbError::Schema {
                    index,
                    statement: statement.clone(),
                    message: err.to_string(),
                });
            }
        }
    }

    Ok(applied)
}

/// Split a schema file into individual statements on `;`, respecting
/// single-quoted strings (with `''` escapes), double-quoted identifiers,
/// `--` line comments and `/* */` block comments. Blank and comment-only
/// statements are discarded.
pub fn split_statements(sql: &str) -> Vec<String> {
    #[derive(PartialEq)]
    enum State {
        Normal,
        Single,
        Double,
        LineComment,
        BlockComment,
    }

    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_content = false;
    let mut state = State::Normal;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match state {
            State::Normal => match c {
                ';' => {
                    if has_content {
                        statements.push(current.trim().to_string());
                    }
                    current.clear();
                    has_content = false;
                    i += 1;
                    continue;
                }
                '\'' => {
                    state = State::Single;
                    has_content = true;
                }
                '"' => {
                    state = State::Double;
                    has_content = true;
                }
                '-' if next == Some('-') => {
                    state = State::LineComment;
                    current.push_str("--");
                    i += 2;
                    continue;
                }
                '/' if next == Some('*') => {
                    state = State::BlockComment;
                    current.push_str("/*");
                    i += 2;
                    continue;
                }
                _ => {
                    if !c.is_whitespace() {
                        has_content = true;
                    }
                }
            },
            State::Single => {
                if c == '\'' {
                    if next == Some('\'') {
                        current.push_str("''");
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
                    current.push_str("*/");
                    state = State::Normal;
                    i += 2;
                    continue;
                }
            }
        }

        current.push(c);
        i += 1;
    }

    if has_content {
        statements.push(current.trim().to_string());
    }

    statements
}

/// Classify "object already exists" failures across both engines.
fn is_already_exists(err: &DbError) -> bool {
    let DbError::Query(sqlx::Error::Database(db)) = err else {
        return false;
    };
    // postgres duplicate_table / duplicate_object / duplicate_column /
    // duplicate_schema / duplicate_function
    if let Some(code) = db.code() {
        if matches!(
            code.as_ref(),
            "42P07" | "42710" | "42701" | "42P06" | "42723"
        ) {
            return true;
        }
    }
    // sqlite reports these only through the message text
    db.message().contains("already exists")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_simple() {
        let sql = "CREATE TABLE a (id INTEGER);\nCREATE TABLE b (id INTEGER);";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "CREATE TABLE a (id INTEGER)");
        assert_eq!(stmts[1], "CREATE TABLE b (id INTEGER)");
    }

    #[test]
    fn test_split_semicolon_inside_literal() {
        let sql = "INSERT INTO t VALUES ('a;b');INSERT INTO t VALUES ('c')";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "INSERT INTO t VALUES ('a;b')");
    }

    #[test]
    fn test_split_escaped_quote_in_literal() {
        let sql = "INSERT INTO t VALUES ('it''s; fine');SELECT 1";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "INSERT INTO t VALUES ('it''s; fine')");
    }

    #[test]
    fn test_split_semicolon_inside_comments() {
        let sql = "-- setup; not a statement\nCREATE TABLE a (id INTEGER); /* x; y */ SELECT 1";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("CREATE TABLE a"));
        assert!(stmts[1].ends_with("SELECT 1"));
    }

    #[test]
    fn test_split_drops_blank_and_comment_only() {
        let sql = ";;\n  ;\n-- just a comment\n;\nCREATE TABLE a (id INTEGER);";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].starts_with("CREATE TABLE a"));
    }

    #[test]
    fn test_split_trailing_statement_without_terminator() {
        let stmts = split_statements("CREATE TABLE a (id INTEGER)");
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn test_locate_prefers_dialect_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("schema.sql"), "SELECT 'generic';").unwrap();
        std::fs::write(dir.path().join("schema.sqlite.sql"), "SELECT 'sqlite';").unwrap();

        let source = SchemaSource::locate(dir.path(), "sqlite").unwrap();
        assert!(source.path.ends_with("schema.sqlite.sql"));

        // no postgres-qualified file, falls back to the generic one
        let source = SchemaSource::locate(dir.path(), "postgres").unwrap();
        assert!(source.path.ends_with("schema.sql"));
    }

    #[test]
    fn test_locate_missing_is_schema_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = SchemaSource::locate(dir.path(), "sqlite").unwrap_err();
        assert!(matches!(err, DbError::SchemaNotFound { .. }));
    }
}
