//! Portable SQL value model.
//!
//! Both backends read into and bind from [`SqlValue`], so the migration
//! runner can move rows between engines without knowing either wire format.

use crate::error::Result;
use sqlx::{Column as _, Row as _, TypeInfo as _, ValueRef as _};

/// A single SQL value in portable form.
///
/// SQLite's storage classes map onto this directly; the richer PostgreSQL
/// types are narrowed to the closest portable class (small integers widen
/// to `Int`, `FLOAT4` widens to `Real`).
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Bool(bool),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Whether this value is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

/// One result row: column names plus values, in select order.
#[derive(Debug, Clone)]
pub struct Row {
    pub columns: Vec<String>,
    pub values: Vec<SqlValue>,
}

impl Row {
    /// Look up a value by column name.
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|idx| &self.values[idx])
    }
}

/// Bind portable values onto a SQLite query.
pub(crate) fn bind_sqlite<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    args: &[SqlValue],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for arg in args {
        query = match arg {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Blob(v) => query.bind(v.clone()),
        };
    }
    query
}

/// Bind portable values onto a PostgreSQL query.
pub(crate) fn bind_postgres<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    args: &[SqlValue],
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    for arg in args {
        query = match arg {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Blob(v) => query.bind(v.clone()),
        };
    }
    query
}

/// Convert a SQLite result row into portable form.
pub(crate) fn from_sqlite_row(row: &sqlx::sqlite::SqliteRow) -> Result<Row> {
    let count = row.columns().len();
    let mut columns = Vec::with_capacity(count);
    let mut values = Vec::with_capacity(count);
    for (idx, col) in row.columns().iter().enumerate() {
        columns.push(col.name().to_string());
        values.push(decode_sqlite(row, idx)?);
    }
    Ok(Row { columns, values })
}

fn decode_sqlite(row: &sqlx::sqlite::SqliteRow, idx: usize) -> Result<SqlValue> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }
    // Use the value's runtime storage class, not the declared column type:
    // SQLite columns hold values of any class.
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "INTEGER" | "INT" | "INT4" | "INT8" | "BIGINT" => {
            SqlValue::Int(row.try_get::<i64, _>(idx)?)
        }
        "BOOLEAN" => SqlValue::Bool(row.try_get::<bool, _>(idx)?),
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => SqlValue::Real(row.try_get::<f64, _>(idx)?),
        "TEXT" | "DATETIME" | "DATE" | "TIME" => SqlValue::Text(row.try_get::<String, _>(idx)?),
        "BLOB" => SqlValue::Blob(row.try_get::<Vec<u8>, _>(idx)?),
        _ => decode_sqlite_fallback(row, idx)?,
    };
    Ok(value)
}

fn decode_sqlite_fallback(row: &sqlx::sqlite::SqliteRow, idx: usize) -> Result<SqlValue> {
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Ok(SqlValue::Int(v));
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return Ok(SqlValue::Real(v));
    }
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return Ok(SqlValue::Text(v));
    }
    let v = row.try_get::<Vec<u8>, _>(idx)?;
    Ok(SqlValue::Blob(v))
}

/// Convert a PostgreSQL result row into portable form.
pub(crate) fn from_pg_row(row: &sqlx::postgres::PgRow) -> Result<Row> {
    let count = row.columns().len();
    let mut columns = Vec::with_capacity(count);
    let mut values = Vec::with_capacity(count);
    for (idx, col) in row.columns().iter().enumerate() {
        columns.push(col.name().to_string());
        values.push(decode_pg(row, idx)?);
    }
    Ok(Row { columns, values })
}

fn decode_pg(row: &sqlx::postgres::PgRow, idx: usize) -> Result<SqlValue> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "INT2" => SqlValue::Int(i64::from(row.try_get::<i16, _>(idx)?)),
        "INT4" => SqlValue::Int(i64::from(row.try_get::<i32, _>(idx)?)),
        "INT8" => SqlValue::Int(row.try_get::<i64, _>(idx)?),
        "FLOAT4" => SqlValue::Real(f64::from(row.try_get::<f32, _>(idx)?)),
        "FLOAT8" => SqlValue::Real(row.try_get::<f64, _>(idx)?),
        "BOOL" => SqlValue::Bool(row.try_get::<bool, _>(idx)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => {
            SqlValue::Text(row.try_get::<String, _>(idx)?)
        }
        "BYTEA" => SqlValue::Blob(row.try_get::<Vec<u8>, _>(idx)?),
        _ => decode_pg_fallback(row, idx)?,
    };
    Ok(value)
}

fn decode_pg_fallback(row: &sqlx::postgres::PgRow, idx: usize) -> Result<SqlValue> {
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Ok(SqlValue::Int(v));
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return Ok(SqlValue::Real(v));
    }
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return Ok(SqlValue::Text(v));
    }
    let v = row.try_get::<Vec<u8>, _>(idx)?;
    Ok(SqlValue::Blob(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_get_by_name() {
        let row = Row {
            columns: vec!["id".into(), "name".into()],
            values: vec![SqlValue::Int(7), SqlValue::Text("ada".into())],
        };
        assert_eq!(row.get("id"), Some(&SqlValue::Int(7)));
        assert_eq!(row.get("name"), Some(&SqlValue::Text("ada".into())));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_is_null() {
        assert!(SqlValue::Null.is_null());
        assert!(!SqlValue::Int(0).is_null());
    }
}
