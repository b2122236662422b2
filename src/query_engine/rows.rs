// ABOUTME: Converts driver rows into JSON objects keyed by column name
// ABOUTME: Text-protocol values are typed by column type name, SQLite values by storage class
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::errors::{AppError, AppResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// One result row
pub type JsonRow = Map<String, Value>;

/// Column names plus rows, in result order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    /// Column names
    pub columns: Vec<String>,
    /// Rows as JSON objects
    pub rows: Vec<JsonRow>,
}

fn decode_error(column: &str, e: &sqlx::Error) -> AppError {
    AppError::execution(format!("Failed to decode column {column}: {e}"))
}

/// Type a text-protocol value by the column's declared type
pub(crate) fn text_to_json(type_name: &str, text: String) -> Value {
    let upper = type_name.to_ascii_uppercase();
    let base = upper.split_whitespace().next().unwrap_or_default();
    match base {
        "INT2" | "INT4" | "INT8" | "SMALLINT" | "INT" | "INTEGER" | "BIGINT" | "TINYINT"
        | "MEDIUMINT" | "YEAR" => text
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| text.parse::<u64>().map(Value::from))
            .unwrap_or(Value::String(text)),
        "FLOAT4" | "FLOAT8" | "REAL" | "FLOAT" | "DOUBLE" => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map_or(Value::String(text), Value::Number),
        "BOOL" | "BOOLEAN" => match text.as_str() {
            "t" | "true" | "1" => Value::Bool(true),
            "f" | "false" | "0" => Value::Bool(false),
            _ => Value::String(text),
        },
        "JSON" | "JSONB" => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        _ => Value::String(text),
    }
}

fn column_names<R: Row>(rows: &[R]) -> Vec<String> {
    rows.first()
        .map(|r| r.columns().iter().map(|c| c.name().to_owned()).collect())
        .unwrap_or_default()
}

fn text_rows<R>(rows: &[R]) -> AppResult<RowSet>
where
    R: Row,
    usize: sqlx::ColumnIndex<R>,
    String: for<'r> sqlx::Decode<'r, R::Database>,
{
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut object = Map::new();
        for (idx, column) in row.columns().iter().enumerate() {
            let name = column.name();
            let is_null = row
                .try_get_raw(idx)
                .map_err(|e| decode_error(name, &e))?
                .is_null();
            let value = if is_null {
                Value::Null
            } else {
                let text = row
                    .try_get_unchecked::<String, _>(idx)
                    .map_err(|e| decode_error(name, &e))?;
                text_to_json(column.type_info().name(), text)
            };
            object.insert(name.to_owned(), value);
        }
        out.push(object);
    }
    Ok(RowSet {
        columns: column_names(rows),
        rows: out,
    })
}

/// Convert `PostgreSQL` rows fetched over the simple (text) protocol
///
/// # Errors
///
/// Returns an execution error if a value cannot be read as text
pub fn pg_rows(rows: &[PgRow]) -> AppResult<RowSet> {
    text_rows(rows)
}

/// Convert `MySQL` rows fetched over the text protocol
///
/// # Errors
///
/// Returns an execution error if a value cannot be read as text
pub fn mysql_rows(rows: &[MySqlRow]) -> AppResult<RowSet> {
    text_rows(rows)
}

fn sqlite_value(row: &SqliteRow, idx: usize, name: &str) -> AppResult<Value> {
    let raw = row.try_get_raw(idx).map_err(|e| decode_error(name, &e))?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage = raw.type_info().name().to_ascii_uppercase();
    let value = match storage.as_str() {
        "INTEGER" => row.try_get_unchecked::<i64, _>(idx).map(Value::from),
        "REAL" => row.try_get_unchecked::<f64, _>(idx).map(|f| {
            Number::from_f64(f).map_or(Value::Null, Value::Number)
        }),
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(idx)
            .map(|b| Value::String(BASE64.encode(b))),
        _ => row.try_get_unchecked::<String, _>(idx).map(Value::String),
    };
    value.map_err(|e| decode_error(name, &e))
}

/// Convert `SQLite` rows using each value's storage class
///
/// # Errors
///
/// Returns an execution error if a value cannot be decoded
pub fn sqlite_rows(rows: &[SqliteRow]) -> AppResult<RowSet> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut object = Map::new();
        for (idx, column) in row.columns().iter().enumerate() {
            object.insert(column.name().to_owned(), sqlite_value(row, idx, column.name())?);
        }
        out.push(object);
    }
    Ok(RowSet {
        columns: column_names(rows),
        rows: out,
    })
}

#[cfg(feature = "mssql")]
pub use mssql::mssql_rows;

#[cfg(feature = "mssql")]
mod mssql {
    use super::{RowSet, BASE64};
    use crate::errors::{AppError, AppResult};
    use base64::Engine as _;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    use serde_json::{Map, Number, Value};
    use tiberius::{ColumnData, FromSql, Row};

    fn temporal<T>(data: &ColumnData<'static>) -> AppResult<Value>
    where
        T: for<'a> FromSql<'a> + ToString,
    {
        T::from_sql(data)
            .map(|v| v.map_or(Value::Null, |v| Value::String(v.to_string())))
            .map_err(|e| AppError::execution(format!("Failed to decode temporal value: {e}")))
    }

    fn cell_value(data: &ColumnData<'static>) -> AppResult<Value> {
        let value = match data {
            ColumnData::U8(v) => v.map_or(Value::Null, Value::from),
            ColumnData::I16(v) => v.map_or(Value::Null, Value::from),
            ColumnData::I32(v) => v.map_or(Value::Null, Value::from),
            ColumnData::I64(v) => v.map_or(Value::Null, Value::from),
            ColumnData::F32(v) => v
                .and_then(|f| Number::from_f64(f64::from(f)))
                .map_or(Value::Null, Value::Number),
            ColumnData::F64(v) => v
                .and_then(Number::from_f64)
                .map_or(Value::Null, Value::Number),
            ColumnData::Bit(v) => v.map_or(Value::Null, Value::Bool),
            ColumnData::String(v) => v
                .as_ref()
                .map_or(Value::Null, |s| Value::String(s.to_string())),
            ColumnData::Guid(v) => v.map_or(Value::Null, |g| Value::String(g.to_string())),
            ColumnData::Binary(v) => v
                .as_ref()
                .map_or(Value::Null, |b| Value::String(BASE64.encode(b))),
            ColumnData::Numeric(v) => v
                .as_ref()
                .map_or(Value::Null, |n| Value::String(n.to_string())),
            ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
                temporal::<NaiveDateTime>(data)?
            }
            ColumnData::Date(_) => temporal::<NaiveDate>(data)?,
            ColumnData::Time(_) => temporal::<NaiveTime>(data)?,
            ColumnData::DateTimeOffset(_) => temporal::<DateTime<Utc>>(data)?,
            other => Value::String(format!("{other:?}")),
        };
        Ok(value)
    }

    /// Convert SQL Server rows
    ///
    /// # Errors
    ///
    /// Returns an execution error if a temporal value cannot be decoded
    pub fn mssql_rows(rows: Vec<Row>) -> AppResult<RowSet> {
        let columns: Vec<String> = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_owned()).collect())
            .unwrap_or_default();

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let names: Vec<String> = row.columns().iter().map(|c| c.name().to_owned()).collect();
            let mut object = Map::new();
            for (name, data) in names.into_iter().zip(row.into_iter()) {
                object.insert(name, cell_value(&data)?);
            }
            out.push(object);
        }
        Ok(RowSet { columns, rows: out })
    }
}
