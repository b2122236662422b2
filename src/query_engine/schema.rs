// ABOUTME: Schema discovery types and grouping of catalog rows into tables with columns
// ABOUTME: Catalog rows arrive ordered by table then ordinal position
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::rows::JsonRow;
use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One column of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Engine type name
    pub data_type: String,
    /// Whether NULL is allowed
    pub nullable: bool,
    /// Part of the primary key
    pub primary_key: bool,
}

/// A base table and its columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Table name, schema-qualified outside the default schema
    pub name: String,
    /// Columns in ordinal order
    pub columns: Vec<ColumnInfo>,
}

fn text_field(row: &JsonRow, field: &str) -> AppResult<String> {
    match row.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(AppError::execution(format!(
            "Catalog row is missing the '{field}' column"
        ))),
    }
}

fn flag_field(row: &JsonRow, field: &str) -> bool {
    match row.get(field) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
        Some(Value::String(s)) => matches!(s.to_ascii_uppercase().as_str(), "1" | "T" | "TRUE" | "YES"),
        _ => false,
    }
}

/// Column entry from one catalog row
///
/// # Errors
///
/// Returns an error if the row lacks the name or type columns
pub fn column_from_row(row: &JsonRow) -> AppResult<ColumnInfo> {
    Ok(ColumnInfo {
        name: text_field(row, "column_name")?,
        data_type: text_field(row, "data_type")?,
        nullable: flag_field(row, "is_nullable"),
        primary_key: flag_field(row, "is_primary_key"),
    })
}

/// Group ordered catalog rows into tables
///
/// # Errors
///
/// Returns an error if a row lacks a required column
pub fn group_columns(rows: &[JsonRow]) -> AppResult<Vec<TableInfo>> {
    let mut tables: Vec<TableInfo> = Vec::new();
    for row in rows {
        let table_name = text_field(row, "table_name")?;
        let column = column_from_row(row)?;
        match tables.last_mut() {
            Some(table) if table.name == table_name => table.columns.push(column),
            _ => tables.push(TableInfo {
                name: table_name,
                columns: vec![column],
            }),
        }
    }
    Ok(tables)
}
