// ABOUTME: Builds dialect-correct SELECT statements from bounded query specs
// ABOUTME: Identifiers are quoted per dialect, pagination uses LIMIT, TOP or OFFSET/FETCH
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::dialect::{Dialect, TableRef};
use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Projection of a query spec
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ColumnSelection {
    /// `*`, passed through unquoted
    #[default]
    All,
    /// Explicit column names, quoted individually
    Named(Vec<String>),
}

impl ColumnSelection {
    /// Explicit names, or `None` for `*`
    #[must_use]
    pub fn names(&self) -> Option<&[String]> {
        match self {
            Self::All => None,
            Self::Named(names) => Some(names),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawColumns {
    One(String),
    Many(Vec<String>),
}

impl<'de> Deserialize<'de> for ColumnSelection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let names = match RawColumns::deserialize(deserializer)? {
            RawColumns::One(name) => vec![name],
            RawColumns::Many(names) => names,
        };
        if names.is_empty() || names.iter().any(|n| n.trim() == "*") {
            Ok(Self::All)
        } else {
            Ok(Self::Named(names))
        }
    }
}

impl Serialize for ColumnSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => ["*"].serialize(serializer),
            Self::Named(names) => names.serialize(serializer),
        }
    }
}

/// A bounded read request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    /// Table name, optionally `schema.table`
    pub table: String,
    /// Projection
    #[serde(default)]
    pub columns: ColumnSelection,
    /// Raw filter expression (checked by the read-only guard after building)
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,
    /// Raw ordering expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    /// Maximum rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Rows to skip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl QuerySpec {
    /// `SELECT *` from a table
    #[must_use]
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Set the row limit
    #[must_use]
    pub const fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the ordering expression
    #[must_use]
    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    /// Set the filter expression
    #[must_use]
    pub fn with_where(mut self, where_clause: impl Into<String>) -> Self {
        self.where_clause = Some(where_clause.into());
        self
    }

    /// Set an explicit projection
    #[must_use]
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = ColumnSelection::Named(columns.into_iter().map(Into::into).collect());
        self
    }

    fn non_blank(value: Option<&String>) -> Option<&str> {
        value.map(|v| v.trim()).filter(|v| !v.is_empty())
    }
}

/// Render a spec into a single SELECT statement
///
/// # Errors
///
/// Returns an error when the table name is empty or malformed
pub fn build_select(dialect: &dyn Dialect, spec: &QuerySpec) -> AppResult<String> {
    build_page(dialect, spec, spec.limit, spec.offset)
}

/// Render a spec with an explicit limit and offset overriding its own
///
/// # Errors
///
/// Returns an error when the table name is empty or malformed
pub fn build_page(
    dialect: &dyn Dialect,
    spec: &QuerySpec,
    limit: Option<u64>,
    offset: Option<u64>,
) -> AppResult<String> {
    if spec.table.trim().is_empty() {
        return Err(AppError::invalid_input("Query spec requires a table"));
    }
    let table = TableRef::parse(&spec.table)?;
    let pagination = dialect.paginate(limit, offset);

    let projection = match &spec.columns {
        ColumnSelection::All => "*".to_owned(),
        ColumnSelection::Named(names) => names
            .iter()
            .map(|c| dialect.quote_identifier(c.trim()))
            .collect::<Vec<_>>()
            .join(", "),
    };

    let mut sql = String::from("SELECT ");
    if let Some(top) = pagination.top {
        sql.push_str(&format!("TOP {top} "));
    }
    sql.push_str(&projection);
    sql.push_str(" FROM ");
    sql.push_str(&dialect.quote_table(&table));

    if let Some(filter) = QuerySpec::non_blank(spec.where_clause.as_ref()) {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }

    match QuerySpec::non_blank(spec.order_by.as_ref()) {
        Some(order) => {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        None if pagination.requires_order_by => sql.push_str(" ORDER BY (SELECT NULL)"),
        None => {}
    }

    if let Some(suffix) = pagination.suffix {
        sql.push(' ');
        sql.push_str(&suffix);
    }

    Ok(sql)
}
