// ABOUTME: Per-engine SQL dialect capabilities: quoting, pagination, parser grammar, catalog queries
// ABOUTME: One Dialect trait with four implementations drives a single generic query engine
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sqlparser::dialect::{
    Dialect as ParserDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
};
use std::fmt;
use std::str::FromStr;

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    /// `PostgreSQL`
    #[serde(alias = "postgres")]
    Postgresql,
    /// `MySQL` / `MariaDB`
    #[serde(alias = "mariadb")]
    Mysql,
    /// Microsoft SQL Server
    #[serde(alias = "sqlserver")]
    Mssql,
    /// `SQLite` file
    Sqlite,
}

impl DatabaseEngine {
    /// Every engine the agent knows how to talk to
    pub const ALL: [Self; 4] = [Self::Postgresql, Self::Mysql, Self::Mssql, Self::Sqlite];

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Postgresql => "postgresql",
            Self::Mysql => "mysql",
            Self::Mssql => "mssql",
            Self::Sqlite => "sqlite",
        }
    }

    /// Conventional server port, `None` for file databases
    #[must_use]
    pub const fn default_port(self) -> Option<u16> {
        match self {
            Self::Postgresql => Some(5432),
            Self::Mysql => Some(3306),
            Self::Mssql => Some(1433),
            Self::Sqlite => None,
        }
    }

    /// Whether this build carries a driver for the engine
    #[must_use]
    pub const fn driver_available(self) -> bool {
        match self {
            Self::Mssql => cfg!(feature = "mssql"),
            Self::Postgresql | Self::Mysql | Self::Sqlite => true,
        }
    }

    /// Engines with a driver in this build, as reported in heartbeats
    #[must_use]
    pub fn supported() -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|engine| engine.driver_available())
            .collect()
    }

    /// Dialect implementation for this engine
    #[must_use]
    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            Self::Postgresql => &Postgres,
            Self::Mysql => &MySql,
            Self::Mssql => &MsSql,
            Self::Sqlite => &Sqlite,
        }
    }
}

impl fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseEngine {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(Self::Postgresql),
            "mysql" | "mariadb" => Ok(Self::Mysql),
            "mssql" | "sqlserver" => Ok(Self::Mssql),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(AppError::invalid_input(format!(
                "Unsupported database engine: {other}"
            ))),
        }
    }
}

/// Dialect specific pagination pieces
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pagination {
    /// `TOP n` placed right after `SELECT`
    pub top: Option<u64>,
    /// Clause appended after `ORDER BY`
    pub suffix: Option<String>,
    /// The suffix is only valid with an `ORDER BY`
    pub requires_order_by: bool,
}

/// A possibly schema-qualified table name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Schema or database qualifier
    pub schema: Option<String>,
    /// Bare table name
    pub name: String,
}

impl TableRef {
    /// Split `schema.table`; a name without a dot has no schema
    ///
    /// # Errors
    ///
    /// Returns an error for empty names or more than two parts
    pub fn parse(raw: &str) -> AppResult<Self> {
        let parts: Vec<&str> = raw.trim().split('.').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self {
                schema: None,
                name: (*name).to_owned(),
            }),
            [schema, name] if !schema.is_empty() && !name.is_empty() => Ok(Self {
                schema: Some((*schema).to_owned()),
                name: (*name).to_owned(),
            }),
            _ => Err(AppError::invalid_input(format!("Invalid table name: {raw}"))),
        }
    }
}

/// Escape a value for use inside a single-quoted SQL literal
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Engine capabilities used by the builder, the guard and schema discovery
///
/// Catalog queries return the columns `table_name`, `column_name`,
/// `data_type`, `is_nullable` (`YES`/`NO`) and `is_primary_key` (0/1),
/// ordered by table then ordinal position.
pub trait Dialect: Send + Sync {
    /// Engine this dialect belongs to
    fn engine(&self) -> DatabaseEngine;

    /// Opening and closing identifier quote characters
    fn identifier_quotes(&self) -> (char, char);

    /// Quote one identifier part, doubling embedded closing quotes
    fn quote_identifier(&self, ident: &str) -> String {
        let (open, close) = self.identifier_quotes();
        let escaped = ident.replace(close, &format!("{close}{close}"));
        format!("{open}{escaped}{close}")
    }

    /// Quote a possibly schema-qualified table reference
    fn quote_table(&self, table: &TableRef) -> String {
        match &table.schema {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(&table.name)
            ),
            None => self.quote_identifier(&table.name),
        }
    }

    /// Pagination pieces for a limit and offset
    fn paginate(&self, limit: Option<u64>, offset: Option<u64>) -> Pagination;

    /// Grammar used by the structural read-only check
    fn parser_dialect(&self) -> Box<dyn ParserDialect>;

    /// Statement issued once per new connection to make the session read-only
    fn session_read_only_statement(&self) -> Option<&'static str>;

    /// Statement opening the read-only transaction each read runs in
    ///
    /// Session settings can be changed by a function call inside a SELECT;
    /// a per-statement transaction that is always rolled back cannot.
    fn read_only_transaction_statement(&self) -> Option<&'static str> {
        None
    }

    /// Query listing databases as a `name` column
    fn databases_query(&self) -> String;

    /// Query listing base tables of the current database as `table_name`
    fn tables_query(&self) -> String;

    /// Column catalog query, optionally restricted to one table
    fn columns_query(&self, table: Option<&TableRef>) -> String;
}

/// `PostgreSQL` dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

/// `MySQL` dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

/// SQL Server dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct MsSql;

/// `SQLite` dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

fn limit_offset(limit: Option<u64>, offset: Option<u64>, unbounded: &str) -> Pagination {
    let suffix = match (limit, offset) {
        (None, None) => None,
        (Some(l), None) => Some(format!("LIMIT {l}")),
        (Some(l), Some(o)) => Some(format!("LIMIT {l} OFFSET {o}")),
        (None, Some(o)) => Some(format!("LIMIT {unbounded} OFFSET {o}")),
    };
    Pagination {
        top: None,
        suffix,
        requires_order_by: false,
    }
}

const PG_QUALIFIED_TABLE: &str = "CASE WHEN c.table_schema = 'public' THEN c.table_name ELSE c.table_schema || '.' || c.table_name END";

impl Dialect for Postgres {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Postgresql
    }

    fn identifier_quotes(&self) -> (char, char) {
        ('"', '"')
    }

    fn paginate(&self, limit: Option<u64>, offset: Option<u64>) -> Pagination {
        match (limit, offset) {
            (None, Some(o)) => Pagination {
                top: None,
                suffix: Some(format!("OFFSET {o}")),
                requires_order_by: false,
            },
            _ => limit_offset(limit, offset, "ALL"),
        }
    }

    fn parser_dialect(&self) -> Box<dyn ParserDialect> {
        Box::new(PostgreSqlDialect {})
    }

    fn session_read_only_statement(&self) -> Option<&'static str> {
        Some("SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY")
    }

    fn read_only_transaction_statement(&self) -> Option<&'static str> {
        Some("BEGIN READ ONLY")
    }

    fn databases_query(&self) -> String {
        "SELECT datname AS name FROM pg_database WHERE datistemplate = false ORDER BY datname"
            .to_owned()
    }

    fn tables_query(&self) -> String {
        format!(
            "SELECT {PG_QUALIFIED_TABLE} AS table_name FROM information_schema.tables c \
             WHERE c.table_type = 'BASE TABLE' \
             AND c.table_schema NOT IN ('pg_catalog', 'information_schema') \
             ORDER BY c.table_schema, c.table_name"
        )
    }

    fn columns_query(&self, table: Option<&TableRef>) -> String {
        let filter = table.map_or_else(
            || "c.table_schema NOT IN ('pg_catalog', 'information_schema')".to_owned(),
            |t| {
                format!(
                    "c.table_schema = {} AND c.table_name = {}",
                    quote_literal(t.schema.as_deref().unwrap_or("public")),
                    quote_literal(&t.name)
                )
            },
        );
        format!(
            "SELECT {PG_QUALIFIED_TABLE} AS table_name, c.column_name, c.data_type, c.is_nullable, \
             CASE WHEN EXISTS (SELECT 1 FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
             ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
             AND tc.table_name = kcu.table_name \
             WHERE tc.constraint_type = 'PRIMARY KEY' AND kcu.table_schema = c.table_schema \
             AND kcu.table_name = c.table_name AND kcu.column_name = c.column_name) \
             THEN 1 ELSE 0 END AS is_primary_key \
             FROM information_schema.columns c \
             JOIN information_schema.tables t ON t.table_schema = c.table_schema \
             AND t.table_name = c.table_name AND t.table_type = 'BASE TABLE' \
             WHERE {filter} \
             ORDER BY c.table_schema, c.table_name, c.ordinal_position"
        )
    }
}

impl Dialect for MySql {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Mysql
    }

    fn identifier_quotes(&self) -> (char, char) {
        ('`', '`')
    }

    fn paginate(&self, limit: Option<u64>, offset: Option<u64>) -> Pagination {
        limit_offset(limit, offset, "18446744073709551615")
    }

    fn parser_dialect(&self) -> Box<dyn ParserDialect> {
        Box::new(MySqlDialect {})
    }

    fn session_read_only_statement(&self) -> Option<&'static str> {
        Some("SET SESSION TRANSACTION READ ONLY")
    }

    fn read_only_transaction_statement(&self) -> Option<&'static str> {
        Some("START TRANSACTION READ ONLY")
    }

    fn databases_query(&self) -> String {
        "SELECT SCHEMA_NAME AS name FROM information_schema.SCHEMATA \
         WHERE SCHEMA_NAME NOT IN ('information_schema', 'mysql', 'performance_schema', 'sys') \
         ORDER BY SCHEMA_NAME"
            .to_owned()
    }

    fn tables_query(&self) -> String {
        "SELECT TABLE_NAME AS table_name FROM information_schema.TABLES \
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' \
         ORDER BY TABLE_NAME"
            .to_owned()
    }

    fn columns_query(&self, table: Option<&TableRef>) -> String {
        let filter = match table {
            Some(TableRef {
                schema: Some(schema),
                name,
            }) => format!(
                "c.TABLE_SCHEMA = {} AND c.TABLE_NAME = {}",
                quote_literal(schema),
                quote_literal(name)
            ),
            Some(TableRef { schema: None, name }) => format!(
                "c.TABLE_SCHEMA = DATABASE() AND c.TABLE_NAME = {}",
                quote_literal(name)
            ),
            None => "c.TABLE_SCHEMA = DATABASE()".to_owned(),
        };
        format!(
            "SELECT c.TABLE_NAME AS table_name, c.COLUMN_NAME AS column_name, \
             c.DATA_TYPE AS data_type, c.IS_NULLABLE AS is_nullable, \
             CASE WHEN c.COLUMN_KEY = 'PRI' THEN 1 ELSE 0 END AS is_primary_key \
             FROM information_schema.COLUMNS c \
             JOIN information_schema.TABLES t ON t.TABLE_SCHEMA = c.TABLE_SCHEMA \
             AND t.TABLE_NAME = c.TABLE_NAME AND t.TABLE_TYPE = 'BASE TABLE' \
             WHERE {filter} \
             ORDER BY c.TABLE_NAME, c.ORDINAL_POSITION"
        )
    }
}

const MSSQL_QUALIFIED_TABLE: &str = "CASE WHEN c.TABLE_SCHEMA = 'dbo' THEN c.TABLE_NAME ELSE c.TABLE_SCHEMA + '.' + c.TABLE_NAME END";

impl Dialect for MsSql {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Mssql
    }

    fn identifier_quotes(&self) -> (char, char) {
        ('[', ']')
    }

    fn paginate(&self, limit: Option<u64>, offset: Option<u64>) -> Pagination {
        match (limit, offset) {
            (None, None) => Pagination::default(),
            (Some(l), None) => Pagination {
                top: Some(l),
                suffix: None,
                requires_order_by: false,
            },
            (Some(l), Some(o)) => Pagination {
                top: None,
                suffix: Some(format!("OFFSET {o} ROWS FETCH NEXT {l} ROWS ONLY")),
                requires_order_by: true,
            },
            (None, Some(o)) => Pagination {
                top: None,
                suffix: Some(format!("OFFSET {o} ROWS")),
                requires_order_by: true,
            },
        }
    }

    fn parser_dialect(&self) -> Box<dyn ParserDialect> {
        Box::new(MsSqlDialect {})
    }

    fn session_read_only_statement(&self) -> Option<&'static str> {
        // Enforced through ApplicationIntent=ReadOnly on the connection
        None
    }

    fn databases_query(&self) -> String {
        "SELECT name FROM sys.databases WHERE database_id > 4 ORDER BY name".to_owned()
    }

    fn tables_query(&self) -> String {
        format!(
            "SELECT {MSSQL_QUALIFIED_TABLE} AS table_name FROM INFORMATION_SCHEMA.TABLES c \
             WHERE c.TABLE_TYPE = 'BASE TABLE' ORDER BY c.TABLE_SCHEMA, c.TABLE_NAME"
        )
    }

    fn columns_query(&self, table: Option<&TableRef>) -> String {
        let filter = table.map_or_else(
            || "1 = 1".to_owned(),
            |t| {
                format!(
                    "c.TABLE_SCHEMA = {} AND c.TABLE_NAME = {}",
                    quote_literal(t.schema.as_deref().unwrap_or("dbo")),
                    quote_literal(&t.name)
                )
            },
        );
        format!(
            "SELECT {MSSQL_QUALIFIED_TABLE} AS table_name, c.COLUMN_NAME AS column_name, \
             c.DATA_TYPE AS data_type, c.IS_NULLABLE AS is_nullable, \
             CASE WHEN EXISTS (SELECT 1 FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
             JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE k \
             ON tc.CONSTRAINT_NAME = k.CONSTRAINT_NAME AND tc.TABLE_SCHEMA = k.TABLE_SCHEMA \
             WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY' AND k.TABLE_SCHEMA = c.TABLE_SCHEMA \
             AND k.TABLE_NAME = c.TABLE_NAME AND k.COLUMN_NAME = c.COLUMN_NAME) \
             THEN 1 ELSE 0 END AS is_primary_key \
             FROM INFORMATION_SCHEMA.COLUMNS c \
             JOIN INFORMATION_SCHEMA.TABLES t ON t.TABLE_SCHEMA = c.TABLE_SCHEMA \
             AND t.TABLE_NAME = c.TABLE_NAME AND t.TABLE_TYPE = 'BASE TABLE' \
             WHERE {filter} \
             ORDER BY c.TABLE_SCHEMA, c.TABLE_NAME, c.ORDINAL_POSITION"
        )
    }
}

impl Dialect for Sqlite {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Sqlite
    }

    fn identifier_quotes(&self) -> (char, char) {
        ('"', '"')
    }

    fn paginate(&self, limit: Option<u64>, offset: Option<u64>) -> Pagination {
        limit_offset(limit, offset, "-1")
    }

    fn parser_dialect(&self) -> Box<dyn ParserDialect> {
        Box::new(SQLiteDialect {})
    }

    fn session_read_only_statement(&self) -> Option<&'static str> {
        Some("PRAGMA query_only = ON")
    }

    fn databases_query(&self) -> String {
        "SELECT name FROM pragma_database_list ORDER BY seq".to_owned()
    }

    fn tables_query(&self) -> String {
        "SELECT name AS table_name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
            .to_owned()
    }

    fn columns_query(&self, table: Option<&TableRef>) -> String {
        let filter = table.map_or_else(String::new, |t| {
            format!(" AND m.name = {}", quote_literal(&t.name))
        });
        format!(
            "SELECT m.name AS table_name, p.name AS column_name, p.type AS data_type, \
             CASE WHEN p.\"notnull\" = 0 THEN 'YES' ELSE 'NO' END AS is_nullable, \
             CASE WHEN p.pk > 0 THEN 1 ELSE 0 END AS is_primary_key \
             FROM sqlite_master AS m, pragma_table_info(m.name) AS p \
             WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%'{filter} \
             ORDER BY m.name, p.cid"
        )
    }
}
