// ABOUTME: Multi-dialect read-only query engine: bounded reads, previews, streaming and schema discovery
// ABOUTME: All SQL, built or catalog, passes the read-only guard before reaching a pooled connection
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Query engine
//!
//! One generic algorithm over the [`Dialect`] trait serves `PostgreSQL`,
//! `MySQL`, `SQLite` and SQL Server. The engine never runs a statement
//! without [`guard::ensure_read_only`] accepting it first, and every pool
//! it opens switches its sessions to read-only.

/// SELECT construction from query specs
pub mod builder;
/// Dialect capabilities
pub mod dialect;
/// Read-only enforcement
pub mod guard;
/// Pool registry
pub mod pool;
/// Row conversion
pub mod rows;
/// Schema discovery types
pub mod schema;

pub use builder::{build_page, build_select, ColumnSelection, QuerySpec};
pub use dialect::{DatabaseEngine, Dialect, TableRef};
pub use pool::{DatabaseConfig, DatabasePool, PoolKey, PoolRegistry};
pub use rows::{JsonRow, RowSet};
pub use schema::{ColumnInfo, TableInfo};

use crate::constants::query::{PREVIEW_LIMIT, STREAM_BATCH_SIZE};
use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Result of a bounded read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Column names
    pub columns: Vec<String>,
    /// Rows keyed by column name
    pub rows: Vec<JsonRow>,
    /// Number of rows returned
    pub row_count: usize,
    /// Wall time spent in the database
    pub execution_time_ms: u64,
    /// Statement that was executed
    pub sql: String,
}

/// Totals reported at the end of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSummary {
    /// Batches handed to the callback
    pub batches: u64,
    /// Rows handed to the callback
    pub total_rows: u64,
}

/// Operations the command orchestrator needs from a query engine
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run a bounded read
    async fn execute_query(&self, config: &DatabaseConfig, spec: &QuerySpec)
        -> AppResult<QueryResult>;

    /// List databases visible to the login
    async fn get_databases(&self, config: &DatabaseConfig) -> AppResult<Vec<String>>;

    /// List base tables, optionally in another database on the same server
    async fn get_tables(
        &self,
        config: &DatabaseConfig,
        database: Option<&str>,
    ) -> AppResult<Vec<String>>;

    /// Columns of one table
    async fn get_columns(&self, config: &DatabaseConfig, table: &str)
        -> AppResult<Vec<ColumnInfo>>;
}

/// Read-only query engine
#[derive(Debug, Clone, Default)]
pub struct QueryEngine {
    pools: Arc<PoolRegistry>,
    default_row_limit: Option<u64>,
}

impl QueryEngine {
    /// Engine with its own pool registry
    #[must_use]
    pub fn new(default_row_limit: Option<u64>) -> Self {
        Self {
            pools: Arc::new(PoolRegistry::new()),
            default_row_limit,
        }
    }

    /// Pool registry, for lifecycle management
    #[must_use]
    pub fn pools(&self) -> &PoolRegistry {
        &self.pools
    }

    async fn run(&self, config: &DatabaseConfig, sql: &str) -> AppResult<RowSet> {
        let engine = config.require_engine()?;
        guard::ensure_read_only(sql, engine.dialect())?;
        let pool = self.pools.get_or_connect(config).await?;
        pool.fetch(sql).await
    }

    /// Open (or reuse) the pool and run a trivial read
    ///
    /// # Errors
    ///
    /// Returns an execution error if the database cannot be reached
    pub async fn test_connection(&self, config: &DatabaseConfig) -> AppResult<()> {
        self.run(config, "SELECT 1 AS ok").await?;
        info!(engine = ?config.engine, database = %config.database, "Connection test succeeded");
        Ok(())
    }

    fn effective_spec(&self, spec: &QuerySpec) -> QuerySpec {
        let mut spec = spec.clone();
        if spec.limit.is_none() {
            spec.limit = self.default_row_limit;
        }
        spec
    }

    /// Build, check and run a spec
    ///
    /// # Errors
    ///
    /// Returns a security violation if the built statement is not read-only,
    /// or an execution error from the database
    pub async fn execute_query(
        &self,
        config: &DatabaseConfig,
        spec: &QuerySpec,
    ) -> AppResult<QueryResult> {
        let engine = config.require_engine()?;
        let spec = self.effective_spec(spec);
        let sql = build_select(engine.dialect(), &spec)?;

        let started = Instant::now();
        let mut rows = self.run(config, &sql).await?;
        let execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if rows.columns.is_empty() {
            if let Some(names) = spec.columns.names() {
                rows.columns = names.to_vec();
            }
        }
        debug!(table = %spec.table, rows = rows.rows.len(), execution_time_ms, "Query completed");

        Ok(QueryResult {
            columns: rows.columns,
            row_count: rows.rows.len(),
            rows: rows.rows,
            execution_time_ms,
            sql,
        })
    }

    /// First rows of a table
    ///
    /// # Errors
    ///
    /// See [`QueryEngine::execute_query`]
    pub async fn preview_table(
        &self,
        config: &DatabaseConfig,
        table: &str,
    ) -> AppResult<QueryResult> {
        self.execute_query(config, &QuerySpec::table(table).with_limit(PREVIEW_LIMIT))
            .await
    }

    /// Read a spec in fixed-size pages, handing each page to `on_batch`
    ///
    /// Pages are read until a short page arrives or the spec's limit is
    /// reached. SQL Server requires an explicit ORDER BY.
    ///
    /// # Errors
    ///
    /// Returns an error from the database, from `on_batch`, or an invalid
    /// input error for SQL Server specs without ORDER BY
    pub async fn stream_query<F>(
        &self,
        config: &DatabaseConfig,
        spec: &QuerySpec,
        mut on_batch: F,
    ) -> AppResult<StreamSummary>
    where
        F: FnMut(&[JsonRow]) -> AppResult<()> + Send,
    {
        let engine = config.require_engine()?;
        let has_order = spec
            .order_by
            .as_deref()
            .is_some_and(|o| !o.trim().is_empty());
        if engine == DatabaseEngine::Mssql && !has_order {
            return Err(AppError::invalid_input(
                "Streaming from SQL Server requires an explicit orderBy",
            ));
        }

        let mut summary = StreamSummary::default();
        let mut offset = spec.offset.unwrap_or(0);
        let mut remaining = spec.limit;

        loop {
            let page_size = remaining.map_or(STREAM_BATCH_SIZE, |r| r.min(STREAM_BATCH_SIZE));
            if page_size == 0 {
                break;
            }
            let sql = build_page(engine.dialect(), spec, Some(page_size), Some(offset))?;
            let page = self.run(config, &sql).await?;
            let fetched = page.rows.len() as u64;

            if fetched > 0 {
                on_batch(&page.rows)?;
                summary.batches += 1;
                summary.total_rows += fetched;
            }
            if fetched < page_size {
                break;
            }
            offset += fetched;
            remaining = remaining.map(|r| r - fetched);
        }

        info!(table = %spec.table, batches = summary.batches, rows = summary.total_rows, "Stream completed");
        Ok(summary)
    }

    /// Databases visible to the login
    ///
    /// # Errors
    ///
    /// Returns an execution error from the catalog query
    pub async fn get_databases(&self, config: &DatabaseConfig) -> AppResult<Vec<String>> {
        let engine = config.require_engine()?;
        let rows = self.run(config, &engine.dialect().databases_query()).await?;
        Ok(first_text_column(&rows, "name"))
    }

    /// Base tables of the configured database, or of `database` on the same server
    ///
    /// # Errors
    ///
    /// Returns an execution error from the catalog query
    pub async fn get_tables(
        &self,
        config: &DatabaseConfig,
        database: Option<&str>,
    ) -> AppResult<Vec<String>> {
        let target = database.map_or_else(|| config.clone(), |db| config.with_database(db));
        let engine = target.require_engine()?;
        let rows = self.run(&target, &engine.dialect().tables_query()).await?;
        Ok(first_text_column(&rows, "table_name"))
    }

    /// Columns of one table with nullable and primary-key flags
    ///
    /// # Errors
    ///
    /// Returns an error for malformed table names or catalog failures
    pub async fn get_columns(
        &self,
        config: &DatabaseConfig,
        table: &str,
    ) -> AppResult<Vec<ColumnInfo>> {
        let engine = config.require_engine()?;
        let table = TableRef::parse(table)?;
        let rows = self
            .run(config, &engine.dialect().columns_query(Some(&table)))
            .await?;
        rows.rows.iter().map(schema::column_from_row).collect()
    }

    /// Every base table with its columns, ordered by table then ordinal position
    ///
    /// # Errors
    ///
    /// Returns an execution error from the catalog query
    pub async fn discover_schema(&self, config: &DatabaseConfig) -> AppResult<Vec<TableInfo>> {
        let engine = config.require_engine()?;
        let rows = self.run(config, &engine.dialect().columns_query(None)).await?;
        let tables = schema::group_columns(&rows.rows)?;
        info!(engine = %engine, tables = tables.len(), "Schema discovered");
        Ok(tables)
    }
}

fn first_text_column(rows: &RowSet, column: &str) -> Vec<String> {
    rows.rows
        .iter()
        .filter_map(|row| match row.get(column) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl QueryExecutor for QueryEngine {
    async fn execute_query(
        &self,
        config: &DatabaseConfig,
        spec: &QuerySpec,
    ) -> AppResult<QueryResult> {
        Self::execute_query(self, config, spec).await
    }

    async fn get_databases(&self, config: &DatabaseConfig) -> AppResult<Vec<String>> {
        Self::get_databases(self, config).await
    }

    async fn get_tables(
        &self,
        config: &DatabaseConfig,
        database: Option<&str>,
    ) -> AppResult<Vec<String>> {
        Self::get_tables(self, config, database).await
    }

    async fn get_columns(
        &self,
        config: &DatabaseConfig,
        table: &str,
    ) -> AppResult<Vec<ColumnInfo>> {
        Self::get_columns(self, config, table).await
    }
}
