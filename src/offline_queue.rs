// ABOUTME: Durable offline queue: command dedup ledger and pending-result FIFO in SQLite
// ABOUTME: The ledger makes re-delivered commands replay their first result instead of re-running
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Offline queue
//!
//! Two independent tables share one `SQLite` file:
//!
//! - `executed_commands`: one row per `commandId`, written right after
//!   execution and never deleted.
//! - `pending_results`: responses the tunnel refused, delivered in
//!   insertion order on the next authentication. There is no retry ceiling;
//!   [`OfflineQueue::pending_count`] exposes the depth instead.

use crate::errors::{AppError, AppResult};
use crate::tunnel::protocol::CommandResult;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const BUSY_TIMEOUT_SECS: u64 = 30;
const MAX_CONNECTIONS: u32 = 4;

/// Ledger entry for an executed command
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    /// Deduplication key
    pub command_id: String,
    /// Workflow execution
    pub execution_id: String,
    /// Result produced by the one real execution
    pub result: CommandResult,
    /// When it was recorded
    pub executed_at: DateTime<Utc>,
}

/// Response waiting for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedResult {
    /// Queue id, increasing in insertion order
    pub id: i64,
    /// Command answered
    pub command_id: String,
    /// Workflow execution
    pub execution_id: String,
    /// Workflow activity
    pub activity_id: String,
    /// Result to deliver
    pub result: CommandResult,
    /// When the first delivery failed
    pub created_at: DateTime<Utc>,
    /// Failed flush attempts since
    pub retry_count: u32,
}

/// `SQLite` backed ledger and FIFO
#[derive(Debug, Clone)]
pub struct OfflineQueue {
    pool: SqlitePool,
}

/// Fixed-width RFC 3339 so text order matches time order
fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::database(format!("Invalid timestamp in offline queue: {e}")))
}

fn parse_result(raw: &str) -> AppResult<CommandResult> {
    serde_json::from_str(raw)
        .map_err(|e| AppError::database(format!("Invalid result in offline queue: {e}")))
}

fn queued_from_row(row: &SqliteRow) -> AppResult<QueuedResult> {
    let retry_count: i64 = row.try_get("retry_count")?;
    Ok(QueuedResult {
        id: row.try_get("id")?,
        command_id: row.try_get("command_id")?,
        execution_id: row.try_get("execution_id")?,
        activity_id: row.try_get("activity_id")?,
        result: parse_result(row.try_get("result")?)?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
        retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
    })
}

impl OfflineQueue {
    /// Open (creating if needed) the queue database and apply migrations
    ///
    /// # Errors
    ///
    /// Returns a database error if the file cannot be opened or migrated
    pub async fn open(database_url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::config(format!("Invalid queue database URL: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| AppError::database(format!("Failed to open offline queue: {e}")))?;

        let queue = Self { pool };
        queue.migrate().await?;
        Ok(queue)
    }

    /// Wrap an existing pool (migrations must already be applied)
    #[must_use]
    pub const fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply embedded migrations
    ///
    /// # Errors
    ///
    /// Returns a database error if a migration fails
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Offline queue migration failed: {e}")))?;
        debug!("Offline queue migrations applied");
        Ok(())
    }

    /// Whether a command id is in the ledger
    ///
    /// # Errors
    ///
    /// Returns a database error if the lookup fails
    pub async fn has_executed(&self, command_id: &str) -> AppResult<bool> {
        let row = sqlx::query("SELECT 1 FROM executed_commands WHERE command_id = ?1")
            .bind(command_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to check ledger: {e}")))?;
        Ok(row.is_some())
    }

    /// Write the ledger entry for a command
    ///
    /// # Errors
    ///
    /// Returns a database error if the write fails
    pub async fn record_execution(
        &self,
        command_id: &str,
        execution_id: &str,
        result: &CommandResult,
    ) -> AppResult<()> {
        let serialized = serde_json::to_string(result)?;
        sqlx::query(
            r"
            INSERT INTO executed_commands (command_id, execution_id, result, executed_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(command_id) DO UPDATE SET
                execution_id = excluded.execution_id,
                result = excluded.result,
                executed_at = excluded.executed_at
            ",
        )
        .bind(command_id)
        .bind(execution_id)
        .bind(serialized)
        .bind(now_stamp())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to record execution: {e}")))?;
        Ok(())
    }

    /// Result recorded for a command
    ///
    /// # Errors
    ///
    /// Returns a database error if the lookup fails or the row is corrupt
    pub async fn get_cached_result(&self, command_id: &str) -> AppResult<Option<CommandResult>> {
        Ok(self
            .get_execution(command_id)
            .await?
            .map(|record| record.result))
    }

    /// Full ledger entry for a command
    ///
    /// # Errors
    ///
    /// Returns a database error if the lookup fails or the row is corrupt
    pub async fn get_execution(&self, command_id: &str) -> AppResult<Option<ExecutionRecord>> {
        let row = sqlx::query(
            "SELECT command_id, execution_id, result, executed_at FROM executed_commands WHERE command_id = ?1",
        )
        .bind(command_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to read ledger: {e}")))?;

        row.map(|row| {
            Ok(ExecutionRecord {
                command_id: row.try_get("command_id")?,
                execution_id: row.try_get("execution_id")?,
                result: parse_result(row.try_get("result")?)?,
                executed_at: parse_timestamp(row.try_get("executed_at")?)?,
            })
        })
        .transpose()
    }

    /// Buffer an undelivered response, returning its queue id
    ///
    /// # Errors
    ///
    /// Returns a database error if the insert fails
    pub async fn enqueue(
        &self,
        command_id: &str,
        execution_id: &str,
        activity_id: &str,
        result: &CommandResult,
    ) -> AppResult<i64> {
        let serialized = serde_json::to_string(result)?;
        let done = sqlx::query(
            r"
            INSERT INTO pending_results (command_id, execution_id, activity_id, result, created_at, retry_count)
            VALUES (?1, ?2, ?3, ?4, ?5, 0)
            ",
        )
        .bind(command_id)
        .bind(execution_id)
        .bind(activity_id)
        .bind(serialized)
        .bind(now_stamp())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to enqueue result: {e}")))?;

        let id = done.last_insert_rowid();
        info!(command_id, queue_id = id, "Response queued for later delivery");
        Ok(id)
    }

    /// Pending responses, oldest first
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails or a row is corrupt
    pub async fn list(&self) -> AppResult<Vec<QueuedResult>> {
        let rows = sqlx::query(
            r"
            SELECT id, command_id, execution_id, activity_id, result, created_at, retry_count
            FROM pending_results
            ORDER BY created_at ASC, id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list pending results: {e}")))?;

        rows.iter().map(queued_from_row).collect()
    }

    /// Drop a delivered response; false if it was not queued
    ///
    /// # Errors
    ///
    /// Returns a database error if the delete fails
    pub async fn remove(&self, id: i64) -> AppResult<bool> {
        let done = sqlx::query("DELETE FROM pending_results WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to remove pending result: {e}")))?;
        Ok(done.rows_affected() > 0)
    }

    /// Count another failed delivery
    ///
    /// # Errors
    ///
    /// Returns a database error if the update fails
    pub async fn increment_retry(&self, id: i64) -> AppResult<()> {
        sqlx::query("UPDATE pending_results SET retry_count = retry_count + 1 WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to update retry count: {e}")))?;
        Ok(())
    }

    /// Number of responses waiting
    ///
    /// # Errors
    ///
    /// Returns a database error if the count fails
    pub async fn pending_count(&self) -> AppResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_results")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to count pending results: {e}")))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Close the pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
