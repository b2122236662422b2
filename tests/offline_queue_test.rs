// ABOUTME: Integration tests for the offline queue's dedup ledger and pending-result FIFO
// ABOUTME: Uses a real SQLite file per test, including reopening to check durability
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use anyhow::Result;
use common::{init_test_logging, open_queue};
use serde_json::json;
use tempfile::TempDir;
use vmc_connector::errors::{AppError, ErrorCode};
use vmc_connector::tunnel::CommandResult;

#[tokio::test]
async fn test_ledger_records_and_replays_results() -> Result<()> {
    init_test_logging();
    let dir = TempDir::new()?;
    let queue = open_queue(dir.path()).await;

    assert!(!queue.has_executed("cmd-1").await?);
    assert!(queue.get_cached_result("cmd-1").await?.is_none());

    let result = CommandResult::success(json!({"rows": [1, 2, 3]}));
    queue.record_execution("cmd-1", "exec-1", &result).await?;

    assert!(queue.has_executed("cmd-1").await?);
    assert_eq!(queue.get_cached_result("cmd-1").await?, Some(result));
    let record = queue.get_execution("cmd-1").await?.unwrap();
    assert_eq!(record.execution_id, "exec-1");
    Ok(())
}

#[tokio::test]
async fn test_ledger_keeps_failures_with_error_code() -> Result<()> {
    let dir = TempDir::new()?;
    let queue = open_queue(dir.path()).await;

    let failure = CommandResult::failure(&AppError::security_violation("only SELECT"));
    queue.record_execution("cmd-bad", "exec-bad", &failure).await?;

    let cached = queue.get_cached_result("cmd-bad").await?.unwrap();
    assert!(!cached.success);
    assert_eq!(cached.error_code, Some(ErrorCode::SecurityViolation));
    assert_eq!(cached.error.as_deref(), Some("only SELECT"));
    Ok(())
}

#[tokio::test]
async fn test_recording_twice_keeps_one_entry() -> Result<()> {
    let dir = TempDir::new()?;
    let queue = open_queue(dir.path()).await;

    queue
        .record_execution("cmd-1", "exec-1", &CommandResult::success(json!(1)))
        .await?;
    queue
        .record_execution("cmd-1", "exec-2", &CommandResult::success(json!(2)))
        .await?;

    let record = queue.get_execution("cmd-1").await?.unwrap();
    assert_eq!(record.execution_id, "exec-2");
    assert_eq!(record.result.data, Some(json!(2)));
    Ok(())
}

#[tokio::test]
async fn test_pending_results_are_fifo() -> Result<()> {
    let dir = TempDir::new()?;
    let queue = open_queue(dir.path()).await;

    for n in 0..5 {
        queue
            .enqueue(
                &format!("cmd-{n}"),
                &format!("exec-{n}"),
                &format!("activity-{n}"),
                &CommandResult::success(json!(n)),
            )
            .await?;
    }

    let pending = queue.list().await?;
    let order: Vec<&str> = pending.iter().map(|p| p.command_id.as_str()).collect();
    assert_eq!(order, vec!["cmd-0", "cmd-1", "cmd-2", "cmd-3", "cmd-4"]);
    assert_eq!(pending[2].activity_id, "activity-2");
    assert!(pending.iter().all(|p| p.retry_count == 0));
    assert_eq!(queue.pending_count().await?, 5);
    Ok(())
}

#[tokio::test]
async fn test_remove_and_retry_bookkeeping() -> Result<()> {
    let dir = TempDir::new()?;
    let queue = open_queue(dir.path()).await;

    let first = queue
        .enqueue("cmd-a", "exec-a", "act-a", &CommandResult::success(json!("a")))
        .await?;
    let second = queue
        .enqueue("cmd-b", "exec-b", "act-b", &CommandResult::success(json!("b")))
        .await?;

    queue.increment_retry(second).await?;
    queue.increment_retry(second).await?;
    assert!(queue.remove(first).await?);
    assert!(!queue.remove(first).await?);

    let pending = queue.list().await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, second);
    assert_eq!(pending[0].retry_count, 2);
    assert_eq!(queue.pending_count().await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_state_survives_reopen() -> Result<()> {
    let dir = TempDir::new()?;
    {
        let queue = open_queue(dir.path()).await;
        queue
            .record_execution("cmd-1", "exec-1", &CommandResult::success(json!(true)))
            .await?;
        queue
            .enqueue("cmd-1", "exec-1", "act-1", &CommandResult::success(json!(true)))
            .await?;
        queue.close().await;
    }

    let reopened = open_queue(dir.path()).await;
    assert!(reopened.has_executed("cmd-1").await?);
    assert_eq!(reopened.pending_count().await?, 1);
    Ok(())
}
