// ABOUTME: Command orchestrator: dedup, target resolution, execution, ledger write and delivery
// ABOUTME: Undeliverable responses go to the offline queue and are flushed on re-authentication
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Command orchestrator
//!
//! Per command: `received -> replay` when the ledger already holds the
//! command id, otherwise `resolve target -> execute -> record -> respond`.
//! The ledger write happens before the send attempt, so a command whose
//! response was lost is replayed rather than executed a second time. Errors
//! are results too: a failed execution is recorded and replayed like a
//! successful one.
//!
//! Deliveries of the same command id are serialized on a per-id gate held
//! from the ledger check through the ledger write, so a redelivery that
//! arrives while the first is still running waits and then replays.

use crate::aggregators::AggregatorStore;
use crate::errors::{AppError, AppResult};
use crate::offline_queue::OfflineQueue;
use crate::query_engine::{DatabaseConfig, QueryExecutor};
use crate::tunnel::protocol::{Command, CommandPayload, CommandResponse, CommandResult, Operation};
use crate::tunnel::{TunnelClient, TunnelEvent};
use crate::vault::CredentialVault;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where command responses are delivered
#[async_trait]
pub trait ResponseSink: Send + Sync {
    /// Deliver a response; an error means it must be buffered
    async fn send_command_response(&self, response: &CommandResponse) -> AppResult<()>;
}

#[async_trait]
impl ResponseSink for TunnelClient {
    async fn send_command_response(&self, response: &CommandResponse) -> AppResult<()> {
        Self::send_command_response(self, response).await
    }
}

/// Shared count of commands in flight
#[derive(Debug, Clone, Default)]
pub struct ActiveCommands(Arc<AtomicUsize>);

impl ActiveCommands {
    /// Current count
    #[must_use]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Count one command until the guard drops
    #[must_use]
    pub fn enter(&self) -> ActiveGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        ActiveGuard(Arc::clone(&self.0))
    }
}

/// Decrements the active count on drop, whatever the outcome
#[derive(Debug)]
pub struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Outcome of a pending-queue flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Responses delivered and removed
    pub delivered: usize,
    /// Responses left queued with their retry count bumped
    pub failed: usize,
}

/// Dispatches tunnel commands to the query engine
pub struct CommandOrchestrator {
    executor: Arc<dyn QueryExecutor>,
    aggregators: AggregatorStore,
    vault: Arc<CredentialVault>,
    queue: OfflineQueue,
    sink: Arc<dyn ResponseSink>,
    active: ActiveCommands,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl CommandOrchestrator {
    /// Orchestrator over its collaborators
    #[must_use]
    pub fn new(
        executor: Arc<dyn QueryExecutor>,
        aggregators: AggregatorStore,
        vault: Arc<CredentialVault>,
        queue: OfflineQueue,
        sink: Arc<dyn ResponseSink>,
    ) -> Self {
        Self {
            executor,
            aggregators,
            vault,
            queue,
            sink,
            active: ActiveCommands::default(),
            in_flight: DashMap::new(),
        }
    }

    /// Handle on the in-flight counter, for the heartbeat reporter
    #[must_use]
    pub fn active_commands(&self) -> ActiveCommands {
        self.active.clone()
    }

    /// Offline queue used for the ledger and pending responses
    #[must_use]
    pub const fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    /// Process one command and return the result that was (or will be) delivered
    pub async fn handle_command(&self, command: &Command) -> CommandResult {
        let _active = self.active.enter();
        let command_id = command.command_id.as_str();

        let gate = Arc::clone(
            self.in_flight
                .entry(command_id.to_owned())
                .or_default()
                .value(),
        );
        let result = {
            let _held = gate.lock().await;
            self.execute_once(command).await
        };
        drop(gate);
        self.in_flight
            .remove_if(command_id, |_, gate| Arc::strong_count(gate) == 1);

        self.respond(command, &result).await;
        result
    }

    /// Ledger check, execution and ledger write; callers hold the command's gate
    async fn execute_once(&self, command: &Command) -> CommandResult {
        let command_id = command.command_id.as_str();

        match self.queue.get_cached_result(command_id).await {
            Ok(Some(cached)) => {
                info!(command_id, "Replaying recorded result for duplicate command");
                return cached;
            }
            Ok(None) => {}
            Err(e) => {
                // without the ledger a re-delivery could execute twice
                error!(command_id, error = %e, "Ledger unavailable; refusing to execute");
                return CommandResult::failure(&e);
            }
        }

        debug!(command_id, operation = ?command.operation, "Executing command");
        let result = match self.execute(command).await {
            Ok(data) => CommandResult::success(data),
            Err(e) => {
                warn!(command_id, code = %e.code, error = %e.message, "Command failed");
                CommandResult::failure(&e)
            }
        };

        if let Err(e) = self
            .queue
            .record_execution(command_id, &command.execution_id, &result)
            .await
        {
            error!(command_id, error = %e, "Failed to record execution in ledger");
        }
        result
    }

    async fn respond(&self, command: &Command, result: &CommandResult) {
        let response = CommandResponse {
            command_id: command.command_id.clone(),
            response: result.clone(),
            timestamp: Utc::now(),
        };
        let Err(e) = self.sink.send_command_response(&response).await else {
            return;
        };

        warn!(command_id = %command.command_id, error = %e, "Response not delivered; queueing");
        if let Err(e) = self
            .queue
            .enqueue(
                &command.command_id,
                &command.execution_id,
                &command.activity_id,
                result,
            )
            .await
        {
            error!(command_id = %command.command_id, error = %e, "Failed to queue response; it is lost");
        }
    }

    async fn resolve_target(&self, payload: &CommandPayload) -> AppResult<DatabaseConfig> {
        let aggregator = match payload.connection_id.as_deref() {
            Some(raw) => {
                let id = Uuid::parse_str(raw)
                    .map_err(|e| AppError::invalid_input(format!("Invalid connectionId {raw}: {e}")))?;
                self.aggregators
                    .get_by_id(id)
                    .await?
                    .ok_or_else(|| AppError::not_found(format!("Aggregator {id} not found")))?
            }
            None => self
                .aggregators
                .first()
                .await?
                .ok_or_else(|| AppError::not_found("No aggregator is configured"))?,
        };

        let credential = match aggregator.credential_id {
            Some(id) => Some(self.vault.require(id).await?),
            None => None,
        };
        Ok(aggregator.database_config(credential.as_ref()))
    }

    async fn execute(&self, command: &Command) -> AppResult<Value> {
        if command.operation == Operation::Unsupported {
            return Err(AppError::invalid_input("Unsupported operation"));
        }
        let payload = &command.payload;
        let config = self.resolve_target(payload).await?;

        let data = match command.operation {
            Operation::Query => {
                let spec = payload
                    .query
                    .as_ref()
                    .ok_or_else(|| AppError::invalid_input("query operation requires a query spec"))?;
                serde_json::to_value(self.executor.execute_query(&config, spec).await?)?
            }
            Operation::GetDatabases => {
                serde_json::to_value(self.executor.get_databases(&config).await?)?
            }
            Operation::GetTables => serde_json::to_value(
                self.executor
                    .get_tables(&config, payload.database.as_deref())
                    .await?,
            )?,
            Operation::GetColumns => {
                let table = payload
                    .table
                    .as_deref()
                    .ok_or_else(|| AppError::invalid_input("get-columns requires a table"))?;
                serde_json::to_value(self.executor.get_columns(&config, table).await?)?
            }
            Operation::Unsupported => return Err(AppError::invalid_input("Unsupported operation")),
        };
        Ok(data)
    }

    /// Deliver queued responses oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read
    pub async fn flush_pending(&self) -> AppResult<FlushSummary> {
        let pending = self.queue.list().await?;
        let mut summary = FlushSummary::default();
        if pending.is_empty() {
            return Ok(summary);
        }
        info!(count = pending.len(), "Flushing queued responses");

        for item in pending {
            let response = CommandResponse {
                command_id: item.command_id.clone(),
                response: item.result,
                timestamp: Utc::now(),
            };
            match self.sink.send_command_response(&response).await {
                Ok(()) => {
                    self.queue.remove(item.id).await?;
                    summary.delivered += 1;
                }
                Err(e) => {
                    warn!(command_id = %item.command_id, retries = item.retry_count + 1, error = %e, "Queued response still undeliverable");
                    self.queue.increment_retry(item.id).await?;
                    summary.failed += 1;
                }
            }
        }
        info!(delivered = summary.delivered, failed = summary.failed, "Flush finished");
        Ok(summary)
    }

    /// Consume commands and tunnel status events until shutdown
    ///
    /// Commands run concurrently; `authenticated` triggers a flush. Status
    /// events may be skipped when this loop falls behind, so a lag also
    /// triggers a flush in case the skipped event was `authenticated`.
    pub async fn run(
        self: Arc<Self>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: broadcast::Receiver<TunnelEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        this.handle_command(&command).await;
                    });
                }
                event = events.recv() => match event {
                    Ok(TunnelEvent::Authenticated) => Arc::clone(&self).spawn_flush(),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Orchestrator skipped tunnel status events");
                        Arc::clone(&self).spawn_flush();
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("Orchestrator stopped");
    }

    fn spawn_flush(self: Arc<Self>) {
        tokio::spawn(async move {
            if let Err(e) = self.flush_pending().await {
                error!(error = %e, "Failed to flush queued responses");
            }
        });
    }
}
