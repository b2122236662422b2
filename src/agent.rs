// ABOUTME: Agent wiring: builds every component from the configuration and runs them together
// ABOUTME: Exposes start, shutdown and a status snapshot (tunnel state, active commands, queue depth)
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::aggregators::AggregatorStore;
use crate::config::{AgentConfig, SettingsStore};
use crate::control_plane::{ControlPlane, HttpControlPlane};
use crate::crypto::{mask_api_key, MachineKey};
use crate::errors::{AppError, AppResult};
use crate::heartbeat::HeartbeatReporter;
use crate::offline_queue::OfflineQueue;
use crate::orchestrator::CommandOrchestrator;
use crate::query_engine::QueryEngine;
use crate::tunnel::{ConnectionState, TunnelClient, TunnelEvent, TunnelTransport, WebSocketTransport};
use crate::vault::CredentialVault;
use serde::Serialize;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Point-in-time view of the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatusReport {
    /// Tunnel state
    pub connection: ConnectionState,
    /// Commands in flight
    pub active_commands: usize,
    /// Responses waiting in the offline queue
    pub pending_results: u64,
}

/// The connector agent
pub struct Agent {
    config: AgentConfig,
    settings: Arc<SettingsStore>,
    aggregators: AggregatorStore,
    vault: Arc<CredentialVault>,
    engine: QueryEngine,
    queue: OfflineQueue,
    control_plane: Arc<dyn ControlPlane>,
    tunnel: TunnelClient,
    orchestrator: Arc<CommandOrchestrator>,
    shutdown: CancellationToken,
}

impl Agent {
    /// Build the agent with the production control plane and WebSocket transport
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory, machine key, queue database or
    /// HTTP client cannot be set up
    pub async fn new(config: AgentConfig) -> AppResult<Self> {
        let control_plane = Arc::new(HttpControlPlane::new(config.control_plane_url.clone())?);
        let key = MachineKey::for_this_machine()?;
        Self::with_parts(config, key, control_plane, Arc::new(WebSocketTransport)).await
    }

    /// Build the agent over explicit collaborators
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory or the queue database cannot be set up
    pub async fn with_parts(
        config: AgentConfig,
        key: MachineKey,
        control_plane: Arc<dyn ControlPlane>,
        transport: Arc<dyn TunnelTransport>,
    ) -> AppResult<Self> {
        fs::create_dir_all(&config.data_dir).await.map_err(|e| {
            AppError::persistence(format!(
                "Cannot create data directory {}: {e}",
                config.data_dir.display()
            ))
        })?;

        let settings = Arc::new(SettingsStore::new(config.settings_path()));
        let aggregators = AggregatorStore::new(Arc::clone(&settings));
        let vault = Arc::new(CredentialVault::new(config.vault_path(), key));
        let engine = QueryEngine::new(config.default_row_limit);
        let queue = OfflineQueue::open(&config.queue_database_url()).await?;
        let tunnel = TunnelClient::new(
            config.tunnel_url.clone(),
            config.tunnel,
            transport,
            Arc::clone(&control_plane),
        );
        let orchestrator = Arc::new(CommandOrchestrator::new(
            Arc::new(engine.clone()),
            aggregators.clone(),
            Arc::clone(&vault),
            queue.clone(),
            Arc::new(tunnel.clone()),
        ));

        Ok(Self {
            config,
            settings,
            aggregators,
            vault,
            engine,
            queue,
            control_plane,
            tunnel,
            orchestrator,
            shutdown: CancellationToken::new(),
        })
    }

    /// Settings store
    #[must_use]
    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Aggregator store
    #[must_use]
    pub const fn aggregators(&self) -> &AggregatorStore {
        &self.aggregators
    }

    /// Credential vault
    #[must_use]
    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    /// Query engine
    #[must_use]
    pub const fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// Tunnel client
    #[must_use]
    pub const fn tunnel(&self) -> &TunnelClient {
        &self.tunnel
    }

    /// Command orchestrator
    #[must_use]
    pub fn orchestrator(&self) -> &CommandOrchestrator {
        &self.orchestrator
    }

    /// API key from the environment, else from settings
    ///
    /// # Errors
    ///
    /// Returns a config error when neither holds a key
    pub async fn api_key(&self) -> AppResult<String> {
        if let Some(key) = &self.config.api_key {
            return Ok(key.clone());
        }
        self.settings
            .load()
            .await?
            .api_key
            .ok_or_else(|| AppError::config("No API key configured (set VMC_API_KEY or save one in settings)"))
    }

    /// Start the background tasks and connect the tunnel
    ///
    /// # Errors
    ///
    /// Returns an error if no key is configured or the first connect fails
    pub async fn start(&self) -> AppResult<()> {
        let api_key = self.api_key().await?;

        let commands = self
            .tunnel
            .take_commands()
            .await
            .ok_or_else(|| AppError::internal("Agent was already started"))?;
        tokio::spawn(Arc::clone(&self.orchestrator).run(
            commands,
            self.tunnel.subscribe(),
            self.shutdown.child_token(),
        ));

        let reporter = Arc::new(HeartbeatReporter::new(
            self.tunnel.clone(),
            Arc::clone(&self.control_plane),
            self.orchestrator.active_commands(),
            self.config.heartbeat.clone(),
            api_key.clone(),
        )?);
        tokio::spawn(reporter.run(self.shutdown.child_token()));
        tokio::spawn(watch_terminal_events(
            self.tunnel.subscribe(),
            self.shutdown.child_token(),
        ));

        info!(api_key = %mask_api_key(&api_key), "Starting connector agent");
        self.tunnel.connect(&api_key).await
    }

    /// Current status
    ///
    /// # Errors
    ///
    /// Returns a database error if the queue depth cannot be read
    pub async fn status(&self) -> AppResult<AgentStatusReport> {
        Ok(AgentStatusReport {
            connection: self.tunnel.state(),
            active_commands: self.orchestrator.active_commands().get(),
            pending_results: self.queue.pending_count().await?,
        })
    }

    /// Forget every local secret and target
    ///
    /// Closes the tunnel, tears down all database pools, clears the vault
    /// and deletes the settings file. The offline queue is kept so that
    /// recorded results are still delivered after a new key is saved.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the vault or settings file cannot be removed
    pub async fn reset(&self) -> AppResult<()> {
        self.tunnel.disconnect().await;
        self.engine.pools().close_all().await;
        self.vault.clear().await?;
        self.settings.reset().await?;
        warn!("Agent reset: settings, credentials and pools cleared");
        Ok(())
    }

    /// Stop background tasks, close the tunnel and release pools
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tunnel.disconnect().await;
        self.engine.pools().close_all().await;
        self.queue.close().await;
        info!("Connector agent stopped");
    }
}

async fn watch_terminal_events(
    mut events: broadcast::Receiver<TunnelEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(TunnelEvent::ReconnectFailed { attempts }) => {
                error!(attempts, "Tunnel gave up reconnecting; restart or reconnect the agent");
            }
            Ok(TunnelEvent::AuthenticationFailed { message }) => {
                error!(reason = %message, "Control plane rejected the API key");
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => {
                warn!("Tunnel event channel closed");
                return;
            }
        }
    }
}
