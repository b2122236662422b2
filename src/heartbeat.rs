// ABOUTME: Heartbeat reporter: periodic health payloads while the tunnel is authenticated
// ABOUTME: Each payload goes out over the tunnel and over REST, independently and best effort
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::config::HeartbeatConfig;
use crate::constants::service::VERSION;
use crate::control_plane::ControlPlane;
use crate::errors::{AppError, AppResult};
use crate::health::MetricsSampler;
use crate::orchestrator::ActiveCommands;
use crate::query_engine::DatabaseEngine;
use crate::tunnel::protocol::HeartbeatPayload;
use crate::tunnel::{ConnectionState, TunnelClient};
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sends heartbeats while the tunnel is authenticated
pub struct HeartbeatReporter {
    tunnel: TunnelClient,
    control_plane: Arc<dyn ControlPlane>,
    sampler: MetricsSampler,
    active: ActiveCommands,
    config: HeartbeatConfig,
    http: Client,
    api_key: String,
}

impl fmt::Debug for HeartbeatReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeartbeatReporter")
            .field("interval", &self.config.interval)
            .field("active_commands", &self.active.get())
            .finish_non_exhaustive()
    }
}

impl HeartbeatReporter {
    /// Reporter for an authenticated tunnel session
    ///
    /// # Errors
    ///
    /// Returns an internal error if the HTTP client cannot be built
    pub fn new(
        tunnel: TunnelClient,
        control_plane: Arc<dyn ControlPlane>,
        active: ActiveCommands,
        config: HeartbeatConfig,
        api_key: impl Into<String>,
    ) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(config.ip_lookup_timeout)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            tunnel,
            control_plane,
            sampler: MetricsSampler::new(),
            active,
            config,
            http,
            api_key: api_key.into(),
        })
    }

    /// Best-effort public IP; `None` on any failure or after the timeout
    pub async fn lookup_ip(&self) -> Option<String> {
        let fetch = async {
            let response = self.http.get(&self.config.ip_lookup_url).send().await.ok()?;
            if !response.status().is_success() {
                return None;
            }
            let body = response.text().await.ok()?;
            let ip = serde_json::from_str::<Value>(&body).map_or_else(
                |_| body.trim().to_owned(),
                |json| {
                    json.get("ip")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned()
                },
            );
            (!ip.is_empty()).then_some(ip)
        };
        timeout(self.config.ip_lookup_timeout, fetch)
            .await
            .ok()
            .flatten()
    }

    /// Sample the host and assemble a payload
    pub async fn build_payload(&self) -> HeartbeatPayload {
        let (metrics, ip_address) = tokio::join!(self.sampler.sample(), self.lookup_ip());
        HeartbeatPayload {
            timestamp: Utc::now(),
            status: metrics.status(),
            active_commands: self.active.get(),
            cpu_usage: metrics.cpu_usage,
            memory_usage: metrics.memory_usage,
            max_concurrent_jobs: self.config.max_concurrent_jobs,
            supported_aggregators: DatabaseEngine::supported()
                .into_iter()
                .map(|engine| engine.as_str().to_owned())
                .collect(),
            os: metrics.os,
            hostname: metrics.hostname,
            version: VERSION.to_owned(),
            ip_address,
        }
    }

    /// Send one heartbeat over both paths
    pub async fn beat(&self) {
        let payload = self.build_payload().await;
        let connector_id = self.tunnel.state().connector_id;

        let over_tunnel = self.tunnel.send_heartbeat(&payload);
        let over_rest = async {
            match connector_id.as_deref() {
                Some(id) => self
                    .control_plane
                    .send_heartbeat(id, &self.api_key, &payload)
                    .await
                    .map(|()| true),
                None => Ok(false),
            }
        };
        let (tunnel_result, rest_result) = tokio::join!(over_tunnel, over_rest);

        if let Err(e) = tunnel_result {
            warn!(error = %e, "Heartbeat over tunnel failed");
        }
        match rest_result {
            Ok(true) => {}
            Ok(false) => debug!("No connector id yet; skipping REST heartbeat"),
            Err(e) => warn!(error = %e, "Heartbeat over REST failed"),
        }
        debug!(status = ?payload.status, active = payload.active_commands, "Heartbeat sent");
    }

    /// Beat on the configured interval whenever the tunnel is authenticated
    ///
    /// The first beat of each authenticated period is immediate.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut state = self.tunnel.watch_state();
        loop {
            let authenticated = tokio::select! {
                () = shutdown.cancelled() => return,
                ready = state.wait_for(ConnectionState::authenticated) => ready.is_ok(),
            };
            if !authenticated {
                return;
            }
            info!(interval_secs = self.config.interval.as_secs(), "Heartbeat reporter started");

            let mut ticker = interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    _ = ticker.tick() => self.beat().await,
                    changed = state.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        if !state.borrow_and_update().authenticated() {
                            info!("Heartbeat reporter paused until re-authentication");
                            break;
                        }
                    }
                }
            }
        }
    }
}
