// ABOUTME: Tunnel connection state snapshot and the events published to subscribers
// ABOUTME: State is observed through a watch channel, events through a broadcast channel
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle position of the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No transport
    #[default]
    Disconnected,
    /// Validating the key or opening the transport
    Connecting,
    /// Transport open, waiting for `authenticated`
    Connected,
    /// Usable by the orchestrator and the heartbeat reporter
    Authenticated,
    /// The control plane rejected the key
    AuthenticationFailed,
}

/// Current tunnel status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    /// Lifecycle position
    pub status: ConnectionStatus,
    /// Consecutive failed reconnect attempts
    pub reconnect_attempts: u32,
    /// Last heartbeat sent over the tunnel
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Connector id from key validation or `authenticated`
    pub connector_id: Option<String>,
    /// Tenant id from key validation or `authenticated`
    pub tenant_id: Option<String>,
    /// Most recent failure
    pub last_error: Option<String>,
}

impl ConnectionState {
    /// Transport is open
    #[must_use]
    pub const fn connected(&self) -> bool {
        matches!(
            self.status,
            ConnectionStatus::Connected | ConnectionStatus::Authenticated
        )
    }

    /// Control plane accepted the key on this transport
    #[must_use]
    pub const fn authenticated(&self) -> bool {
        matches!(self.status, ConnectionStatus::Authenticated)
    }
}

/// Events surfaced to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelEvent {
    /// Transport opened
    Connected,
    /// Key accepted over the tunnel
    Authenticated,
    /// Key rejected over the tunnel
    AuthenticationFailed {
        /// Server supplied reason
        message: String,
    },
    /// Transport closed
    Disconnected {
        /// Why it closed
        reason: String,
    },
    /// Non-fatal failure (malformed frame, failed attempt)
    Error {
        /// Description
        message: String,
    },
    /// Heartbeat acknowledged
    HeartbeatAck,
    /// Automatic reconnection gave up
    ReconnectFailed {
        /// Attempts made
        attempts: u32,
    },
}
