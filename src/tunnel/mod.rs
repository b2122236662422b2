// ABOUTME: Tunnel client module: persistent duplex channel to the control plane
// ABOUTME: Wire protocol, connection state, transport abstraction and the reconnecting client
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// Reconnecting client
pub mod client;
/// Wire messages
pub mod protocol;
/// Connection state and events
pub mod state;
/// Transport abstraction
pub mod transport;

pub use client::{reconnect_delays, TunnelClient};
pub use protocol::{
    AgentStatus, Command, CommandPayload, CommandResponse, CommandResult, HeartbeatPayload,
    InboundMessage, Operation, OutboundMessage,
};
pub use state::{ConnectionState, ConnectionStatus, TunnelEvent};
pub use transport::{TransportFrame, TransportLink, TunnelTransport, WebSocketTransport};
