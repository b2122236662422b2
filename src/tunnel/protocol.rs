// ABOUTME: Wire types of the tunnel: JSON envelopes, inbound commands and outbound responses/heartbeats
// ABOUTME: Event names are fixed by the control plane contract
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::constants::events;
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::query_engine::QuerySpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Frame exchanged over the tunnel: `{"event": "...", "data": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name
    pub event: String,
    /// Event payload
    #[serde(default)]
    pub data: Value,
}

/// Operation requested by a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// Bounded read
    Query,
    /// List databases
    GetDatabases,
    /// List tables
    GetTables,
    /// List columns of one table
    GetColumns,
    /// Anything this agent version does not understand
    #[serde(other)]
    Unsupported,
}

/// Target and arguments of a command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    /// Aggregator id; the first registered aggregator when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Query spec for `query`
    #[serde(default, alias = "spec", skip_serializing_if = "Option::is_none")]
    pub query: Option<QuerySpec>,
    /// Database override for `get-tables`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Table for `get-columns`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

/// Unit of work sent by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    /// Deduplication key
    pub command_id: String,
    /// Workflow execution this command belongs to
    #[serde(default)]
    pub execution_id: String,
    /// Workflow activity this command belongs to
    #[serde(default)]
    pub activity_id: String,
    /// Requested operation
    pub operation: Operation,
    /// Arguments
    #[serde(default)]
    pub payload: CommandPayload,
}

/// Structured outcome of a command, success or failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    /// Whether the command succeeded
    pub success: bool,
    /// Operation output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl CommandResult {
    /// Successful result
    #[must_use]
    pub const fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
        }
    }

    /// Failed result carrying the error code
    #[must_use]
    pub fn failure(error: &AppError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.message.clone()),
            error_code: Some(error.code),
        }
    }
}

/// `command_response` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    /// Command being answered
    pub command_id: String,
    /// Outcome
    pub response: CommandResult,
    /// Time the response was produced
    pub timestamp: DateTime<Utc>,
}

/// Agent load as reported in heartbeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Accepting work
    Online,
    /// CPU or memory above the busy threshold
    Busy,
}

/// `heartbeat` payload, identical on the tunnel and the REST path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    /// Sample time
    pub timestamp: DateTime<Utc>,
    /// Derived load status
    pub status: AgentStatus,
    /// Commands currently in flight
    pub active_commands: usize,
    /// CPU usage percentage
    pub cpu_usage: f64,
    /// Memory used percentage
    pub memory_usage: f64,
    /// Declared concurrency (reported, not enforced)
    pub max_concurrent_jobs: u32,
    /// Engines this build can reach
    pub supported_aggregators: Vec<String>,
    /// Operating system description
    pub os: String,
    /// Host name
    pub hostname: String,
    /// Agent version
    pub version: String,
    /// Public IP when the lookup succeeded
    pub ip_address: Option<String>,
}

/// Identity data that may accompany `authenticated`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedInfo {
    /// Tenant id
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Connector id
    #[serde(default)]
    pub connector_id: Option<String>,
}

/// Messages the control plane sends
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Work to execute
    Command(Command),
    /// Key accepted
    Authenticated(AuthenticatedInfo),
    /// Key rejected
    AuthenticationFailed {
        /// Reason given by the server
        message: String,
    },
    /// Heartbeat received
    HeartbeatAck,
    /// Event this agent does not handle
    Unknown(String),
}

impl InboundMessage {
    /// Decode a text frame
    ///
    /// # Errors
    ///
    /// Returns an invalid input error for frames that are not envelopes or
    /// whose payload does not match the event
    pub fn parse(text: &str) -> AppResult<Self> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| AppError::invalid_input(format!("Malformed tunnel frame: {e}")))?;
        let bad_payload =
            |e: serde_json::Error| AppError::invalid_input(format!("Malformed {} payload: {e}", envelope.event));

        match envelope.event.as_str() {
            events::COMMAND => serde_json::from_value(envelope.data.clone())
                .map(Self::Command)
                .map_err(bad_payload),
            events::AUTHENTICATED => Ok(Self::Authenticated(
                serde_json::from_value(envelope.data.clone()).unwrap_or_default(),
            )),
            events::AUTHENTICATION_FAILED => Ok(Self::AuthenticationFailed {
                message: envelope
                    .data
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Authentication failed")
                    .to_owned(),
            }),
            events::HEARTBEAT_ACK => Ok(Self::HeartbeatAck),
            other => {
                debug!(event = other, "Ignoring unknown tunnel event");
                Ok(Self::Unknown(other.to_owned()))
            }
        }
    }
}

/// Messages the agent sends
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Periodic health report
    Heartbeat(HeartbeatPayload),
    /// Result of a command
    CommandResponse(CommandResponse),
}

impl OutboundMessage {
    /// Encode as a text frame
    ///
    /// # Errors
    ///
    /// Returns an internal error if serialization fails
    pub fn to_frame(&self) -> AppResult<String> {
        let envelope = match self {
            Self::Heartbeat(payload) => Envelope {
                event: events::HEARTBEAT.to_owned(),
                data: serde_json::to_value(payload)?,
            },
            Self::CommandResponse(response) => Envelope {
                event: events::COMMAND_RESPONSE.to_owned(),
                data: serde_json::to_value(response)?,
            },
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}
