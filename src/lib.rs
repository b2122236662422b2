// ABOUTME: Library entry point for the vmc on-premise connector agent
// ABOUTME: Bridges a private database to a remote control plane over an outbound tunnel, read-only
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![deny(unsafe_code)]

//! # VMC Connector
//!
//! An agent that runs next to a private database and lets a remote control
//! plane issue schema introspection and bounded read commands without any
//! inbound port being opened.
//!
//! ## Architecture
//!
//! - **Crypto**: API key format and checksum; machine-bound AES-256-GCM key
//! - **Vault**: encrypted credential store
//! - **Query engine**: multi-dialect SQL building with layered read-only enforcement
//! - **Tunnel**: reconnecting duplex channel to the control plane
//! - **Offline queue**: dedup ledger and pending-result FIFO
//! - **Orchestrator**: runs commands exactly once per command id
//! - **Heartbeat**: periodic health reports over two independent paths
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use vmc_connector::agent::Agent;
//! use vmc_connector::config::AgentConfig;
//! use vmc_connector::errors::AppResult;
//!
//! #[tokio::main]
//! async fn main() -> AppResult<()> {
//!     let agent = Agent::new(AgentConfig::from_env()?).await?;
//!     agent.start().await?;
//!     println!("{:?}", agent.status().await?);
//!     agent.shutdown().await;
//!     Ok(())
//! }
//! ```

/// Component wiring and status
pub mod agent;

/// Registered database targets
pub mod aggregators;

/// Environment configuration and the settings store
pub mod config;

/// Application constants
pub mod constants;

/// REST side-channel to the control plane
pub mod control_plane;

/// API keys and machine-bound encryption
pub mod crypto;

/// Unified error handling
pub mod errors;

/// Host metrics
pub mod health;

/// Heartbeat reporter
pub mod heartbeat;

/// Logging setup
pub mod logging;

/// Dedup ledger and pending-result FIFO
pub mod offline_queue;

/// Command dispatch
pub mod orchestrator;

/// Read-only multi-dialect query engine
pub mod query_engine;

/// Owner-only JSON files
pub mod storage;

/// Tunnel client
pub mod tunnel;

/// Encrypted credential vault
pub mod vault;
