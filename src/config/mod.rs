// ABOUTME: Configuration module: environment variables and the persistent settings file
// ABOUTME: Environment is read once at start; settings change through local management calls
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// `VMC_*` environment configuration
pub mod environment;
/// Settings file store
pub mod settings;

pub use environment::{AgentConfig, HeartbeatConfig, TunnelConfig};
pub use settings::{Settings, SettingsStore, SettingsUpdate};
