// ABOUTME: Tests for loading the agent configuration from VMC_* environment variables
// ABOUTME: Serialized because every test mutates the process environment
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use serial_test::serial;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use vmc_connector::config::AgentConfig;
use vmc_connector::errors::ErrorCode;

const VARS: &[&str] = &[
    "VMC_CONTROL_PLANE_URL",
    "VMC_TUNNEL_URL",
    "VMC_DATA_DIR",
    "VMC_API_KEY",
    "VMC_CONNECT_TIMEOUT_SECS",
    "VMC_MAX_RECONNECT_ATTEMPTS",
    "VMC_HEARTBEAT_INTERVAL_SECS",
    "VMC_MAX_CONCURRENT_JOBS",
    "VMC_IP_LOOKUP_URL",
    "VMC_DEFAULT_ROW_LIMIT",
    "VMC_LOG_LEVEL",
    "VMC_LOG_FORMAT",
];

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_defaults_without_environment() {
    clear_env();
    let config = AgentConfig::from_env().unwrap();

    assert_eq!(config.control_plane_url.as_str(), "https://app.vmc.dev/");
    assert_eq!(
        config.tunnel_url.as_str(),
        "wss://app.vmc.dev/connector/tunnel"
    );
    assert!(config.api_key.is_none());
    assert_eq!(config.tunnel.connect_timeout, Duration::from_secs(10));
    assert_eq!(config.tunnel.max_reconnect_attempts, 10);
    assert_eq!(config.heartbeat.interval, Duration::from_secs(30));
    assert_eq!(config.heartbeat.max_concurrent_jobs, 5);
    assert!(config.default_row_limit.is_none());
}

#[test]
#[serial]
fn test_overrides_and_derived_paths() {
    clear_env();
    env::set_var("VMC_CONTROL_PLANE_URL", "http://localhost:3000");
    env::set_var("VMC_DATA_DIR", "/var/lib/vmc-test");
    env::set_var("VMC_API_KEY", "vmc_override");
    env::set_var("VMC_CONNECT_TIMEOUT_SECS", "3");
    env::set_var("VMC_MAX_RECONNECT_ATTEMPTS", " 4 ");
    env::set_var("VMC_HEARTBEAT_INTERVAL_SECS", "15");
    env::set_var("VMC_MAX_CONCURRENT_JOBS", "8");
    env::set_var("VMC_DEFAULT_ROW_LIMIT", "500");

    let config = AgentConfig::from_env().unwrap();
    clear_env();

    assert_eq!(
        config.tunnel_url.as_str(),
        "ws://localhost:3000/connector/tunnel"
    );
    assert_eq!(config.api_key.as_deref(), Some("vmc_override"));
    assert_eq!(config.tunnel.connect_timeout, Duration::from_secs(3));
    assert_eq!(config.tunnel.max_reconnect_attempts, 4);
    assert_eq!(config.heartbeat.interval, Duration::from_secs(15));
    assert_eq!(config.heartbeat.max_concurrent_jobs, 8);
    assert_eq!(config.default_row_limit, Some(500));

    let data_dir = PathBuf::from("/var/lib/vmc-test");
    assert_eq!(config.settings_path(), data_dir.join("settings.json"));
    assert_eq!(config.vault_path(), data_dir.join("vault.json"));
    assert_eq!(
        config.queue_database_url(),
        format!("sqlite:{}", data_dir.join("offline-queue.db").display())
    );
}

#[test]
#[serial]
fn test_explicit_tunnel_url_wins() {
    clear_env();
    env::set_var("VMC_TUNNEL_URL", "wss://tunnel.example.com/ws");
    let config = AgentConfig::from_env().unwrap();
    clear_env();
    assert_eq!(config.tunnel_url.as_str(), "wss://tunnel.example.com/ws");
}

#[test]
#[serial]
fn test_invalid_values_are_config_errors() {
    for (var, value) in [
        ("VMC_CONTROL_PLANE_URL", "not a url"),
        ("VMC_CONTROL_PLANE_URL", "ftp://example.com"),
        ("VMC_MAX_RECONNECT_ATTEMPTS", "many"),
        ("VMC_HEARTBEAT_INTERVAL_SECS", "0"),
        ("VMC_DEFAULT_ROW_LIMIT", "-1"),
    ] {
        clear_env();
        env::set_var(var, value);
        let err = AgentConfig::from_env().unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigError, "{var}={value}");
    }
    clear_env();
}
