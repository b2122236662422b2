// ABOUTME: Integration tests for the agent wiring over fake transport and control plane
// ABOUTME: Commands reach the orchestrator through the tunnel, and reset clears settings, vault and pools
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use anyhow::Result;
use common::{
    closed_port_url, create_sqlite_fixture, init_test_logging, sqlite_config, test_api_key,
    test_machine_key, tunnel_url, FakeControlPlane, FakeTransport,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;
use url::Url;
use vmc_connector::agent::Agent;
use vmc_connector::aggregators::NewAggregator;
use vmc_connector::config::{AgentConfig, HeartbeatConfig, SettingsUpdate, TunnelConfig};
use vmc_connector::errors::ErrorCode;
use vmc_connector::logging::LogConfig;
use vmc_connector::query_engine::DatabaseEngine;
use vmc_connector::tunnel::ConnectionStatus;
use vmc_connector::vault::NewCredential;

async fn agent_config(data_dir: &Path, api_key: Option<String>) -> AgentConfig {
    AgentConfig {
        control_plane_url: Url::parse("http://control-plane.test/").unwrap(),
        tunnel_url: tunnel_url(),
        data_dir: data_dir.to_path_buf(),
        api_key,
        tunnel: TunnelConfig {
            reconnect_base_delay: Duration::from_secs(3_600),
            ..TunnelConfig::default()
        },
        heartbeat: HeartbeatConfig {
            ip_lookup_url: closed_port_url().await,
            ip_lookup_timeout: Duration::from_millis(500),
            ..HeartbeatConfig::default()
        },
        default_row_limit: None,
        log: LogConfig::default(),
    }
}

async fn agent(
    data_dir: &Path,
    api_key: Option<String>,
    transport: &Arc<FakeTransport>,
    control_plane: &Arc<FakeControlPlane>,
) -> Agent {
    init_test_logging();
    Agent::with_parts(
        agent_config(data_dir, api_key).await,
        test_machine_key(),
        control_plane.clone(),
        transport.clone(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_started_agent_answers_tunnel_commands() -> Result<()> {
    let dir = TempDir::new()?;
    let transport = FakeTransport::accepting();
    let control_plane = FakeControlPlane::accepting("connector-1");
    let agent = agent(dir.path(), Some(test_api_key()), &transport, &control_plane).await;

    agent.start().await?;
    assert_eq!(agent.tunnel().state().status, ConnectionStatus::Connected);
    let mut remote = transport.take_remote();
    remote.send_event("authenticated", json!({})).await;
    remote
        .send_event(
            "command",
            json!({
                "commandId": "c-1",
                "executionId": "e-1",
                "activityId": "a-1",
                "operation": "get-databases",
                "payload": {}
            }),
        )
        .await;

    let response: Value = timeout(Duration::from_secs(5), async {
        loop {
            let envelope = remote.next_envelope().await;
            if envelope["event"] == "command_response" {
                return envelope;
            }
        }
    })
    .await?;
    assert_eq!(response["data"]["commandId"], "c-1");
    assert_eq!(response["data"]["response"]["success"], false);
    assert!(agent.orchestrator().queue().has_executed("c-1").await?);

    // the command stream has a single consumer
    let again = agent.start().await.unwrap_err();
    assert_eq!(again.code, ErrorCode::InternalError);

    agent.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_start_without_key_is_a_config_error() -> Result<()> {
    let dir = TempDir::new()?;
    let transport = FakeTransport::accepting();
    let agent = agent(
        dir.path(),
        None,
        &transport,
        &FakeControlPlane::accepting("c"),
    )
    .await;

    let err = agent.start().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ConfigError);
    assert_eq!(transport.open_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_reset_clears_settings_vault_and_pools() -> Result<()> {
    let dir = TempDir::new()?;
    let fixture_dir = TempDir::new()?;
    let fixture = create_sqlite_fixture(fixture_dir.path(), 3).await;
    let agent = agent(
        dir.path(),
        None,
        &FakeTransport::accepting(),
        &FakeControlPlane::accepting("c"),
    )
    .await;

    agent
        .settings()
        .save(SettingsUpdate {
            api_key: Some(test_api_key()),
            ..SettingsUpdate::default()
        })
        .await?;
    let credential_id = agent
        .vault()
        .store(NewCredential {
            name: "local".to_owned(),
            password: Some("pw".to_owned()),
            ..NewCredential::default()
        })
        .await?;
    agent
        .aggregators()
        .add(NewAggregator {
            name: "local".to_owned(),
            engine: DatabaseEngine::Sqlite,
            host: String::new(),
            port: None,
            database: fixture.display().to_string(),
            username: None,
            credential_id: Some(credential_id),
        })
        .await?;
    agent.engine().test_connection(&sqlite_config(&fixture)).await?;
    assert_eq!(agent.engine().pools().len(), 1);

    agent.reset().await?;

    let settings = agent.settings().load().await?;
    assert!(settings.api_key.is_none());
    assert!(settings.aggregators.is_empty());
    assert!(agent.vault().list().await?.is_empty());
    assert!(agent.vault().retrieve(credential_id).await?.is_none());
    assert!(agent.engine().pools().is_empty());
    assert_eq!(agent.tunnel().state().status, ConnectionStatus::Disconnected);

    // the queue survives so recorded results can still be delivered
    assert_eq!(agent.status().await?.pending_results, 0);
    Ok(())
}
