// ABOUTME: Integration tests for the settings file and the aggregator registry stored in it
// ABOUTME: Partial saves, reset, CRUD on targets and conversion to database configs
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use anyhow::Result;
use common::{init_test_logging, test_machine_key};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::fs;
use uuid::Uuid;
use vmc_connector::aggregators::{AggregatorStore, AggregatorUpdate, NewAggregator};
use vmc_connector::config::{SettingsStore, SettingsUpdate};
use vmc_connector::errors::ErrorCode;
use vmc_connector::query_engine::DatabaseEngine;
use vmc_connector::vault::{CredentialKind, CredentialVault, NewCredential};

fn mysql_target(name: &str) -> NewAggregator {
    NewAggregator {
        name: name.to_owned(),
        engine: DatabaseEngine::Mysql,
        host: "10.0.0.5".to_owned(),
        port: Some(3306),
        database: "erp".to_owned(),
        username: None,
        credential_id: None,
    }
}

#[tokio::test]
async fn test_settings_default_save_and_reset() -> Result<()> {
    init_test_logging();
    let dir = TempDir::new()?;
    let path = dir.path().join("settings.json");
    let store = SettingsStore::new(&path);

    let empty = store.load().await?;
    assert!(empty.api_key.is_none());
    assert!(empty.aggregators.is_empty());
    assert!(!path.exists());

    store
        .save(SettingsUpdate {
            api_key: Some("vmc_abc".to_owned()),
            ..SettingsUpdate::default()
        })
        .await?;
    // fields not named in the update are left alone
    let saved = store.save(SettingsUpdate::default()).await?;
    assert_eq!(saved.api_key.as_deref(), Some("vmc_abc"));

    let reopened = SettingsStore::new(&path).load().await?;
    assert_eq!(reopened, saved);

    let reset = store.reset().await?;
    assert!(reset.api_key.is_none());
    assert!(!path.exists());
    store.reset().await?;
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_settings_file_is_owner_only() -> Result<()> {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new()?;
    let path = dir.path().join("settings.json");
    SettingsStore::new(&path)
        .save(SettingsUpdate {
            api_key: Some("vmc_abc".to_owned()),
            ..SettingsUpdate::default()
        })
        .await?;
    let mode = fs::metadata(&path)?.permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    Ok(())
}

#[tokio::test]
async fn test_corrupt_settings_file_is_a_persistence_error() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("settings.json");
    fs::write(&path, "{not json").await?;
    let err = SettingsStore::new(&path).load().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PersistenceFailed);
    Ok(())
}

#[tokio::test]
async fn test_aggregator_lifecycle() -> Result<()> {
    let dir = TempDir::new()?;
    let settings = Arc::new(SettingsStore::new(dir.path().join("settings.json")));
    let store = AggregatorStore::new(Arc::clone(&settings));

    assert!(store.first().await?.is_none());
    let erp = store.add(mysql_target("erp")).await?;
    let crm = store.add(mysql_target("crm")).await?;

    let names: Vec<String> = store.list().await?.into_iter().map(|a| a.name).collect();
    assert_eq!(names, vec!["erp", "crm"]);
    assert_eq!(store.first().await?.unwrap().id, erp.id);
    assert_eq!(store.get_by_id(crm.id).await?.unwrap().name, "crm");

    let updated = store
        .update(
            crm.id,
            AggregatorUpdate {
                host: Some("10.0.0.9".to_owned()),
                username: Some("reporting".to_owned()),
                ..AggregatorUpdate::default()
            },
        )
        .await?;
    assert_eq!(updated.host, "10.0.0.9");
    assert_eq!(updated.port, Some(3306));
    assert_eq!(updated.username.as_deref(), Some("reporting"));
    assert!(updated.updated_at >= crm.updated_at);
    assert_eq!(updated.created_at, crm.created_at);

    let removed = store.delete(erp.id).await?.unwrap();
    assert_eq!(removed.id, erp.id);
    assert!(store.delete(erp.id).await?.is_none());
    assert_eq!(store.first().await?.unwrap().id, crm.id);

    // the registry lives in the shared settings document
    assert_eq!(settings.load().await?.aggregators.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_aggregator_validation_and_missing_ids() -> Result<()> {
    let dir = TempDir::new()?;
    let store = AggregatorStore::new(Arc::new(SettingsStore::new(
        dir.path().join("settings.json"),
    )));

    let blank_name = store.add(mysql_target("  ")).await.unwrap_err();
    assert_eq!(blank_name.code, ErrorCode::InvalidInput);

    let mut no_database = mysql_target("erp");
    no_database.database = String::new();
    assert_eq!(
        store.add(no_database).await.unwrap_err().code,
        ErrorCode::InvalidInput
    );

    let unknown = store
        .update(Uuid::new_v4(), AggregatorUpdate::default())
        .await
        .unwrap_err();
    assert_eq!(unknown.code, ErrorCode::ResourceNotFound);
    assert!(store.list().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_database_config_takes_secret_from_credential() -> Result<()> {
    let dir = TempDir::new()?;
    let store = AggregatorStore::new(Arc::new(SettingsStore::new(
        dir.path().join("settings.json"),
    )));
    let vault = CredentialVault::new(dir.path().join("vault.json"), test_machine_key());

    let login = vault
        .store(NewCredential {
            name: "erp login".to_owned(),
            username: Some("svc_erp".to_owned()),
            password: Some("s3cret".to_owned()),
            ..NewCredential::default()
        })
        .await?;
    let token = vault
        .store(NewCredential {
            name: "erp token".to_owned(),
            kind: CredentialKind::Token,
            token: Some("tok-1".to_owned()),
            ..NewCredential::default()
        })
        .await?;

    let mut with_login = mysql_target("erp");
    with_login.credential_id = Some(login);
    let with_login = store.add(with_login).await?;
    let credential = vault.require(login).await?;
    let config = with_login.database_config(Some(&credential));
    assert_eq!(config.engine, Some(DatabaseEngine::Mysql));
    assert_eq!(config.port, Some(3306));
    assert_eq!(config.username.as_deref(), Some("svc_erp"));
    assert_eq!(config.password.as_deref(), Some("s3cret"));

    // an explicit username on the target wins over the credential's
    let mut explicit = mysql_target("erp-ro");
    explicit.username = Some("readonly".to_owned());
    let explicit = store.add(explicit).await?;
    let token_credential = vault.require(token).await?;
    let config = explicit.database_config(Some(&token_credential));
    assert_eq!(config.username.as_deref(), Some("readonly"));
    assert_eq!(config.password.as_deref(), Some("tok-1"));

    let bare = explicit.database_config(None);
    assert!(bare.password.is_none());
    Ok(())
}
