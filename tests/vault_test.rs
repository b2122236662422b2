// ABOUTME: Integration tests for the encrypted credential vault
// ABOUTME: Covers store/retrieve, listing without secrets, deletion, tampering and foreign keys
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use anyhow::Result;
use common::{init_test_logging, test_machine_key};
use serde_json::Value;
use std::fs;
use tempfile::TempDir;
use uuid::Uuid;
use vmc_connector::crypto::MachineKey;
use vmc_connector::vault::{CredentialKind, CredentialVault, NewCredential};

fn reader_credential() -> NewCredential {
    NewCredential {
        name: "sales-replica".to_owned(),
        kind: CredentialKind::Database,
        host: Some("db.internal".to_owned()),
        port: Some(5432),
        database: Some("sales".to_owned()),
        username: Some("reader".to_owned()),
        password: Some("s3cret!".to_owned()),
        token: None,
    }
}

#[tokio::test]
async fn test_store_and_retrieve_round_trip() -> Result<()> {
    init_test_logging();
    let dir = TempDir::new()?;
    let vault = CredentialVault::new(dir.path().join("vault.json"), test_machine_key());

    let id = vault.store(reader_credential()).await?;
    let credential = vault.retrieve(id).await?.expect("credential stored");

    assert_eq!(credential.metadata.id, id);
    assert_eq!(credential.metadata.name, "sales-replica");
    assert_eq!(credential.metadata.username.as_deref(), Some("reader"));
    assert_eq!(credential.password.as_deref(), Some("s3cret!"));
    assert!(credential.token.is_none());
    Ok(())
}

#[tokio::test]
async fn test_secrets_are_not_stored_in_clear() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("vault.json");
    let vault = CredentialVault::new(&path, test_machine_key());
    vault.store(reader_credential()).await?;

    let raw = fs::read_to_string(&path)?;
    assert!(!raw.contains("s3cret!"));
    assert!(raw.contains("sales-replica"));
    assert!(raw.contains("ciphertext"));
    Ok(())
}

#[tokio::test]
async fn test_retrieve_stamps_last_used() -> Result<()> {
    let dir = TempDir::new()?;
    let vault = CredentialVault::new(dir.path().join("vault.json"), test_machine_key());
    let id = vault.store(reader_credential()).await?;

    let before = vault.list().await?;
    assert!(before[0].last_used_at.is_none());

    vault.retrieve(id).await?;
    let after = vault.list().await?;
    assert!(after[0].last_used_at.is_some());
    Ok(())
}

#[tokio::test]
async fn test_unknown_id_is_none_and_require_fails() -> Result<()> {
    let dir = TempDir::new()?;
    let vault = CredentialVault::new(dir.path().join("vault.json"), test_machine_key());

    assert!(vault.retrieve(Uuid::new_v4()).await?.is_none());
    assert!(vault.require(Uuid::new_v4()).await.is_err());
    assert!(vault.list().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_delete_and_clear() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("vault.json");
    let vault = CredentialVault::new(&path, test_machine_key());

    let first = vault.store(reader_credential()).await?;
    let second = vault
        .store(NewCredential {
            name: "api".to_owned(),
            kind: CredentialKind::Token,
            token: Some("tok-123".to_owned()),
            ..NewCredential::default()
        })
        .await?;
    assert_eq!(vault.list().await?.len(), 2);

    assert!(vault.delete(first).await?);
    assert!(!vault.delete(first).await?);
    let remaining = vault.list().await?;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, second);
    assert_eq!(remaining[0].kind, CredentialKind::Token);

    vault.clear().await?;
    assert!(!path.exists());
    assert!(vault.list().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_tampered_ciphertext_fails_to_decrypt() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("vault.json");
    let vault = CredentialVault::new(&path, test_machine_key());
    let id = vault.store(reader_credential()).await?;

    let mut document: Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
    let ciphertext = document[id.to_string()]["password"]["ciphertext"]
        .as_str()
        .unwrap()
        .to_owned();
    let flipped = if ciphertext.starts_with('0') { "1" } else { "0" };
    document[id.to_string()]["password"]["ciphertext"] =
        Value::String(format!("{flipped}{}", &ciphertext[1..]));
    fs::write(&path, serde_json::to_string(&document)?)?;

    assert!(vault.retrieve(id).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_vault_from_another_machine_cannot_be_read() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("vault.json");
    let id = CredentialVault::new(&path, test_machine_key())
        .store(reader_credential())
        .await?;

    let foreign = CredentialVault::new(&path, MachineKey::derive("some-other-machine")?);
    assert!(foreign.retrieve(id).await.is_err());
    // Metadata stays readable without the key
    assert_eq!(foreign.list().await?.len(), 1);
    Ok(())
}
