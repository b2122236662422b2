// ABOUTME: Credential vault storing database secrets encrypted with the machine-bound key
// ABOUTME: Secrets are encrypted per field with their own IV; metadata stays readable
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Credential vault
//!
//! The vault is a single JSON document mapping credential ids to entries.
//! Password and token fields are encrypted independently with
//! [`MachineKey`], everything else is stored in the clear so that
//! [`CredentialVault::list`] never needs the key. Every mutation rewrites
//! the whole file through a temp file and a rename; a crash in the middle
//! of the rename window can still leave a stale temp file behind.

use crate::crypto::{EncryptedSecret, MachineKey};
use crate::errors::{AppError, AppResult};
use crate::storage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What the credential authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Username/password database login
    #[default]
    Database,
    /// Bearer or API token
    Token,
}

/// Credential as submitted by the operator
#[derive(Clone, Default)]
pub struct NewCredential {
    /// Display name
    pub name: String,
    /// Credential kind
    pub kind: CredentialKind,
    /// Database host
    pub host: Option<String>,
    /// Database port
    pub port: Option<u16>,
    /// Database name
    pub database: Option<String>,
    /// Login name
    pub username: Option<String>,
    /// Secret password
    pub password: Option<String>,
    /// Secret token
    pub token: Option<String>,
}

impl fmt::Debug for NewCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewCredential")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Non-secret view of a vault entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialMetadata {
    /// Credential id
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Credential kind
    #[serde(rename = "type")]
    pub kind: CredentialKind,
    /// Database host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Database port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Database name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Login name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last successful retrieval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Entry as persisted in the vault file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VaultEntry {
    #[serde(flatten)]
    metadata: CredentialMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<EncryptedSecret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<EncryptedSecret>,
}

/// Decrypted credential returned by [`CredentialVault::retrieve`]
#[derive(Clone)]
pub struct Credential {
    /// Non-secret fields
    pub metadata: CredentialMetadata,
    /// Decrypted password
    pub password: Option<String>,
    /// Decrypted token
    pub token: Option<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("metadata", &self.metadata)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

type VaultDocument = BTreeMap<Uuid, VaultEntry>;

/// Encrypted credential store
pub struct CredentialVault {
    path: PathBuf,
    key: MachineKey,
    lock: Mutex<()>,
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Open a vault file with the given key (the file is created on first store)
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, key: MachineKey) -> Self {
        Self {
            path: path.into(),
            key,
            lock: Mutex::new(()),
        }
    }

    /// Location of the vault file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> AppResult<VaultDocument> {
        Ok(storage::read_json(&self.path).await?.unwrap_or_default())
    }

    fn encrypt_field(&self, value: Option<&str>) -> AppResult<Option<EncryptedSecret>> {
        value.map(|v| self.key.encrypt(v)).transpose()
    }

    fn decrypt_field(&self, value: Option<&EncryptedSecret>) -> AppResult<Option<String>> {
        value.map(|v| self.key.decrypt(v)).transpose()
    }

    /// Encrypt and persist a credential, returning its new id
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or the file write fails
    pub async fn store(&self, credential: NewCredential) -> AppResult<Uuid> {
        let _guard = self.lock.lock().await;
        let mut document = self.load().await?;

        let id = Uuid::new_v4();
        let entry = VaultEntry {
            metadata: CredentialMetadata {
                id,
                name: credential.name,
                kind: credential.kind,
                host: credential.host,
                port: credential.port,
                database: credential.database,
                username: credential.username,
                created_at: Utc::now(),
                last_used_at: None,
            },
            password: self.encrypt_field(credential.password.as_deref())?,
            token: self.encrypt_field(credential.token.as_deref())?,
        };
        document.insert(id, entry);
        storage::write_json_private(&self.path, &document).await?;

        info!(credential_id = %id, "Stored credential in vault");
        Ok(id)
    }

    /// Decrypt a credential and stamp its `lastUsedAt`
    ///
    /// # Errors
    ///
    /// Returns an error if decryption fails (tampered file or another
    /// machine's vault) or the timestamp cannot be persisted
    pub async fn retrieve(&self, id: Uuid) -> AppResult<Option<Credential>> {
        let _guard = self.lock.lock().await;
        let mut document = self.load().await?;
        let Some(entry) = document.get_mut(&id) else {
            debug!(credential_id = %id, "Credential not found");
            return Ok(None);
        };

        let password = self.decrypt_field(entry.password.as_ref())?;
        let token = self.decrypt_field(entry.token.as_ref())?;
        entry.metadata.last_used_at = Some(Utc::now());
        let metadata = entry.metadata.clone();

        if let Err(e) = storage::write_json_private(&self.path, &document).await {
            warn!(credential_id = %id, error = %e, "Failed to record credential use");
            return Err(e);
        }

        Ok(Some(Credential {
            metadata,
            password,
            token,
        }))
    }

    /// Non-secret metadata of every stored credential
    ///
    /// # Errors
    ///
    /// Returns an error if the vault file cannot be read
    pub async fn list(&self) -> AppResult<Vec<CredentialMetadata>> {
        let document = self.load().await?;
        Ok(document.into_values().map(|e| e.metadata).collect())
    }

    /// Remove one credential; returns whether it existed
    ///
    /// # Errors
    ///
    /// Returns an error if the vault file cannot be rewritten
    pub async fn delete(&self, id: Uuid) -> AppResult<bool> {
        let _guard = self.lock.lock().await;
        let mut document = self.load().await?;
        if document.remove(&id).is_none() {
            return Ok(false);
        }
        storage::write_json_private(&self.path, &document).await?;
        info!(credential_id = %id, "Deleted credential from vault");
        Ok(true)
    }

    /// Remove every credential
    ///
    /// # Errors
    ///
    /// Returns an error if the vault file cannot be removed
    pub async fn clear(&self) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        storage::remove_if_exists(&self.path).await?;
        info!("Vault cleared");
        Ok(())
    }

    /// Retrieve a credential that must exist
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the id is unknown
    pub async fn require(&self, id: Uuid) -> AppResult<Credential> {
        self.retrieve(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Credential {id} not found in vault")))
    }
}
