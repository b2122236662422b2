// ABOUTME: Registered local database targets ("aggregators") persisted in the settings file
// ABOUTME: Provides list, add, update, delete and lookup by id, plus conversion to a database config
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::config::SettingsStore;
use crate::errors::{AppError, AppResult};
use crate::query_engine::{DatabaseConfig, DatabaseEngine};
use crate::vault::Credential;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// A registered database target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorConfig {
    /// Aggregator id, referenced by a command's `connectionId`
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Engine
    #[serde(rename = "type")]
    pub engine: DatabaseEngine,
    /// Host
    #[serde(default)]
    pub host: String,
    /// Port
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name or `SQLite` file path
    pub database: String,
    /// Login
    #[serde(default)]
    pub username: Option<String>,
    /// Vault entry holding the secret
    #[serde(default)]
    pub credential_id: Option<Uuid>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl AggregatorConfig {
    /// Database config for this target, with the secret from its credential
    #[must_use]
    pub fn database_config(&self, credential: Option<&Credential>) -> DatabaseConfig {
        DatabaseConfig {
            engine: Some(self.engine),
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            username: self
                .username
                .clone()
                .or_else(|| credential.and_then(|c| c.metadata.username.clone())),
            password: credential.and_then(|c| c.password.clone().or_else(|| c.token.clone())),
        }
    }
}

/// Fields supplied when registering a target
#[derive(Debug, Clone)]
pub struct NewAggregator {
    /// Display name
    pub name: String,
    /// Engine
    pub engine: DatabaseEngine,
    /// Host
    pub host: String,
    /// Port
    pub port: Option<u16>,
    /// Database
    pub database: String,
    /// Login
    pub username: Option<String>,
    /// Vault entry
    pub credential_id: Option<Uuid>,
}

/// Partial update of a target; `None` leaves the field unchanged
#[derive(Debug, Clone, Default)]
pub struct AggregatorUpdate {
    /// New display name
    pub name: Option<String>,
    /// New host
    pub host: Option<String>,
    /// New port
    pub port: Option<u16>,
    /// New database
    pub database: Option<String>,
    /// New login
    pub username: Option<String>,
    /// New vault entry
    pub credential_id: Option<Uuid>,
}

/// Aggregator store backed by the settings file
#[derive(Debug, Clone)]
pub struct AggregatorStore {
    settings: Arc<SettingsStore>,
}

impl AggregatorStore {
    /// Store sharing the given settings
    #[must_use]
    pub const fn new(settings: Arc<SettingsStore>) -> Self {
        Self { settings }
    }

    /// Every registered target, in registration order
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be read
    pub async fn list(&self) -> AppResult<Vec<AggregatorConfig>> {
        Ok(self.settings.load().await?.aggregators)
    }

    /// Target by id
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be read
    pub async fn get_by_id(&self, id: Uuid) -> AppResult<Option<AggregatorConfig>> {
        Ok(self.list().await?.into_iter().find(|a| a.id == id))
    }

    /// First registered target, the default for commands without `connectionId`
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be read
    pub async fn first(&self) -> AppResult<Option<AggregatorConfig>> {
        Ok(self.list().await?.into_iter().next())
    }

    /// Register a new target
    ///
    /// # Errors
    ///
    /// Returns an invalid input error for a blank name or database, or a
    /// persistence error if the settings cannot be written
    pub async fn add(&self, new: NewAggregator) -> AppResult<AggregatorConfig> {
        if new.name.trim().is_empty() || new.database.trim().is_empty() {
            return Err(AppError::invalid_input(
                "Aggregator requires a name and a database",
            ));
        }
        let now = Utc::now();
        let aggregator = AggregatorConfig {
            id: Uuid::new_v4(),
            name: new.name,
            engine: new.engine,
            host: new.host,
            port: new.port,
            database: new.database,
            username: new.username,
            credential_id: new.credential_id,
            created_at: now,
            updated_at: now,
        };
        let stored = aggregator.clone();
        self.settings
            .update(move |settings| {
                settings.aggregators.push(stored);
                Ok(())
            })
            .await?;
        info!(aggregator_id = %aggregator.id, engine = %aggregator.engine, "Aggregator added");
        Ok(aggregator)
    }

    /// Apply a partial update
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown ids
    pub async fn update(&self, id: Uuid, update: AggregatorUpdate) -> AppResult<AggregatorConfig> {
        self.settings
            .update(move |settings| {
                let aggregator = settings
                    .aggregators
                    .iter_mut()
                    .find(|a| a.id == id)
                    .ok_or_else(|| AppError::not_found(format!("Aggregator {id} not found")))?;
                if let Some(name) = update.name {
                    aggregator.name = name;
                }
                if let Some(host) = update.host {
                    aggregator.host = host;
                }
                if let Some(port) = update.port {
                    aggregator.port = Some(port);
                }
                if let Some(database) = update.database {
                    aggregator.database = database;
                }
                if let Some(username) = update.username {
                    aggregator.username = Some(username);
                }
                if let Some(credential_id) = update.credential_id {
                    aggregator.credential_id = Some(credential_id);
                }
                aggregator.updated_at = Utc::now();
                Ok(aggregator.clone())
            })
            .await
    }

    /// Remove a target, returning it if it existed
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the settings cannot be written
    pub async fn delete(&self, id: Uuid) -> AppResult<Option<AggregatorConfig>> {
        let removed = self
            .settings
            .update(move |settings| {
                let position = settings.aggregators.iter().position(|a| a.id == id);
                Ok(position.map(|idx| settings.aggregators.remove(idx)))
            })
            .await?;
        if removed.is_some() {
            info!(aggregator_id = %id, "Aggregator removed");
        }
        Ok(removed)
    }
}
