// ABOUTME: Persistent operator settings holding the API key and the registered aggregators
// ABOUTME: Exposes load, partial save and reset over an owner-only JSON file
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::aggregators::AggregatorConfig;
use crate::errors::AppResult;
use crate::storage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::info;

/// On-disk settings document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Connector API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Registered database targets
    #[serde(default)]
    pub aggregators: Vec<AggregatorConfig>,
}

/// Partial update applied by [`SettingsStore::save`]; `None` fields are left as-is
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    /// Replace the API key
    pub api_key: Option<String>,
    /// Replace the aggregator list
    pub aggregators: Option<Vec<AggregatorConfig>>,
}

/// File-backed settings store
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    /// Create a store backed by `path` (the file is created on first save)
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the settings file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, returning defaults when the file does not exist
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the file cannot be read or parsed
    pub async fn load(&self) -> AppResult<Settings> {
        Ok(storage::read_json(&self.path).await?.unwrap_or_default())
    }

    /// Merge the provided fields into the stored settings
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the file cannot be read or written
    pub async fn save(&self, update: SettingsUpdate) -> AppResult<Settings> {
        let _guard = self.write_lock.lock().await;
        let mut settings = self.load().await?;
        if let Some(api_key) = update.api_key {
            settings.api_key = Some(api_key);
        }
        if let Some(aggregators) = update.aggregators {
            settings.aggregators = aggregators;
        }
        storage::write_json_private(&self.path, &settings).await?;
        Ok(settings)
    }

    /// Apply `f` to the current settings under the write lock and persist the result
    ///
    /// # Errors
    ///
    /// Propagates errors from `f` and from persistence
    pub async fn update<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut Settings) -> AppResult<T> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut settings = self.load().await?;
        let out = f(&mut settings)?;
        storage::write_json_private(&self.path, &settings).await?;
        Ok(out)
    }

    /// Delete the settings file and return defaults
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the file exists but cannot be removed
    pub async fn reset(&self) -> AppResult<Settings> {
        let _guard = self.write_lock.lock().await;
        storage::remove_if_exists(&self.path).await?;
        info!(path = %self.path.display(), "Settings reset");
        Ok(Settings::default())
    }
}
