// ABOUTME: Owner-only JSON file persistence with write-to-temp-then-rename replacement
// ABOUTME: Shared by the settings store and the credential vault
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::errors::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Read and deserialize a JSON file, returning `None` when it does not exist
///
/// # Errors
///
/// Returns a persistence error on I/O failure or if the content is not
/// valid JSON for `T`
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> AppResult<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            AppError::persistence(format!("Corrupt file {}: {e}", path.display()))
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AppError::persistence(format!(
            "Failed to read {}: {e}",
            path.display()
        ))),
    }
}

/// Serialize `value` and replace `path` atomically with an owner-only file
///
/// # Errors
///
/// Returns a persistence error if any step of the write fails
pub async fn write_json_private<T: Serialize + Sync>(path: &Path, value: &T) -> AppResult<()> {
    let json = serde_json::to_vec_pretty(value)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            AppError::persistence(format!("Failed to create {}: {e}", parent.display()))
        })?;
    }

    let temp_path = path.with_extension("json.tmp");
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(&temp_path).await.map_err(|e| {
        AppError::persistence(format!("Failed to open {}: {e}", temp_path.display()))
    })?;
    file.write_all(&json).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temp_path, path).await.map_err(|e| {
        AppError::persistence(format!("Failed to replace {}: {e}", path.display()))
    })?;

    debug!(path = %path.display(), bytes = json.len(), "Wrote private file");
    Ok(())
}

/// Delete a file, treating a missing file as success
///
/// # Errors
///
/// Returns a persistence error on any other I/O failure
pub async fn remove_if_exists(path: &Path) -> AppResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AppError::persistence(format!(
            "Failed to remove {}: {e}",
            path.display()
        ))),
    }
}
