// ABOUTME: Environment-driven agent configuration
// ABOUTME: Reads control plane URLs, data directory, timing and reporting knobs from VMC_* variables
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::constants::{control_plane, files, heartbeat, service, tunnel};
use crate::errors::{AppError, AppResult};
use crate::logging::LogConfig;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Complete agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// REST base URL of the control plane
    pub control_plane_url: Url,
    /// WebSocket endpoint of the tunnel
    pub tunnel_url: Url,
    /// Directory holding settings, vault and queue database
    pub data_dir: PathBuf,
    /// API key override (takes precedence over the settings file)
    pub api_key: Option<String>,
    /// Tunnel behaviour
    pub tunnel: TunnelConfig,
    /// Heartbeat behaviour
    pub heartbeat: HeartbeatConfig,
    /// Optional row cap for query specs without a limit
    pub default_row_limit: Option<u64>,
    /// Logging
    pub log: LogConfig,
}

/// Tunnel timing
#[derive(Debug, Clone, Copy)]
pub struct TunnelConfig {
    /// Handshake timeout
    pub connect_timeout: Duration,
    /// First reconnect delay, doubled per attempt
    pub reconnect_base_delay: Duration,
    /// Attempts before `reconnect_failed`
    pub max_reconnect_attempts: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(tunnel::CONNECT_TIMEOUT_SECS),
            reconnect_base_delay: Duration::from_millis(tunnel::RECONNECT_BASE_DELAY_MS),
            max_reconnect_attempts: tunnel::MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Heartbeat reporter settings
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Period between heartbeats
    pub interval: Duration,
    /// Concurrency figure reported to the control plane (never enforced)
    pub max_concurrent_jobs: u32,
    /// Endpoint used for the best-effort public IP lookup
    pub ip_lookup_url: String,
    /// Timeout for the IP lookup
    pub ip_lookup_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(heartbeat::INTERVAL_SECS),
            max_concurrent_jobs: heartbeat::DEFAULT_MAX_CONCURRENT_JOBS,
            ip_lookup_url: heartbeat::DEFAULT_IP_LOOKUP_URL.to_owned(),
            ip_lookup_timeout: Duration::from_secs(heartbeat::IP_LOOKUP_TIMEOUT_SECS),
        }
    }
}

fn parse_env<T: FromStr>(name: &str) -> AppResult<Option<T>>
where
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| AppError::config(format!("Invalid value for {name}: {e}"))),
        _ => Ok(None),
    }
}

fn parse_url(name: &str, raw: &str) -> AppResult<Url> {
    Url::parse(raw).map_err(|e| AppError::config(format!("Invalid URL in {name}: {e}")))
}

/// Derive the tunnel URL from the control plane URL (`https` -> `wss`)
///
/// # Errors
///
/// Returns an error if the control plane URL uses an unsupported scheme
pub fn derive_tunnel_url(control_plane_url: &Url) -> AppResult<Url> {
    let scheme = match control_plane_url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(AppError::config(format!(
                "Unsupported control plane scheme: {other}"
            )))
        }
    };
    let mut url = control_plane_url.clone();
    url.set_scheme(scheme)
        .map_err(|()| AppError::config("Failed to derive tunnel URL scheme"))?;
    url.set_path(tunnel::DEFAULT_TUNNEL_PATH);
    url.set_query(None);
    Ok(url)
}

/// Platform default data directory
#[must_use]
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join(service::SERVICE_NAME)
}

impl AgentConfig {
    /// Load configuration from the environment
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is present but invalid
    pub fn from_env() -> AppResult<Self> {
        let control_plane_raw = env::var("VMC_CONTROL_PLANE_URL")
            .unwrap_or_else(|_| control_plane::DEFAULT_BASE_URL.to_owned());
        let control_plane_url = parse_url("VMC_CONTROL_PLANE_URL", &control_plane_raw)?;

        let tunnel_url = match env::var("VMC_TUNNEL_URL") {
            Ok(raw) if !raw.trim().is_empty() => parse_url("VMC_TUNNEL_URL", raw.trim())?,
            _ => derive_tunnel_url(&control_plane_url)?,
        };

        let data_dir = env::var("VMC_DATA_DIR")
            .ok()
            .filter(|d| !d.trim().is_empty())
            .map_or_else(default_data_dir, PathBuf::from);

        let mut tunnel = TunnelConfig::default();
        if let Some(secs) = parse_env::<u64>("VMC_CONNECT_TIMEOUT_SECS")? {
            tunnel.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_env::<usize>("VMC_MAX_RECONNECT_ATTEMPTS")? {
            tunnel.max_reconnect_attempts = attempts;
        }

        let mut heartbeat = HeartbeatConfig::default();
        if let Some(secs) = parse_env::<u64>("VMC_HEARTBEAT_INTERVAL_SECS")? {
            if secs == 0 {
                return Err(AppError::config(
                    "VMC_HEARTBEAT_INTERVAL_SECS must be greater than zero",
                ));
            }
            heartbeat.interval = Duration::from_secs(secs);
        }
        if let Some(jobs) = parse_env::<u32>("VMC_MAX_CONCURRENT_JOBS")? {
            heartbeat.max_concurrent_jobs = jobs;
        }
        if let Ok(url) = env::var("VMC_IP_LOOKUP_URL") {
            heartbeat.ip_lookup_url = url;
        }

        Ok(Self {
            control_plane_url,
            tunnel_url,
            data_dir,
            api_key: env::var("VMC_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            tunnel,
            heartbeat,
            default_row_limit: parse_env::<u64>("VMC_DEFAULT_ROW_LIMIT")?,
            log: LogConfig::from_env()?,
        })
    }

    /// Path of the settings file
    #[must_use]
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(files::SETTINGS_FILE)
    }

    /// Path of the credential vault
    #[must_use]
    pub fn vault_path(&self) -> PathBuf {
        self.data_dir.join(files::VAULT_FILE)
    }

    /// `SQLite` URL of the offline queue database
    #[must_use]
    pub fn queue_database_url(&self) -> String {
        format!(
            "sqlite:{}",
            self.data_dir.join(files::QUEUE_DATABASE_FILE).display()
        )
    }
}
