// ABOUTME: Application constants for timing, thresholds and wire vocabulary
// ABOUTME: Central place for tunnel, heartbeat, query engine and key format values
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// Service identity
pub mod service {
    /// Name reported in heartbeats and logs
    pub const SERVICE_NAME: &str = "vmc-connector";
    /// Crate version reported in heartbeats
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// API key format constants
pub mod api_key {
    /// Literal key prefix
    pub const PREFIX: &str = "vmc";
    /// Minimum number of hex characters in the random segment
    pub const MIN_RANDOM_HEX_LEN: usize = 16;
    /// Number of hex characters in the checksum segment
    pub const CHECKSUM_HEX_LEN: usize = 4;
    /// Random bytes drawn when generating a key (hex doubles the length)
    pub const GENERATED_RANDOM_BYTES: usize = 16;
}

/// Tunnel lifecycle timing
pub mod tunnel {
    /// Default connect timeout in seconds
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
    /// Base reconnect delay in milliseconds (doubles per attempt)
    pub const RECONNECT_BASE_DELAY_MS: u64 = 1_000;
    /// Reconnect attempts before giving up
    pub const MAX_RECONNECT_ATTEMPTS: usize = 10;
    /// Capacity of the event broadcast channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
    /// Capacity of the outbound message channel per link
    pub const OUTBOUND_CHANNEL_CAPACITY: usize = 128;
    /// Path appended to the control-plane URL when deriving the tunnel URL
    pub const DEFAULT_TUNNEL_PATH: &str = "/connector/tunnel";
}

/// Wire event names, shared by both directions of the tunnel
pub mod events {
    /// Agent -> control plane: periodic health payload
    pub const HEARTBEAT: &str = "heartbeat";
    /// Agent -> control plane: result of a command
    pub const COMMAND_RESPONSE: &str = "command_response";
    /// Control plane -> agent: unit of work
    pub const COMMAND: &str = "command";
    /// Control plane -> agent: key accepted
    pub const AUTHENTICATED: &str = "authenticated";
    /// Control plane -> agent: key rejected
    pub const AUTHENTICATION_FAILED: &str = "authentication_failed";
    /// Control plane -> agent: heartbeat received
    pub const HEARTBEAT_ACK: &str = "heartbeat_ack";
}

/// Heartbeat reporter settings
pub mod heartbeat {
    /// Default interval between heartbeats
    pub const INTERVAL_SECS: u64 = 30;
    /// Timeout for the outbound IP lookup
    pub const IP_LOOKUP_TIMEOUT_SECS: u64 = 2;
    /// CPU or memory usage above this percentage reports `busy`
    pub const BUSY_THRESHOLD_PERCENT: f64 = 80.0;
    /// Default concurrency figure reported to the control plane
    pub const DEFAULT_MAX_CONCURRENT_JOBS: u32 = 5;
    /// Default public IP lookup endpoint
    pub const DEFAULT_IP_LOOKUP_URL: &str = "https://api.ipify.org?format=json";
}

/// Query engine limits
pub mod query {
    /// Rows fetched per page while streaming
    pub const STREAM_BATCH_SIZE: u64 = 1_000;
    /// Row limit used by table previews
    pub const PREVIEW_LIMIT: u64 = 10;
    /// Maximum connections per pool
    pub const MAX_POOL_CONNECTIONS: u32 = 5;
    /// Seconds to wait for a pooled connection
    pub const POOL_ACQUIRE_TIMEOUT_SECS: u64 = 30;
}

/// REST side-channel paths
pub mod control_plane {
    /// Default control plane base URL
    pub const DEFAULT_BASE_URL: &str = "https://app.vmc.dev";
    /// API key validation endpoint
    pub const VALIDATE_API_KEY_PATH: &str = "/api/public/connectors/validate-api-key";
    /// Request timeout for REST calls
    pub const REQUEST_TIMEOUT_SECS: u64 = 15;
}

/// Local file names inside the data directory
pub mod files {
    /// Settings file
    pub const SETTINGS_FILE: &str = "settings.json";
    /// Credential vault file
    pub const VAULT_FILE: &str = "vault.json";
    /// Offline queue database
    pub const QUEUE_DATABASE_FILE: &str = "offline-queue.db";
}
