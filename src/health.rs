// ABOUTME: Host metrics sampling for heartbeats: CPU and memory usage, OS and host name
// ABOUTME: Keeps one sysinfo handle so CPU usage is measured between consecutive samples
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::constants::heartbeat::BUSY_THRESHOLD_PERCENT;
use crate::tunnel::protocol::AgentStatus;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use sysinfo::{System, MINIMUM_CPU_UPDATE_INTERVAL};
use tokio::time::sleep;

/// One sample of host load and identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMetrics {
    /// CPU usage across all cores, percent
    pub cpu_usage: f64,
    /// Memory in use, percent
    pub memory_usage: f64,
    /// Operating system description
    pub os: String,
    /// Host name
    pub hostname: String,
}

impl HostMetrics {
    /// `busy` when CPU or memory is above the threshold
    #[must_use]
    pub fn status(&self) -> AgentStatus {
        derive_status(self.cpu_usage, self.memory_usage)
    }
}

/// Load status for the given usage percentages
#[must_use]
pub fn derive_status(cpu_usage: f64, memory_usage: f64) -> AgentStatus {
    if cpu_usage > BUSY_THRESHOLD_PERCENT || memory_usage > BUSY_THRESHOLD_PERCENT {
        AgentStatus::Busy
    } else {
        AgentStatus::Online
    }
}

/// Local host name, `unknown` when it cannot be read
#[must_use]
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_owned())
}

/// Operating system description
#[must_use]
pub fn os_description() -> String {
    System::long_os_version().unwrap_or_else(|| env::consts::OS.to_owned())
}

/// Samples host metrics
#[derive(Debug)]
pub struct MetricsSampler {
    system: Mutex<System>,
    primed: AtomicBool,
}

impl Default for MetricsSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSampler {
    /// Sampler with an empty baseline
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            primed: AtomicBool::new(false),
        }
    }

    fn refresh(&self) -> (f64, f64) {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpu = f64::from(system.global_cpu_usage());
        let total = system.total_memory();
        let memory = if total == 0 {
            0.0
        } else {
            system.used_memory() as f64 / total as f64 * 100.0
        };
        drop(system);
        (cpu, memory)
    }

    /// Take a sample; CPU usage covers the time since the previous one
    ///
    /// The first call waits for the minimum CPU measurement window.
    pub async fn sample(&self) -> HostMetrics {
        if !self.primed.swap(true, Ordering::SeqCst) {
            self.refresh();
            sleep(MINIMUM_CPU_UPDATE_INTERVAL).await;
        }
        let (cpu_usage, memory_usage) = self.refresh();
        HostMetrics {
            cpu_usage,
            memory_usage,
            os: os_description(),
            hostname: local_hostname(),
        }
    }
}
