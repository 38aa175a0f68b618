//! Health-check result shapes shared by all adapters.

use serde::{Deserialize, Serialize};

/// Probe budget: a round trip slower than this is reported as timed out.
pub const PROBE_TIMEOUT_MS: u64 = 2_000;

/// A round trip slower than this (but within budget) is `Degraded`.
pub const DEGRADED_LATENCY_MS: u64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Approximate storage footprint of an adapter's backing medium.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StorageUsage {
    /// Bytes currently held by the backend (best effort).
    pub used_bytes: u64,
    /// Bytes still available, where the backend can tell.
    pub available_bytes: Option<u64>,
}

/// Result of a health probe against one adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub latency_ms: u64,
    pub usage: StorageUsage,
    /// Present when the probe failed or timed out.
    pub error: Option<String>,
}

impl HealthReport {
    pub fn healthy(latency_ms: u64, usage: StorageUsage) -> Self {
        let status = if latency_ms > DEGRADED_LATENCY_MS {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        HealthReport {
            status,
            latency_ms,
            usage,
            error: None,
        }
    }

    pub fn unhealthy(latency_ms: u64, error: impl Into<String>) -> Self {
        HealthReport {
            status: HealthStatus::Unhealthy,
            latency_ms,
            usage: StorageUsage::default(),
            error: Some(error.into()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
