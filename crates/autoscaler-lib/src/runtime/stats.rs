//! Docker stats payload
//!
//! Decodes the body of `GET /containers/{id}/stats?stream=false`. Only the
//! fields needed for a [`RawUsageSnapshot`] are kept.

use crate::models::RawUsageSnapshot;
use serde::Deserialize;
use std::collections::HashMap;

/// Subset of the Docker stats response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DockerStats {
    #[serde(default)]
    pub memory_stats: MemoryStats,
    #[serde(default)]
    pub cpu_stats: CpuStats,
    #[serde(default)]
    pub precpu_stats: CpuStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryStats {
    #[serde(default)]
    pub usage: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub stats: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuStats {
    #[serde(default)]
    pub cpu_usage: CpuUsage,
    #[serde(default)]
    pub system_cpu_usage: u64,
    #[serde(default)]
    pub online_cpus: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuUsage {
    #[serde(default)]
    pub total_usage: u64,
    #[serde(default)]
    pub percpu_usage: Option<Vec<u64>>,
}

impl MemoryStats {
    /// Page cache bytes.
    ///
    /// cgroup v1 hosts report `cache`; cgroup v2 hosts only report
    /// `inactive_file`.
    pub fn cache_bytes(&self) -> u64 {
        self.stats
            .get("cache")
            .or_else(|| self.stats.get("total_inactive_file"))
            .or_else(|| self.stats.get("inactive_file"))
            .copied()
            .unwrap_or(0)
    }
}

impl DockerStats {
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Flatten into the counters the metrics deriver consumes
    pub fn to_raw(&self) -> RawUsageSnapshot {
        let online_cpu_count = if self.cpu_stats.online_cpus > 0 {
            self.cpu_stats.online_cpus
        } else {
            self.cpu_stats
                .cpu_usage
                .percpu_usage
                .as_ref()
                .map(|v| v.len() as u32)
                .unwrap_or(0)
        };

        RawUsageSnapshot {
            memory_used_bytes: self.memory_stats.usage,
            memory_cache_bytes: self.memory_stats.cache_bytes(),
            memory_limit_bytes: self.memory_stats.limit,
            cpu_total_usage: self.cpu_stats.cpu_usage.total_usage,
            pre_cpu_total_usage: self.precpu_stats.cpu_usage.total_usage,
            system_cpu_usage: self.cpu_stats.system_cpu_usage,
            pre_system_cpu_usage: self.precpu_stats.system_cpu_usage,
            online_cpu_count,
        }
    }
}
