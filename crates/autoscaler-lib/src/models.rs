//! Core data models for the autoscaler

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Point-in-time cumulative usage counters for one instance.
///
/// The runtime returns both the current and the immediately preceding CPU
/// counters in a single stats response, so no history is kept between polls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawUsageSnapshot {
    pub memory_used_bytes: u64,
    pub memory_cache_bytes: u64,
    pub memory_limit_bytes: u64,
    pub cpu_total_usage: u64,
    pub pre_cpu_total_usage: u64,
    pub system_cpu_usage: u64,
    pub pre_system_cpu_usage: u64,
    pub online_cpu_count: u32,
}

/// Utilization derived from a [`RawUsageSnapshot`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub used_memory_bytes: u64,
    pub available_memory_bytes: u64,
    pub memory_utilization_pct: f64,
    pub cpu_utilization_pct: f64,
    pub online_cpu_count: u32,
}

impl UtilizationSample {
    /// Value of the given metric in percent
    pub fn value(&self, metric: UsageMetric) -> f64 {
        match metric {
            UsageMetric::Cpu => self.cpu_utilization_pct,
            UsageMetric::Memory => self.memory_utilization_pct,
        }
    }

    /// CPU utilization formatted for display, e.g. `"12.500%"`
    pub fn cpu_display(&self) -> String {
        format_pct(self.cpu_utilization_pct)
    }

    /// Memory utilization formatted for display
    pub fn memory_display(&self) -> String {
        format_pct(self.memory_utilization_pct)
    }
}

/// Format a percentage the way operators see it in logs and the CLI
pub fn format_pct(value: f64) -> String {
    format!("{:.3}%", value)
}

/// Utilization metric a decision or ranking is based on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageMetric {
    Cpu,
    #[default]
    Memory,
}

impl fmt::Display for UsageMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageMetric::Cpu => write!(f, "cpu"),
            UsageMetric::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for UsageMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(UsageMetric::Cpu),
            "memory" | "mem" => Ok(UsageMetric::Memory),
            other => Err(format!("unknown usage metric '{}'", other)),
        }
    }
}

/// Identity of a running instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceIdentity {
    /// Runtime-assigned opaque id
    pub id: String,
    /// Human-readable name, unique within the network
    pub name: String,
}

/// Per-instance utilization for one control-loop tick.
///
/// Keyed by instance name. Iteration order is unspecified; consumers that
/// need an order must sort.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetSnapshot {
    samples: HashMap<String, UtilizationSample>,
    /// Running instances whose sample could not be taken this tick
    skipped: Vec<String>,
    /// Runtime ids by instance name
    #[serde(default)]
    ids: HashMap<String, String>,
    /// Unix timestamp at which the snapshot was taken
    pub taken_at: i64,
}

impl FleetSnapshot {
    pub fn new() -> Self {
        Self {
            samples: HashMap::new(),
            skipped: Vec::new(),
            ids: HashMap::new(),
            taken_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Build a snapshot from complete samples
    pub fn from_samples<I, S>(samples: I) -> Self
    where
        I: IntoIterator<Item = (S, UtilizationSample)>,
        S: Into<String>,
    {
        let mut snapshot = Self::new();
        for (name, sample) in samples {
            snapshot.insert(name, sample);
        }
        snapshot
    }

    pub fn insert(&mut self, name: impl Into<String>, sample: UtilizationSample) {
        self.samples.insert(name.into(), sample);
    }

    /// Record a running instance that produced no usable sample
    pub fn mark_skipped(&mut self, name: impl Into<String>) {
        self.skipped.push(name.into());
    }

    pub fn set_id(&mut self, identity: &InstanceIdentity) {
        self.ids.insert(identity.name.clone(), identity.id.clone());
    }

    /// Runtime id of an instance, when the inspector saw it
    pub fn id_of(&self, name: &str) -> Option<&str> {
        self.ids.get(name).map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&UtilizationSample> {
        self.samples.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &UtilizationSample)> {
        self.samples.iter()
    }

    /// Number of sampled instances
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of running replicas, sampled or not
    pub fn running_count(&self) -> usize {
        self.samples.len() + self.skipped.len()
    }

    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Sampled instance names in ascending order
    pub fn sorted_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.samples.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Static description of the managed deployment.
///
/// Built once at startup and shared by every component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentTopology {
    /// Network segment the replicas and the load balancer are attached to
    pub network: String,
    /// Image new replicas are created from
    pub image: String,
    /// Name of the load balancer instance (never scaled)
    pub load_balancer: String,
    /// Port every replica serves on
    pub upstream_port: u16,
    /// nginx configuration file read by the load balancer
    pub nginx_config_path: PathBuf,
    /// Instances that are never chosen as scale-down victims
    pub protected_instances: Vec<String>,
}

impl Default for DeploymentTopology {
    fn default() -> Self {
        Self {
            network: "grs-net".to_string(),
            image: "grs".to_string(),
            load_balancer: "load_balancer".to_string(),
            upstream_port: 80,
            nginx_config_path: PathBuf::from("../load_balancer/config.conf"),
            protected_instances: Vec::new(),
        }
    }
}

impl DeploymentTopology {
    /// Upstream address for an instance, e.g. `web_1:80`
    pub fn upstream_address(&self, instance_name: &str) -> String {
        format!("{}:{}", instance_name, self.upstream_port)
    }

    pub fn is_protected(&self, instance_name: &str) -> bool {
        self.protected_instances.iter().any(|p| p == instance_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu: f64, mem: f64) -> UtilizationSample {
        UtilizationSample {
            used_memory_bytes: 0,
            available_memory_bytes: 0,
            memory_utilization_pct: mem,
            cpu_utilization_pct: cpu,
            online_cpu_count: 1,
        }
    }

    #[test]
    fn test_running_count_includes_skipped() {
        let mut snapshot = FleetSnapshot::from_samples([("a", sample(1.0, 2.0))]);
        snapshot.mark_skipped("b");

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.running_count(), 2);
        assert_eq!(snapshot.skipped(), &["b".to_string()]);
    }

    #[test]
    fn test_sorted_names() {
        let snapshot = FleetSnapshot::from_samples([
            ("web_3", sample(1.0, 1.0)),
            ("web_1", sample(1.0, 1.0)),
            ("web_2", sample(1.0, 1.0)),
        ]);
        assert_eq!(snapshot.sorted_names(), vec!["web_1", "web_2", "web_3"]);
    }

    #[test]
    fn test_display_formatting_is_presentation_only() {
        let s = sample(9.0, 10.0);
        assert_eq!(s.cpu_display(), "9.000%");
        assert_eq!(s.memory_display(), "10.000%");
        assert!(s.value(UsageMetric::Cpu) < s.value(UsageMetric::Memory));
    }

    #[test]
    fn test_usage_metric_from_str() {
        assert_eq!("CPU".parse::<UsageMetric>(), Ok(UsageMetric::Cpu));
        assert_eq!("memory".parse::<UsageMetric>(), Ok(UsageMetric::Memory));
        assert!("disk".parse::<UsageMetric>().is_err());
    }

    #[test]
    fn test_topology_defaults() {
        let topology = DeploymentTopology::default();
        assert_eq!(topology.upstream_address("modest_mcnulty"), "modest_mcnulty:80");
        assert!(!topology.is_protected("modest_mcnulty"));
    }
}
