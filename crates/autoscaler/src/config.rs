//! Autoscaler configuration
//!
//! Loaded from a YAML file, then overridden by `AUTOSCALER_*` environment
//! variables. Nested keys use `__`, e.g. `AUTOSCALER_METRICS__CPU__THRESHOLD`.

use anyhow::{Context, Result};
use autoscaler_lib::{DeploymentTopology, ScalingPolicy, UsageMetric};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Threshold for one metric, kept as written until validated
#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_threshold")]
    pub threshold: String,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub cpu: ThresholdConfig,
    #[serde(default)]
    pub memory: ThresholdConfig,
}

/// Autoscaler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AutoscalerConfig {
    /// Tick period, e.g. "30s"
    #[serde(default = "default_period")]
    pub period: String,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Network the replicas and the load balancer share
    #[serde(default = "default_network")]
    pub network: String,

    /// Image new replicas are created from
    #[serde(default = "default_image")]
    pub image: String,

    /// Load balancer instance name
    #[serde(default = "default_load_balancer")]
    pub load_balancer: String,

    #[serde(default = "default_nginx_config_path")]
    pub nginx_config_path: PathBuf,

    /// Docker Engine API endpoint over TCP (`http://` or `tcp://`).
    /// The default unix socket has to be exposed through a socket proxy.
    #[serde(default = "default_runtime_endpoint")]
    pub runtime_endpoint: String,

    /// Port for health, metrics and status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub protected_instances: Vec<String>,

    /// `memory` or `cpu`
    #[serde(default = "default_victim_sort_key")]
    pub victim_sort_key: String,

    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    #[serde(default = "default_max_scale_up_step")]
    pub max_scale_up_step: usize,

    /// Command run in the load balancer after a config change
    #[serde(default = "autoscaler_lib::upstream::default_reload_command")]
    pub reload_command: Vec<String>,
}

fn default_threshold() -> String {
    "80".to_string()
}

fn default_period() -> String {
    "30s".to_string()
}

fn default_network() -> String {
    "grs-net".to_string()
}

fn default_image() -> String {
    "grs".to_string()
}

fn default_load_balancer() -> String {
    "load_balancer".to_string()
}

fn default_nginx_config_path() -> PathBuf {
    PathBuf::from("../load_balancer/config.conf")
}

fn default_runtime_endpoint() -> String {
    "http://localhost:2375".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_victim_sort_key() -> String {
    "memory".to_string()
}

fn default_startup_timeout() -> u64 {
    30
}

fn default_max_scale_up_step() -> usize {
    1
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("AUTOSCALER")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("protected_instances")
        .with_list_parse_key("reload_command")
}

impl AutoscalerConfig {
    /// Load from `path` (optional if missing) and the process environment
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load with an explicit environment map instead of the process one
    pub fn load_with_env(path: &Path, env: Option<HashMap<String, String>>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(environment().source(env))
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        config
            .try_deserialize()
            .context("Invalid autoscaler configuration")
    }

    /// Validated scaling policy
    pub fn policy(&self) -> Result<ScalingPolicy> {
        let sort_key: UsageMetric = self
            .victim_sort_key
            .parse()
            .map_err(|e| anyhow::anyhow!("victim_sort_key: {}", e))?;

        let policy = ScalingPolicy::parse(
            &self.period,
            &self.metrics.cpu.threshold,
            &self.metrics.memory.threshold,
        )?;
        Ok(policy.with_victim_sort_key(sort_key))
    }

    pub fn topology(&self) -> DeploymentTopology {
        DeploymentTopology {
            network: self.network.clone(),
            image: self.image.clone(),
            load_balancer: self.load_balancer.clone(),
            nginx_config_path: self.nginx_config_path.clone(),
            protected_instances: self.protected_instances.clone(),
            ..DeploymentTopology::default()
        }
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config =
            AutoscalerConfig::load_with_env(Path::new("/nonexistent/config.yaml"), Some(HashMap::new()))
                .unwrap();

        assert_eq!(config.period, "30s");
        assert_eq!(config.network, "grs-net");
        assert_eq!(config.image, "grs");
        assert_eq!(config.load_balancer, "load_balancer");
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.max_scale_up_step, 1);
        assert_eq!(config.reload_command, vec!["kill", "-HUP", "1"]);
        assert_eq!(config.reload_command, autoscaler_lib::upstream::default_reload_command());

        let policy = config.policy().unwrap();
        assert_eq!(policy.period, Duration::from_secs(30));
        assert_eq!(policy.cpu_threshold_pct, 80.0);
        assert_eq!(policy.victim_sort_key, UsageMetric::Memory);
    }

    #[test]
    fn test_load_policy_file() {
        let file = yaml(
            r#"
period: "10s"
metrics:
  cpu:
    threshold: "50"
  memory:
    threshold: "75.5"
network: app-net
protected_instances:
  - web_1
victim_sort_key: cpu
"#,
        );

        let config = AutoscalerConfig::load_with_env(file.path(), Some(HashMap::new())).unwrap();
        let policy = config.policy().unwrap();

        assert_eq!(policy.period, Duration::from_secs(10));
        assert_eq!(policy.cpu_threshold_pct, 50.0);
        assert_eq!(policy.memory_threshold_pct, 75.5);
        assert_eq!(policy.victim_sort_key, UsageMetric::Cpu);

        let topology = config.topology();
        assert_eq!(topology.network, "app-net");
        assert_eq!(topology.upstream_port, 80);
        assert!(topology.is_protected("web_1"));
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = yaml("period: \"10s\"\napi_port: 9000\n");
        let env = HashMap::from([
            ("AUTOSCALER_PERIOD".to_string(), "1m".to_string()),
            ("AUTOSCALER_METRICS__CPU__THRESHOLD".to_string(), "65".to_string()),
            ("AUTOSCALER_RELOAD_COMMAND".to_string(), "nginx,-s,reload".to_string()),
        ]);

        let config = AutoscalerConfig::load_with_env(file.path(), Some(env)).unwrap();

        assert_eq!(config.api_port, 9000);
        assert_eq!(config.reload_command, vec!["nginx", "-s", "reload"]);
        let policy = config.policy().unwrap();
        assert_eq!(policy.period, Duration::from_secs(60));
        assert_eq!(policy.cpu_threshold_pct, 65.0);
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let file = yaml("period: \"soon\"\n");
        let config = AutoscalerConfig::load_with_env(file.path(), Some(HashMap::new())).unwrap();
        assert!(config.policy().is_err());

        let file = yaml("metrics:\n  memory:\n    threshold: \"-5\"\n");
        let config = AutoscalerConfig::load_with_env(file.path(), Some(HashMap::new())).unwrap();
        assert!(config.policy().is_err());

        let file = yaml("victim_sort_key: disk\n");
        let config = AutoscalerConfig::load_with_env(file.path(), Some(HashMap::new())).unwrap();
        assert!(config.policy().is_err());
    }
}
