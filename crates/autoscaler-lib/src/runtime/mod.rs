//! Container runtime access
//!
//! The control loop only needs a small capability set from the container
//! engine: enumerate and inspect instances, create/start/stop them, read a
//! point-in-time usage snapshot and exec a command inside a running
//! instance. [`ContainerRuntime`] captures that set; [`DockerRuntime`]
//! implements it against the Docker Engine HTTP API.

mod docker;
mod stats;

#[cfg(test)]
pub(crate) mod fake;

pub use docker::DockerRuntime;
pub use stats::DockerStats;

use crate::error::RuntimeError;
use crate::models::{InstanceIdentity, RawUsageSnapshot};
use serde::{Deserialize, Serialize};

pub use async_trait::async_trait;

/// Lifecycle state reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl InstanceState {
    /// Parse the runtime's textual state
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "created" => InstanceState::Created,
            "running" => InstanceState::Running,
            "paused" => InstanceState::Paused,
            "restarting" => InstanceState::Restarting,
            "removing" => InstanceState::Removing,
            "exited" => InstanceState::Exited,
            "dead" => InstanceState::Dead,
            _ => InstanceState::Unknown,
        }
    }
}

/// Result of the instance's own healthcheck, if it defines one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Starting,
    Healthy,
    Unhealthy,
}

impl HealthState {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "starting" => Some(HealthState::Starting),
            "healthy" => Some(HealthState::Healthy),
            "unhealthy" => Some(HealthState::Unhealthy),
            _ => None,
        }
    }
}

/// Instance as returned by a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub identity: InstanceIdentity,
    pub state: InstanceState,
}

/// Instance as returned by an inspect call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDetails {
    pub identity: InstanceIdentity,
    pub state: InstanceState,
    pub health: Option<HealthState>,
}

impl InstanceDetails {
    /// Running, and healthy if the instance has a healthcheck
    pub fn is_ready(&self) -> bool {
        self.state == InstanceState::Running
            && matches!(self.health, None | Some(HealthState::Healthy))
    }
}

/// Network segment as returned by an inspect call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub id: String,
    pub name: String,
    pub members: Vec<InstanceIdentity>,
}

/// Capability set required from the container engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List instances attached to a network, in any state
    async fn list_instances(&self, network: &str) -> Result<Vec<InstanceSummary>, RuntimeError>;

    /// Inspect a network by name
    async fn inspect_network(&self, network: &str) -> Result<NetworkInfo, RuntimeError>;

    /// Inspect an instance by id
    async fn inspect_instance(&self, id: &str) -> Result<InstanceDetails, RuntimeError>;

    /// Create an instance from an image, attached to a network. Returns its id.
    async fn create_instance(&self, image: &str, network: &str) -> Result<String, RuntimeError>;

    async fn start_instance(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop_instance(&self, id: &str) -> Result<(), RuntimeError>;

    /// Fetch a single, non-streaming usage snapshot
    async fn usage_snapshot(&self, id: &str) -> Result<RawUsageSnapshot, RuntimeError>;

    /// Run a one-shot command inside a running instance, addressed by name
    async fn exec(&self, instance_name: &str, command: &[String]) -> Result<(), RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_state_parse() {
        assert_eq!(InstanceState::parse("running"), InstanceState::Running);
        assert_eq!(InstanceState::parse("Exited"), InstanceState::Exited);
        assert_eq!(InstanceState::parse("zombie"), InstanceState::Unknown);
    }

    #[test]
    fn test_instance_readiness() {
        let identity = InstanceIdentity {
            id: "abc".into(),
            name: "web_1".into(),
        };
        let mut details = InstanceDetails {
            identity,
            state: InstanceState::Running,
            health: None,
        };
        assert!(details.is_ready());

        details.health = Some(HealthState::Starting);
        assert!(!details.is_ready());

        details.health = Some(HealthState::Healthy);
        assert!(details.is_ready());

        details.state = InstanceState::Created;
        assert!(!details.is_ready());
    }
}
