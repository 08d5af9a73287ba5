//! Fleet inspection
//!
//! Enumerates the replicas attached to the managed network and samples
//! each one. The load balancer itself is never part of the fleet.

use super::derive;
use crate::error::{FleetError, MetricsError, RuntimeError};
use crate::models::{DeploymentTopology, FleetSnapshot, InstanceIdentity, UtilizationSample};
use crate::runtime::{ContainerRuntime, InstanceState, NetworkInfo};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a single instance produced no sample
#[derive(Debug, Error)]
enum SampleError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Takes per-tick utilization snapshots of the fleet
pub struct FleetInspector {
    runtime: Arc<dyn ContainerRuntime>,
    topology: Arc<DeploymentTopology>,
}

impl FleetInspector {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, topology: Arc<DeploymentTopology>) -> Self {
        Self { runtime, topology }
    }

    /// Check the managed network exists and the runtime is reachable
    pub async fn verify_network(&self, network: &str) -> Result<NetworkInfo, FleetError> {
        self.runtime
            .inspect_network(network)
            .await
            .map_err(|e| FleetError::from_runtime(network, e))
    }

    /// Sample every running replica on `network`.
    ///
    /// Instances whose sample fails are logged and recorded as skipped; only
    /// a missing network or an unreachable runtime fails the whole call.
    pub async fn snapshot(&self, network: &str) -> Result<FleetSnapshot, FleetError> {
        self.verify_network(network).await?;

        let instances = self
            .runtime
            .list_instances(network)
            .await
            .map_err(|e| FleetError::from_runtime(network, e))?;

        let mut snapshot = FleetSnapshot::new();

        for instance in instances {
            let name = &instance.identity.name;

            if *name == self.topology.load_balancer {
                continue;
            }
            if instance.state != InstanceState::Running {
                debug!(instance = %name, state = ?instance.state, "Ignoring non-running instance");
                continue;
            }

            snapshot.set_id(&instance.identity);
            match self.sample(&instance.identity).await {
                Ok(sample) => {
                    debug!(
                        instance = %name,
                        cpu = %sample.cpu_display(),
                        memory = %sample.memory_display(),
                        "Sampled instance"
                    );
                    snapshot.insert(name.clone(), sample);
                }
                Err(e) => {
                    warn!(instance = %name, error = %e, "Skipping instance sample");
                    snapshot.mark_skipped(name.clone());
                }
            }
        }

        Ok(snapshot)
    }

    async fn sample(&self, identity: &InstanceIdentity) -> Result<UtilizationSample, SampleError> {
        let raw = self.runtime.usage_snapshot(&identity.id).await?;
        Ok(derive(&raw)?)
    }
}
