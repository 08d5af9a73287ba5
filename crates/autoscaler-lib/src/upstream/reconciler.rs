//! Persists upstream changes and signals the load balancer

use super::UpstreamConfig;
use crate::error::{ReconcileError, ReconcileStage};
use crate::models::DeploymentTopology;
use crate::runtime::ContainerRuntime;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Applies add/remove to the load balancer configuration file.
///
/// Each call reads the file, applies one mutation, writes it back and runs
/// the reload command inside the load balancer. Calls are serialized.
pub struct UpstreamReconciler {
    runtime: Arc<dyn ContainerRuntime>,
    topology: Arc<DeploymentTopology>,
    reload_command: Vec<String>,
    lock: Mutex<()>,
}

/// `kill -HUP 1`, run inside the load balancer
pub fn default_reload_command() -> Vec<String> {
    vec!["kill".to_string(), "-HUP".to_string(), "1".to_string()]
}

fn failed(stage: ReconcileStage, reason: impl ToString) -> ReconcileError {
    ReconcileError::ReconciliationFailed {
        stage,
        reason: reason.to_string(),
    }
}

impl UpstreamReconciler {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, topology: Arc<DeploymentTopology>) -> Self {
        Self {
            runtime,
            topology,
            reload_command: default_reload_command(),
            lock: Mutex::new(()),
        }
    }

    pub fn with_reload_command(mut self, command: Vec<String>) -> Self {
        self.reload_command = command;
        self
    }

    /// Read and parse the current configuration
    pub async fn current(&self) -> Result<UpstreamConfig, ReconcileError> {
        UpstreamConfig::parse(&self.read().await?)
    }

    async fn read(&self) -> Result<String, ReconcileError> {
        let path = &self.topology.nginx_config_path;
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| failed(ReconcileStage::Read, format!("{}: {}", path.display(), e)))
    }

    async fn write(&self, text: &str) -> Result<(), ReconcileError> {
        let path = &self.topology.nginx_config_path;
        tokio::fs::write(path, text)
            .await
            .map_err(|e| failed(ReconcileStage::Write, format!("{}: {}", path.display(), e)))
    }

    /// Add `instance_name` to the pool, then reload
    pub async fn add_server(&self, instance_name: &str) -> Result<UpstreamConfig, ReconcileError> {
        let address = self.topology.upstream_address(instance_name);
        self.apply(|config| config.add_server(&address)).await
    }

    /// Remove `instance_name` from the pool, then reload
    pub async fn remove_server(&self, instance_name: &str) -> Result<UpstreamConfig, ReconcileError> {
        let address = self.topology.upstream_address(instance_name);
        self.apply(|config| config.remove_server(&address)).await
    }

    async fn apply<F>(&self, mutate: F) -> Result<UpstreamConfig, ReconcileError>
    where
        F: FnOnce(&mut UpstreamConfig) -> Result<(), ReconcileError>,
    {
        let _guard = self.lock.lock().await;

        let original = self.read().await?;
        let mut config = UpstreamConfig::parse(&original)?;
        mutate(&mut config)?;

        self.write(&config.to_text()).await?;
        debug!(path = %self.topology.nginx_config_path.display(), "Wrote load balancer configuration");

        // On reload failure the file goes back to what nginx is serving
        if let Err(err) = self.reload().await {
            if let Err(restore) = self.write(&original).await {
                warn!(error = %restore, "Failed to restore load balancer configuration after reload failure");
            }
            return Err(err);
        }
        Ok(config)
    }

    async fn reload(&self) -> Result<(), ReconcileError> {
        self.runtime
            .exec(&self.topology.load_balancer, &self.reload_command)
            .await
            .map_err(|e| failed(ReconcileStage::Reload, e))?;

        info!(
            load_balancer = %self.topology.load_balancer,
            command = %self.reload_command.join(" "),
            "Signaled load balancer reload"
        );
        Ok(())
    }
}
