//! Component health for the control loop
//!
//! Each stage of a tick reports its own status. `/healthz` aggregates them
//! and `/readyz` additionally requires the startup checks to have passed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// The last tick hit a recoverable problem (skipped samples, drift)
    Degraded,
    /// The last tick could not do its job at all
    Unhealthy,
}

impl ComponentStatus {
    /// Healthy and degraded components still serve ticks
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

/// Last reported state of a component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Ticks in a row that reported a problem; reset on success
    #[serde(default)]
    pub consecutive_failures: u32,
    pub last_check: DateTime<Utc>,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            consecutive_failures: 0,
            last_check: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status over all components
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    fn from_components(components: HashMap<String, ComponentHealth>) -> Self {
        let status = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        Self { status, components }
    }

    /// Names of components in the given state, sorted
    pub fn components_in(&self, status: ComponentStatus) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .components
            .iter()
            .filter(|(_, c)| c.status == status)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Names under which the loop stages report
pub mod components {
    /// Fleet snapshotting against the container runtime
    pub const INSPECTOR: &str = "inspector";
    /// Decision and scale actions
    pub const ENGINE: &str = "engine";
    /// Load balancer configuration and reload
    pub const RECONCILER: &str = "reconciler";

    pub const ALL: [&str; 3] = [INSPECTOR, ENGINE, RECONCILER];
}

/// Shared, cloneable view of every component's last report
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    startup_complete: Arc<AtomicBool>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a component as healthy
    pub async fn register(&self, name: &str) {
        self.components
            .write()
            .await
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    pub async fn register_all(&self) {
        for name in components::ALL {
            self.register(name).await;
        }
    }

    /// Record a new status, carrying the failure streak forward
    pub async fn update(&self, name: &str, mut health: ComponentHealth) {
        let mut components = self.components.write().await;
        if health.status != ComponentStatus::Healthy {
            let streak = components.get(name).map_or(0, |h| h.consecutive_failures);
            health.consecutive_failures = streak.saturating_add(1);
        }
        components.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Flip once the startup checks (runtime, network, nginx config) passed
    pub async fn set_ready(&self, ready: bool) {
        self.startup_complete.store(ready, Ordering::SeqCst);
    }

    pub async fn health(&self) -> HealthResponse {
        HealthResponse::from_components(self.components.read().await.clone())
    }

    /// Ready once startup completed and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        if !self.startup_complete.load(Ordering::SeqCst) {
            return ReadinessResponse {
                ready: false,
                reason: Some("Startup checks have not completed".to_string()),
            };
        }

        let health = self.health().await;
        let failing = health.components_in(ComponentStatus::Unhealthy);
        if failing.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("Unhealthy components: {}", failing.join(", "))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_register_all_components() {
        let registry = HealthRegistry::new();
        registry.register_all().await;

        let health = registry.health().await;
        assert_eq!(health.components.len(), 3);
        assert_eq!(health.components_in(ComponentStatus::Healthy), vec!["engine", "inspector", "reconciler"]);
    }

    #[tokio::test]
    async fn test_degraded_component_degrades_overall() {
        let registry = HealthRegistry::new();
        registry.register_all().await;

        registry
            .set_degraded(components::RECONCILER, "server web_2:80 is not in the upstream pool")
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert!(health.status.is_operational());
    }

    #[tokio::test]
    async fn test_unhealthy_component_wins() {
        let registry = HealthRegistry::new();
        registry.register_all().await;

        registry.set_degraded(components::ENGINE, "startup timeout").await;
        registry
            .set_unhealthy(components::INSPECTOR, "container runtime unavailable")
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert!(!health.status.is_operational());
    }

    #[tokio::test]
    async fn test_readiness_waits_for_startup() {
        let registry = HealthRegistry::new();
        registry.register_all().await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Startup checks have not completed"));

        registry.set_ready(true).await;
        let readiness = registry.readiness().await;
        assert!(readiness.ready);
        assert!(readiness.reason.is_none());
    }

    #[tokio::test]
    async fn test_readiness_names_unhealthy_components() {
        let registry = HealthRegistry::new();
        registry.register_all().await;
        registry.set_ready(true).await;
        registry.set_unhealthy(components::RECONCILER, "reload failed").await;
        registry.set_unhealthy(components::INSPECTOR, "network missing").await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.unwrap(),
            "Unhealthy components: inspector, reconciler"
        );
    }

    #[tokio::test]
    async fn test_failure_streak_resets_on_recovery() {
        let registry = HealthRegistry::new();
        registry.register_all().await;
        registry.set_unhealthy(components::INSPECTOR, "down").await;
        registry.set_degraded(components::INSPECTOR, "partial").await;

        let health = registry.health().await;
        assert_eq!(health.components[components::INSPECTOR].consecutive_failures, 2);

        registry.set_healthy(components::INSPECTOR).await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(health.components[components::INSPECTOR].consecutive_failures, 0);
    }
}
