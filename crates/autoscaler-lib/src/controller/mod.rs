//! Control loop orchestration
//!
//! This module provides:
//! - The pipelined collect / decide-and-act loop
//! - The shutdown signal shared by both halves
//! - The status board holding the latest tick report

mod r#loop;

pub use r#loop::{ControlLoop, ControlLoopBuilder, ControlLoopConfig};

use crate::models::DeploymentTopology;
use crate::policy::ScalingPolicy;
use crate::scaling::{InstanceRatios, ScalingDecision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Create a connected shutdown handle and signal
pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, ShutdownSignal { rx })
}

/// Raises the shutdown signal
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn raise(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes the shutdown signal.
///
/// Checked before each blocking step of a scale action. A raised signal is
/// never lowered again.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal is raised. Pends forever if the handle was
    /// dropped without raising it.
    pub async fn raised(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Utilization of one sampled instance, formatted for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceReport {
    pub instance: String,
    pub cpu_utilization_pct: f64,
    pub memory_utilization_pct: f64,
    pub cpu: String,
    pub memory: String,
}

/// What the act phase did with a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TickOutcome {
    /// NoOp decision
    Idle,
    ScaledUp { instances: Vec<String> },
    ScaledDown { instance: String },
    /// Scale-down was refused by victim selection
    Refused { reason: String },
    /// The action aborted; `instances` lists what completed before the error
    Failed { instances: Vec<String>, reason: String },
    /// Shutdown was raised mid-action
    Cancelled { instances: Vec<String> },
}

/// Everything one tick observed and did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub taken_at: i64,
    pub running_replicas: usize,
    pub samples: Vec<InstanceReport>,
    pub skipped: Vec<String>,
    pub ratios: Vec<InstanceRatios>,
    pub decision: ScalingDecision,
    pub outcome: TickOutcome,
    pub duration_ms: u64,
}

/// Latest tick report, shared with the API server
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    latest: Arc<RwLock<Option<TickReport>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, report: TickReport) {
        *self.latest.write().await = Some(report);
    }

    pub async fn latest(&self) -> Option<TickReport> {
        self.latest.read().await.clone()
    }
}

/// Body of the status endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub generated_at: DateTime<Utc>,
    pub network: String,
    pub period_secs: f64,
    pub cpu_threshold_pct: f64,
    pub memory_threshold_pct: f64,
    /// None until the first tick completes
    pub latest: Option<TickReport>,
}

impl StatusResponse {
    pub fn new(topology: &DeploymentTopology, policy: &ScalingPolicy, latest: Option<TickReport>) -> Self {
        Self {
            generated_at: Utc::now(),
            network: topology.network.clone(),
            period_secs: policy.period.as_secs_f64(),
            cpu_threshold_pct: policy.cpu_threshold_pct,
            memory_threshold_pct: policy.memory_threshold_pct,
            latest,
        }
    }
}

#[cfg(test)]
mod signal_tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_signal() {
        let (handle, signal) = shutdown_channel();
        assert!(!signal.is_raised());

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.raised().await }
        });
        handle.raise();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_raised());
    }

    #[tokio::test]
    async fn test_dropped_handle_does_not_raise() {
        let (handle, signal) = shutdown_channel();
        drop(handle);

        let waited = tokio::time::timeout(Duration::from_millis(20), signal.raised()).await;
        assert!(waited.is_err());
        assert!(!signal.is_raised());
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = TickOutcome::ScaledDown {
            instance: "web_2".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["result"], "scaled_down");
        assert_eq!(json["instance"], "web_2");

        let idle = serde_json::to_value(TickOutcome::Idle).unwrap();
        assert_eq!(idle["result"], "idle");
    }
}
