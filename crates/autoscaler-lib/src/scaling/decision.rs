//! Scaling decision engine
//!
//! Each instance's utilization is compared with the policy thresholds. The
//! ratio is projected onto the current replica count:
//!
//! `desired = ceil(running * utilization / threshold)`
//!
//! The most pressured instance and metric drives the decision. There is no
//! averaging across the fleet.

use crate::models::{FleetSnapshot, UsageMetric};
use crate::policy::ScalingPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a scaling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    ScaleUp,
    ScaleDown,
    NoOp,
}

impl fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleAction::ScaleUp => write!(f, "scale_up"),
            ScaleAction::ScaleDown => write!(f, "scale_down"),
            ScaleAction::NoOp => write!(f, "no_op"),
        }
    }
}

/// Instance and metric that produced the desired replica count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionDriver {
    pub instance: String,
    pub metric: UsageMetric,
    pub ratio: f64,
}

/// Outcome of one evaluation, consumed once per tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub action: ScaleAction,
    pub running_replicas: usize,
    pub desired_replicas: usize,
    pub driver: Option<DecisionDriver>,
}

impl ScalingDecision {
    fn no_op(running_replicas: usize) -> Self {
        Self {
            action: ScaleAction::NoOp,
            running_replicas,
            desired_replicas: running_replicas,
            driver: None,
        }
    }
}

/// Per-instance ratios and projected replica counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRatios {
    pub instance: String,
    pub cpu_ratio: f64,
    pub memory_ratio: f64,
    pub desired_from_cpu: usize,
    pub desired_from_memory: usize,
}

impl InstanceRatios {
    /// Projected count and the metric that produced it. CPU wins ties.
    fn desired(&self) -> (usize, UsageMetric, f64) {
        if self.desired_from_cpu >= self.desired_from_memory {
            (self.desired_from_cpu, UsageMetric::Cpu, self.cpu_ratio)
        } else {
            (self.desired_from_memory, UsageMetric::Memory, self.memory_ratio)
        }
    }
}

/// `ceil(running * ratio)`, saturating on overflow
fn project(running: usize, ratio: f64) -> usize {
    let projected = (running as f64 * ratio).ceil();
    if projected.is_nan() || projected <= 0.0 {
        0
    } else {
        projected as usize
    }
}

/// Compute ratios for every sampled instance, ordered by instance name
pub fn ratios(snapshot: &FleetSnapshot, policy: &ScalingPolicy, running: usize) -> Vec<InstanceRatios> {
    snapshot
        .sorted_names()
        .into_iter()
        .filter_map(|name| snapshot.get(name).map(|sample| (name, sample)))
        .map(|(name, sample)| {
            let cpu_ratio = sample.cpu_utilization_pct / policy.cpu_threshold_pct;
            let memory_ratio = sample.memory_utilization_pct / policy.memory_threshold_pct;
            InstanceRatios {
                instance: name.to_string(),
                cpu_ratio,
                memory_ratio,
                desired_from_cpu: project(running, cpu_ratio),
                desired_from_memory: project(running, memory_ratio),
            }
        })
        .collect()
}

/// Decide whether the fleet should grow, shrink or stay put.
///
/// All instances are evaluated and the maximum projected count wins. When
/// two instances project the same count, the one whose name sorts first is
/// reported as the driver. An empty snapshot, or `running == 0`, is a no-op:
/// the fleet has to be seeded with at least one replica out-of-band.
pub fn decide(snapshot: &FleetSnapshot, policy: &ScalingPolicy, running: usize) -> ScalingDecision {
    let mut best: Option<(usize, DecisionDriver)> = None;

    for entry in ratios(snapshot, policy, running) {
        let (desired, metric, ratio) = entry.desired();
        let better = match &best {
            Some((current, _)) => desired > *current,
            None => true,
        };
        if better {
            best = Some((
                desired,
                DecisionDriver {
                    instance: entry.instance,
                    metric,
                    ratio,
                },
            ));
        }
    }

    let Some((desired, driver)) = best else {
        return ScalingDecision::no_op(running);
    };

    let action = if desired > running {
        ScaleAction::ScaleUp
    } else if desired < running {
        ScaleAction::ScaleDown
    } else {
        ScaleAction::NoOp
    };

    ScalingDecision {
        action,
        running_replicas: running,
        desired_replicas: desired,
        driver: Some(driver),
    }
}
