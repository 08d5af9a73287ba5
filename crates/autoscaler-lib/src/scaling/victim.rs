//! Scale-down victim selection

use crate::error::SelectionError;
use crate::models::{DeploymentTopology, FleetSnapshot, UsageMetric};

/// Picks the least-loaded unprotected instance for termination
#[derive(Debug, Clone, Default)]
pub struct VictimSelector {
    protected: Vec<String>,
    sort_key: UsageMetric,
}

impl VictimSelector {
    pub fn new(protected: Vec<String>, sort_key: UsageMetric) -> Self {
        Self { protected, sort_key }
    }

    pub fn from_topology(topology: &DeploymentTopology, sort_key: UsageMetric) -> Self {
        Self::new(topology.protected_instances.clone(), sort_key)
    }

    pub fn sort_key(&self) -> UsageMetric {
        self.sort_key
    }

    /// Eligible instances ordered from least to most loaded.
    ///
    /// Ordering is numeric on the sort key; equal values keep name order.
    pub fn rank<'a>(&self, snapshot: &'a FleetSnapshot) -> Vec<(&'a str, f64)> {
        let mut ranked: Vec<(&str, f64)> = snapshot
            .sorted_names()
            .into_iter()
            .filter(|name| !self.protected.iter().any(|p| p == name))
            .filter_map(|name| snapshot.get(name).map(|s| (name, s.value(self.sort_key))))
            .collect();

        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        ranked
    }

    /// Select the instance to stop.
    ///
    /// Refuses when one sampled replica or fewer is left, so the fleet
    /// never drops below a single measured instance. Skipped instances do
    /// not count towards the floor.
    pub fn select(&self, snapshot: &FleetSnapshot) -> Result<String, SelectionError> {
        if snapshot.len() <= 1 {
            return Err(SelectionError::NoEligibleInstance(
                "at least one replica must keep running",
            ));
        }

        self.rank(snapshot)
            .first()
            .map(|(name, _)| name.to_string())
            .ok_or(SelectionError::NoEligibleInstance(
                "no unprotected instance was sampled",
            ))
    }
}
