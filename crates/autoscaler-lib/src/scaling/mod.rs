//! Scaling decisions
//!
//! This module provides:
//! - The decision engine projecting utilization ratios onto a replica count
//! - Victim selection for scale-down

mod decision;
mod victim;

pub use decision::{decide, ratios, DecisionDriver, InstanceRatios, ScaleAction, ScalingDecision};
pub use victim::VictimSelector;
