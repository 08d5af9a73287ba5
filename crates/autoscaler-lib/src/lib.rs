//! Autoscaler library for a pool of container replicas behind nginx
//!
//! This crate provides the core functionality for:
//! - Utilization sampling from container runtime stats
//! - Threshold-driven scaling decisions and victim selection
//! - Upstream pool reconciliation for the nginx load balancer
//! - The periodic control loop tying those together
//! - Health checks and observability

pub mod collector;
pub mod controller;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod policy;
pub mod runtime;
pub mod scaling;
pub mod sink;
pub mod upstream;

pub use error::{
    FleetError, MetricsError, PolicyError, ReconcileError, RuntimeError, SelectionError,
};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AutoscalerMetrics, StructuredLogger};
pub use policy::ScalingPolicy;
