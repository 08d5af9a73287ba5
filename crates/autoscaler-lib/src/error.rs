//! Error types for the control loop
//!
//! Each stage of a tick has its own error type so callers can tell
//! per-sample problems (skip and continue) from tick-level ones (abort the
//! tick) and startup misconfiguration (fatal).

use thiserror::Error;

/// Failure to derive utilization from a raw usage snapshot
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricsError {
    /// The sample would divide by zero
    #[error("degenerate usage sample: {0}")]
    DegenerateInput(&'static str),

    /// A cumulative counter went backwards (reset or wrap)
    #[error("negative counter delta: {0}")]
    NegativeDelta(&'static str),
}

/// Failure from the container runtime collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The runtime could not be reached at all
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    /// The referenced network or instance does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The runtime answered with an error status
    #[error("runtime API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The runtime answered with a body we could not decode
    #[error("failed to decode runtime response: {0}")]
    Decode(String),
}

/// Failure to take a fleet snapshot as a whole
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FleetError {
    #[error("network '{0}' not found")]
    NetworkNotFound(String),

    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),
}

impl FleetError {
    /// Map a runtime failure that affects the whole fleet query
    pub fn from_runtime(network: &str, err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound(_) => FleetError::NetworkNotFound(network.to_string()),
            other => FleetError::RuntimeUnavailable(other.to_string()),
        }
    }
}

/// Scale-down refusal
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no eligible scale-down victim: {0}")]
    NoEligibleInstance(&'static str),
}

/// Step of a reconciliation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStage {
    Read,
    Write,
    Reload,
}

impl std::fmt::Display for ReconcileStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileStage::Read => write!(f, "read"),
            ReconcileStage::Write => write!(f, "write"),
            ReconcileStage::Reload => write!(f, "reload"),
        }
    }
}

/// Failure to bring the upstream pool in line with the fleet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("server '{0}' is already in the upstream pool")]
    DuplicateServer(String),

    #[error("server '{0}' is not in the upstream pool")]
    ServerNotFound(String),

    #[error("load balancer configuration has no upstream group")]
    NoUpstreamGroup,

    #[error("invalid load balancer configuration: {0}")]
    InvalidConfig(String),

    /// The config could not be read or written, or the reload signal failed.
    /// The whole add/remove + reload sequence must be retried.
    #[error("reconciliation failed at {stage} step: {reason}")]
    ReconciliationFailed { stage: ReconcileStage, reason: String },
}

impl ReconcileError {
    /// True when the pool has drifted from the fleet
    pub fn is_drift(&self) -> bool {
        matches!(
            self,
            ReconcileError::DuplicateServer(_) | ReconcileError::ServerNotFound(_)
        )
    }
}

/// Unusable scaling policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("invalid period '{0}': expected a number with an optional ms/s/m/h suffix")]
    InvalidPeriod(String),

    #[error("invalid {metric} threshold '{value}': expected a positive percentage")]
    InvalidThreshold { metric: &'static str, value: String },
}
