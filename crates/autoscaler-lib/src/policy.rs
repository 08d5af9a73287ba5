//! Scaling policy
//!
//! The policy is read once at startup from string-encoded values
//! (`period: "30s"`, `threshold: "80"`) and never changes afterwards.

use crate::error::PolicyError;
use crate::models::UsageMetric;
use serde::Serialize;
use std::time::Duration;

/// Thresholds and tick period driving the control loop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingPolicy {
    /// Interval between control-loop ticks
    pub period: Duration,
    /// CPU utilization (percent) a single replica should stay under
    pub cpu_threshold_pct: f64,
    /// Memory utilization (percent) a single replica should stay under
    pub memory_threshold_pct: f64,
    /// Metric used to rank scale-down victims
    pub victim_sort_key: UsageMetric,
}

impl ScalingPolicy {
    /// Create a validated policy
    pub fn new(
        period: Duration,
        cpu_threshold_pct: f64,
        memory_threshold_pct: f64,
    ) -> Result<Self, PolicyError> {
        if period.is_zero() {
            return Err(PolicyError::InvalidPeriod(format!("{:?}", period)));
        }
        validate_threshold("cpu", cpu_threshold_pct)?;
        validate_threshold("memory", memory_threshold_pct)?;

        Ok(Self {
            period,
            cpu_threshold_pct,
            memory_threshold_pct,
            victim_sort_key: UsageMetric::default(),
        })
    }

    /// Build a policy from its string-encoded configuration values
    pub fn parse(period: &str, cpu_threshold: &str, memory_threshold: &str) -> Result<Self, PolicyError> {
        let period = parse_period(period)?;
        let cpu = parse_threshold("cpu", cpu_threshold)?;
        let memory = parse_threshold("memory", memory_threshold)?;
        Self::new(period, cpu, memory)
    }

    /// Rank scale-down victims by the given metric instead of memory
    pub fn with_victim_sort_key(mut self, key: UsageMetric) -> Self {
        self.victim_sort_key = key;
        self
    }

    /// Threshold for a metric in percent
    pub fn threshold(&self, metric: UsageMetric) -> f64 {
        match metric {
            UsageMetric::Cpu => self.cpu_threshold_pct,
            UsageMetric::Memory => self.memory_threshold_pct,
        }
    }
}

/// Parse a period such as `"30s"`, `"500ms"`, `"2m"`, `"1h"` or `"45"`
pub fn parse_period(value: &str) -> Result<Duration, PolicyError> {
    let trimmed = value.trim();
    let invalid = || PolicyError::InvalidPeriod(value.to_string());

    let (digits, unit_ms): (&str, u64) = if let Some(n) = trimmed.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = trimmed.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = trimmed.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = trimmed.strip_suffix('h') {
        (n, 3_600_000)
    } else {
        (trimmed, 1_000)
    };

    let amount: u64 = digits.trim().parse().map_err(|_| invalid())?;
    let millis = amount.checked_mul(unit_ms).ok_or_else(invalid)?;
    if millis == 0 {
        return Err(invalid());
    }

    Ok(Duration::from_millis(millis))
}

/// Parse a percentage threshold such as `"80"`, `"75.5"` or `"90%"`
pub fn parse_threshold(metric: &'static str, value: &str) -> Result<f64, PolicyError> {
    let trimmed = value.trim();
    let number = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
    let parsed: f64 = number.parse().map_err(|_| PolicyError::InvalidThreshold {
        metric,
        value: value.to_string(),
    })?;
    validate_threshold(metric, parsed)?;
    Ok(parsed)
}

fn validate_threshold(metric: &'static str, value: f64) -> Result<(), PolicyError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PolicyError::InvalidThreshold {
            metric,
            value: value.to_string(),
        })
    }
}
