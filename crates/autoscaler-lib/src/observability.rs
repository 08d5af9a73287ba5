//! Observability infrastructure for the autoscaler
//!
//! Provides:
//! - Prometheus metrics (tick latency, replica counts, per-instance utilization, scale events)
//! - Structured JSON logging with tracing

use crate::scaling::{ScaleAction, ScalingDecision};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, GaugeVec, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for tick duration (in seconds)
const TICK_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AutoscalerMetricsInner> = OnceLock::new();

struct AutoscalerMetricsInner {
    tick_duration_seconds: Histogram,
    running_replicas: IntGauge,
    desired_replicas: IntGauge,
    instance_cpu_utilization: GaugeVec,
    instance_memory_utilization: GaugeVec,
    scale_events: IntCounterVec,
    sample_errors: IntCounter,
    reconcile_errors: IntCounter,
}

impl AutoscalerMetricsInner {
    fn new() -> Self {
        Self {
            tick_duration_seconds: register_histogram!(
                "autoscaler_tick_duration_seconds",
                "Time spent deciding and acting on one fleet snapshot",
                TICK_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_duration_seconds"),

            running_replicas: register_int_gauge!(
                "autoscaler_running_replicas",
                "Replicas running at the last tick, load balancer excluded"
            )
            .expect("Failed to register running_replicas"),

            desired_replicas: register_int_gauge!(
                "autoscaler_desired_replicas",
                "Replica count requested by the last scaling decision"
            )
            .expect("Failed to register desired_replicas"),

            instance_cpu_utilization: register_gauge_vec!(
                "autoscaler_instance_cpu_utilization_percent",
                "CPU utilization of each sampled replica",
                &["instance"]
            )
            .expect("Failed to register instance_cpu_utilization_percent"),

            instance_memory_utilization: register_gauge_vec!(
                "autoscaler_instance_memory_utilization_percent",
                "Memory utilization of each sampled replica",
                &["instance"]
            )
            .expect("Failed to register instance_memory_utilization_percent"),

            scale_events: register_int_counter_vec!(
                "autoscaler_scale_events_total",
                "Scale actions applied, by direction",
                &["direction"]
            )
            .expect("Failed to register scale_events_total"),

            sample_errors: register_int_counter!(
                "autoscaler_sample_errors_total",
                "Replicas skipped because their usage could not be sampled"
            )
            .expect("Failed to register sample_errors_total"),

            reconcile_errors: register_int_counter!(
                "autoscaler_reconcile_errors_total",
                "Failed load balancer reconciliations"
            )
            .expect("Failed to register reconcile_errors_total"),
        }
    }
}

/// Autoscaler metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance. Clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct AutoscalerMetrics {
    _private: (),
}

impl Default for AutoscalerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoscalerMetrics {
    /// Create a handle, registering the global metrics on first call
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AutoscalerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AutoscalerMetricsInner {
        GLOBAL_METRICS.get_or_init(AutoscalerMetricsInner::new)
    }

    pub fn observe_tick_duration(&self, duration_secs: f64) {
        self.inner().tick_duration_seconds.observe(duration_secs);
    }

    pub fn set_replicas(&self, running: usize, desired: usize) {
        self.inner().running_replicas.set(running as i64);
        self.inner().desired_replicas.set(desired as i64);
    }

    pub fn set_instance_utilization(&self, instance: &str, cpu_pct: f64, memory_pct: f64) {
        self.inner()
            .instance_cpu_utilization
            .with_label_values(&[instance])
            .set(cpu_pct);
        self.inner()
            .instance_memory_utilization
            .with_label_values(&[instance])
            .set(memory_pct);
    }

    /// Drop per-instance series so stopped replicas stop being reported
    pub fn reset_instance_utilization(&self) {
        self.inner().instance_cpu_utilization.reset();
        self.inner().instance_memory_utilization.reset();
    }

    pub fn inc_scale_event(&self, action: ScaleAction) {
        self.inner()
            .scale_events
            .with_label_values(&[&action.to_string()])
            .inc();
    }

    pub fn inc_sample_errors(&self, count: u64) {
        self.inner().sample_errors.inc_by(count);
    }

    pub fn inc_reconcile_errors(&self) {
        self.inner().reconcile_errors.inc();
    }
}

/// Structured logger for control loop events
///
/// Emits consistent fields so ticks, decisions and actions can be
/// correlated in JSON log output.
#[derive(Clone)]
pub struct StructuredLogger {
    network: String,
}

impl StructuredLogger {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
        }
    }

    pub fn log_startup(&self, version: &str, period_secs: f64) {
        info!(
            event = "autoscaler_started",
            network = %self.network,
            version = %version,
            period_secs = period_secs,
            "Replica autoscaler started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "autoscaler_shutdown",
            network = %self.network,
            reason = %reason,
            "Replica autoscaler shutting down"
        );
    }

    pub fn log_tick(&self, running: usize, sampled: usize, skipped: usize, duration_ms: u64) {
        info!(
            event = "tick_complete",
            network = %self.network,
            running = running,
            sampled = sampled,
            skipped = skipped,
            duration_ms = duration_ms,
            "Control loop tick complete"
        );
    }

    pub fn log_decision(&self, decision: &ScalingDecision) {
        let (instance, metric, ratio) = match &decision.driver {
            Some(d) => (d.instance.as_str(), d.metric.to_string(), d.ratio),
            None => ("", String::new(), 0.0),
        };

        if decision.running_replicas == 0 {
            warn!(
                event = "scale_decision",
                network = %self.network,
                action = %decision.action,
                running = 0,
                "No replicas running; the fleet must be seeded before it can scale"
            );
            return;
        }

        info!(
            event = "scale_decision",
            network = %self.network,
            action = %decision.action,
            running = decision.running_replicas,
            desired = decision.desired_replicas,
            driver_instance = %instance,
            driver_metric = %metric,
            driver_ratio = ratio,
            "Scaling decision"
        );
    }

    pub fn log_scale_action(&self, action: ScaleAction, instance: &str) {
        info!(
            event = "scale_action",
            network = %self.network,
            action = %action,
            instance = %instance,
            "Scale action applied"
        );
    }

    pub fn log_scale_failure(&self, action: ScaleAction, instance: Option<&str>, reason: &str) {
        error!(
            event = "scale_action_failed",
            network = %self.network,
            action = %action,
            instance = instance.unwrap_or(""),
            reason = %reason,
            "Scale action failed"
        );
    }

    /// The upstream pool disagrees with the running fleet
    pub fn log_drift(&self, instance: &str, reason: &str) {
        error!(
            event = "upstream_drift",
            network = %self.network,
            instance = %instance,
            reason = %reason,
            "Load balancer pool has drifted from the fleet"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_autoscaler_metrics_creation() {
        let metrics = AutoscalerMetrics::new();

        metrics.observe_tick_duration(0.2);
        metrics.set_replicas(3, 4);
        metrics.set_instance_utilization("web_1", 12.5, 40.0);
        metrics.reset_instance_utilization();
        metrics.inc_scale_event(ScaleAction::ScaleUp);
        metrics.inc_sample_errors(2);
        metrics.inc_reconcile_errors();
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("grs-net");
        assert_eq!(logger.network, "grs-net");
    }
}
