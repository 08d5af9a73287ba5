//! Utilization sinks
//!
//! Every successful fleet snapshot is handed to the configured sinks before
//! a decision is made. Sink failures are logged and never affect scaling.

use crate::models::FleetSnapshot;
use crate::observability::AutoscalerMetrics;
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Destination for per-tick utilization samples
#[async_trait]
pub trait UtilizationSink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn record(&self, snapshot: &FleetSnapshot) -> Result<()>;
}

/// Writes one structured log line per sampled instance
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl UtilizationSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn record(&self, snapshot: &FleetSnapshot) -> Result<()> {
        for name in snapshot.sorted_names() {
            if let Some(sample) = snapshot.get(name) {
                info!(
                    event = "utilization_sample",
                    instance = %name,
                    cpu = %sample.cpu_display(),
                    memory = %sample.memory_display(),
                    used_memory_bytes = sample.used_memory_bytes,
                    available_memory_bytes = sample.available_memory_bytes,
                    online_cpus = sample.online_cpu_count,
                    taken_at = snapshot.taken_at,
                    "Instance utilization"
                );
            }
        }
        Ok(())
    }
}

/// Exposes per-instance utilization as Prometheus gauges
#[derive(Clone, Default)]
pub struct PrometheusSink {
    metrics: AutoscalerMetrics,
}

impl PrometheusSink {
    pub fn new(metrics: AutoscalerMetrics) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl UtilizationSink for PrometheusSink {
    fn name(&self) -> &'static str {
        "prometheus"
    }

    async fn record(&self, snapshot: &FleetSnapshot) -> Result<()> {
        self.metrics.reset_instance_utilization();
        for (name, sample) in snapshot.iter() {
            self.metrics.set_instance_utilization(
                name,
                sample.cpu_utilization_pct,
                sample.memory_utilization_pct,
            );
        }
        Ok(())
    }
}
