//! Utilization derivation
//!
//! Turns cumulative runtime counters into CPU and memory percentages.

use crate::error::MetricsError;
use crate::models::{RawUsageSnapshot, UtilizationSample};

/// Derive a utilization sample from one raw usage snapshot.
///
/// - memory % = (used - cache) / limit * 100
/// - cpu % = (cpu delta / system delta) * online CPUs * 100
///
/// Values are not clamped: a saturated multi-core instance reports well
/// over 100% CPU.
pub fn derive(raw: &RawUsageSnapshot) -> Result<UtilizationSample, MetricsError> {
    if raw.memory_limit_bytes == 0 {
        return Err(MetricsError::DegenerateInput("memory limit is zero"));
    }
    if raw.cpu_total_usage < raw.pre_cpu_total_usage {
        return Err(MetricsError::NegativeDelta("cpu total usage went backwards"));
    }
    if raw.system_cpu_usage < raw.pre_system_cpu_usage {
        return Err(MetricsError::NegativeDelta("system cpu usage went backwards"));
    }

    let system_delta = raw.system_cpu_usage - raw.pre_system_cpu_usage;
    if system_delta == 0 {
        return Err(MetricsError::DegenerateInput("system cpu delta is zero"));
    }
    let cpu_delta = raw.cpu_total_usage - raw.pre_cpu_total_usage;

    let used_memory_bytes = raw.memory_used_bytes.saturating_sub(raw.memory_cache_bytes);
    let available_memory_bytes = raw.memory_limit_bytes;

    let memory_utilization_pct = used_memory_bytes as f64 / available_memory_bytes as f64 * 100.0;
    let cpu_utilization_pct =
        (cpu_delta as f64 / system_delta as f64) * raw.online_cpu_count as f64 * 100.0;

    Ok(UtilizationSample {
        used_memory_bytes,
        available_memory_bytes,
        memory_utilization_pct,
        cpu_utilization_pct,
        online_cpu_count: raw.online_cpu_count,
    })
}
