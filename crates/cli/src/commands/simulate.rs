//! Dry-run of the scaling decision engine

use anyhow::{bail, Context, Result};
use autoscaler_lib::{
    format_pct,
    policy::parse_threshold,
    scaling::{decide, ratios, InstanceRatios, ScaleAction, ScalingDecision, VictimSelector},
    FleetSnapshot, ScalingPolicy, UsageMetric, UtilizationSample,
};
use colored::Colorize;
use serde::Serialize;
use std::time::Duration;
use tabled::Tabled;

use crate::output::{color_action, color_ratio, print_json, print_table, print_warning, OutputFormat};

/// Raw command-line input for a simulation
pub struct SimulationInput {
    pub running: Option<usize>,
    pub cpu_threshold: String,
    pub memory_threshold: String,
    pub samples: Vec<String>,
    pub victim_sort_key: String,
    pub protected: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SimulationResult {
    pub decision: ScalingDecision,
    pub ratios: Vec<InstanceRatios>,
    /// Instance that would be stopped on scale-down
    #[serde(skip_serializing_if = "Option::is_none")]
    pub victim: Option<String>,
    /// Why no victim could be chosen
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
}

#[derive(Tabled, Serialize)]
struct RatioRow {
    #[tabled(rename = "Instance")]
    instance: String,
    #[tabled(rename = "CPU ratio")]
    cpu_ratio: String,
    #[tabled(rename = "Memory ratio")]
    memory_ratio: String,
    #[tabled(rename = "Desired (CPU)")]
    desired_from_cpu: usize,
    #[tabled(rename = "Desired (memory)")]
    desired_from_memory: usize,
}

/// Parse `name=cpu,memory`, e.g. `web_1=90,42.5`
pub fn parse_sample(value: &str) -> Result<(String, UtilizationSample)> {
    let (name, usage) = value
        .split_once('=')
        .with_context(|| format!("sample '{}' is not in name=cpu,memory form", value))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("sample '{}' has no instance name", value);
    }

    let (cpu, memory) = usage
        .split_once(',')
        .with_context(|| format!("sample '{}' is not in name=cpu,memory form", value))?;
    let cpu = parse_pct(cpu).with_context(|| format!("invalid CPU value in sample '{}'", value))?;
    let memory =
        parse_pct(memory).with_context(|| format!("invalid memory value in sample '{}'", value))?;

    Ok((
        name.to_string(),
        UtilizationSample {
            used_memory_bytes: 0,
            available_memory_bytes: 0,
            memory_utilization_pct: memory,
            cpu_utilization_pct: cpu,
            online_cpu_count: 0,
        },
    ))
}

fn parse_pct(value: &str) -> Result<f64> {
    let trimmed = value.trim();
    let number: f64 = trimmed.strip_suffix('%').unwrap_or(trimmed).trim().parse()?;
    if !number.is_finite() || number < 0.0 {
        bail!("'{}' is not a non-negative percentage", value);
    }
    Ok(number)
}

/// Evaluate the decision engine against hypothetical samples
pub fn simulate(input: &SimulationInput) -> Result<SimulationResult> {
    let cpu = parse_threshold("cpu", &input.cpu_threshold)?;
    let memory = parse_threshold("memory", &input.memory_threshold)?;
    let sort_key: UsageMetric = input
        .victim_sort_key
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    // The period plays no part in a single evaluation
    let policy = ScalingPolicy::new(Duration::from_secs(1), cpu, memory)?.with_victim_sort_key(sort_key);

    let samples = input
        .samples
        .iter()
        .map(|s| parse_sample(s))
        .collect::<Result<Vec<_>>>()?;
    let snapshot = FleetSnapshot::from_samples(samples);
    let running = input.running.unwrap_or_else(|| snapshot.len());

    let decision = decide(&snapshot, &policy, running);
    let ratios = ratios(&snapshot, &policy, running);

    let (victim, refusal) = if decision.action == ScaleAction::ScaleDown {
        let selector = VictimSelector::new(input.protected.clone(), sort_key);
        match selector.select(&snapshot) {
            Ok(name) => (Some(name), None),
            Err(e) => (None, Some(e.to_string())),
        }
    } else {
        (None, None)
    };

    Ok(SimulationResult {
        decision,
        ratios,
        victim,
        refusal,
    })
}

/// Run a simulation and print the outcome
pub fn run(input: SimulationInput, format: OutputFormat) -> Result<()> {
    let result = simulate(&input)?;

    if let OutputFormat::Json = format {
        return print_json(&result);
    }

    let rows: Vec<RatioRow> = result
        .ratios
        .iter()
        .map(|r| RatioRow {
            instance: r.instance.clone(),
            cpu_ratio: color_ratio(r.cpu_ratio),
            memory_ratio: color_ratio(r.memory_ratio),
            desired_from_cpu: r.desired_from_cpu,
            desired_from_memory: r.desired_from_memory,
        })
        .collect();
    print_table(&rows, format);
    println!();

    let decision = &result.decision;
    println!("{}", "Decision".bold());
    println!("{}", "=".repeat(50));
    println!("Action:                 {}", color_action(decision.action));
    println!("Running replicas:       {}", decision.running_replicas);
    println!("Desired replicas:       {}", decision.desired_replicas);
    if let Some(driver) = &decision.driver {
        println!(
            "Driven by:              {} {} at {} of threshold",
            driver.instance,
            driver.metric,
            format_pct(driver.ratio * 100.0)
        );
    }
    if let Some(victim) = &result.victim {
        println!("Victim:                 {}", victim.yellow());
    }
    if let Some(refusal) = &result.refusal {
        print_warning(&format!("Scale-down refused: {}", refusal));
    }

    Ok(())
}
