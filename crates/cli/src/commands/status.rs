//! Daemon status and health commands

use anyhow::Result;
use autoscaler_lib::{
    controller::{StatusResponse, TickOutcome},
    format_pct, HealthResponse,
};
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_action, color_status, print_json, print_table, print_warning, OutputFormat};

#[derive(Tabled, Serialize)]
struct SampleRow {
    #[tabled(rename = "Instance")]
    instance: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
}

#[derive(Tabled, Serialize)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    component: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Failures")]
    consecutive_failures: u32,
    #[tabled(rename = "Message")]
    message: String,
}

/// Show the configured policy and the latest tick
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: StatusResponse = client.get("api/v1/status").await?;

    if let OutputFormat::Json = format {
        return print_json(&status);
    }

    println!("{}", "Autoscaler Status".bold());
    println!("{}", "=".repeat(50));
    println!("Network:                {}", status.network.cyan());
    println!("Period:                 {}s", status.period_secs);
    println!("CPU threshold:          {}", format_pct(status.cpu_threshold_pct));
    println!("Memory threshold:       {}", format_pct(status.memory_threshold_pct));
    println!();

    let Some(report) = status.latest else {
        print_warning("No control loop tick has completed yet");
        return Ok(());
    };

    println!("{}", format!("Tick {}", report.tick).bold());
    println!("{}", "-".repeat(50));
    println!("Running replicas:       {}", report.running_replicas);
    println!("Desired replicas:       {}", report.decision.desired_replicas);
    println!("Action:                 {}", color_action(report.decision.action));
    if let Some(driver) = &report.decision.driver {
        println!(
            "Driven by:              {} ({}, ratio {:.3})",
            driver.instance, driver.metric, driver.ratio
        );
    }
    println!("Outcome:                {}", describe_outcome(&report.outcome));
    println!("Duration:               {}ms", report.duration_ms);
    println!();

    let rows: Vec<SampleRow> = report
        .samples
        .into_iter()
        .map(|s| SampleRow {
            instance: s.instance,
            cpu: s.cpu,
            memory: s.memory,
        })
        .collect();
    print_table(&rows, format);

    if !report.skipped.is_empty() {
        print_warning(&format!("Not sampled this tick: {}", report.skipped.join(", ")));
    }

    Ok(())
}

/// Show per-component health
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (_, health): (_, HealthResponse) = client.get_probe("healthz").await?;

    if let OutputFormat::Json = format {
        return print_json(&health);
    }

    let overall = format!("{:?}", health.status).to_lowercase();
    let mut rows: Vec<ComponentRow> = health
        .components
        .into_iter()
        .map(|(name, component)| ComponentRow {
            component: name,
            status: format!("{:?}", component.status).to_lowercase(),
            consecutive_failures: component.consecutive_failures,
            message: component.message.unwrap_or_default(),
        })
        .collect();
    rows.sort_by(|a, b| a.component.cmp(&b.component));

    println!("Overall: {}", color_status(&overall));
    for row in &mut rows {
        row.status = color_status(&row.status);
    }
    print_table(&rows, format);

    Ok(())
}

fn describe_outcome(outcome: &TickOutcome) -> String {
    match outcome {
        TickOutcome::Idle => "idle".dimmed().to_string(),
        TickOutcome::ScaledUp { instances } => {
            format!("started {}", instances.join(", ")).green().to_string()
        }
        TickOutcome::ScaledDown { instance } => format!("stopped {}", instance).yellow().to_string(),
        TickOutcome::Refused { reason } => format!("refused: {}", reason).yellow().to_string(),
        TickOutcome::Failed { instances, reason } if instances.is_empty() => {
            format!("failed: {}", reason).red().to_string()
        }
        TickOutcome::Failed { instances, reason } => {
            format!("failed after {}: {}", instances.join(", "), reason)
                .red()
                .to_string()
        }
        TickOutcome::Cancelled { instances } => {
            format!("cancelled ({} started)", instances.len()).dimmed().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_outcome() {
        colored::control::set_override(false);
        assert_eq!(describe_outcome(&TickOutcome::Idle), "idle");
        assert_eq!(
            describe_outcome(&TickOutcome::ScaledUp {
                instances: vec!["web_3".into(), "web_4".into()]
            }),
            "started web_3, web_4"
        );
        assert_eq!(
            describe_outcome(&TickOutcome::Failed {
                instances: vec![],
                reason: "reload failed".into()
            }),
            "failed: reload failed"
        );
    }
}
