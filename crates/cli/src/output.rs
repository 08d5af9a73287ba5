//! Output formatting utilities

use autoscaler_lib::scaling::ScaleAction;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a list as a rounded table, or as a JSON array
pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(&items) {
                println!("{}", json);
            }
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Color a health status
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" => status.green().to_string(),
        "degraded" => status.yellow().to_string(),
        "unhealthy" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Color a scaling action
pub fn color_action(action: ScaleAction) -> String {
    let text = action.to_string();
    match action {
        ScaleAction::ScaleUp => text.green().bold().to_string(),
        ScaleAction::ScaleDown => text.yellow().bold().to_string(),
        ScaleAction::NoOp => text.dimmed().to_string(),
    }
}

/// Color a ratio against the 1.0 saturation point
pub fn color_ratio(ratio: f64) -> String {
    let formatted = format!("{:.3}", ratio);
    if ratio > 1.0 {
        formatted.red().to_string()
    } else if ratio > 0.8 {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}
