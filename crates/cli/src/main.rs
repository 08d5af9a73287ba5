//! Replica autoscaler CLI
//!
//! Inspects a running autoscaler, edits the load balancer upstream pool
//! offline and dry-runs scaling decisions.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{simulate, status, upstream};
use std::path::PathBuf;

/// Replica autoscaler CLI
#[derive(Parser)]
#[command(name = "asctl")]
#[command(author, version, about = "CLI for the replica autoscaler", long_about = None)]
pub struct Cli {
    /// Autoscaler API URL (can also be set via ASCTL_API_URL env var)
    #[arg(long, env = "ASCTL_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the latest control loop tick
    Status,

    /// Show component health
    Health,

    /// Inspect or edit the load balancer upstream pool
    #[command(subcommand)]
    Upstream(UpstreamCommands),

    /// Evaluate a scaling decision for hypothetical utilization
    Simulate {
        /// Running replica count (defaults to the number of samples)
        #[arg(long)]
        running: Option<usize>,

        /// CPU threshold in percent
        #[arg(long, default_value = "80")]
        cpu_threshold: String,

        /// Memory threshold in percent
        #[arg(long, default_value = "80")]
        memory_threshold: String,

        /// Instance utilization as name=cpu,memory (repeatable)
        #[arg(long = "sample", required = true)]
        samples: Vec<String>,

        /// Metric used to pick a scale-down victim (memory or cpu)
        #[arg(long, default_value = "memory")]
        victim_sort_key: String,

        /// Instance never chosen as a victim (repeatable)
        #[arg(long = "protect")]
        protected: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum UpstreamCommands {
    /// List upstream groups and their servers
    List {
        /// nginx configuration file
        #[arg(long)]
        file: PathBuf,
    },

    /// Add an instance to the first upstream group
    Add {
        /// Instance name
        name: String,

        /// nginx configuration file
        #[arg(long)]
        file: PathBuf,

        /// Port the instance serves on
        #[arg(long, default_value_t = 80)]
        port: u16,

        /// Rewrite the file instead of printing the result
        #[arg(long)]
        write: bool,
    },

    /// Remove an instance from the first upstream group
    Remove {
        /// Instance name
        name: String,

        /// nginx configuration file
        #[arg(long)]
        file: PathBuf,

        /// Port the instance serves on
        #[arg(long, default_value_t = 80)]
        port: u16,

        /// Rewrite the file instead of printing the result
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            let client = client::ApiClient::new(&cli.api_url)?;
            status::show_status(&client, cli.format).await?;
        }
        Commands::Health => {
            let client = client::ApiClient::new(&cli.api_url)?;
            status::show_health(&client, cli.format).await?;
        }
        Commands::Upstream(upstream_cmd) => match upstream_cmd {
            UpstreamCommands::List { file } => {
                upstream::list(&file, cli.format).await?;
            }
            UpstreamCommands::Add {
                name,
                file,
                port,
                write,
            } => {
                upstream::edit(&file, upstream::Edit::Add, &name, port, write).await?;
            }
            UpstreamCommands::Remove {
                name,
                file,
                port,
                write,
            } => {
                upstream::edit(&file, upstream::Edit::Remove, &name, port, write).await?;
            }
        },
        Commands::Simulate {
            running,
            cpu_threshold,
            memory_threshold,
            samples,
            victim_sort_key,
            protected,
        } => {
            let input = simulate::SimulationInput {
                running,
                cpu_threshold,
                memory_threshold,
                samples,
                victim_sort_key,
                protected,
            };
            simulate::run(input, cli.format)?;
        }
    }

    Ok(())
}
