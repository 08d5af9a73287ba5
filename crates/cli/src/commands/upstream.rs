//! Offline editing of the load balancer upstream pool
//!
//! These commands only touch the file. Reloading nginx is left to the
//! operator (or to the daemon on its next scale action).

use anyhow::{Context, Result};
use autoscaler_lib::{upstream::UpstreamConfig, DeploymentTopology};
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

use crate::output::{print_info, print_success, print_table, OutputFormat};

#[derive(Debug, Clone, Copy)]
pub enum Edit {
    Add,
    Remove,
}

#[derive(Tabled, Serialize)]
struct ServerRow {
    #[tabled(rename = "Upstream")]
    upstream: String,
    #[tabled(rename = "Server")]
    server: String,
}

async fn load(file: &Path) -> Result<UpstreamConfig> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    UpstreamConfig::parse(&text).with_context(|| format!("Failed to parse {}", file.display()))
}

/// List every upstream group and its servers
pub async fn list(file: &Path, format: OutputFormat) -> Result<()> {
    let config = load(file).await?;

    let rows: Vec<ServerRow> = config
        .groups()
        .into_iter()
        .flat_map(|group| {
            let upstream = group.name;
            group.servers.into_iter().map(move |server| ServerRow {
                upstream: upstream.clone(),
                server,
            })
        })
        .collect();

    print_table(&rows, format);
    Ok(())
}

/// Add or remove `name:port` in the first upstream group
pub async fn edit(file: &Path, edit: Edit, name: &str, port: u16, write: bool) -> Result<()> {
    let mut config = load(file).await?;

    let topology = DeploymentTopology {
        upstream_port: port,
        ..DeploymentTopology::default()
    };
    let address = topology.upstream_address(name);

    match edit {
        Edit::Add => config.add_server(&address)?,
        Edit::Remove => config.remove_server(&address)?,
    }

    if !write {
        print!("{}", config.to_text());
        return Ok(());
    }

    tokio::fs::write(file, config.to_text())
        .await
        .with_context(|| format!("Failed to write {}", file.display()))?;

    let verb = match edit {
        Edit::Add => "Added",
        Edit::Remove => "Removed",
    };
    print_success(&format!("{} {} in {}", verb, address, file.display()));
    print_info("Reload the load balancer for the change to take effect");
    Ok(())
}
