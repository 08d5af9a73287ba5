//! Replica autoscaler
//!
//! Periodically samples the replicas on a container network, resizes the
//! fleet against CPU and memory thresholds and keeps the nginx upstream pool
//! in line with it.

use anyhow::{Context, Result};
use autoscaler_lib::{
    collector::FleetInspector,
    controller::{shutdown_channel, ControlLoopBuilder, StatusBoard},
    health::HealthRegistry,
    observability::{AutoscalerMetrics, StructuredLogger},
    runtime::{ContainerRuntime, DockerRuntime},
    sink::{LogSink, PrometheusSink},
    upstream::UpstreamConfig,
};
use clap::Parser;
use replica_autoscaler::{api, config::AutoscalerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AUTOSCALER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "autoscaler", version, about = "Threshold-driven replica autoscaler")]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "AUTOSCALER_CONFIG", default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let args = Args::parse();
    info!(config = %args.config.display(), "Starting replica autoscaler");

    let config = AutoscalerConfig::load(&args.config)?;
    let policy = config.policy()?;
    let topology = config.topology();

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::new(&config.runtime_endpoint)?);

    // Startup checks: the runtime answers, the network exists and the
    // load balancer config has an upstream group
    let inspector = FleetInspector::new(runtime.clone(), Arc::new(topology.clone()));
    let network = inspector
        .verify_network(&topology.network)
        .await
        .with_context(|| format!("Startup check failed for network '{}'", topology.network))?;
    info!(network = %network.name, members = network.members.len(), "Network found");

    let nginx_text = tokio::fs::read_to_string(&topology.nginx_config_path)
        .await
        .with_context(|| {
            format!(
                "Failed to read load balancer config {}",
                topology.nginx_config_path.display()
            )
        })?;
    let servers = UpstreamConfig::parse(&nginx_text)?.servers()?;
    info!(servers = ?servers, "Load balancer upstream pool");

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = AutoscalerMetrics::new();
    let logger = StructuredLogger::new(&topology.network);
    logger.log_startup(AUTOSCALER_VERSION, policy.period.as_secs_f64());

    let status = StatusBoard::new();
    let control_loop = ControlLoopBuilder::new()
        .runtime(runtime)
        .policy(policy.clone())
        .topology(topology.clone())
        .reload_command(config.reload_command.clone())
        .sink(Arc::new(LogSink))
        .sink(Arc::new(PrometheusSink::new(metrics.clone())))
        .health(health_registry.clone())
        .metrics(metrics.clone())
        .status_board(status.clone())
        .max_scale_up_step(config.max_scale_up_step)
        .startup_timeout(config.startup_timeout())
        .build()?;

    let app_state = Arc::new(api::AppState {
        health_registry: health_registry.clone(),
        metrics,
        status,
        topology,
        policy,
    });

    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let (shutdown, signal) = shutdown_channel();
    let loop_handle = tokio::spawn(control_loop.run(signal));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    shutdown.raise();

    loop_handle.await?;
    api_handle.abort();
    info!("Shut down");

    Ok(())
}
