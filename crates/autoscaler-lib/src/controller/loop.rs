//! Pipelined control loop
//!
//! A collect task snapshots the fleet every period and hands the snapshot to
//! the act task over a channel of capacity one. The act task decides and
//! applies at most one scale action per snapshot, so two actions never
//! overlap.

use super::{InstanceReport, ShutdownSignal, StatusBoard, TickOutcome, TickReport};
use crate::collector::FleetInspector;
use crate::error::{FleetError, ReconcileError, RuntimeError, SelectionError};
use crate::health::{components, HealthRegistry};
use crate::models::{DeploymentTopology, FleetSnapshot};
use crate::observability::{AutoscalerMetrics, StructuredLogger};
use crate::policy::ScalingPolicy;
use crate::runtime::{ContainerRuntime, InstanceState};
use crate::scaling::{decide, ratios, ScaleAction, ScalingDecision, VictimSelector};
use crate::sink::UtilizationSink;
use crate::upstream::UpstreamReconciler;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Tuning for the act phase
#[derive(Debug, Clone)]
pub struct ControlLoopConfig {
    /// Most instances created in a single tick (default: 1)
    pub max_scale_up_step: usize,
    /// How long a new instance may take to become ready (default: 30 seconds)
    pub startup_timeout: Duration,
    /// Interval between readiness checks (default: 1 second)
    pub readiness_poll_interval: Duration,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            max_scale_up_step: 1,
            startup_timeout: Duration::from_secs(30),
            readiness_poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Error)]
enum ActError {
    #[error("shutdown requested")]
    Cancelled,

    #[error("failed to {action} instance: {source}")]
    Runtime {
        action: &'static str,
        #[source]
        source: RuntimeError,
    },

    #[error("instance {instance} did not become ready within {timeout:?}")]
    StartupTimeout { instance: String, timeout: Duration },

    #[error("instance {instance} stopped while starting ({state:?})")]
    StartupFailed { instance: String, state: InstanceState },

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Selection(#[from] SelectionError),
}

fn runtime_err(action: &'static str) -> impl FnOnce(RuntimeError) -> ActError {
    move |source| ActError::Runtime { action, source }
}

/// Drives the fleet towards the size its utilization calls for
pub struct ControlLoop {
    runtime: Arc<dyn ContainerRuntime>,
    topology: Arc<DeploymentTopology>,
    policy: ScalingPolicy,
    inspector: FleetInspector,
    selector: VictimSelector,
    reconciler: Arc<UpstreamReconciler>,
    sinks: Vec<Arc<dyn UtilizationSink>>,
    health: HealthRegistry,
    metrics: AutoscalerMetrics,
    logger: StructuredLogger,
    status: StatusBoard,
    config: ControlLoopConfig,
}

impl ControlLoop {
    pub fn status_board(&self) -> StatusBoard {
        self.status.clone()
    }

    pub fn policy(&self) -> &ScalingPolicy {
        &self.policy
    }

    /// Run both halves until shutdown is raised
    pub async fn run(self, shutdown: ShutdownSignal) {
        info!(
            network = %self.topology.network,
            period_ms = self.policy.period.as_millis() as u64,
            "Starting control loop"
        );

        let this = Arc::new(self);
        let (tx, rx) = mpsc::channel(1);

        let collect = tokio::spawn(this.clone().collect_loop(tx, shutdown.clone()));
        let act = tokio::spawn(this.act_loop(rx, shutdown));

        let (collect, act) = tokio::join!(collect, act);
        if let Err(e) = collect {
            warn!(error = %e, "Collect task ended abnormally");
        }
        if let Err(e) = act {
            warn!(error = %e, "Act task ended abnormally");
        }
        info!("Control loop stopped");
    }

    async fn collect_loop(self: Arc<Self>, tx: mpsc::Sender<FleetSnapshot>, shutdown: ShutdownSignal) {
        let mut ticker = interval(self.policy.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = match self.collect().await {
                        Ok(snapshot) => snapshot,
                        Err(_) => continue,
                    };

                    // Blocks while the previous snapshot is still queued
                    tokio::select! {
                        sent = tx.send(snapshot) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                        _ = shutdown.raised() => break,
                    }
                }
                _ = shutdown.raised() => break,
            }
        }

        debug!("Collect task stopped");
    }

    async fn act_loop(self: Arc<Self>, mut rx: mpsc::Receiver<FleetSnapshot>, shutdown: ShutdownSignal) {
        let mut tick = 0u64;

        loop {
            let snapshot = tokio::select! {
                received = rx.recv() => match received {
                    Some(snapshot) => snapshot,
                    None => break,
                },
                _ = shutdown.raised() => break,
            };

            tick += 1;
            self.act(tick, snapshot, &shutdown).await;
        }

        debug!("Act task stopped");
    }

    /// Take one fleet snapshot, updating inspector health
    pub async fn collect(&self) -> Result<FleetSnapshot, FleetError> {
        match self.inspector.snapshot(&self.topology.network).await {
            Ok(snapshot) => {
                if !snapshot.skipped().is_empty() {
                    self.metrics.inc_sample_errors(snapshot.skipped().len() as u64);
                    self.health
                        .set_degraded(
                            components::INSPECTOR,
                            format!("{} instance(s) could not be sampled", snapshot.skipped().len()),
                        )
                        .await;
                } else {
                    self.health.set_healthy(components::INSPECTOR).await;
                }
                Ok(snapshot)
            }
            Err(e) => {
                warn!(network = %self.topology.network, error = %e, "Aborting tick: fleet snapshot failed");
                self.health.set_unhealthy(components::INSPECTOR, e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Decide on one snapshot and apply the resulting action
    pub async fn act(&self, tick: u64, snapshot: FleetSnapshot, shutdown: &ShutdownSignal) -> TickReport {
        let start = Instant::now();

        for sink in &self.sinks {
            if let Err(e) = sink.record(&snapshot).await {
                warn!(sink = sink.name(), error = %e, "Utilization sink failed");
            }
        }

        let running = snapshot.running_count();
        let decision = decide(&snapshot, &self.policy, running);
        self.logger.log_decision(&decision);
        self.metrics.set_replicas(running, decision.desired_replicas);

        let outcome = match decision.action {
            ScaleAction::NoOp => TickOutcome::Idle,
            ScaleAction::ScaleUp => {
                let mut created = Vec::new();
                let result = self.scale_up(&decision, shutdown, &mut created).await;
                self.finish(decision.action, result, created).await
            }
            ScaleAction::ScaleDown => {
                let mut removed = Vec::new();
                let result = self.scale_down(&snapshot, shutdown, &mut removed).await;
                self.finish(decision.action, result, removed).await
            }
        };

        if !matches!(outcome, TickOutcome::Failed { .. }) {
            self.health.set_healthy(components::ENGINE).await;
        }

        let elapsed = start.elapsed();
        self.metrics.observe_tick_duration(elapsed.as_secs_f64());
        self.logger.log_tick(
            running,
            snapshot.len(),
            snapshot.skipped().len(),
            elapsed.as_millis() as u64,
        );

        let report = TickReport {
            tick,
            taken_at: snapshot.taken_at,
            running_replicas: running,
            samples: snapshot
                .sorted_names()
                .into_iter()
                .filter_map(|name| snapshot.get(name).map(|s| (name, s)))
                .map(|(name, s)| InstanceReport {
                    instance: name.to_string(),
                    cpu_utilization_pct: s.cpu_utilization_pct,
                    memory_utilization_pct: s.memory_utilization_pct,
                    cpu: s.cpu_display(),
                    memory: s.memory_display(),
                })
                .collect(),
            skipped: snapshot.skipped().to_vec(),
            ratios: ratios(&snapshot, &self.policy, running),
            decision,
            outcome,
            duration_ms: elapsed.as_millis() as u64,
        };

        self.status.publish(report.clone()).await;
        report
    }

    /// Map an action result to its outcome, logging and updating health
    async fn finish(
        &self,
        action: ScaleAction,
        result: Result<(), ActError>,
        instances: Vec<String>,
    ) -> TickOutcome {
        match result {
            Ok(()) => {
                for instance in &instances {
                    self.logger.log_scale_action(action, instance);
                    self.metrics.inc_scale_event(action);
                }
                self.health.set_healthy(components::RECONCILER).await;
                match action {
                    ScaleAction::ScaleDown => TickOutcome::ScaledDown {
                        instance: instances.into_iter().next().unwrap_or_default(),
                    },
                    _ => TickOutcome::ScaledUp { instances },
                }
            }
            Err(ActError::Cancelled) => {
                if !instances.is_empty() {
                    warn!(
                        action = %action,
                        instances = ?instances,
                        "Shutdown interrupted a scale action; partial changes are kept"
                    );
                }
                TickOutcome::Cancelled { instances }
            }
            Err(ActError::Selection(e)) => {
                info!(action = %action, reason = %e, "Scale-down refused");
                TickOutcome::Refused {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                let reason = e.to_string();
                let instance = instances.last().map(String::as_str);
                self.logger.log_scale_failure(action, instance, &reason);

                match &e {
                    ActError::Reconcile(err) => {
                        self.metrics.inc_reconcile_errors();
                        if err.is_drift() {
                            self.logger.log_drift(instance.unwrap_or(""), &reason);
                            self.health.set_degraded(components::RECONCILER, &reason).await;
                        } else {
                            self.health.set_unhealthy(components::RECONCILER, &reason).await;
                        }
                    }
                    _ => self.health.set_degraded(components::ENGINE, &reason).await,
                }

                TickOutcome::Failed { instances, reason }
            }
        }
    }

    fn check(shutdown: &ShutdownSignal) -> Result<(), ActError> {
        if shutdown.is_raised() {
            Err(ActError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Create, start and register new instances.
    ///
    /// `created` receives the name of every instance that completed the
    /// whole sequence.
    async fn scale_up(
        &self,
        decision: &ScalingDecision,
        shutdown: &ShutdownSignal,
        created: &mut Vec<String>,
    ) -> Result<(), ActError> {
        let wanted = decision
            .desired_replicas
            .saturating_sub(decision.running_replicas)
            .clamp(1, self.config.max_scale_up_step.max(1));

        for _ in 0..wanted {
            Self::check(shutdown)?;
            let id = self
                .runtime
                .create_instance(&self.topology.image, &self.topology.network)
                .await
                .map_err(runtime_err("create"))?;

            Self::check(shutdown)?;
            self.runtime
                .start_instance(&id)
                .await
                .map_err(runtime_err("start"))?;

            let name = match self.wait_ready(&id, shutdown).await {
                Ok(name) => name,
                Err(ActError::Cancelled) => return Err(ActError::Cancelled),
                Err(e) => {
                    self.discard(&id, &e).await;
                    return Err(e);
                }
            };

            Self::check(shutdown)?;
            if let Err(e) = self.reconciler.add_server(&name).await {
                let e = ActError::from(e);
                self.discard(&id, &e).await;
                return Err(e);
            }
            created.push(name);
        }

        Ok(())
    }

    /// Stop a started instance that will not join the upstream pool
    async fn discard(&self, id: &str, cause: &ActError) {
        warn!(id = %id, cause = %cause, "Stopping instance left outside the upstream pool");
        if let Err(stop_err) = self.runtime.stop_instance(id).await {
            warn!(id = %id, error = %stop_err, "Failed to stop instance");
        }
    }

    /// Poll until the instance is ready and return its name
    async fn wait_ready(&self, id: &str, shutdown: &ShutdownSignal) -> Result<String, ActError> {
        let deadline = Instant::now() + self.config.startup_timeout;

        loop {
            Self::check(shutdown)?;
            let details = self
                .runtime
                .inspect_instance(id)
                .await
                .map_err(runtime_err("inspect"))?;

            if details.is_ready() {
                return Ok(details.identity.name);
            }
            if matches!(details.state, InstanceState::Exited | InstanceState::Dead) {
                return Err(ActError::StartupFailed {
                    instance: details.identity.name,
                    state: details.state,
                });
            }
            if Instant::now() >= deadline {
                return Err(ActError::StartupTimeout {
                    instance: details.identity.name,
                    timeout: self.config.startup_timeout,
                });
            }

            debug!(instance = %details.identity.name, state = ?details.state, health = ?details.health, "Waiting for instance");
            tokio::select! {
                _ = tokio::time::sleep(self.config.readiness_poll_interval) => {}
                _ = shutdown.raised() => return Err(ActError::Cancelled),
            }
        }
    }

    /// Remove the least-loaded instance from the pool, then stop it
    async fn scale_down(
        &self,
        snapshot: &FleetSnapshot,
        shutdown: &ShutdownSignal,
        removed: &mut Vec<String>,
    ) -> Result<(), ActError> {
        let victim = self.selector.select(snapshot)?;

        Self::check(shutdown)?;
        self.reconciler.remove_server(&victim).await?;
        removed.push(victim.clone());

        Self::check(shutdown)?;
        let id = snapshot.id_of(&victim).unwrap_or(&victim);
        self.runtime
            .stop_instance(id)
            .await
            .map_err(runtime_err("stop"))?;

        Ok(())
    }
}

/// Builder for the control loop
pub struct ControlLoopBuilder {
    runtime: Option<Arc<dyn ContainerRuntime>>,
    policy: Option<ScalingPolicy>,
    topology: DeploymentTopology,
    reload_command: Option<Vec<String>>,
    sinks: Vec<Arc<dyn UtilizationSink>>,
    health: Option<HealthRegistry>,
    metrics: Option<AutoscalerMetrics>,
    status: Option<StatusBoard>,
    config: ControlLoopConfig,
}

impl ControlLoopBuilder {
    pub fn new() -> Self {
        Self {
            runtime: None,
            policy: None,
            topology: DeploymentTopology::default(),
            reload_command: None,
            sinks: Vec::new(),
            health: None,
            metrics: None,
            status: None,
            config: ControlLoopConfig::default(),
        }
    }

    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn policy(mut self, policy: ScalingPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn topology(mut self, topology: DeploymentTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Command run inside the load balancer after each config change
    pub fn reload_command(mut self, command: Vec<String>) -> Self {
        self.reload_command = Some(command);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn UtilizationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn metrics(mut self, metrics: AutoscalerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn status_board(mut self, status: StatusBoard) -> Self {
        self.status = Some(status);
        self
    }

    pub fn max_scale_up_step(mut self, step: usize) -> Self {
        self.config.max_scale_up_step = step;
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.config.startup_timeout = timeout;
        self
    }

    pub fn readiness_poll_interval(mut self, interval: Duration) -> Self {
        self.config.readiness_poll_interval = interval;
        self
    }

    pub fn build(self) -> Result<ControlLoop> {
        let runtime = self
            .runtime
            .ok_or_else(|| anyhow::anyhow!("Container runtime is required"))?;
        let policy = self
            .policy
            .ok_or_else(|| anyhow::anyhow!("Scaling policy is required"))?;
        if self.config.max_scale_up_step == 0 {
            anyhow::bail!("max_scale_up_step must be at least 1");
        }

        let topology = Arc::new(self.topology);
        let mut reconciler = UpstreamReconciler::new(runtime.clone(), topology.clone());
        if let Some(command) = self.reload_command {
            reconciler = reconciler.with_reload_command(command);
        }

        Ok(ControlLoop {
            inspector: FleetInspector::new(runtime.clone(), topology.clone()),
            selector: VictimSelector::from_topology(&topology, policy.victim_sort_key),
            reconciler: Arc::new(reconciler),
            logger: StructuredLogger::new(topology.network.clone()),
            runtime,
            topology,
            policy,
            sinks: self.sinks,
            health: self.health.unwrap_or_default(),
            metrics: self.metrics.unwrap_or_default(),
            status: self.status.unwrap_or_default(),
            config: self.config,
        })
    }
}

impl Default for ControlLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
