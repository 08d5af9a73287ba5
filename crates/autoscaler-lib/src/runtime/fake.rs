//! In-memory runtime used by unit tests

use super::{
    async_trait, ContainerRuntime, HealthState, InstanceDetails, InstanceState, InstanceSummary,
    NetworkInfo,
};
use crate::error::RuntimeError;
use crate::models::{InstanceIdentity, RawUsageSnapshot};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct FakeInstance {
    id: String,
    name: String,
    state: InstanceState,
}

#[derive(Debug, Default)]
struct FakeState {
    network: String,
    instances: Vec<FakeInstance>,
    usage: HashMap<String, Result<RawUsageSnapshot, RuntimeError>>,
    unavailable: bool,
    fail_exec: bool,
    health_after_start: Option<HealthState>,
    next_id: u32,
    calls: Vec<String>,
}

/// Runtime with a single network whose state lives in memory.
///
/// Every capability call is appended to a call log so tests can assert on
/// ordering.
pub(crate) struct FakeRuntime {
    state: Mutex<FakeState>,
}

/// Counters giving the requested CPU and memory percentages on one CPU
pub(crate) fn usage(cpu_pct: u64, mem_pct: u64) -> RawUsageSnapshot {
    RawUsageSnapshot {
        memory_used_bytes: mem_pct * 10,
        memory_cache_bytes: 0,
        memory_limit_bytes: 1000,
        cpu_total_usage: 1000 + cpu_pct * 10,
        pre_cpu_total_usage: 1000,
        system_cpu_usage: 2000,
        pre_system_cpu_usage: 1000,
        online_cpu_count: 1,
    }
}

impl FakeRuntime {
    pub(crate) fn new(network: &str) -> Self {
        Self {
            state: Mutex::new(FakeState {
                network: network.to_string(),
                ..Default::default()
            }),
        }
    }

    pub(crate) fn with_instance(self, name: &str, state: InstanceState, raw: RawUsageSnapshot) -> Self {
        {
            let mut s = self.state.lock().unwrap();
            let id = format!("id-{}", name);
            s.instances.push(FakeInstance {
                id: id.clone(),
                name: name.to_string(),
                state,
            });
            s.usage.insert(id, Ok(raw));
        }
        self
    }

    pub(crate) fn with_usage_error(self, name: &str, err: RuntimeError) -> Self {
        self.state
            .lock()
            .unwrap()
            .usage
            .insert(format!("id-{}", name), Err(err));
        self
    }

    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    pub(crate) fn set_fail_exec(&self, fail: bool) {
        self.state.lock().unwrap().fail_exec = fail;
    }

    pub(crate) fn set_health_after_start(&self, health: Option<HealthState>) {
        self.state.lock().unwrap().health_after_start = health;
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn state_of(&self, name: &str) -> Option<InstanceState> {
        self.state
            .lock()
            .unwrap()
            .instances
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.state)
    }

    fn record(&self, call: String) -> Result<std::sync::MutexGuard<'_, FakeState>, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.unavailable {
            return Err(RuntimeError::Unavailable("connection refused".into()));
        }
        Ok(state)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_instances(&self, network: &str) -> Result<Vec<InstanceSummary>, RuntimeError> {
        let state = self.record(format!("list {}", network))?;
        if state.network != network {
            return Ok(Vec::new());
        }
        Ok(state
            .instances
            .iter()
            .map(|i| InstanceSummary {
                identity: InstanceIdentity {
                    id: i.id.clone(),
                    name: i.name.clone(),
                },
                state: i.state,
            })
            .collect())
    }

    async fn inspect_network(&self, network: &str) -> Result<NetworkInfo, RuntimeError> {
        let state = self.record(format!("inspect-network {}", network))?;
        if state.network != network {
            return Err(RuntimeError::NotFound(format!("network {}", network)));
        }
        Ok(NetworkInfo {
            id: format!("net-{}", network),
            name: network.to_string(),
            members: state
                .instances
                .iter()
                .filter(|i| i.state == InstanceState::Running)
                .map(|i| InstanceIdentity {
                    id: i.id.clone(),
                    name: i.name.clone(),
                })
                .collect(),
        })
    }

    async fn inspect_instance(&self, id: &str) -> Result<InstanceDetails, RuntimeError> {
        let state = self.record(format!("inspect {}", id))?;
        let instance = state
            .instances
            .iter()
            .find(|i| i.id == id)
            .ok_or_else(|| RuntimeError::NotFound(format!("container {}", id)))?;
        let health = if instance.state == InstanceState::Running {
            state.health_after_start
        } else {
            None
        };
        Ok(InstanceDetails {
            identity: InstanceIdentity {
                id: instance.id.clone(),
                name: instance.name.clone(),
            },
            state: instance.state,
            health,
        })
    }

    async fn create_instance(&self, image: &str, network: &str) -> Result<String, RuntimeError> {
        let mut state = self.record(format!("create {} {}", image, network))?;
        state.next_id += 1;
        let name = format!("replica_{}", state.next_id);
        let id = format!("id-{}", name);
        state.instances.push(FakeInstance {
            id: id.clone(),
            name,
            state: InstanceState::Created,
        });
        state.usage.insert(id.clone(), Ok(usage(10, 10)));
        Ok(id)
    }

    async fn start_instance(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.record(format!("start {}", id))?;
        let instance = state
            .instances
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| RuntimeError::NotFound(format!("container {}", id)))?;
        instance.state = InstanceState::Running;
        Ok(())
    }

    async fn stop_instance(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.record(format!("stop {}", id))?;
        let instance = state
            .instances
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| RuntimeError::NotFound(format!("container {}", id)))?;
        instance.state = InstanceState::Exited;
        Ok(())
    }

    async fn usage_snapshot(&self, id: &str) -> Result<RawUsageSnapshot, RuntimeError> {
        let state = self.record(format!("stats {}", id))?;
        state
            .usage
            .get(id)
            .cloned()
            .unwrap_or_else(|| Err(RuntimeError::NotFound(format!("container {}", id))))
    }

    async fn exec(&self, instance_name: &str, command: &[String]) -> Result<(), RuntimeError> {
        let state = self.record(format!("exec {} {}", instance_name, command.join(" ")))?;
        if state.fail_exec {
            return Err(RuntimeError::Api {
                status: 409,
                message: format!("container {} is not running", instance_name),
            });
        }
        Ok(())
    }
}
