//! Docker Engine API client
//!
//! Talks JSON over HTTP to a Docker daemon exposed on a TCP endpoint
//! (`DOCKER_HOST=tcp://...` or a socket proxy).
//!
//! A stock install only listens on `/var/run/docker.sock`. Expose it over
//! TCP first, e.g. with `tecnativa/docker-socket-proxy` (allow `CONTAINERS`,
//! `NETWORKS`, `EXEC` and `POST`) or
//! `socat TCP-LISTEN:2375,fork UNIX-CONNECT:/var/run/docker.sock`.

use super::{
    async_trait, ContainerRuntime, DockerStats, HealthState, InstanceDetails, InstanceState,
    InstanceSummary, NetworkInfo,
};
use crate::error::RuntimeError;
use crate::models::{InstanceIdentity, RawUsageSnapshot};
use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Container runtime backed by the Docker Engine HTTP API
pub struct DockerRuntime {
    client: Client,
    base_url: Url,
}

impl DockerRuntime {
    /// Create a client for the daemon at `endpoint`, e.g. `http://localhost:2375`.
    ///
    /// `unix://` endpoints are rejected; see the module docs.
    pub fn new(endpoint: &str) -> Result<Self> {
        if endpoint.trim().starts_with("unix://") {
            anyhow::bail!(
                "Unix socket endpoint '{}' is not supported; expose the Docker API over TCP \
                 (socket proxy or socat) and set runtime_endpoint to http://host:port",
                endpoint.trim()
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let mut endpoint = endpoint.trim().replacen("tcp://", "http://", 1);
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        let base_url = Url::parse(&endpoint).context("Invalid runtime endpoint URL")?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url, RuntimeError> {
        self.base_url
            .join(path)
            .map_err(|e| RuntimeError::Unavailable(format!("invalid request path {}: {}", path, e)))
    }

    /// Send a request and turn non-success statuses into [`RuntimeError`]s
    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, RuntimeError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();

        // 304 means "already started/stopped", which is fine for us
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or(body);

        if status == StatusCode::NOT_FOUND {
            Err(RuntimeError::NotFound(format!("{}: {}", what, message)))
        } else {
            Err(RuntimeError::Api {
                status: status.as_u16(),
                message: format!("{}: {}", what, message),
            })
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, what: &str) -> Result<T, RuntimeError> {
        let response = self.send(self.client.get(url), what).await?;
        response
            .json()
            .await
            .map_err(|e| RuntimeError::Decode(format!("{}: {}", what, e)))
    }

    async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        url: Url,
        body: &B,
        what: &str,
    ) -> Result<T, RuntimeError> {
        let response = self.send(self.client.post(url).json(body), what).await?;
        response
            .json()
            .await
            .map_err(|e| RuntimeError::Decode(format!("{}: {}", what, e)))
    }
}

fn transport_error(err: reqwest::Error) -> RuntimeError {
    RuntimeError::Unavailable(err.to_string())
}

/// Docker prefixes container names with `/`
fn strip_name(name: &str) -> String {
    name.trim_start_matches('/').to_string()
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerListEntry {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkInspect {
    id: String,
    name: String,
    #[serde(default)]
    containers: Option<HashMap<String, NetworkEndpoint>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkEndpoint {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    id: String,
    name: String,
    state: ContainerInspectState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspectState {
    #[serde(default)]
    status: String,
    #[serde(default)]
    health: Option<ContainerHealth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerHealth {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdResponse {
    id: String,
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_instances(&self, network: &str) -> Result<Vec<InstanceSummary>, RuntimeError> {
        let mut url = self.url("containers/json")?;
        let filters = json!({ "network": [network] }).to_string();
        url.query_pairs_mut()
            .append_pair("all", "true")
            .append_pair("filters", &filters);

        let entries: Vec<ContainerListEntry> = self.get_json(url, "list containers").await?;

        Ok(entries
            .into_iter()
            .map(|entry| InstanceSummary {
                identity: InstanceIdentity {
                    name: entry.names.first().map(|n| strip_name(n)).unwrap_or_default(),
                    id: entry.id,
                },
                state: InstanceState::parse(&entry.state),
            })
            .collect())
    }

    async fn inspect_network(&self, network: &str) -> Result<NetworkInfo, RuntimeError> {
        let url = self.url(&format!("networks/{}", network))?;
        let inspect: NetworkInspect = self.get_json(url, "inspect network").await?;

        let mut members: Vec<InstanceIdentity> = inspect
            .containers
            .unwrap_or_default()
            .into_iter()
            .map(|(id, endpoint)| InstanceIdentity {
                id,
                name: strip_name(&endpoint.name),
            })
            .collect();
        members.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(NetworkInfo {
            id: inspect.id,
            name: inspect.name,
            members,
        })
    }

    async fn inspect_instance(&self, id: &str) -> Result<InstanceDetails, RuntimeError> {
        let url = self.url(&format!("containers/{}/json", id))?;
        let inspect: ContainerInspect = self.get_json(url, "inspect container").await?;

        Ok(InstanceDetails {
            identity: InstanceIdentity {
                id: inspect.id,
                name: strip_name(&inspect.name),
            },
            state: InstanceState::parse(&inspect.state.status),
            health: inspect
                .state
                .health
                .and_then(|h| HealthState::parse(&h.status)),
        })
    }

    async fn create_instance(&self, image: &str, network: &str) -> Result<String, RuntimeError> {
        let url = self.url("containers/create")?;
        let mut endpoints = serde_json::Map::new();
        endpoints.insert(network.to_string(), json!({}));
        let body = json!({
            "Image": image,
            "Tty": false,
            "NetworkingConfig": { "EndpointsConfig": endpoints }
        });

        let created: IdResponse = self.post_json(url, &body, "create container").await?;
        debug!(container_id = %created.id, image = %image, "Created container");
        Ok(created.id)
    }

    async fn start_instance(&self, id: &str) -> Result<(), RuntimeError> {
        let url = self.url(&format!("containers/{}/start", id))?;
        self.send(self.client.post(url), "start container").await?;
        Ok(())
    }

    async fn stop_instance(&self, id: &str) -> Result<(), RuntimeError> {
        let url = self.url(&format!("containers/{}/stop", id))?;
        self.send(self.client.post(url), "stop container").await?;
        Ok(())
    }

    async fn usage_snapshot(&self, id: &str) -> Result<RawUsageSnapshot, RuntimeError> {
        let mut url = self.url(&format!("containers/{}/stats", id))?;
        url.query_pairs_mut().append_pair("stream", "false");

        let response = self.send(self.client.get(url), "container stats").await?;
        let body = response.bytes().await.map_err(transport_error)?;
        let stats = DockerStats::parse(&body)
            .map_err(|e| RuntimeError::Decode(format!("container stats: {}", e)))?;

        Ok(stats.to_raw())
    }

    async fn exec(&self, instance_name: &str, command: &[String]) -> Result<(), RuntimeError> {
        let url = self.url(&format!("containers/{}/exec", instance_name))?;
        let body = json!({
            "Cmd": command,
            "AttachStdout": false,
            "AttachStderr": false,
            "Tty": false,
        });
        let created: IdResponse = self.post_json(url, &body, "create exec").await?;

        let url = self.url(&format!("exec/{}/start", created.id))?;
        let body = json!({ "Detach": true, "Tty": false });
        self.send(self.client.post(url).json(&body), "start exec").await?;

        debug!(instance = %instance_name, command = ?command, "Executed command");
        Ok(())
    }
}
