//! API client for the autoscaler daemon

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// GET `path`, failing on any non-success status
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let (status, body) = self.get_with_status(path).await?;
        if !status.is_success() {
            anyhow::bail!("API error ({}): {}", status, body);
        }
        serde_json::from_str(&body).context("Failed to parse response")
    }

    /// GET `path`, also accepting 503 with a JSON body (health endpoints)
    pub async fn get_probe<T: DeserializeOwned>(&self, path: &str) -> Result<(StatusCode, T)> {
        let (status, body) = self.get_with_status(path).await?;
        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            anyhow::bail!("API error ({}): {}", status, body);
        }
        let parsed = serde_json::from_str(&body).context("Failed to parse response")?;
        Ok((status, parsed))
    }

    async fn get_with_status(&self, path: &str) -> Result<(StatusCode, String)> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response.text().await.context("Failed to read response")?;
        Ok((status, body))
    }
}
