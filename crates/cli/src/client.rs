//! HTTP client for the latency agent's management API

use anyhow::{Context, Result};
use latency_lib::HealthResponse;
use reqwest::{Client, Response};
use url::Url;

/// Client for a single agent
pub struct AgentClient {
    client: Client,
    base_url: Url,
}

impl AgentClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid agent URL")?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Invalid agent URL: {}", base_url);
        }

        Ok(Self { client, base_url })
    }

    /// URL of `segments` under the base URL, each segment percent-encoded
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Invalid agent URL: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn check(response: Response) -> Result<Response> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Agent error ({}): {}", status, body.trim());
        }
        Ok(response)
    }

    /// Current desired delay, in the agent's textual form
    pub async fn get_latency(&self) -> Result<String> {
        let response = self
            .client
            .get(self.url(&["latency"])?)
            .send()
            .await
            .context("Failed to reach agent")?;

        let body = Self::check(response).await?.text().await?;
        Ok(body.trim().to_string())
    }

    /// Set the desired delay, returns the value the agent accepted
    pub async fn set_latency(&self, latency: &str) -> Result<String> {
        let response = self
            .client
            .put(self.url(&["latency", latency])?)
            .send()
            .await
            .context("Failed to reach agent")?;

        let body = Self::check(response).await?.text().await?;
        Ok(body.trim().to_string())
    }

    /// Component health; an unhealthy agent answers 503 with the same body
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self
            .client
            .get(self.url(&["healthz"])?)
            .send()
            .await
            .context("Failed to reach agent")?;

        if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return response.json().await.context("Failed to parse health");
        }

        Self::check(response)
            .await?
            .json()
            .await
            .context("Failed to parse health")
    }
}
