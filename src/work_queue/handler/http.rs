//! HTTP GET handler.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;

use super::JobHandler;
use crate::models::Payload;

/// Fetches the payload URL; any 2xx response is a success.
pub struct HttpHandler {
    timeout: Duration,
    user_agent: String,
    client: Option<Client>,
}

impl HttpHandler {
    pub fn new(timeout: Duration, user_agent: String) -> Self {
        Self {
            timeout,
            user_agent,
            client: None,
        }
    }
}

#[async_trait]
impl JobHandler for HttpHandler {
    async fn setup(&mut self) -> anyhow::Result<()> {
        let client = Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .gzip(true)
            .build()
            .context("Failed to create HTTP client")?;
        self.client = Some(client);
        Ok(())
    }

    async fn process(&self, payload: &Payload) -> anyhow::Result<()> {
        let client = self
            .client
            .as_ref()
            .context("HTTP handler used before setup")?;

        let response = client
            .get(&payload.url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", payload.url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {}", status);
        }

        // Read the body so a truncated transfer counts as a failure.
        let body = response.bytes().await.context("Failed to read body")?;
        tracing::debug!("Fetched {} ({} bytes)", payload.url, body.len());
        Ok(())
    }

    async fn teardown(&mut self) {
        self.client = None;
    }
}
