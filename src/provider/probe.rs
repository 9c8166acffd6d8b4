//! Liveness probes for CDN candidates.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

/// Checks whether a URL is reachable.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, url: &str) -> Result<()>;
}

/// Probe that issues a single GET and reads the body, so a mirror only wins once it
/// has actually served content.
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, url: &str) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?
            .error_for_status()
            .with_context(|| format!("Probe rejected by {}", url))?;
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read probe body from {}", url))?;
        debug!("Probe {} answered with {} bytes", url, body.len());
        Ok(())
    }
}

/// Probe used without network access; every candidate fails so the default wins.
pub struct OfflineProbe;

#[async_trait]
impl Probe for OfflineProbe {
    async fn probe(&self, url: &str) -> Result<()> {
        anyhow::bail!("offline mode, not probing {}", url)
    }
}
