//! HTTP plumbing for CDN probes and asset downloads.

use anyhow::{Context, Result};
use rand::Rng;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::injector::AssetError;

/// Default request timeout for asset downloads in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const USER_AGENT: &str = concat!("markmap-autoload/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client shared by the probe and the asset injector.
pub fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to build HTTP client")
}

/// How often and how patiently a download is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    /// Wait before the first retry; doubled for each further one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based), with up to 25% jitter on top.
    fn delay(&self, retry: usize) -> Duration {
        let factor = 1u32.checked_shl(retry as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        let max_jitter_ms = (delay.as_millis() / 4).min(u128::from(u64::MAX)) as u64;
        if max_jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter_ms))
    }
}

/// CDN answers worth asking again: throttling, timeouts and server-side errors.
fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
    ) || status.is_server_error()
}

enum Attempt {
    Body(Vec<u8>),
    Transient(AssetError),
    Fatal(AssetError),
}

async fn download_once(client: &Client, url: &str) -> Attempt {
    let fetch_error = |e: reqwest::Error| AssetError::Fetch {
        url: url.to_string(),
        message: e.to_string(),
    };

    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(e) if e.is_timeout() || e.is_connect() => return Attempt::Transient(fetch_error(e)),
        Err(e) => return Attempt::Fatal(fetch_error(e)),
    };

    let status = response.status();
    if !status.is_success() {
        let err = AssetError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        };
        return if is_transient_status(status) {
            Attempt::Transient(err)
        } else {
            Attempt::Fatal(err)
        };
    }

    // A body cut short is as transient as a failed connect.
    match response.bytes().await {
        Ok(body) => Attempt::Body(body.to_vec()),
        Err(e) => Attempt::Transient(fetch_error(e)),
    }
}

/// Download an asset body, retrying transient failures under `policy`.
///
/// The error of the last attempt is returned once retries run out; a non-transient
/// status such as 404 fails at once.
pub async fn download(
    client: &Client,
    url: &str,
    policy: RetryPolicy,
) -> Result<Vec<u8>, AssetError> {
    let mut retries = 0;
    loop {
        match download_once(client, url).await {
            Attempt::Body(body) => return Ok(body),
            Attempt::Fatal(err) => return Err(err),
            Attempt::Transient(err) if retries >= policy.max_retries => {
                debug!("Giving up on {} after {} retries", url, retries);
                return Err(err);
            }
            Attempt::Transient(err) => {
                let delay = policy.delay(retries);
                debug!("{}; retrying in {:?} ({}/{})", err, delay, retries + 1, policy.max_retries);
                sleep(delay).await;
                retries += 1;
            }
        }
    }
}
