//! Fastest-mirror resolution and URL building.

use futures_util::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::probe::Probe;

/// Provider used when no candidate answers in time.
pub const DEFAULT_PROVIDER: &str = "jsdelivr";

/// Small file every mirror serves, fetched to measure latency.
const PROBE_PATH: &str = "npm2url/dist/index.cjs";

/// Per-candidate probe timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Errors building a full asset URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    /// URL requested before `find_fastest_provider` completed.
    #[error("CDN endpoint not resolved yet, cannot build URL for {0}")]
    Unresolved(String),

    #[error("CDN provider {0} not found")]
    UnknownProvider(String),
}

/// Built-in mirrors, in preference order.
pub fn default_providers() -> Vec<(String, String)> {
    vec![
        (
            "jsdelivr".to_string(),
            "https://cdn.jsdelivr.net/npm/{path}".to_string(),
        ),
        ("unpkg".to_string(), "https://unpkg.com/{path}".to_string()),
    ]
}

/// Expand a provider template with a package path.
///
/// Templates either contain a `{path}` placeholder or are plain base URLs.
fn expand(template: &str, path: &str) -> String {
    if template.contains("{path}") {
        template.replace("{path}", path)
    } else {
        format!("{}/{}", template.trim_end_matches('/'), path)
    }
}

/// Picks one CDN mirror per session and builds URLs under it.
pub struct EndpointResolver {
    providers: RwLock<Vec<(String, String)>>,
    default_provider: String,
    timeout: Duration,
    probe: Arc<dyn Probe>,
    resolved: OnceCell<String>,
}

impl EndpointResolver {
    pub fn new(
        providers: Vec<(String, String)>,
        default_provider: impl Into<String>,
        probe: Arc<dyn Probe>,
        timeout: Duration,
    ) -> Self {
        Self {
            providers: RwLock::new(providers),
            default_provider: default_provider.into(),
            timeout,
            probe,
            resolved: OnceCell::new(),
        }
    }

    /// Resolver over the built-in mirrors.
    pub fn with_defaults(probe: Arc<dyn Probe>, timeout: Duration) -> Self {
        Self::new(default_providers(), DEFAULT_PROVIDER, probe, timeout)
    }

    /// Register or replace a candidate. Has no effect on an already resolved session.
    pub fn set_provider(&self, name: impl Into<String>, template: impl Into<String>) {
        let name = name.into();
        let template = template.into();
        let mut providers = self.providers.write();
        match providers.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = template,
            None => providers.push((name, template)),
        }
    }

    /// The chosen provider, if resolution has completed.
    pub fn provider(&self) -> Option<&str> {
        self.resolved.get().map(String::as_str)
    }

    /// Race every candidate and remember the first to answer.
    ///
    /// Later calls return the cached choice without probing again, and concurrent
    /// callers share one race. Never fails: if nothing answers, the default provider
    /// is recorded.
    pub async fn find_fastest_provider(&self) -> &str {
        self.resolved
            .get_or_init(|| self.race())
            .await
            .as_str()
    }

    async fn race(&self) -> String {
        let candidates = self.providers.read().clone();
        debug!("Probing {} CDN providers", candidates.len());

        let mut probes: FuturesUnordered<_> = candidates
            .into_iter()
            .map(|(name, template)| {
                let url = expand(&template, PROBE_PATH);
                let probe = Arc::clone(&self.probe);
                let timeout = self.timeout;
                async move {
                    let started = Instant::now();
                    let outcome = tokio::time::timeout(timeout, probe.probe(&url)).await;
                    (name, url, started.elapsed(), outcome)
                }
            })
            .collect();

        // Dropping the stream cancels the probes still in flight.
        while let Some((name, url, elapsed, outcome)) = probes.next().await {
            match outcome {
                Ok(Ok(())) => {
                    info!("Using CDN provider {} ({:?})", name, elapsed);
                    return name;
                }
                Ok(Err(e)) => debug!("Probe {} failed: {:#}", url, e),
                Err(_) => debug!("Probe {} timed out after {:?}", url, self.timeout),
            }
        }

        warn!(
            "No CDN provider responded, falling back to {}",
            self.default_provider
        );
        self.default_provider.clone()
    }

    /// Build the full URL of `name@version/path` under the resolved provider.
    ///
    /// Absolute URLs pass through unchanged.
    pub fn get_full_url(&self, spec: &str) -> Result<String, UrlError> {
        if spec.contains("://") {
            return Ok(spec.to_string());
        }
        let provider = self
            .provider()
            .ok_or_else(|| UrlError::Unresolved(spec.to_string()))?;
        self.get_full_url_for(spec, provider)
    }

    /// Build the full URL of a specifier under an explicit provider.
    pub fn get_full_url_for(&self, spec: &str, provider: &str) -> Result<String, UrlError> {
        if spec.contains("://") {
            return Ok(spec.to_string());
        }
        let providers = self.providers.read();
        let (_, template) = providers
            .iter()
            .find(|(name, _)| name == provider)
            .ok_or_else(|| UrlError::UnknownProvider(provider.to_string()))?;
        Ok(expand(template, spec))
    }
}
