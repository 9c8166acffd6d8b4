//! Fakes shared by unit tests.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::asset::{Asset, CssItem, JsItem};
use crate::injector::{AssetError, AssetInjector};
use crate::provider::{EndpointResolver, Probe};

/// Probe that answers every URL at once.
pub struct InstantProbe;

#[async_trait]
impl Probe for InstantProbe {
    async fn probe(&self, _url: &str) -> Result<()> {
        Ok(())
    }
}

/// Resolver for `https://cdn.test/npm/{path}`, not resolved yet.
pub fn test_resolver() -> EndpointResolver {
    EndpointResolver::new(
        vec![("test".to_string(), "https://cdn.test/npm/{path}".to_string())],
        "test",
        Arc::new(InstantProbe),
        Duration::from_secs(1),
    )
}

/// Resolver for `https://cdn.test/npm/{path}` with resolution already done.
pub async fn resolved_resolver() -> Arc<EndpointResolver> {
    let resolver = Arc::new(test_resolver());
    resolver.find_fastest_provider().await;
    resolver
}

/// Injector that records requests instead of touching a document.
#[derive(Default)]
pub struct RecordingInjector {
    js_calls: AtomicUsize,
    css_calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
    /// URLs whose load fails.
    failing: Mutex<Vec<String>>,
}

impl RecordingInjector {
    pub fn failing_on(url: &str) -> Self {
        let injector = Self::default();
        injector.failing.lock().push(url.to_string());
        injector
    }

    pub fn js_calls(&self) -> usize {
        self.js_calls.load(Ordering::SeqCst)
    }

    pub fn css_calls(&self) -> usize {
        self.css_calls.load(Ordering::SeqCst)
    }

    /// Every requested URL (or inline tag), in request order.
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }

    async fn record<T: Asset>(&self, items: &[T]) -> Result<(), AssetError> {
        // Let other tasks interleave, like a real network load would.
        tokio::task::yield_now().await;
        let failing = self.failing.lock().clone();
        let mut requested = self.requested.lock();
        for item in items {
            let key = item.url().map(str::to_string).unwrap_or_else(|| item.to_tag());
            if failing.contains(&key) {
                return Err(AssetError::Status {
                    url: key,
                    status: 404,
                });
            }
            requested.push(key);
        }
        Ok(())
    }
}

#[async_trait]
impl AssetInjector for RecordingInjector {
    async fn load_js(&self, items: Vec<JsItem>) -> Result<(), AssetError> {
        self.js_calls.fetch_add(1, Ordering::SeqCst);
        self.record(&items).await
    }

    async fn load_css(&self, items: Vec<CssItem>) -> Result<(), AssetError> {
        self.css_calls.fetch_add(1, Ordering::SeqCst);
        self.record(&items).await
    }
}
