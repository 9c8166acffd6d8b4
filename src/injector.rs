//! Script and stylesheet injection.
//!
//! Every asset is loaded at most once per injector: external items are fetched (and
//! checked against their SRI digest when one is given) before their tag is appended to
//! the document head. Independent items are fetched in parallel; tags are appended in
//! the order the items were requested.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reqwest::Client;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::asset::{Asset, CssItem, JsItem};
use crate::document::Document;
use crate::http::{download, RetryPolicy};

/// Failure to load a script or stylesheet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssetError {
    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("integrity check failed for {url} (expected {expected})")]
    Integrity { url: String, expected: String },

    #[error("cannot build asset URL: {0}")]
    Url(#[from] crate::provider::UrlError),
}

/// Loads assets into the page. Resolves once every item has finished loading.
#[async_trait]
pub trait AssetInjector: Send + Sync {
    async fn load_js(&self, items: Vec<JsItem>) -> Result<(), AssetError>;
    async fn load_css(&self, items: Vec<CssItem>) -> Result<(), AssetError>;
}

type LoadFuture = Shared<BoxFuture<'static, Result<(), AssetError>>>;

/// Injector writing `<script>`/`<link>`/`<style>` tags into a [`Document`].
///
/// Without an HTTP client (offline mode) external items are trusted and injected
/// without being fetched.
pub struct DocumentInjector {
    document: Arc<Document>,
    client: Option<Client>,
    in_flight: Mutex<HashMap<String, LoadFuture>>,
    injected: Mutex<HashSet<String>>,
}

impl DocumentInjector {
    pub fn new(document: Arc<Document>, client: Option<Client>) -> Self {
        Self {
            document,
            client,
            in_flight: Mutex::new(HashMap::new()),
            injected: Mutex::new(HashSet::new()),
        }
    }

    fn key<T: Asset>(item: &T) -> String {
        item.url().map(str::to_string).unwrap_or_else(|| item.to_tag())
    }

    /// Get the shared load of an item, starting it if this is the first request.
    fn load_future<T: Asset>(&self, item: &T) -> LoadFuture {
        let key = Self::key(item);
        let mut in_flight = self.in_flight.lock();
        if let Some(existing) = in_flight.get(&key) {
            return existing.clone();
        }

        let future: BoxFuture<'static, Result<(), AssetError>> =
            match (item.url(), self.client.clone()) {
                (Some(url), Some(client)) => {
                    let url = url.to_string();
                    let integrity = item.integrity().map(str::to_string);
                    fetch_asset(client, url, integrity).boxed()
                }
                _ => futures_util::future::ready(Ok(())).boxed(),
            };
        let shared = future.shared();
        in_flight.insert(key, shared.clone());
        shared
    }

    async fn load_items<T: Asset>(&self, items: Vec<T>) -> Result<(), AssetError> {
        if items.is_empty() {
            return Ok(());
        }

        let loads: Vec<LoadFuture> = items.iter().map(|item| self.load_future(item)).collect();
        let results = join_all(loads).await;
        if let Some(err) = results.into_iter().find_map(Result::err) {
            warn!("Asset load failed: {}", err);
            return Err(err);
        }

        let mut injected = self.injected.lock();
        for item in &items {
            if injected.insert(Self::key(item)) {
                let tag = item.to_tag();
                debug!("Injecting {}", tag);
                self.document.append_to_head(tag);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AssetInjector for DocumentInjector {
    async fn load_js(&self, items: Vec<JsItem>) -> Result<(), AssetError> {
        self.load_items(items).await
    }

    async fn load_css(&self, items: Vec<CssItem>) -> Result<(), AssetError> {
        self.load_items(items).await
    }
}

async fn fetch_asset(
    client: Client,
    url: String,
    integrity: Option<String>,
) -> Result<(), AssetError> {
    debug!("Fetching {}", url);
    let body = download(&client, &url, RetryPolicy::default()).await?;
    debug!("Fetched {} ({} bytes)", url, body.len());

    match integrity {
        Some(expected) if !verify_integrity(&body, &expected) => {
            Err(AssetError::Integrity { url, expected })
        }
        _ => Ok(()),
    }
}

/// Check a body against an SRI attribute such as `sha384-<base64>`.
///
/// Any matching hash passes. Hashes with unknown algorithms are ignored, and an
/// attribute with no known algorithm at all does not block the load.
pub fn verify_integrity(body: &[u8], integrity: &str) -> bool {
    let mut checked_any = false;
    for token in integrity.split_whitespace() {
        let Some((algorithm, expected)) = token.split_once('-') else {
            continue;
        };
        // Options such as `?foo` may follow the digest.
        let expected = expected.split('?').next().unwrap_or(expected);
        let actual = match algorithm {
            "sha256" => STANDARD.encode(Sha256::digest(body)),
            "sha384" => STANDARD.encode(Sha384::digest(body)),
            "sha512" => STANDARD.encode(Sha512::digest(body)),
            _ => continue,
        };
        checked_any = true;
        if actual == expected {
            return true;
        }
    }
    !checked_any
}
