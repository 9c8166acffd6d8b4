//! Autoloader configuration.
//!
//! Pages configure the autoloader with a JSON object whose keys override the built-in
//! defaults one by one:
//!
//! ```json
//! {
//!   "baseJs": ["d3@7.9.0", "markmap-lib@0.18.12", "markmap-view@0.18.12"],
//!   "manual": true,
//!   "toolbar": true,
//!   "transformPlugins": ["frontmatter", "katex"]
//! }
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::asset::{AssetSpecifier, CssItem, JsItem};
use crate::document::Document;
use crate::provider::DEFAULT_TIMEOUT_MS;

const D3_VERSION: &str = "7.9.0";
const LIB_VERSION: &str = "0.18.12";
const VIEW_VERSION: &str = "0.18.12";
const TOOLBAR_VERSION: &str = "0.18.12";

/// Environment variables overriding the pinned package versions.
pub const D3_VERSION_ENV: &str = "MARKMAP_D3_VERSION";
pub const LIB_VERSION_ENV: &str = "MARKMAP_LIB_VERSION";
pub const VIEW_VERSION_ENV: &str = "MARKMAP_VIEW_VERSION";
pub const TOOLBAR_VERSION_ENV: &str = "MARKMAP_TOOLBAR_VERSION";

/// Id of the inline `<script type="application/json">` holding page configuration.
pub const INLINE_CONFIG_ID: &str = "markmap-autoloader";

fn version(env: &str, fallback: &str) -> String {
    std::env::var(env)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// Callback invoked once the bootstrap completes.
pub type ReadyCallback = Arc<dyn Fn() + Send + Sync>;

/// One CDN candidate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// URL template with a `{path}` placeholder, or a base URL.
    pub template: String,
}

/// Autoloader options, read-only once built.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoLoaderOptions {
    /// Mandatory scripts, loaded in order.
    pub base_js: Vec<AssetSpecifier<JsItem>>,
    /// Mandatory stylesheets.
    pub base_css: Vec<AssetSpecifier<CssItem>>,
    /// Skip the automatic scan at startup.
    pub manual: bool,
    /// Attach a toolbar to every diagram.
    pub toolbar: bool,
    /// Plugins passed to every transformer. Empty enables all.
    pub transform_plugins: Vec<String>,
    pub provider_timeout_ms: u64,
    /// CDN candidates. Empty uses the built-in mirrors.
    pub providers: Vec<ProviderConfig>,
    #[serde(skip)]
    pub on_ready: Option<ReadyCallback>,
}

impl Default for AutoLoaderOptions {
    fn default() -> Self {
        let toolbar_version = version(TOOLBAR_VERSION_ENV, TOOLBAR_VERSION);
        Self {
            base_js: vec![
                AssetSpecifier::Package(format!("d3@{}", version(D3_VERSION_ENV, D3_VERSION))),
                AssetSpecifier::Package(format!(
                    "markmap-lib@{}",
                    version(LIB_VERSION_ENV, LIB_VERSION)
                )),
                AssetSpecifier::Package(format!(
                    "markmap-view@{}",
                    version(VIEW_VERSION_ENV, VIEW_VERSION)
                )),
                AssetSpecifier::Package(format!("markmap-toolbar@{}", toolbar_version)),
            ],
            base_css: vec![AssetSpecifier::Package(format!(
                "markmap-toolbar@{}/dist/style.css",
                toolbar_version
            ))],
            manual: false,
            toolbar: false,
            transform_plugins: Vec::new(),
            provider_timeout_ms: DEFAULT_TIMEOUT_MS,
            providers: Vec::new(),
            on_ready: None,
        }
    }
}

impl std::fmt::Debug for AutoLoaderOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoLoaderOptions")
            .field("base_js", &self.base_js)
            .field("base_css", &self.base_css)
            .field("manual", &self.manual)
            .field("toolbar", &self.toolbar)
            .field("transform_plugins", &self.transform_plugins)
            .field("provider_timeout_ms", &self.provider_timeout_ms)
            .field("providers", &self.providers)
            .field("on_ready", &self.on_ready.is_some())
            .finish()
    }
}

impl AutoLoaderOptions {
    /// Merge a page-level JSON object over the defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse autoloader options")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read autoloader options from {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Invalid autoloader options in {}", path.display()))
    }

    /// Options embedded in the page as `<script type="application/json" id="markmap-autoloader">`.
    ///
    /// Returns `None` when the page carries no such block.
    pub fn from_document(document: &Document) -> Result<Option<Self>> {
        match document.raw_text_by_id(INLINE_CONFIG_ID) {
            Some(json) if !json.trim().is_empty() => Self::from_json(&json)
                .with_context(|| format!("Invalid inline options in #{}", INLINE_CONFIG_ID))
                .map(Some),
            _ => Ok(None),
        }
    }

    pub fn with_on_ready(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_ready = Some(Arc::new(callback));
        self
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    /// Configured CDN candidates as `(name, template)` pairs.
    pub fn provider_list(&self) -> Option<Vec<(String, String)>> {
        if self.providers.is_empty() {
            return None;
        }
        Some(
            self.providers
                .iter()
                .map(|p| (p.name.clone(), p.template.clone()))
                .collect(),
        )
    }
}
