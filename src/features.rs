//! Optional-feature tracking and delta asset loading.
//!
//! A page may hold many blocks and a block may be re-rendered many times. The registry
//! remembers which transformer features already had their assets requested so each
//! render only pulls in what is new. Features are never removed during a session.

use futures_util::future::try_join;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::asset::{resolve_all, CssItem, JsItem};
use crate::engine::Transformer;
use crate::injector::{AssetError, AssetInjector};
use crate::provider::EndpointResolver;

/// Set of features whose assets have been requested.
#[derive(Debug, Default)]
pub struct FeatureRegistry {
    enabled: Mutex<HashSet<String>>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every feature of `required` that is not enabled yet, and return those.
    ///
    /// Marking is atomic, so overlapping callers never both receive the same feature.
    pub fn claim<'a>(&self, required: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        let mut enabled = self.enabled.lock();
        required
            .into_iter()
            .filter(|key| enabled.insert((*key).clone()))
            .cloned()
            .collect()
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        self.enabled.lock().contains(key)
    }

    /// Enabled features, sorted.
    pub fn enabled(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.enabled.lock().iter().cloned().collect();
        keys.sort();
        keys
    }
}

/// What one delta load requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaLoad {
    pub features: Vec<String>,
    pub styles: Vec<CssItem>,
    pub scripts: Vec<JsItem>,
}

/// Loads the assets of newly required features.
pub struct DeltaLoader {
    registry: FeatureRegistry,
    resolver: Arc<EndpointResolver>,
    injector: Arc<dyn AssetInjector>,
}

impl DeltaLoader {
    pub fn new(resolver: Arc<EndpointResolver>, injector: Arc<dyn AssetInjector>) -> Self {
        Self {
            registry: FeatureRegistry::new(),
            resolver,
            injector,
        }
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    /// Request the assets of the features in `required` that were not requested before.
    ///
    /// Features are marked before anything is awaited. A feature whose assets then fail
    /// to load stays marked; it is not retried during the session.
    pub async fn apply_feature_delta(
        &self,
        transformer: &dyn Transformer,
        required: &BTreeSet<String>,
    ) -> Result<DeltaLoad, AssetError> {
        let features = self.registry.claim(required);
        if features.is_empty() {
            return Ok(DeltaLoad::default());
        }

        let assets = transformer.get_assets(&features);
        let styles = resolve_all(&assets.styles, &self.resolver)?;
        let scripts = resolve_all(&assets.scripts, &self.resolver)?;
        info!(
            "Loading features {:?} ({} styles, {} scripts)",
            features,
            styles.len(),
            scripts.len()
        );

        let injector = &self.injector;
        let load_styles = async {
            if styles.is_empty() {
                return Ok(());
            }
            injector.load_css(styles.clone()).await
        };
        let load_scripts = async {
            if scripts.is_empty() {
                return Ok(());
            }
            injector.load_js(scripts.clone()).await
        };
        try_join(load_styles, load_scripts).await?;
        debug!("Features {:?} loaded", features);

        Ok(DeltaLoad {
            features,
            styles,
            scripts,
        })
    }
}
