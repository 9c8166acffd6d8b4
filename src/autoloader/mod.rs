//! The autoloader service: bootstrap once, then turn every `.markmap` block of a page
//! into a live diagram.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bootstrap::{BootstrapError, BootstrapSequencer, BootstrapState};
use crate::config::AutoLoaderOptions;
use crate::document::{Container, Document};
use crate::engine::outline::OutlineTransformerFactory;
use crate::engine::svg::{DefaultToolbar, SvgEngine};
use crate::engine::EngineHandles;
use crate::features::{DeltaLoader, FeatureRegistry};
use crate::injector::AssetInjector;
use crate::provider::{EndpointResolver, Probe, DEFAULT_PROVIDER};
use crate::render::RenderUnit;

#[cfg(test)]
mod tests;

/// Class marking an element whose text is an outline to render.
pub const MARKER_CLASS: &str = "markmap";

/// Build the endpoint resolver described by `options`.
///
/// Configured providers replace the built-in mirrors; templates that do not form a
/// valid URL are skipped.
pub fn resolver_for(options: &AutoLoaderOptions, probe: Arc<dyn Probe>) -> EndpointResolver {
    let timeout = options.provider_timeout();
    let Some(configured) = options.provider_list() else {
        return EndpointResolver::with_defaults(probe, timeout);
    };

    let providers: Vec<(String, String)> = configured
        .into_iter()
        .filter(|(name, template)| {
            let sample = template.replace("{path}", "");
            match url::Url::parse(&sample) {
                Ok(_) => true,
                Err(e) => {
                    warn!("Skipping CDN provider {} with invalid template {}: {}", name, template, e);
                    false
                }
            }
        })
        .collect();
    if providers.is_empty() {
        warn!("No usable CDN provider configured, using the built-in mirrors");
        return EndpointResolver::with_defaults(probe, timeout);
    }

    let default = providers
        .iter()
        .find(|(name, _)| name == DEFAULT_PROVIDER)
        .unwrap_or(&providers[0])
        .0
        .clone();
    EndpointResolver::new(providers, default, probe, timeout)
}

/// Built-in outline transformer, SVG engine and toolbar.
pub fn builtin_handles(resolver: &Arc<EndpointResolver>) -> EngineHandles {
    EngineHandles {
        engine: Arc::new(SvgEngine),
        transformers: Arc::new(OutlineTransformerFactory::new(Some(Arc::clone(resolver)))),
        toolbar: Some(Arc::new(DefaultToolbar)),
    }
}

/// Page-wide autoloader session.
pub struct Autoloader {
    options: Arc<AutoLoaderOptions>,
    document: Arc<Document>,
    resolver: Arc<EndpointResolver>,
    delta: Arc<DeltaLoader>,
    bootstrap: BootstrapSequencer,
}

impl Autoloader {
    pub fn new(
        options: AutoLoaderOptions,
        document: Arc<Document>,
        resolver: Arc<EndpointResolver>,
        injector: Arc<dyn AssetInjector>,
        handles: EngineHandles,
    ) -> Arc<Self> {
        let options = Arc::new(options);
        let delta = Arc::new(DeltaLoader::new(
            Arc::clone(&resolver),
            Arc::clone(&injector),
        ));
        let bootstrap = BootstrapSequencer::new(
            Arc::clone(&options),
            Arc::clone(&resolver),
            injector,
            Arc::clone(&document),
            handles,
        );
        Arc::new(Self {
            options,
            document,
            resolver,
            delta,
            bootstrap,
        })
    }

    pub fn options(&self) -> &AutoLoaderOptions {
        &self.options
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn resolver(&self) -> &Arc<EndpointResolver> {
        &self.resolver
    }

    pub fn features(&self) -> &FeatureRegistry {
        self.delta.registry()
    }

    pub fn state(&self) -> BootstrapState {
        self.bootstrap.state()
    }

    /// Wait for the shared bootstrap, starting it if needed.
    pub async fn ready(&self) -> Result<(), BootstrapError> {
        self.bootstrap.ready().await.map(|_| ())
    }

    /// Render every marked element under `container`.
    ///
    /// The container is searched only after the bootstrap completes, so elements added
    /// in the meantime are found. Each block renders independently: a block whose
    /// content cannot be transformed is reported on its unit and left unchanged.
    pub async fn render_all_under(
        &self,
        container: &dyn Container,
    ) -> Result<Vec<RenderUnit>, BootstrapError> {
        let handles = self.bootstrap.ready().await?;

        let elements = container.query_class(MARKER_CLASS);
        info!("Rendering {} markmap blocks", elements.len());

        let mut units = Vec::with_capacity(elements.len());
        for element in elements {
            debug!("Rendering {:?}", element);
            let unit =
                RenderUnit::create(element, &handles, &self.options, Arc::clone(&self.delta)).await;
            units.push(unit);
        }
        Ok(units)
    }

    /// Render every marked element of the page.
    pub async fn render_all(&self) -> Result<Vec<RenderUnit>, BootstrapError> {
        self.render_all_under(&self.document).await
    }

    /// Schedule the automatic scan unless the page asked for manual mode.
    ///
    /// The scan waits for the page to finish loading. Returns `None` in manual mode.
    pub fn auto_start(
        self: &Arc<Self>,
    ) -> Option<JoinHandle<Result<Vec<RenderUnit>, BootstrapError>>> {
        if self.options.manual {
            debug!("Manual mode, waiting for an explicit render");
            return None;
        }

        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            this.document.when_loaded().await;
            this.render_all().await
        }))
    }
}
