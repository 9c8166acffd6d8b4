//! One-shot bootstrap: resolve the CDN, load the base assets, install global styles.
//!
//! ```text
//! NotStarted -> Resolving -> LoadingAssets -> Ready
//!                                  \-> Failed
//! ```
//!
//! Every caller of [`BootstrapSequencer::ready`] awaits the same single run. A failed
//! base-asset load is terminal too: all callers get the same error and nothing renders.

use futures_util::future::try_join;
use std::sync::Arc;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, error, info};

use crate::asset::{resolve_all, Asset, CssItem};
use crate::config::AutoLoaderOptions;
use crate::document::Document;
use crate::engine::EngineHandles;
use crate::injector::{AssetError, AssetInjector};
use crate::provider::{EndpointResolver, UrlError};

/// Bootstrap progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    NotStarted,
    Resolving,
    LoadingAssets,
    Ready,
    Failed,
}

/// Why the bootstrap could not reach `Ready`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootstrapError {
    #[error("invalid base asset: {0}")]
    Url(#[from] UrlError),

    #[error("failed to load base assets: {0}")]
    Assets(#[from] AssetError),
}

pub struct BootstrapSequencer {
    options: Arc<AutoLoaderOptions>,
    resolver: Arc<EndpointResolver>,
    injector: Arc<dyn AssetInjector>,
    document: Arc<Document>,
    handles: EngineHandles,
    state: watch::Sender<BootstrapState>,
    outcome: OnceCell<Result<EngineHandles, BootstrapError>>,
}

impl BootstrapSequencer {
    pub fn new(
        options: Arc<AutoLoaderOptions>,
        resolver: Arc<EndpointResolver>,
        injector: Arc<dyn AssetInjector>,
        document: Arc<Document>,
        handles: EngineHandles,
    ) -> Self {
        let (state, _) = watch::channel(BootstrapState::NotStarted);
        Self {
            options,
            resolver,
            injector,
            document,
            handles,
            state,
            outcome: OnceCell::new(),
        }
    }

    pub fn state(&self) -> BootstrapState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<BootstrapState> {
        self.state.subscribe()
    }

    /// Wait for the bootstrap, starting it if nobody has yet.
    ///
    /// Returns the engine handles every render unit works with.
    pub async fn ready(&self) -> Result<EngineHandles, BootstrapError> {
        self.outcome.get_or_init(|| self.run()).await.clone()
    }

    fn transition(&self, next: BootstrapState) {
        debug!("Bootstrap state: {:?} -> {:?}", self.state(), next);
        self.state.send_replace(next);
    }

    async fn run(&self) -> Result<EngineHandles, BootstrapError> {
        match self.load().await {
            Ok(()) => {
                self.install_global_css();
                self.transition(BootstrapState::Ready);
                info!("Markmap autoloader ready");
                if let Some(on_ready) = &self.options.on_ready {
                    on_ready();
                }
                Ok(self.handles.clone())
            }
            Err(e) => {
                error!("Markmap bootstrap failed: {}", e);
                self.transition(BootstrapState::Failed);
                Err(e)
            }
        }
    }

    async fn load(&self) -> Result<(), BootstrapError> {
        self.transition(BootstrapState::Resolving);
        let provider = self.resolver.find_fastest_provider().await;
        debug!("Resolved CDN provider {}", provider);

        self.transition(BootstrapState::LoadingAssets);
        let scripts = resolve_all(&self.options.base_js, &self.resolver)?;
        let styles = resolve_all(&self.options.base_css, &self.resolver)?;
        info!(
            "Loading {} base scripts and {} base styles",
            scripts.len(),
            styles.len()
        );
        try_join(
            self.injector.load_js(scripts),
            self.injector.load_css(styles),
        )
        .await?;
        Ok(())
    }

    /// Put the engine stylesheet first in `<body>`, so any author stylesheet wins.
    fn install_global_css(&self) {
        let css = self.handles.engine.global_css();
        self.document.prepend_to_body(CssItem::Style(css).to_tag());
    }
}
