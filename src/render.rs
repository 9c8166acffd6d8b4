//! Per-block render units.
//!
//! A render unit binds one marked element to one diagram. It renders once when created
//! and again every time its transformer asks for a retransform, loading the assets of
//! newly required features before drawing.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::config::AutoLoaderOptions;
use crate::document::Element;
use crate::engine::{
    derive_options, Diagram, EngineHandles, MarkmapOptions, Subscription, TransformError,
    Transformer,
};
use crate::features::DeltaLoader;

/// Toolbar overlay anchored to the bottom-right corner of the block.
const TOOLBAR_STYLE: &str = "position:absolute;right:20px;bottom:20px";

/// Why one render cycle failed. Only the affected block is concerned.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("cannot transform block content: {0}")]
    Transform(#[from] TransformError),
}

/// Remove the common leading whitespace of `text` and trim the result.
///
/// The margin is the smallest indentation among lines that have something besides
/// whitespace; blank lines do not count.
pub fn normalize_indent(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let margin = lines
        .iter()
        .filter_map(|line| {
            let spaces = line.chars().take_while(|c| c.is_whitespace()).count();
            (spaces < line.chars().count()).then_some(spaces)
        })
        .min();

    let Some(margin) = margin else {
        return String::new();
    };
    lines
        .iter()
        .map(|line| line.chars().skip(margin).collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

struct UnitState {
    element: Element,
    content: String,
    transformer: Arc<dyn Transformer>,
    diagram: Mutex<Box<dyn Diagram>>,
    delta: Arc<DeltaLoader>,
    last_options: Mutex<Option<MarkmapOptions>>,
    last_error: Mutex<Option<RenderError>>,
    renders: watch::Sender<u64>,
}

impl UnitState {
    async fn render(&self) -> Result<(), RenderError> {
        let result = self.transform().await;
        if let Err(e) = &result {
            error!("Failed to render markmap block: {}", e);
        }
        *self.last_error.lock() = result.clone().err();
        result
    }

    async fn transform(&self) -> Result<(), RenderError> {
        let result = self.transformer.transform(&self.content)?;

        if let Err(e) = self
            .delta
            .apply_feature_delta(self.transformer.as_ref(), &result.features)
            .await
        {
            warn!("Failed to load feature assets, rendering without them: {}", e);
        }

        let options = derive_options(
            result
                .frontmatter
                .as_ref()
                .and_then(|frontmatter| frontmatter.markmap.as_ref()),
        );
        {
            let mut diagram = self.diagram.lock();
            diagram.set_data(&result.root, &options);
            diagram.fit();
        }
        debug!(
            "Rendered markmap block with {} nodes",
            result.root.size()
        );

        *self.last_options.lock() = Some(options);
        self.renders.send_modify(|count| *count += 1);
        Ok(())
    }
}

/// A live binding between one element and its diagram.
pub struct RenderUnit {
    state: Arc<UnitState>,
    subscription: Subscription,
}

impl std::fmt::Debug for RenderUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderUnit")
            .field("element", &self.state.element)
            .field("renders", &self.render_count())
            .field("last_error", &self.last_error())
            .finish()
    }
}

impl RenderUnit {
    /// Bind `element`, draw it once and subscribe to retransform notifications.
    ///
    /// A failed first render is logged and kept in [`RenderUnit::last_error`]; the unit
    /// still listens for retransforms.
    pub async fn create(
        element: Element,
        handles: &EngineHandles,
        options: &AutoLoaderOptions,
        delta: Arc<DeltaLoader>,
    ) -> Self {
        let content = normalize_indent(&element.text_content());
        let transformer = handles.transformers.create(&options.transform_plugins);

        element.set_inner_html("<svg></svg>");
        let diagram = handles.engine.create(
            element.clone(),
            MarkmapOptions {
                embed_global_css: false,
                ..Default::default()
            },
        );

        if options.toolbar {
            match &handles.toolbar {
                Some(toolbar) => element.append_html(toolbar.create().to_html(TOOLBAR_STYLE)),
                None => warn!("Toolbar requested but no toolbar is available"),
            }
        }

        let (renders, _) = watch::channel(0);
        let state = Arc::new(UnitState {
            element,
            content,
            transformer: Arc::clone(&transformer),
            diagram: Mutex::new(diagram),
            delta,
            last_options: Mutex::new(None),
            last_error: Mutex::new(None),
            renders,
        });

        let subscription = {
            let state = Arc::clone(&state);
            transformer.hooks().retransform.tap(move || {
                let state = Arc::clone(&state);
                async move {
                    let _ = state.render().await;
                }
            })
        };

        let _ = state.render().await;
        Self {
            state,
            subscription,
        }
    }

    pub fn element(&self) -> &Element {
        &self.state.element
    }

    /// Source text after indentation normalization.
    pub fn content(&self) -> &str {
        &self.state.content
    }

    pub fn transformer(&self) -> &Arc<dyn Transformer> {
        &self.state.transformer
    }

    /// Options used by the latest successful render.
    pub fn options(&self) -> Option<MarkmapOptions> {
        self.state.last_options.lock().clone()
    }

    /// Error of the latest render cycle, if it failed.
    pub fn last_error(&self) -> Option<RenderError> {
        self.state.last_error.lock().clone()
    }

    /// Number of successful render cycles so far.
    pub fn render_count(&self) -> u64 {
        *self.state.renders.borrow()
    }

    /// Wait until at least `count` render cycles have succeeded.
    pub async fn wait_for_renders(&self, count: u64) {
        let mut rx = self.state.renders.subscribe();
        let _ = rx.wait_for(|rendered| *rendered >= count).await;
    }

    /// Run a render cycle now.
    pub async fn render(&self) -> Result<(), RenderError> {
        self.state.render().await
    }

    /// Stop reacting to retransform notifications.
    pub fn unsubscribe(self) {
        self.subscription.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_common_margin() {
        let text = "\n    # Title\n      - child\n    - sibling\n  ";
        assert_eq!(normalize_indent(text), "# Title\n  - child\n- sibling");
    }

    #[test]
    fn test_short_unindented_line_sets_zero_margin() {
        let text = "    a\n    b\nc\n      d";
        assert_eq!(normalize_indent(text), "a\n    b\nc\n      d");
    }

    #[test]
    fn test_blank_lines_do_not_count() {
        let text = "    a\n\n  \n      b";
        assert_eq!(normalize_indent(text), "a\n\n\n  b");
    }

    #[test]
    fn test_whitespace_only_is_empty() {
        assert_eq!(normalize_indent("   \n\t\n"), "");
        assert_eq!(normalize_indent(""), "");
    }

    #[test]
    fn test_tabs_count_as_one_column() {
        assert_eq!(normalize_indent("\t# a\n\t\t- b"), "# a\n\t- b");
    }
}
