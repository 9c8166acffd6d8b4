//! Interfaces of the rendering collaborators and their built-in implementations.
//!
//! The autoloader never parses outlines or draws diagrams itself. It talks to:
//! - a [`Transformer`] that turns outline text into a tree and reports which optional
//!   features (math, code highlighting, ...) the text needs,
//! - a [`DiagramEngine`] that draws a tree into a surface element,
//! - an optional [`ToolbarFactory`] for the zoom/fit widget.
//!
//! [`outline`] and [`svg`] provide small self-contained implementations used by the CLI.

mod hook;
mod options;
pub mod outline;
pub mod svg;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::asset::{AssetSpecifier, CssItem, JsItem};
use crate::document::Element;

pub use hook::{Hook, Subscription};
pub use options::{derive_options, JsonOptions, MarkmapOptions};

/// One node of a parsed outline.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Node {
    pub content: String,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            children: Vec::new(),
        }
    }

    /// Number of nodes in this subtree, including itself.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Node::size).sum::<usize>()
    }
}

/// Metadata block at the top of a document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Frontmatter {
    #[serde(default)]
    pub markmap: Option<JsonOptions>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Output of [`Transformer::transform`].
#[derive(Debug, Clone, Default)]
pub struct TransformResult {
    pub root: Node,
    pub frontmatter: Option<Frontmatter>,
    pub features: BTreeSet<String>,
}

/// Assets required by a set of features.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureAssets {
    pub styles: Vec<AssetSpecifier<CssItem>>,
    pub scripts: Vec<AssetSpecifier<JsItem>>,
}

impl FeatureAssets {
    pub fn is_empty(&self) -> bool {
        self.styles.is_empty() && self.scripts.is_empty()
    }
}

/// The transformer could not make sense of a block.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("invalid front matter: {0}")]
    Frontmatter(String),
}

/// Notifications a transformer publishes.
#[derive(Default)]
pub struct TransformHooks {
    /// Fired when previously transformed content should be transformed again.
    pub retransform: Hook,
}

/// Outline-to-tree transformer.
pub trait Transformer: Send + Sync {
    fn transform(&self, content: &str) -> Result<TransformResult, TransformError>;

    /// Assets needed by `features`. Only the features passed in are considered.
    fn get_assets(&self, features: &[String]) -> FeatureAssets;

    fn hooks(&self) -> &TransformHooks;
}

/// Builds one transformer per rendered block.
pub trait TransformerFactory: Send + Sync {
    fn create(&self, plugins: &[String]) -> Arc<dyn Transformer>;
}

/// A live diagram bound to one surface.
pub trait Diagram: Send {
    fn set_data(&mut self, root: &Node, options: &MarkmapOptions);

    /// Fit the viewport to the drawn content.
    fn fit(&mut self);
}

/// Diagram engine entry points.
pub trait DiagramEngine: Send + Sync {
    /// Stylesheet shared by every diagram on a page.
    fn global_css(&self) -> String;

    fn create(&self, surface: Element, options: MarkmapOptions) -> Box<dyn Diagram>;
}

/// Rendered toolbar markup, positioned by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolbarWidget {
    pub class: String,
    pub inner_html: String,
}

impl ToolbarWidget {
    pub fn to_html(&self, style: &str) -> String {
        format!(
            "<div class=\"{}\" style=\"{}\">{}</div>",
            crate::document::escape_attr(&self.class),
            crate::document::escape_attr(style),
            self.inner_html
        )
    }
}

pub trait ToolbarFactory: Send + Sync {
    fn create(&self) -> ToolbarWidget;
}

/// Handles published once the base assets are loaded.
#[derive(Clone)]
pub struct EngineHandles {
    pub engine: Arc<dyn DiagramEngine>,
    pub transformers: Arc<dyn TransformerFactory>,
    pub toolbar: Option<Arc<dyn ToolbarFactory>>,
}

impl std::fmt::Debug for EngineHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandles")
            .field("toolbar", &self.toolbar.is_some())
            .finish_non_exhaustive()
    }
}
