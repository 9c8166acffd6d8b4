//! Asset descriptors for scripts and stylesheets.
//!
//! Mirrors the item shapes the markmap packages exchange:
//!
//! ```json
//! { "type": "script", "data": { "src": "https://cdn/x.js", "integrity": "sha384-..." } }
//! { "type": "stylesheet", "data": { "href": "https://cdn/x.css" } }
//! ```
//!
//! Page configuration may also use bare `name@version/path` strings, which are resolved
//! against the chosen CDN right before injection.

use serde::{Deserialize, Serialize};

use crate::document::escape_attr;
use crate::provider::{EndpointResolver, UrlError};

/// Attributes of an external script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptData {
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_origin: Option<String>,
}

/// Inline code executed once when injected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineScript {
    pub code: String,
}

/// A script to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum JsItem {
    Script(ScriptData),
    Iife(InlineScript),
}

/// Attributes of an external stylesheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StylesheetData {
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

/// A stylesheet to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum CssItem {
    Stylesheet(StylesheetData),
    Style(String),
}

/// Build a plain external script item.
pub fn build_js_item(url: impl Into<String>) -> JsItem {
    JsItem::Script(ScriptData {
        src: url.into(),
        integrity: None,
        cross_origin: None,
    })
}

/// Build a plain external stylesheet item.
pub fn build_css_item(url: impl Into<String>) -> CssItem {
    CssItem::Stylesheet(StylesheetData {
        href: url.into(),
        integrity: None,
    })
}

/// Common behaviour of loadable items.
pub trait Asset: Clone + Send + Sync + 'static {
    /// Build the plain form of this item for a resolved URL.
    fn from_url(url: String) -> Self;

    /// URL to fetch, if the item is external.
    fn url(&self) -> Option<&str>;

    /// Expected SRI digest, if any.
    fn integrity(&self) -> Option<&str>;

    /// HTML markup injected into the document.
    fn to_tag(&self) -> String;
}

impl Asset for JsItem {
    fn from_url(url: String) -> Self {
        build_js_item(url)
    }

    fn url(&self) -> Option<&str> {
        match self {
            JsItem::Script(data) => Some(&data.src),
            JsItem::Iife(_) => None,
        }
    }

    fn integrity(&self) -> Option<&str> {
        match self {
            JsItem::Script(data) => data.integrity.as_deref(),
            JsItem::Iife(_) => None,
        }
    }

    fn to_tag(&self) -> String {
        match self {
            JsItem::Script(data) => {
                let mut tag = format!("<script src=\"{}\"", escape_attr(&data.src));
                if let Some(integrity) = &data.integrity {
                    tag.push_str(&format!(" integrity=\"{}\"", escape_attr(integrity)));
                }
                if let Some(cross_origin) = &data.cross_origin {
                    tag.push_str(&format!(" crossorigin=\"{}\"", escape_attr(cross_origin)));
                }
                tag.push_str("></script>");
                tag
            }
            // Script bodies are raw text; only a closing tag could break out.
            JsItem::Iife(inline) => format!(
                "<script>({})()</script>",
                inline.code.replace("</script", "<\\/script")
            ),
        }
    }
}

impl Asset for CssItem {
    fn from_url(url: String) -> Self {
        build_css_item(url)
    }

    fn url(&self) -> Option<&str> {
        match self {
            CssItem::Stylesheet(data) => Some(&data.href),
            CssItem::Style(_) => None,
        }
    }

    fn integrity(&self) -> Option<&str> {
        match self {
            CssItem::Stylesheet(data) => data.integrity.as_deref(),
            CssItem::Style(_) => None,
        }
    }

    fn to_tag(&self) -> String {
        match self {
            CssItem::Stylesheet(data) => {
                let mut tag = format!("<link rel=\"stylesheet\" href=\"{}\"", escape_attr(&data.href));
                if let Some(integrity) = &data.integrity {
                    tag.push_str(&format!(" integrity=\"{}\"", escape_attr(integrity)));
                }
                tag.push('>');
                tag
            }
            CssItem::Style(text) => format!("<style>{}</style>", text.replace("</style", "<\\/style")),
        }
    }
}

/// An asset as written in page configuration.
///
/// Strings are package specifiers (`name@version/path`); anything else is a complete
/// descriptor and passes through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssetSpecifier<T> {
    Package(String),
    Item(T),
}

impl<T: Asset> AssetSpecifier<T> {
    /// Turn the specifier into a loadable item using the resolved CDN.
    pub fn resolve(&self, resolver: &EndpointResolver) -> Result<T, UrlError> {
        match self {
            AssetSpecifier::Package(spec) => Ok(T::from_url(resolver.get_full_url(spec)?)),
            AssetSpecifier::Item(item) => Ok(item.clone()),
        }
    }
}

impl<T> From<&str> for AssetSpecifier<T> {
    fn from(spec: &str) -> Self {
        AssetSpecifier::Package(spec.to_string())
    }
}

/// Resolve a list of specifiers, preserving order.
pub fn resolve_all<T: Asset>(
    specifiers: &[AssetSpecifier<T>],
    resolver: &EndpointResolver,
) -> Result<Vec<T>, UrlError> {
    specifiers.iter().map(|s| s.resolve(resolver)).collect()
}
