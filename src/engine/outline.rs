//! Built-in outline transformer.
//!
//! The block is parsed as CommonMark. Headings and list items become tree nodes,
//! paragraphs and code blocks become leaves. Optional plugins report the features a
//! document needs so their assets can be loaded on demand.

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser as MdParser, Tag, TagEnd};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    FeatureAssets, Frontmatter, Node, TransformError, TransformHooks, TransformResult,
    Transformer, TransformerFactory,
};
use crate::asset::AssetSpecifier;
use crate::provider::EndpointResolver;

/// Plugins known to this transformer.
pub const PLUGINS: &[&str] = &["frontmatter", "katex", "hljs", "npmUrl", "checkbox"];

const KATEX_VERSION: &str = "0.16.18";
const WEBFONTLOADER_VERSION: &str = "1.6.28";
const HLJS_VERSION: &str = "11.11.1";

/// Stack key of leaves (paragraphs, code): deeper than any heading or list item.
const LEAF_KEY: usize = usize::MAX;
const LIST_KEY_BASE: usize = 10;

/// Transformer for one rendered block.
pub struct OutlineTransformer {
    plugins: BTreeSet<String>,
    resolver: Option<Arc<EndpointResolver>>,
    hooks: TransformHooks,
}

impl OutlineTransformer {
    /// Enable `plugins`, or every known plugin when the list is empty.
    pub fn new(plugins: &[String], resolver: Option<Arc<EndpointResolver>>) -> Self {
        let plugins = if plugins.is_empty() {
            PLUGINS.iter().map(|p| p.to_string()).collect()
        } else {
            plugins
                .iter()
                .filter(|p| {
                    let known = PLUGINS.contains(&p.as_str());
                    if !known {
                        warn!("Ignoring unknown transform plugin {}", p);
                    }
                    known
                })
                .cloned()
                .collect()
        };
        Self {
            plugins,
            resolver,
            hooks: TransformHooks::default(),
        }
    }

    fn enabled(&self, plugin: &str) -> bool {
        self.plugins.contains(plugin)
    }

    fn parser_options(&self) -> Options {
        let mut options = Options::ENABLE_STRIKETHROUGH;
        if self.enabled("katex") {
            options.insert(Options::ENABLE_MATH);
        }
        if self.enabled("checkbox") {
            options.insert(Options::ENABLE_TASKLISTS);
        }
        options
    }

    /// Rewrite `npm:` link targets to the session's CDN.
    fn link_target(&self, dest: &str) -> String {
        let Some(spec) = dest.strip_prefix("npm:") else {
            return dest.to_string();
        };
        match &self.resolver {
            Some(resolver) if self.enabled("npmUrl") => match resolver.get_full_url(spec) {
                Ok(url) => url,
                Err(e) => {
                    debug!("Leaving npm link as is: {}", e);
                    dest.to_string()
                }
            },
            _ => dest.to_string(),
        }
    }
}

/// Split a leading `---` fenced YAML block from the body.
fn split_frontmatter(content: &str) -> Result<(Option<Frontmatter>, &str), TransformError> {
    let mut lines = content.split_inclusive('\n');
    match lines.next() {
        Some(first) if first.trim_end() == "---" => {}
        _ => return Ok((None, content)),
    }

    let mut offset = content.find('\n').map(|i| i + 1).unwrap_or(content.len());
    let yaml_start = offset;
    for line in lines {
        if line.trim_end() == "---" {
            let yaml = &content[yaml_start..offset];
            let body = &content[offset + line.len()..];
            let frontmatter = if yaml.trim().is_empty() {
                Frontmatter::default()
            } else {
                serde_yaml::from_str(yaml).map_err(|e| TransformError::Frontmatter(e.to_string()))?
            };
            return Ok((Some(frontmatter), body));
        }
        offset += line.len();
    }

    // No closing fence: not front matter.
    Ok((None, content))
}

/// Stack of open nodes; the bottom entry is the virtual root.
struct TreeBuilder {
    stack: Vec<(usize, Node)>,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            stack: vec![(0, Node::default())],
        }
    }

    fn close_one(&mut self) {
        if let Some((_, node)) = self.stack.pop() {
            if let Some((_, parent)) = self.stack.last_mut() {
                parent.children.push(node);
            }
        }
    }

    /// Close every open node whose key is `key` or deeper.
    fn close_from(&mut self, key: usize) {
        while self.stack.len() > 1 && self.stack.last().map_or(false, |(k, _)| *k >= key) {
            self.close_one();
        }
    }

    fn push(&mut self, key: usize, node: Node) {
        self.close_from(key);
        self.stack.push((key, node));
    }

    fn top_mut(&mut self) -> Option<&mut Node> {
        self.stack.last_mut().map(|(_, node)| node)
    }

    fn finish(mut self) -> Node {
        while self.stack.len() > 1 {
            self.close_one();
        }
        let mut root = self.stack.pop().map(|(_, node)| node).unwrap_or_default();
        if root.content.is_empty() && root.children.len() == 1 {
            root = root.children.remove(0);
        }
        root
    }
}

/// What the inline text being collected belongs to.
enum Capture {
    Nothing,
    Heading(usize),
    /// The list item on top of the tree, until its first block ends.
    Item,
    Paragraph,
    Code(Option<String>),
}

/// One pass over the markdown events of a block.
struct OutlineWalk<'a> {
    transformer: &'a OutlineTransformer,
    tree: TreeBuilder,
    features: BTreeSet<String>,
    capture: Capture,
    text: String,
    list_depth: usize,
    links: Vec<String>,
}

impl<'a> OutlineWalk<'a> {
    fn new(transformer: &'a OutlineTransformer) -> Self {
        Self {
            transformer,
            tree: TreeBuilder::new(),
            features: BTreeSet::new(),
            capture: Capture::Nothing,
            text: String::new(),
            list_depth: 0,
            links: Vec::new(),
        }
    }

    fn feature(&mut self, name: &str) {
        if self.transformer.enabled(name) {
            self.features.insert(name.to_string());
        }
    }

    fn take_text(&mut self) -> String {
        std::mem::take(&mut self.text).trim().to_string()
    }

    /// Give the pending list item the text collected so far.
    fn settle_item(&mut self) {
        if matches!(self.capture, Capture::Item) {
            let content = self.take_text();
            if let Some(node) = self.tree.top_mut() {
                node.content = content;
            }
            self.capture = Capture::Nothing;
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Heading { level, .. } => {
                self.settle_item();
                self.text.clear();
                self.capture = Capture::Heading(level as usize);
            }
            Tag::List(_) => {
                self.settle_item();
                self.list_depth += 1;
            }
            Tag::Item => {
                self.settle_item();
                self.text.clear();
                self.tree.push(LIST_KEY_BASE + self.list_depth, Node::default());
                self.capture = Capture::Item;
            }
            Tag::Paragraph => {
                if !matches!(self.capture, Capture::Item) {
                    self.text.clear();
                    self.capture = Capture::Paragraph;
                }
            }
            Tag::CodeBlock(kind) => {
                self.settle_item();
                self.text.clear();
                let lang = match kind {
                    CodeBlockKind::Fenced(lang) => Some(lang.to_string()),
                    CodeBlockKind::Indented => None,
                };
                self.capture = Capture::Code(lang);
            }
            Tag::Link { dest_url, .. } => {
                self.text.push('[');
                self.links.push(self.transformer.link_target(&dest_url));
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Heading(_) => {
                if let Capture::Heading(level) = self.capture {
                    let content = self.take_text();
                    self.tree.push(level, Node::new(content));
                }
                self.capture = Capture::Nothing;
            }
            TagEnd::List(_) => {
                self.settle_item();
                self.tree.close_from(LIST_KEY_BASE + self.list_depth);
                self.list_depth = self.list_depth.saturating_sub(1);
            }
            TagEnd::Item => self.settle_item(),
            TagEnd::Paragraph => match self.capture {
                Capture::Item => self.settle_item(),
                Capture::Paragraph => {
                    let content = self.take_text();
                    if !content.is_empty() {
                        self.tree.push(LEAF_KEY, Node::new(content));
                    }
                    self.capture = Capture::Nothing;
                }
                _ => {}
            },
            TagEnd::CodeBlock => {
                if let Capture::Code(lang) = std::mem::replace(&mut self.capture, Capture::Nothing) {
                    let code = std::mem::take(&mut self.text);
                    let content = match lang {
                        Some(lang) => format!("```{}\n{}```", lang, code),
                        None => code.trim_end().to_string(),
                    };
                    self.feature("hljs");
                    self.tree.push(LEAF_KEY, Node::new(content));
                }
            }
            TagEnd::Link => {
                let dest = self.links.pop().unwrap_or_default();
                self.text.push_str(&format!("]({})", dest));
            }
            _ => {}
        }
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) | Event::InlineHtml(text) => self.text.push_str(&text),
            Event::Code(code) => {
                self.text.push('`');
                self.text.push_str(&code);
                self.text.push('`');
            }
            Event::InlineMath(math) => {
                self.feature("katex");
                self.text.push_str(&format!("${}$", math));
            }
            Event::DisplayMath(math) => {
                self.feature("katex");
                self.text.push_str(&format!("$${}$$", math));
            }
            Event::TaskListMarker(checked) => {
                self.feature("checkbox");
                self.text.push_str(if checked { "\u{2611} " } else { "\u{2610} " });
            }
            Event::SoftBreak => self.text.push(' '),
            Event::HardBreak => self.text.push('\n'),
            _ => {}
        }
    }
}

impl Transformer for OutlineTransformer {
    fn transform(&self, content: &str) -> Result<TransformResult, TransformError> {
        let (frontmatter, body) = if self.enabled("frontmatter") {
            split_frontmatter(content)?
        } else {
            (None, content)
        };

        let mut walk = OutlineWalk::new(self);
        for event in MdParser::new_ext(body, self.parser_options()) {
            walk.event(event);
        }
        walk.settle_item();

        Ok(TransformResult {
            root: walk.tree.finish(),
            frontmatter,
            features: walk.features,
        })
    }

    fn get_assets(&self, features: &[String]) -> FeatureAssets {
        let mut assets = FeatureAssets::default();
        for feature in features {
            if !self.enabled(feature) {
                continue;
            }
            match feature.as_str() {
                "katex" => {
                    assets.styles.push(AssetSpecifier::Package(format!(
                        "katex@{}/dist/katex.min.css",
                        KATEX_VERSION
                    )));
                    assets.scripts.push(AssetSpecifier::Package(format!(
                        "webfontloader@{}/webfontloader.js",
                        WEBFONTLOADER_VERSION
                    )));
                    assets.scripts.push(AssetSpecifier::Package(format!(
                        "katex@{}/dist/katex.min.js",
                        KATEX_VERSION
                    )));
                }
                "hljs" => {
                    assets.styles.push(AssetSpecifier::Package(format!(
                        "@highlightjs/cdn-assets@{}/styles/default.min.css",
                        HLJS_VERSION
                    )));
                }
                _ => {}
            }
        }
        assets
    }

    fn hooks(&self) -> &TransformHooks {
        &self.hooks
    }
}

/// Creates [`OutlineTransformer`]s sharing the session's endpoint resolver.
pub struct OutlineTransformerFactory {
    resolver: Option<Arc<EndpointResolver>>,
}

impl OutlineTransformerFactory {
    pub fn new(resolver: Option<Arc<EndpointResolver>>) -> Self {
        Self { resolver }
    }
}

impl TransformerFactory for OutlineTransformerFactory {
    fn create(&self, plugins: &[String]) -> Arc<dyn Transformer> {
        Arc::new(OutlineTransformer::new(plugins, self.resolver.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transformer() -> OutlineTransformer {
        OutlineTransformer::new(&[], None)
    }

    #[test]
    fn test_headings_and_lists() {
        let result = transformer()
            .transform("# Root\n## A\n- a1\n  - a11\n- a2\n## B\nsome text\n")
            .unwrap();
        let root = result.root;

        assert_eq!(root.content, "Root");
        assert_eq!(root.children.len(), 2);
        let a = &root.children[0];
        assert_eq!(a.content, "A");
        assert_eq!(a.children.len(), 2);
        assert_eq!(a.children[0].children[0].content, "a11");
        assert_eq!(root.children[1].children[0].content, "some text");
        assert!(result.features.is_empty());
    }

    #[test]
    fn test_hash_inside_heading_text_is_kept() {
        let root = transformer().transform("# Learn C#\n- a").unwrap().root;
        assert_eq!(root.content, "Learn C#");
        assert_eq!(root.children[0].content, "a");
    }

    #[test]
    fn test_loose_items_and_following_paragraphs() {
        let root = transformer()
            .transform("# Root\n\n- first\n\n  more about first\n\n- second\n\nafter the list\n")
            .unwrap()
            .root;
        let contents: Vec<&str> = root.children.iter().map(|n| n.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "after the list"]);
        assert_eq!(root.children[0].children[0].content, "more about first");
    }

    #[test]
    fn test_code_is_not_scanned_for_math() {
        let result = transformer().transform("# Code\n```\nlet a = '$1$';\n```\n").unwrap();
        let features: Vec<&str> = result.features.iter().map(String::as_str).collect();
        assert_eq!(features, vec!["hljs"]);
        assert_eq!(result.root.children[0].content, "```\nlet a = '$1$';\n```");
    }

    #[tokio::test]
    async fn test_npm_links_point_at_the_cdn() {
        let resolver = crate::test_support::resolved_resolver().await;
        let transformer = OutlineTransformer::new(&[], Some(resolver));
        let root = transformer
            .transform("- [d3](npm:d3@7) and [docs](https://d3js.org)")
            .unwrap()
            .root;
        assert_eq!(
            root.content,
            "[d3](https://cdn.test/npm/d3@7) and [docs](https://d3js.org)"
        );
    }

    #[test]
    fn test_multiple_top_level_nodes_keep_virtual_root() {
        let root = transformer().transform("- a\n- b\n").unwrap().root;
        assert_eq!(root.content, "");
        assert_eq!(root.children.len(), 2);
    }

    #[test]
    fn test_frontmatter_options() {
        let content = "---\ntitle: demo\nmarkmap:\n  maxWidth: 200\n  colorFreezeLevel: 2\n---\n# Root\n";
        let result = transformer().transform(content).unwrap();
        let frontmatter = result.frontmatter.unwrap();
        let options = frontmatter.markmap.unwrap();

        assert_eq!(options.max_width, Some(200));
        assert_eq!(options.color_freeze_level, Some(2));
        assert_eq!(
            frontmatter.extra.get("title"),
            Some(&serde_yaml::Value::String("demo".to_string()))
        );
        assert_eq!(result.root.content, "Root");
    }

    #[test]
    fn test_invalid_frontmatter_is_an_error() {
        let err = transformer()
            .transform("---\nmarkmap: [unclosed\n---\n# Root\n")
            .unwrap_err();
        assert!(matches!(err, TransformError::Frontmatter(_)));
    }

    #[test]
    fn test_unclosed_fence_is_content() {
        let result = transformer().transform("---\n# Root\n").unwrap();
        assert!(result.frontmatter.is_none());
    }

    #[test]
    fn test_feature_detection() {
        let result = transformer()
            .transform("# Math $x^2$\n- [x] done\n```js\nlet a = '$1$';\n```\n")
            .unwrap();
        let features: Vec<&str> = result.features.iter().map(String::as_str).collect();
        assert_eq!(features, vec!["checkbox", "hljs", "katex"]);
        assert_eq!(result.root.children[0].content, "\u{2611} done");
    }

    #[test]
    fn test_disabled_plugins_report_nothing() {
        let transformer = OutlineTransformer::new(&["frontmatter".to_string()], None);
        let result = transformer.transform("# $x$\n```\ncode\n```\n").unwrap();
        assert!(result.features.is_empty());
        assert!(transformer.get_assets(&["katex".to_string()]).is_empty());
    }

    #[test]
    fn test_assets_only_for_requested_features() {
        let assets = transformer().get_assets(&["hljs".to_string()]);
        assert_eq!(assets.scripts, Vec::new());
        assert_eq!(
            assets.styles,
            vec![AssetSpecifier::Package(
                "@highlightjs/cdn-assets@11.11.1/styles/default.min.css".to_string()
            )]
        );

        let assets = transformer().get_assets(&["katex".to_string()]);
        assert_eq!(assets.scripts.len(), 2);
        assert_eq!(assets.styles.len(), 1);
    }
}
