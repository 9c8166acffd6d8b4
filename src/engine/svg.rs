//! Built-in static SVG diagram engine and toolbar.
//!
//! Lays the tree out left to right with children stacked vertically, like markmap's
//! flextree layout without animation. The surface element's first child is replaced
//! with the drawn `<svg>`; later children (e.g. a toolbar) are left alone.

use std::fmt::Write as _;

use super::{Diagram, DiagramEngine, MarkmapOptions, Node, ToolbarFactory, ToolbarWidget};
use crate::document::{escape_attr, escape_text, Element};

/// Stylesheet shared by every diagram on the page.
pub const GLOBAL_CSS: &str = ".markmap{font:300 16px/20px sans-serif;position:relative}\
.markmap>svg{width:100%;height:100%}\
.markmap-link{fill:none}\
.markmap-node>circle{cursor:pointer}\
.markmap-node>text{dominant-baseline:text-after-edge}\
.mm-toolbar{display:flex;gap:4px;padding:4px;border:1px solid #ddd;border-radius:4px;background:#fff}\
.mm-toolbar-item{cursor:pointer;border:none;background:none}";

/// Average glyph width used to size node labels.
const CHAR_WIDTH: f64 = 8.0;
const LINE_HEIGHT: f64 = 20.0;
const CIRCLE_RADIUS: f64 = 4.5;

pub struct SvgEngine;

impl DiagramEngine for SvgEngine {
    fn global_css(&self) -> String {
        GLOBAL_CSS.to_string()
    }

    fn create(&self, surface: Element, options: MarkmapOptions) -> Box<dyn Diagram> {
        Box::new(SvgDiagram::new(surface, options))
    }
}

#[derive(Debug, Clone)]
struct PlacedNode {
    content: String,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    color: String,
    collapsed: bool,
}

#[derive(Debug, Clone)]
struct PlacedLink {
    from: (f64, f64),
    to: (f64, f64),
    color: String,
}

/// One drawn diagram.
pub struct SvgDiagram {
    surface: Element,
    options: MarkmapOptions,
    nodes: Vec<PlacedNode>,
    links: Vec<PlacedLink>,
    view_box: Option<(f64, f64, f64, f64)>,
    next_color: usize,
}

impl SvgDiagram {
    pub fn new(surface: Element, options: MarkmapOptions) -> Self {
        let diagram = Self {
            surface,
            options,
            nodes: Vec::new(),
            links: Vec::new(),
            view_box: None,
            next_color: 0,
        };
        diagram.draw();
        diagram
    }

    fn node_size(&self, content: &str) -> (f64, f64) {
        let padding = f64::from(self.options.padding_x);
        let mut width = content.lines().map(|l| l.chars().count()).max().unwrap_or(0) as f64
            * CHAR_WIDTH
            + 2.0 * padding;
        if self.options.max_width > 0 {
            width = width.min(f64::from(self.options.max_width));
        }
        let lines = content.lines().count().max(1) as f64;
        let height = (lines * LINE_HEIGHT).max(f64::from(self.options.node_min_height));
        (width, height)
    }

    /// Place `node` and its visible descendants; returns the index of `node`.
    fn layout(
        &mut self,
        node: &Node,
        depth: i32,
        x: f64,
        next_y: &mut f64,
        inherited_color: Option<&str>,
    ) -> usize {
        let color = match inherited_color {
            Some(color) => color.to_string(),
            None => {
                let color = self.options.branch_color(self.next_color).to_string();
                self.next_color += 1;
                color
            }
        };
        let (width, height) = self.node_size(&node.content);
        let level = self.options.initial_expand_level;
        let collapsed = level >= 0 && depth >= level && !node.children.is_empty();

        let index = self.nodes.len();
        self.nodes.push(PlacedNode {
            content: node.content.clone(),
            x,
            y: 0.0,
            width,
            height,
            color: color.clone(),
            collapsed,
        });

        let freeze = self.options.color_freeze_level;
        let child_color = (freeze > 0 && depth + 1 >= freeze as i32).then_some(color.as_str());

        let y = if collapsed || node.children.is_empty() {
            let y = *next_y;
            *next_y += height + f64::from(self.options.spacing_vertical);
            y
        } else {
            let child_x = x + width + f64::from(self.options.spacing_horizontal);
            let children: Vec<usize> = node
                .children
                .iter()
                .map(|child| self.layout(child, depth + 1, child_x, next_y, child_color))
                .collect();
            let first = self.nodes[children[0]].y;
            let last = self.nodes[children[children.len() - 1]].y;
            let y = (first + last) / 2.0;
            for child in children {
                let target = &self.nodes[child];
                self.links.push(PlacedLink {
                    from: (x + width, y + height),
                    to: (target.x, target.y + target.height),
                    color: target.color.clone(),
                });
            }
            y
        };
        self.nodes[index].y = y;
        index
    }

    fn bounds(&self) -> (f64, f64, f64, f64) {
        if self.nodes.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }
        let min_x = self.nodes.iter().map(|n| n.x).fold(f64::INFINITY, f64::min);
        let min_y = self.nodes.iter().map(|n| n.y).fold(f64::INFINITY, f64::min);
        let max_x = self
            .nodes
            .iter()
            .map(|n| n.x + n.width)
            .fold(f64::NEG_INFINITY, f64::max);
        let max_y = self
            .nodes
            .iter()
            .map(|n| n.y + n.height)
            .fold(f64::NEG_INFINITY, f64::max);
        (min_x, min_y, max_x - min_x, max_y - min_y)
    }

    fn draw(&self) {
        let mut svg = String::from("<svg class=\"markmap\" xmlns=\"http://www.w3.org/2000/svg\"");
        if let Some((x, y, w, h)) = self.view_box {
            let _ = write!(svg, " viewBox=\"{:.1} {:.1} {:.1} {:.1}\"", x, y, w, h);
        }
        svg.push('>');
        if self.options.embed_global_css {
            let _ = write!(svg, "<style>{}</style>", GLOBAL_CSS);
        }
        svg.push_str("<g>");

        for link in &self.links {
            let (x1, y1) = link.from;
            let (x2, y2) = link.to;
            let mid = (x1 + x2) / 2.0;
            let _ = write!(
                svg,
                "<path class=\"markmap-link\" stroke=\"{}\" d=\"M{:.1},{:.1}C{:.1},{:.1} {:.1},{:.1} {:.1},{:.1}\"/>",
                escape_attr(&link.color),
                x1, y1, mid, y1, mid, y2, x2, y2
            );
        }

        for node in &self.nodes {
            let _ = write!(
                svg,
                "<g class=\"markmap-node\" transform=\"translate({:.1},{:.1})\">\
                 <line x1=\"0\" x2=\"{:.1}\" y1=\"{:.1}\" y2=\"{:.1}\" stroke=\"{}\"/>",
                node.x,
                node.y,
                node.width,
                node.height,
                node.height,
                escape_attr(&node.color)
            );
            if node.collapsed {
                let _ = write!(
                    svg,
                    "<circle cx=\"{:.1}\" cy=\"{:.1}\" r=\"{}\" stroke=\"{}\" fill=\"{}\"/>",
                    node.width,
                    node.height,
                    CIRCLE_RADIUS,
                    escape_attr(&node.color),
                    escape_attr(&node.color)
                );
            }
            let _ = write!(
                svg,
                "<text x=\"{}\" y=\"{:.1}\">{}</text></g>",
                self.options.padding_x,
                node.height,
                escape_text(&node.content)
            );
        }

        svg.push_str("</g></svg>");
        if !self.surface.set_child_html(0, svg.as_str()) {
            self.surface.set_inner_html(svg);
        }
    }
}

impl Diagram for SvgDiagram {
    fn set_data(&mut self, root: &Node, options: &MarkmapOptions) {
        // Global CSS embedding is fixed when the diagram is created.
        let embed_global_css = self.options.embed_global_css;
        self.options = options.clone();
        self.options.embed_global_css = embed_global_css;

        self.nodes.clear();
        self.links.clear();
        self.next_color = 0;
        let mut next_y = 0.0;
        self.layout(root, 0, 0.0, &mut next_y, None);
        if self.options.auto_fit {
            self.fit();
        } else {
            self.draw();
        }
    }

    fn fit(&mut self) {
        let (x, y, width, height) = self.bounds();
        let ratio = if self.options.fit_ratio > 0.0 {
            self.options.fit_ratio
        } else {
            1.0
        };
        let pad_x = width * (1.0 / ratio - 1.0) / 2.0;
        let pad_y = height * (1.0 / ratio - 1.0) / 2.0;
        self.view_box = Some((x - pad_x, y - pad_y, width + 2.0 * pad_x, height + 2.0 * pad_y));
        self.draw();
    }
}

/// Default toolbar: zoom in, zoom out, fit and recursive toggle.
pub struct DefaultToolbar;

impl ToolbarFactory for DefaultToolbar {
    fn create(&self) -> ToolbarWidget {
        let items = [
            ("zoomIn", "Zoom in", "+"),
            ("zoomOut", "Zoom out", "-"),
            ("fit", "Fit window size", "\u{2922}"),
            ("recurse", "Toggle recursively", "\u{21bb}"),
        ];
        let mut inner_html = String::from(
            "<a class=\"mm-toolbar-brand\" href=\"https://markmap.js.org/\" target=\"_blank\">markmap</a>",
        );
        for (id, title, label) in items {
            let _ = write!(
                inner_html,
                "<button class=\"mm-toolbar-item\" data-action=\"{}\" title=\"{}\">{}</button>",
                id, title, label
            );
        }
        ToolbarWidget {
            class: "mm-toolbar".to_string(),
            inner_html,
        }
    }
}
