//! In-memory HTML page the autoloader works on.
//!
//! The page is kept as its original source plus a list of edits (head injections,
//! body prepends, element content replacements) that are applied when the page is
//! serialized again. Only elements carrying an `id` or `class` are addressable.

mod scan;

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

use scan::{
    find_close_tag_start, find_open_tag_end, scan_elements, text_content, ElementSpan,
};

/// Escape a value for use inside a double-quoted attribute.
pub fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape text placed between tags.
pub fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Page load progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Loading,
    Complete,
}

/// Pending changes to one element. `children` replaces the original content once set;
/// until then appended markup follows the original content.
#[derive(Debug, Default)]
struct ElementEdit {
    children: Option<Vec<String>>,
    appended: Vec<String>,
}

#[derive(Debug)]
struct DocumentState {
    source: String,
    spans: Vec<ElementSpan>,
    edits: Vec<ElementEdit>,
    head: Vec<String>,
    body_prepends: Vec<String>,
}

/// A parsed page shared by the bootstrap, the injector and every render unit.
pub struct Document {
    state: Mutex<DocumentState>,
    loaded: watch::Sender<ReadyState>,
}

impl Document {
    /// Parse a page that has finished loading.
    pub fn parse(html: impl Into<String>) -> Arc<Self> {
        Self::with_state(html.into(), ReadyState::Complete)
    }

    /// Parse a page that is still loading; call [`Document::mark_loaded`] once it is done.
    pub fn loading(html: impl Into<String>) -> Arc<Self> {
        Self::with_state(html.into(), ReadyState::Loading)
    }

    fn with_state(source: String, ready: ReadyState) -> Arc<Self> {
        let spans = scan_elements(&source);
        let edits = spans.iter().map(|_| ElementEdit::default()).collect();
        let (loaded, _) = watch::channel(ready);
        Arc::new(Self {
            state: Mutex::new(DocumentState {
                source,
                spans,
                edits,
                head: Vec::new(),
                body_prepends: Vec::new(),
            }),
            loaded,
        })
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.loaded.borrow()
    }

    /// Fire the load-completion signal.
    pub fn mark_loaded(&self) {
        self.loaded.send_replace(ReadyState::Complete);
    }

    /// Wait until the page has finished loading. Returns immediately if it already has.
    pub async fn when_loaded(&self) {
        let mut rx = self.loaded.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(|state| *state == ReadyState::Complete).await;
    }

    /// Append a node to `<head>`.
    pub fn append_to_head(&self, html: impl Into<String>) {
        self.state.lock().head.push(html.into());
    }

    /// Insert a node as the first child of `<body>`.
    pub fn prepend_to_body(&self, html: impl Into<String>) {
        self.state.lock().body_prepends.insert(0, html.into());
    }

    /// Nodes injected into `<head>` so far, in order.
    pub fn head_nodes(&self) -> Vec<String> {
        self.state.lock().head.clone()
    }

    /// Nodes prepended to `<body>` so far, first child first.
    pub fn body_prepends(&self) -> Vec<String> {
        self.state.lock().body_prepends.clone()
    }

    pub fn get_element_by_id(self: &Arc<Self>, id: &str) -> Option<Element> {
        let state = self.state.lock();
        state
            .spans
            .iter()
            .position(|span| span.id.as_deref() == Some(id))
            .map(|index| Element {
                document: Arc::clone(self),
                index,
            })
    }

    /// Raw text of an element, without entity decoding (for `<script>` payloads).
    pub fn raw_text_by_id(&self, id: &str) -> Option<String> {
        let state = self.state.lock();
        state
            .spans
            .iter()
            .find(|span| span.id.as_deref() == Some(id))
            .map(|span| state.source[span.open_end..span.close_start].to_string())
    }

    fn elements_with_class(self: &Arc<Self>, class: &str, within: Option<(usize, usize)>) -> Vec<Element> {
        let state = self.state.lock();
        state
            .spans
            .iter()
            .enumerate()
            .filter(|(_, span)| span.classes.iter().any(|c| c == class))
            .filter(|(_, span)| match within {
                Some((start, end)) => span.open_start >= start && span.close_end <= end,
                None => true,
            })
            .map(|(index, _)| Element {
                document: Arc::clone(self),
                index,
            })
            .collect()
    }

    /// Serialize the page with every edit applied.
    pub fn to_html(&self) -> String {
        let state = self.state.lock();
        let source = state.source.as_str();

        // (start, end, replacement); insertions have start == end.
        let mut patches: Vec<(usize, usize, String)> = Vec::new();

        if !state.head.is_empty() {
            let at = find_close_tag_start(source, "head")
                .or_else(|| find_open_tag_end(source, "html"))
                .unwrap_or(0);
            patches.push((at, at, state.head.concat()));
        }
        if !state.body_prepends.is_empty() {
            let at = find_open_tag_end(source, "body").unwrap_or(0);
            patches.push((at, at, state.body_prepends.concat()));
        }

        let mut replaced: Vec<(usize, usize)> = Vec::new();
        let mut edited: Vec<(&ElementSpan, &ElementEdit)> = state
            .spans
            .iter()
            .zip(state.edits.iter())
            .filter(|(_, edit)| edit.children.is_some() || !edit.appended.is_empty())
            .collect();
        edited.sort_by_key(|(span, _)| span.open_start);
        for (span, edit) in edited {
            // Edits nested inside an already replaced element are gone with it.
            if replaced
                .iter()
                .any(|&(start, end)| span.open_start >= start && span.close_end <= end)
            {
                continue;
            }
            match &edit.children {
                Some(children) => {
                    patches.push((span.open_end, span.close_start, children.concat()));
                    replaced.push((span.open_end, span.close_start));
                }
                None => {
                    patches.push((span.close_start, span.close_start, edit.appended.concat()))
                }
            }
        }

        patches.sort_by_key(|(start, end, _)| (*start, *end));
        let mut out = String::with_capacity(source.len());
        let mut cursor = 0;
        for (start, end, text) in patches {
            if start < cursor {
                continue;
            }
            out.push_str(&source[cursor..start]);
            out.push_str(&text);
            cursor = end;
        }
        out.push_str(&source[cursor..]);
        out
    }
}

/// Something [`crate::autoloader::Autoloader::render_all_under`] can search.
pub trait Container: Send + Sync {
    /// Every element under this container whose class list contains `class`.
    fn query_class(&self, class: &str) -> Vec<Element>;
}

impl Container for Arc<Document> {
    fn query_class(&self, class: &str) -> Vec<Element> {
        self.elements_with_class(class, None)
    }
}

impl Container for Element {
    fn query_class(&self, class: &str) -> Vec<Element> {
        let (start, end) = {
            let state = self.document.state.lock();
            let span = &state.spans[self.index];
            (span.open_end, span.close_start)
        };
        self.document.elements_with_class(class, Some((start, end)))
    }
}

/// Handle to one addressable element of a [`Document`].
#[derive(Clone)]
pub struct Element {
    document: Arc<Document>,
    index: usize,
}

impl Element {
    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn tag(&self) -> String {
        self.document.state.lock().spans[self.index].tag.clone()
    }

    pub fn id(&self) -> Option<String> {
        self.document.state.lock().spans[self.index].id.clone()
    }

    pub fn inner_html(&self) -> String {
        let state = self.document.state.lock();
        let span = &state.spans[self.index];
        match &state.edits[self.index].children {
            Some(children) => children.concat(),
            None => {
                let mut inner = state.source[span.open_end..span.close_start].to_string();
                inner.push_str(&state.edits[self.index].appended.concat());
                inner
            }
        }
    }

    /// Text with tags stripped and entities decoded.
    pub fn text_content(&self) -> String {
        text_content(&self.inner_html())
    }

    /// Replace every child with `html`, which becomes child 0.
    pub fn set_inner_html(&self, html: impl Into<String>) {
        let mut state = self.document.state.lock();
        let edit = &mut state.edits[self.index];
        edit.children = Some(vec![html.into()]);
        edit.appended.clear();
    }

    /// Append markup after the current children.
    pub fn append_html(&self, html: impl Into<String>) {
        let mut state = self.document.state.lock();
        let edit = &mut state.edits[self.index];
        match &mut edit.children {
            Some(children) => children.push(html.into()),
            None => edit.appended.push(html.into()),
        }
    }

    /// Replace one child created by [`Element::set_inner_html`] or
    /// [`Element::append_html`]. Returns false if there is no such child.
    pub fn set_child_html(&self, index: usize, html: impl Into<String>) -> bool {
        let mut state = self.document.state.lock();
        match state.edits[self.index].children.as_mut() {
            Some(children) if index < children.len() => {
                children[index] = html.into();
                true
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("index", &self.index)
            .field("tag", &self.tag())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "<html><head><title>t</title></head><body>\
        <section id=\"a\"><div class=\"markmap\"># A</div></section>\
        <div class=\"markmap\">\n  # B\n  - &lt;x&gt;\n</div>\
        </body></html>";

    #[test]
    fn test_query_document_and_region() {
        let doc = Document::parse(PAGE);
        assert_eq!(doc.query_class("markmap").len(), 2);

        let region = doc.get_element_by_id("a").unwrap();
        let inside = region.query_class("markmap");
        assert_eq!(inside.len(), 1);
        assert_eq!(inside[0].text_content(), "# A");
    }

    #[test]
    fn test_text_content_is_decoded() {
        let doc = Document::parse(PAGE);
        let blocks = doc.query_class("markmap");
        assert_eq!(blocks[1].text_content(), "\n  # B\n  - <x>\n");
    }

    #[test]
    fn test_serialize_with_edits() {
        let doc = Document::parse(PAGE);
        let blocks = doc.query_class("markmap");
        blocks[1].set_inner_html("<svg></svg>");
        blocks[1].append_html("<div class=\"mm-toolbar\"></div>");
        doc.append_to_head("<script src=\"a.js\"></script>");
        doc.prepend_to_body("<style>g</style>");

        let html = doc.to_html();
        assert!(html.contains("<script src=\"a.js\"></script></head>"));
        assert!(html.contains("<body><style>g</style><section id=\"a\">"));
        assert!(html.contains(
            "<div class=\"markmap\"><svg></svg><div class=\"mm-toolbar\"></div></div>"
        ));
        assert!(html.contains("<div class=\"markmap\"># A</div>"));
    }

    #[test]
    fn test_set_child_keeps_siblings() {
        let doc = Document::parse("<div class=\"markmap\">text</div>");
        let block = &doc.query_class("markmap")[0];
        assert!(!block.set_child_html(0, "x"));

        block.set_inner_html("<svg></svg>");
        block.append_html("<div>bar</div>");
        assert!(block.set_child_html(0, "<svg><g></g></svg>"));
        assert!(!block.set_child_html(2, "y"));
        assert_eq!(block.inner_html(), "<svg><g></g></svg><div>bar</div>");
    }

    #[test]
    fn test_body_prepend_order() {
        let doc = Document::parse("<body></body>");
        doc.prepend_to_body("1");
        doc.prepend_to_body("2");
        assert_eq!(doc.to_html(), "<body>21</body>");
    }

    #[tokio::test]
    async fn test_load_signal() {
        let doc = Document::loading("<body></body>");
        assert_eq!(doc.ready_state(), ReadyState::Loading);

        let waiter = {
            let doc = Arc::clone(&doc);
            tokio::spawn(async move { doc.when_loaded().await })
        };
        doc.mark_loaded();
        waiter.await.unwrap();
        assert_eq!(doc.ready_state(), ReadyState::Complete);

        // Already loaded: returns at once.
        doc.when_loaded().await;
    }
}
