//! Lightweight HTML tokenizing: element ranges, classes and text content.
//!
//! The tokenizer walks the source once, keeping byte offsets so edits can be patched
//! back into the untouched text. Comments, doctypes and processing instructions are
//! skipped, attribute values may be quoted with either quote and contain `>`, and the
//! bodies of raw-text elements (`script`, `style`, ...) are never read as markup.

use regex::Regex;
use std::sync::OnceLock;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

/// Location of one element in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ElementSpan {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub open_start: usize,
    /// First byte after the opening tag.
    pub open_end: usize,
    /// First byte of the closing tag.
    pub close_start: usize,
    pub close_end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Start {
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
        start: usize,
        end: usize,
    },
    End {
        name: String,
        start: usize,
        end: usize,
    },
    Text {
        start: usize,
        end: usize,
    },
}

struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
    /// Set after the opening tag of a raw-text element.
    raw_text: Option<String>,
}

fn is_name_byte(b: u8) -> bool {
    !b.is_ascii_whitespace() && b != b'/' && b != b'>' && b != b'='
}

impl<'a> Tokenizer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            raw_text: None,
        }
    }

    fn bytes(&self) -> &'a [u8] {
        self.src.as_bytes()
    }

    fn find_from(&self, from: usize, needle: &str) -> Option<usize> {
        self.src.get(from..)?.find(needle).map(|i| i + from)
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.src.len() && self.bytes()[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn take_name(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.src.len() && is_name_byte(self.bytes()[self.pos]) {
            self.pos += 1;
        }
        self.src[start..self.pos].to_ascii_lowercase()
    }

    /// Skip `<!-- ... -->`, `<!...>` or `<?...>` starting at `self.pos`.
    fn skip_declaration(&mut self) {
        self.pos = if self.src[self.pos..].starts_with("<!--") {
            self.find_from(self.pos + 4, "-->")
                .map_or(self.src.len(), |i| i + 3)
        } else {
            self.find_from(self.pos, ">")
                .map_or(self.src.len(), |i| i + 1)
        };
    }

    fn end_tag(&mut self, start: usize) -> Token {
        self.pos = start + 2;
        let name = self.take_name();
        self.pos = self
            .find_from(self.pos, ">")
            .map_or(self.src.len(), |i| i + 1);
        Token::End {
            name,
            start,
            end: self.pos,
        }
    }

    /// Parse a start tag. Returns `None` when the input ends inside the tag.
    fn start_tag(&mut self, start: usize) -> Option<Token> {
        self.pos = start + 1;
        let name = self.take_name();
        let mut attrs = Vec::new();
        let mut self_closing = false;

        loop {
            self.skip_whitespace();
            match *self.bytes().get(self.pos)? {
                b'>' => {
                    self.pos += 1;
                    break;
                }
                b'/' => {
                    self.pos += 1;
                    if self.bytes().get(self.pos) == Some(&b'>') {
                        self.pos += 1;
                        self_closing = true;
                        break;
                    }
                }
                b'=' => {
                    // Stray `=` without a name.
                    self.pos += 1;
                }
                _ => {
                    let attr = self.take_name();
                    self.skip_whitespace();
                    let mut value = String::new();
                    if self.bytes().get(self.pos) == Some(&b'=') {
                        self.pos += 1;
                        self.skip_whitespace();
                        value = self.attr_value()?;
                    }
                    attrs.push((attr, value));
                }
            }
        }

        if RAW_TEXT_ELEMENTS.contains(&name.as_str()) && !self_closing {
            self.raw_text = Some(name.clone());
        }
        Some(Token::Start {
            name,
            attrs,
            self_closing,
            start,
            end: self.pos,
        })
    }

    fn attr_value(&mut self) -> Option<String> {
        let quote = *self.bytes().get(self.pos)?;
        if quote == b'"' || quote == b'\'' {
            let start = self.pos + 1;
            let end = self.src[start..].find(quote as char)? + start;
            self.pos = end + 1;
            return Some(decode_entities(&self.src[start..end]));
        }
        let start = self.pos;
        while self.pos < self.src.len() {
            let b = self.bytes()[self.pos];
            if b.is_ascii_whitespace() || b == b'>' {
                break;
            }
            self.pos += 1;
        }
        Some(decode_entities(&self.src[start..self.pos]))
    }

    fn text_until_markup(&mut self, start: usize) -> Token {
        // A lone `<` is text; skip past it so the search moves on.
        let from = if self.bytes()[start] == b'<' { start + 1 } else { start };
        self.pos = self
            .find_from(from, "<")
            .unwrap_or(self.src.len());
        Token::Text {
            start,
            end: self.pos,
        }
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        loop {
            if self.pos >= self.src.len() {
                return None;
            }
            let start = self.pos;

            if let Some(name) = self.raw_text.take() {
                let end = find_end_tag(self.src, &name, start).unwrap_or(self.src.len());
                self.pos = end;
                if end > start {
                    return Some(Token::Text { start, end });
                }
                continue;
            }

            let rest = &self.bytes()[start..];
            if rest[0] != b'<' {
                return Some(self.text_until_markup(start));
            }
            match rest.get(1).copied() {
                Some(b'!') | Some(b'?') => {
                    self.skip_declaration();
                    continue;
                }
                Some(b'/') if rest.get(2).map_or(false, u8::is_ascii_alphabetic) => {
                    return Some(self.end_tag(start));
                }
                Some(b) if b.is_ascii_alphabetic() => match self.start_tag(start) {
                    Some(token) => return Some(token),
                    None => {
                        self.pos = self.src.len();
                        return Some(Token::Text {
                            start,
                            end: self.pos,
                        });
                    }
                },
                _ => return Some(self.text_until_markup(start)),
            }
        }
    }
}

/// Find `</tag` followed by whitespace, `>` or `/`, so `</div` does not match `</divider`.
fn find_end_tag(src: &str, tag: &str, mut pos: usize) -> Option<usize> {
    let lower = src.to_ascii_lowercase();
    let close = format!("</{}", tag);
    while let Some(i) = lower.get(pos..)?.find(&close).map(|i| i + pos) {
        let after = lower.as_bytes().get(i + close.len());
        if after.map_or(true, |&b| b.is_ascii_whitespace() || b == b'>' || b == b'/') {
            return Some(i);
        }
        pos = i + close.len();
    }
    None
}

fn entity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").expect("valid regex"))
}

/// End of the first `<tag ...>` opening tag.
pub(super) fn find_open_tag_end(source: &str, tag: &str) -> Option<usize> {
    Tokenizer::new(source).find_map(|token| match token {
        Token::Start { name, end, .. } if name == tag => Some(end),
        _ => None,
    })
}

/// Start of the first `</tag>` closing tag.
pub(super) fn find_close_tag_start(source: &str, tag: &str) -> Option<usize> {
    Tokenizer::new(source).find_map(|token| match token {
        Token::End { name, start, .. } if name == tag => Some(start),
        _ => None,
    })
}

struct OpenElement {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    open_start: usize,
    open_end: usize,
}

impl OpenElement {
    fn close(self, close_start: usize, close_end: usize, spans: &mut Vec<ElementSpan>) {
        if self.id.is_none() && self.classes.is_empty() {
            return;
        }
        spans.push(ElementSpan {
            tag: self.tag,
            id: self.id,
            classes: self.classes,
            open_start: self.open_start,
            open_end: self.open_end,
            close_start,
            close_end,
        });
    }
}

/// Find every element that carries an `id` or `class` attribute, in document order.
///
/// Elements left open by a closing tag of an ancestor end where that tag starts;
/// elements still open at the end of the input end there.
pub(super) fn scan_elements(source: &str) -> Vec<ElementSpan> {
    let mut stack: Vec<OpenElement> = Vec::new();
    let mut spans = Vec::new();

    for token in Tokenizer::new(source) {
        match token {
            Token::Start {
                name,
                attrs,
                self_closing,
                start,
                end,
            } => {
                if self_closing || VOID_ELEMENTS.contains(&name.as_str()) {
                    continue;
                }
                let mut id = None;
                let mut classes = Vec::new();
                for (attr, value) in attrs {
                    match attr.as_str() {
                        "id" if id.is_none() => id = Some(value),
                        "class" if classes.is_empty() => {
                            classes = value.split_whitespace().map(str::to_string).collect()
                        }
                        _ => {}
                    }
                }
                stack.push(OpenElement {
                    tag: name,
                    id,
                    classes,
                    open_start: start,
                    open_end: end,
                });
            }
            Token::End { name, start, end } => {
                // Stray closing tags are ignored.
                let Some(depth) = stack.iter().rposition(|open| open.tag == name) else {
                    continue;
                };
                while stack.len() > depth + 1 {
                    if let Some(inner) = stack.pop() {
                        inner.close(start, start, &mut spans);
                    }
                }
                if let Some(element) = stack.pop() {
                    element.close(start, end, &mut spans);
                }
            }
            Token::Text { .. } => {}
        }
    }

    let len = source.len();
    while let Some(open) = stack.pop() {
        open.close(len, len, &mut spans);
    }

    spans.sort_by_key(|span| span.open_start);
    spans
}

/// Text content of an HTML fragment: markup and comments removed, entities decoded.
pub(super) fn text_content(html: &str) -> String {
    let mut text = String::new();
    for token in Tokenizer::new(html) {
        if let Token::Text { start, end } = token {
            text.push_str(&html[start..end]);
        }
    }
    decode_entities(&text)
}

pub(super) fn decode_entities(text: &str) -> String {
    entity_regex()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let entity = &caps[1];
            let decoded = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match entity {
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "amp" => Some('&'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some('\u{a0}'),
                    _ => None,
                }
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inner<'a>(html: &'a str, span: &ElementSpan) -> &'a str {
        &html[span.open_end..span.close_start]
    }

    #[test]
    fn test_scan_nested_and_classes() {
        let html = r#"<main id="content"><div class="markmap big"><div>x</div>y</div><p>z</p></main>"#;
        let spans = scan_elements(html);
        assert_eq!(spans.len(), 2);

        let main = &spans[0];
        assert_eq!(main.tag, "main");
        assert_eq!(main.id.as_deref(), Some("content"));
        assert_eq!(&html[main.close_start..main.close_end], "</main>");

        let block = &spans[1];
        assert_eq!(block.classes, vec!["markmap", "big"]);
        assert_eq!(inner(html, block), "<div>x</div>y");
    }

    #[test]
    fn test_divider_is_not_a_div() {
        let html = r#"<div class="a"><divider></divider>text</div-x></div>"#;
        let spans = scan_elements(html);
        assert_eq!(spans.len(), 1);
        assert_eq!(inner(html, &spans[0]), "<divider></divider>text</div-x>");
    }

    #[test]
    fn test_commented_out_elements_are_skipped() {
        let html = r#"<!-- <div class="markmap"># Hidden</div> --><div class="markmap"># Real</div>"#;
        let spans = scan_elements(html);
        assert_eq!(spans.len(), 1);
        assert_eq!(inner(html, &spans[0]), "# Real");
    }

    #[test]
    fn test_quoted_attribute_may_contain_gt() {
        let html = r#"<div title="a>b" class='markmap'># Real</div>"#;
        let spans = scan_elements(html);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].classes, vec!["markmap"]);
        assert_eq!(inner(html, &spans[0]), "# Real");
    }

    #[test]
    fn test_raw_text_is_not_markup() {
        let html = r#"<script id="s">if (a<b) { x = "<div class='markmap'>"; }</script><p class="q">t</p>"#;
        let spans = scan_elements(html);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].id.as_deref(), Some("s"));
        assert_eq!(inner(html, &spans[0]), r#"if (a<b) { x = "<div class='markmap'>"; }"#);
        assert_eq!(spans[1].classes, vec!["q"]);
    }

    #[test]
    fn test_implied_close_and_unclosed() {
        let html = r#"<div class="outer"><p class="para">one</div><section id="open">tail"#;
        let spans = scan_elements(html);
        assert_eq!(spans.len(), 3);
        assert_eq!(inner(html, &spans[0]), r#"<p class="para">one"#);
        assert_eq!(inner(html, &spans[1]), "one");
        assert_eq!(inner(html, &spans[2]), "tail");
    }

    #[test]
    fn test_text_content_decodes_entities() {
        assert_eq!(
            text_content("<b>a &lt;b&gt;</b> &amp; <!-- no -->&#39;c&#x27; &unknown; 1 < 2"),
            "a <b> & 'c' &unknown; 1 < 2"
        );
    }

    #[test]
    fn test_landmarks() {
        let html = "<!DOCTYPE html><html><head><title>t</title></head><body class=\"x\">b</body></html>";
        assert_eq!(find_close_tag_start(html, "head"), Some(html.find("</head>").unwrap()));
        assert_eq!(
            find_open_tag_end(html, "body"),
            Some(html.find("b</body>").unwrap())
        );
    }
}
