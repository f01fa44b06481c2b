use std::borrow::Cow;

use scraper::{ElementRef, Html, Node};

/// Converts an HTML fragment into display-ready plain text.
///
/// Implementations are injected into [`FieldExtractor`](crate::feed::FieldExtractor)
/// so callers can swap in their own renderer (e.g. one that keeps link targets).
pub trait HtmlToText {
    fn html_to_plain_text(&self, html: &str) -> String;
}

/// Default [`HtmlToText`] backed by the `scraper` HTML5 parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScraperText;

impl HtmlToText for ScraperText {
    fn html_to_plain_text(&self, html: &str) -> String {
        html_to_plain_text(html)
    }
}

/// Elements whose text is never shown to a reader.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "head", "template", "noscript"];

/// Elements that start a new line in the rendered text.
const BLOCK_ELEMENTS: &[&str] = &[
    "address",
    "article",
    "aside",
    "blockquote",
    "dd",
    "div",
    "dl",
    "dt",
    "figcaption",
    "figure",
    "footer",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "header",
    "hr",
    "li",
    "main",
    "ol",
    "p",
    "pre",
    "section",
    "table",
    "tr",
    "ul",
];

/// Strips markup from an HTML fragment, returning readable plain text.
///
/// - Entities are decoded (`&amp;` → `&`)
/// - `<script>`/`<style>` subtrees are dropped
/// - Block elements and `<br>` become line breaks
/// - Whitespace runs collapse to a single space, blank lines are removed
/// - Terminal control characters are stripped
///
/// # Examples
///
/// ```
/// use feedsync::util::html_to_plain_text;
///
/// assert_eq!(html_to_plain_text("Fish &amp; chips"), "Fish & chips");
/// assert_eq!(html_to_plain_text("<p>One</p><p>Two</p>"), "One\nTwo");
/// ```
pub fn html_to_plain_text(html: &str) -> String {
    // Fast path: nothing to parse
    if !html.contains('<') && !html.contains('&') {
        return collapse_whitespace(&strip_control_chars(html));
    }

    let fragment = Html::parse_fragment(html);
    let mut raw = String::with_capacity(html.len());
    collect_text(fragment.root_element(), &mut raw);

    collapse_whitespace(&strip_control_chars(&raw))
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if SKIPPED_ELEMENTS.contains(&name) {
                    continue;
                }
                if name == "br" {
                    out.push('\n');
                    continue;
                }

                let block = BLOCK_ELEMENTS.contains(&name);
                if block {
                    out.push('\n');
                }
                if let Some(child_element) = ElementRef::wrap(child) {
                    collect_text(child_element, out);
                }
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let mut words = line.split_whitespace().peekable();
        if words.peek().is_none() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        for (i, word) in words.enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(word);
        }
    }
    out
}

/// Returns the first `max_chars` characters of `s`.
///
/// Cuts on `char` boundaries only, so a multi-byte character is never split.
/// No word-boundary adjustment and no ellipsis.
///
/// # Examples
///
/// ```
/// use feedsync::util::truncate_chars;
///
/// assert_eq!(truncate_chars("Hello World", 5), "Hello");
/// assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
/// assert_eq!(truncate_chars("short", 200), "short");
/// ```
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// SEC-001: Strip terminal control characters and ANSI escape sequences from text.
///
/// Feed titles and descriptions are attacker-controlled; anything that reaches a
/// terminal or log must not carry escape sequences.
///
/// Strips ASCII controls (except tab, newline, carriage return), DEL, CSI
/// sequences (`\x1b[` … final byte), OSC sequences (`\x1b]` … BEL or ST), and
/// bare ESC. Returns `Cow::Borrowed` when nothing needs stripping.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    if !bytes.iter().any(|&b| is_stripped_byte(b)) {
        return Cow::Borrowed(s);
    }

    let len = bytes.len();
    let mut out = String::with_capacity(len);
    let mut i = 0;

    while i < len {
        let b = bytes[i];
        if b == 0x1b {
            i += 1;
            match bytes.get(i) {
                Some(b'[') => {
                    i += 1;
                    while i < len {
                        let c = bytes[i];
                        i += 1;
                        if (0x40..=0x7e).contains(&c) {
                            break;
                        }
                    }
                }
                Some(b']') => {
                    i += 1;
                    while i < len {
                        if bytes[i] == 0x07 {
                            i += 1;
                            break;
                        }
                        if bytes[i] == 0x1b && bytes.get(i + 1) == Some(&b'\\') {
                            i += 2;
                            break;
                        }
                        i += 1;
                    }
                }
                _ => {}
            }
        } else if is_stripped_byte(b) {
            i += 1;
        } else {
            let start = i;
            while i < len && !is_stripped_byte(bytes[i]) {
                i += 1;
            }
            // Only ASCII bytes stop the run, so the slice ends on a char boundary
            out.push_str(&s[start..i]);
        }
    }

    Cow::Owned(out)
}

fn is_stripped_byte(b: u8) -> bool {
    b == 0x1b || b == 0x7f || (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r')
}
