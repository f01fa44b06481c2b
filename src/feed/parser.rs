use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use encoding_rs::Encoding;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::name::{LocalName, Namespace, ResolveResult};
use quick_xml::NsReader;
use thiserror::Error;

use super::model::{
    Content, Enclosure, Link, MediaContent, MediaExtension, SyndicationEntry, SyndicationFeed,
};

/// Nested `media:group`/`media:content` levels followed before the rest is skipped.
const MAX_MEDIA_DEPTH: usize = 8;

/// Errors that can occur while turning bytes into a [`SyndicationFeed`].
#[derive(Debug, Error)]
pub enum ParseError {
    /// Input was empty or whitespace only
    #[error("Document is empty")]
    Empty,
    /// The bytes are not well-formed XML
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    /// Well-formed XML without any element
    #[error("No root element found")]
    NoRootElement,
    /// Root element is not RSS `<rss>`, RDF `<RDF>` or Atom `<feed>`
    #[error("Unsupported document type: <{0}>")]
    UnsupportedFormat(String),
    /// Document ended inside an open element
    #[error("Unexpected end of document")]
    UnexpectedEof,
}

/// Parses an RSS 0.9x/2.0, RSS 1.0 (RDF) or Atom 1.0 document.
///
/// The character encoding is taken from the byte-order mark, then from the
/// XML declaration, defaulting to UTF-8. After parsing, every entry without
/// authors inherits the feed-level author list.
///
/// Unparseable dates become `None` rather than failing the document.
///
/// # Errors
///
/// Returns [`ParseError`] for empty input, malformed XML, or an unsupported
/// root element.
///
/// # Security
///
/// SEC-002: quick-xml (0.37) never parses `<!ENTITY>` declarations from a
/// DOCTYPE. Entity references are resolved only against the XML builtins and a
/// fixed table of common HTML names; anything else leaves the text as written.
pub fn parse(bytes: &[u8]) -> Result<SyndicationFeed, ParseError> {
    let text = decode_document(bytes);
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let mut doc = Document::new(&text);
    let (root, is_empty) = doc.root()?;
    let (ns, local) = doc.element(&root);

    let mut feed = SyndicationFeed::default();
    match (ns, local.as_ref()) {
        (ns, b"rss") if ns.is_rss() => {
            if !is_empty {
                doc.rss_container(&mut feed)?;
            }
        }
        (Ns::Rdf, b"RDF") => {
            if !is_empty {
                doc.rss_container(&mut feed)?;
            }
        }
        (ns @ (Ns::Atom | Ns::None), b"feed") => {
            if !is_empty {
                doc.atom_feed(&mut feed, ns)?;
            }
        }
        (_, other) => {
            return Err(ParseError::UnsupportedFormat(
                String::from_utf8_lossy(other).into_owned(),
            ))
        }
    }

    feed.inherit_feed_authors();
    Ok(feed)
}

/// Decodes the raw document into UTF-8.
fn decode_document(bytes: &[u8]) -> Cow<'_, str> {
    let (encoding, bom_len) = detect_encoding(bytes);
    let (text, had_errors) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
    if had_errors {
        tracing::debug!(
            encoding = encoding.name(),
            "Replaced malformed byte sequences while decoding feed"
        );
    }
    text
}

fn detect_encoding(bytes: &[u8]) -> (&'static Encoding, usize) {
    if let Some(found) = Encoding::for_bom(bytes) {
        return found;
    }
    // UTF-16 without a BOM still starts with "<?"
    match bytes {
        [0x3c, 0x00, 0x3f, 0x00, ..] => return (encoding_rs::UTF_16LE, 0),
        [0x00, 0x3c, 0x00, 0x3f, ..] => return (encoding_rs::UTF_16BE, 0),
        _ => {}
    }
    (declared_encoding(bytes).unwrap_or(encoding_rs::UTF_8), 0)
}

/// Reads `encoding="..."` from an ASCII-compatible XML declaration.
fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = bytes.strip_prefix(b"<?xml")?;
    let decl_end = head
        .windows(2)
        .take(512)
        .position(|w| w == b"?>")?;
    let decl = &head[..decl_end];

    let attr = decl.windows(8).position(|w| w == b"encoding")?;
    let rest = &decl[attr + 8..];
    let rest = &rest[rest.iter().position(|&b| b != b' ' && b != b'=')?..];
    let (&quote, rest) = rest.split_first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let label = &rest[..rest.iter().position(|&b| b == quote)?];

    // A UTF-16 label read through 8-bit bytes is wrong; output_encoding maps it to UTF-8
    Encoding::for_label(label).map(Encoding::output_encoding)
}

/// XML namespaces the parser understands, resolved from their URIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ns {
    /// No namespace: plain RSS 0.9x/2.0 elements, or Atom without `xmlns`
    None,
    /// RSS 1.0, RSS 0.90 and the old UserLand RSS 2.0 namespace
    Rss,
    Rdf,
    Atom,
    Media,
    Dc,
    DcTerms,
    Content,
    Other,
}

impl Ns {
    fn from_uri(uri: &[u8]) -> Self {
        match uri {
            b"http://www.w3.org/2005/Atom" | b"http://purl.org/atom/ns#" => Self::Atom,
            b"http://search.yahoo.com/mrss/" | b"http://search.yahoo.com/mrss" => Self::Media,
            b"http://purl.org/dc/elements/1.1/" => Self::Dc,
            b"http://purl.org/dc/terms/" => Self::DcTerms,
            b"http://purl.org/rss/1.0/modules/content/" => Self::Content,
            b"http://purl.org/rss/1.0/"
            | b"http://my.netscape.com/rdf/simple/0.9/"
            | b"http://backend.userland.com/rss2" => Self::Rss,
            b"http://www.w3.org/1999/02/22-rdf-syntax-ns#" => Self::Rdf,
            _ => Self::Other,
        }
    }

    /// Binding assumed for a prefix the document uses without declaring it.
    fn from_undeclared_prefix(prefix: &[u8]) -> Self {
        match prefix {
            b"atom" => Self::Atom,
            b"media" => Self::Media,
            b"dc" => Self::Dc,
            b"dcterms" => Self::DcTerms,
            b"content" => Self::Content,
            b"rdf" => Self::Rdf,
            _ => Self::Other,
        }
    }

    fn is_rss(self) -> bool {
        matches!(self, Self::None | Self::Rss)
    }
}

struct Document<'a> {
    reader: NsReader<&'a [u8]>,
}

impl<'a> Document<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            reader: NsReader::from_str(text),
        }
    }

    fn next(&mut self) -> Result<Event<'a>, ParseError> {
        Ok(self.reader.read_event()?)
    }

    /// Namespace and local name of an element just read.
    fn element<'e>(&self, e: &'e BytesStart<'_>) -> (Ns, LocalName<'e>) {
        let (resolved, local) = self.reader.resolve_element(e.name());
        let ns = match resolved {
            ResolveResult::Bound(Namespace(uri)) => Ns::from_uri(uri),
            ResolveResult::Unbound => Ns::None,
            ResolveResult::Unknown(prefix) => Ns::from_undeclared_prefix(&prefix),
        };
        (ns, local)
    }

    fn root(&mut self) -> Result<(BytesStart<'a>, bool), ParseError> {
        loop {
            match self.next()? {
                Event::Start(e) => return Ok((e, false)),
                Event::Empty(e) => return Ok((e, true)),
                Event::Eof => return Err(ParseError::NoRootElement),
                _ => {}
            }
        }
    }

    fn skip(&mut self, e: &BytesStart<'_>) -> Result<(), ParseError> {
        self.reader.read_to_end(e.name())?;
        Ok(())
    }

    /// Collects the character data of the element just opened, up to its end tag.
    ///
    /// Markup nested inside (e.g. unescaped `<b>` in an RSS title) contributes its
    /// text only. The result is trimmed.
    fn text(&mut self) -> Result<String, ParseError> {
        let mut out = String::new();
        let mut depth = 0usize;
        loop {
            match self.next()? {
                Event::Text(t) => push_unescaped(&mut out, &t),
                Event::CData(c) => out.push_str(&String::from_utf8_lossy(&c)),
                Event::Start(_) => depth += 1,
                Event::End(_) => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                Event::Eof => return Err(ParseError::UnexpectedEof),
                _ => {}
            }
        }
        Ok(out.trim().to_owned())
    }

    /// Atom text construct: `xhtml` keeps inner markup, `text`/`html` are unescaped.
    fn text_construct(&mut self, e: &BytesStart<'a>) -> Result<String, ParseError> {
        let is_xhtml = self
            .attr(e, b"type")
            .is_some_and(|t| t.eq_ignore_ascii_case("xhtml"));
        if is_xhtml {
            let inner = self.reader.read_text(e.name())?;
            Ok(unwrap_xhtml_div(inner.trim()).to_owned())
        } else {
            self.text()
        }
    }

    fn attr(&self, e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
        for attr_result in e.attributes() {
            let attr = match attr_result {
                Ok(attr) => attr,
                Err(err) => {
                    tracing::debug!(error = %err, "Skipping malformed feed attribute");
                    continue;
                }
            };
            if attr.key.as_ref() != name {
                continue;
            }
            let value = attr
                .decode_and_unescape_value(self.reader.decoder())
                .map(Cow::into_owned)
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            let value = value.trim();
            return (!value.is_empty()).then(|| value.to_owned());
        }
        None
    }

    // ------------------------------------------------------------------------
    // RSS 0.9x / 2.0 / 1.0
    // ------------------------------------------------------------------------

    /// Walks `<rss>`, `<rdf:RDF>` or `<channel>` until its end tag.
    ///
    /// RSS 1.0 puts `<item>` next to `<channel>` rather than inside it, so both
    /// levels are handled by the same loop.
    fn rss_container(&mut self, feed: &mut SyndicationFeed) -> Result<(), ParseError> {
        loop {
            match self.next()? {
                Event::Start(e) => {
                    let (ns, local) = self.element(&e);
                    match (ns, local.as_ref()) {
                        (ns, b"channel") if ns.is_rss() => self.rss_container(feed)?,
                        (ns, b"item") if ns.is_rss() => {
                            let entry = self.rss_item()?;
                            feed.entries.push(entry);
                        }
                        (ns, b"title") if ns.is_rss() => feed.title = Some(self.text()?),
                        (ns, b"link") if ns.is_rss() => {
                            let href = self.text()?;
                            if !href.is_empty() {
                                feed.links.push(Link {
                                    href,
                                    rel: Some("alternate".to_owned()),
                                    media_type: None,
                                });
                            }
                        }
                        (Ns::Atom, b"link") => {
                            feed.links.extend(self.atom_link(&e));
                            self.skip(&e)?;
                        }
                        (ns, b"managingEditor") if ns.is_rss() => {
                            push_non_empty(&mut feed.authors, self.text()?);
                        }
                        (Ns::Dc, b"creator") => push_non_empty(&mut feed.authors, self.text()?),
                        _ => self.skip(&e)?,
                    }
                }
                Event::Empty(e) => {
                    let (ns, local) = self.element(&e);
                    if ns == Ns::Atom && local.as_ref() == b"link" {
                        feed.links.extend(self.atom_link(&e));
                    }
                }
                Event::End(_) => return Ok(()),
                Event::Eof => return Err(ParseError::UnexpectedEof),
                _ => {}
            }
        }
    }

    fn rss_item(&mut self) -> Result<SyndicationEntry, ParseError> {
        let mut entry = SyndicationEntry::default();
        loop {
            match self.next()? {
                Event::Start(e) => {
                    let (ns, local) = self.element(&e);
                    match (ns, local.as_ref()) {
                        (ns, b"title") if ns.is_rss() => entry.title = Some(self.text()?),
                        (ns, b"link") if ns.is_rss() => entry.link = non_empty(self.text()?),
                        (ns, b"guid") if ns.is_rss() => entry.id = non_empty(self.text()?),
                        (ns, b"description") if ns.is_rss() => {
                            entry.description = Some(self.text()?);
                        }
                        (ns, b"author") if ns.is_rss() => {
                            push_non_empty(&mut entry.authors, self.text()?);
                        }
                        (Ns::Dc, b"creator") => push_non_empty(&mut entry.authors, self.text()?),
                        (ns, b"pubDate") if ns.is_rss() => {
                            entry.published = parse_date(&self.text()?);
                        }
                        (Ns::Dc, b"date") => {
                            let date = parse_date(&self.text()?);
                            entry.published = entry.published.or(date);
                        }
                        (Ns::DcTerms, b"modified") | (Ns::Atom, b"updated") => {
                            entry.updated = parse_date(&self.text()?);
                        }
                        (Ns::Content, b"encoded") => {
                            entry.contents.push(Content::new(Some("html"), self.text()?));
                        }
                        (ns, b"enclosure") if ns.is_rss() => {
                            entry.enclosures.push(self.rss_enclosure(&e));
                            self.skip(&e)?;
                        }
                        (Ns::Media, _) => self.media(&e, false, &mut entry, 0)?,
                        (Ns::Atom, b"link") => {
                            self.entry_atom_link(&e, &mut entry);
                            self.skip(&e)?;
                        }
                        _ => self.skip(&e)?,
                    }
                }
                Event::Empty(e) => {
                    let (ns, local) = self.element(&e);
                    match (ns, local.as_ref()) {
                        (ns, b"enclosure") if ns.is_rss() => {
                            entry.enclosures.push(self.rss_enclosure(&e));
                        }
                        (Ns::Media, _) => self.media(&e, true, &mut entry, 0)?,
                        (Ns::Atom, b"link") => self.entry_atom_link(&e, &mut entry),
                        _ => {}
                    }
                }
                Event::End(_) => return Ok(entry),
                Event::Eof => return Err(ParseError::UnexpectedEof),
                _ => {}
            }
        }
    }

    fn rss_enclosure(&self, e: &BytesStart<'_>) -> Enclosure {
        Enclosure {
            url: self.attr(e, b"url"),
            media_type: self.attr(e, b"type"),
            length: self.attr(e, b"length").and_then(|l| l.parse().ok()),
        }
    }

    // ------------------------------------------------------------------------
    // Media RSS
    // ------------------------------------------------------------------------

    /// Records a Media RSS element. `media:group` children are flattened into
    /// the entry's media lists, as are thumbnails nested in `media:content`.
    fn media(
        &mut self,
        e: &BytesStart<'a>,
        is_empty: bool,
        entry: &mut SyndicationEntry,
        depth: usize,
    ) -> Result<(), ParseError> {
        let local = e.local_name();
        let local = local.as_ref();

        match local {
            b"thumbnail" => {
                let url = self.attr(e, b"url");
                let media = entry.media.get_or_insert_with(MediaExtension::default);
                media.thumbnails.extend(url);
            }
            b"content" => {
                let content = MediaContent {
                    medium: self.attr(e, b"medium"),
                    url: self.attr(e, b"url"),
                };
                let media = entry.media.get_or_insert_with(MediaExtension::default);
                media.contents.push(content);
            }
            _ => {
                entry.media.get_or_insert_with(MediaExtension::default);
            }
        }

        if is_empty {
            return Ok(());
        }
        if matches!(local, b"group" | b"content") && depth < MAX_MEDIA_DEPTH {
            self.media_children(entry, depth + 1)
        } else {
            self.skip(e)
        }
    }

    fn media_children(
        &mut self,
        entry: &mut SyndicationEntry,
        depth: usize,
    ) -> Result<(), ParseError> {
        loop {
            match self.next()? {
                Event::Start(e) => {
                    if self.element(&e).0 == Ns::Media {
                        self.media(&e, false, entry, depth)?;
                    } else {
                        self.skip(&e)?;
                    }
                }
                Event::Empty(e) => {
                    if self.element(&e).0 == Ns::Media {
                        self.media(&e, true, entry, depth)?;
                    }
                }
                Event::End(_) => return Ok(()),
                Event::Eof => return Err(ParseError::UnexpectedEof),
                _ => {}
            }
        }
    }

    // ------------------------------------------------------------------------
    // Atom
    // ------------------------------------------------------------------------

    /// Walks `<feed>`. `atom` is the namespace of the root element; Atom
    /// children are expected in the same one.
    fn atom_feed(&mut self, feed: &mut SyndicationFeed, atom: Ns) -> Result<(), ParseError> {
        loop {
            match self.next()? {
                Event::Start(e) => {
                    let (ns, local) = self.element(&e);
                    match local.as_ref() {
                        _ if ns != atom => self.skip(&e)?,
                        b"title" => feed.title = Some(self.text_construct(&e)?),
                        b"link" => {
                            feed.links.extend(self.atom_link(&e));
                            self.skip(&e)?;
                        }
                        b"author" => feed.authors.extend(self.atom_person()?),
                        b"entry" => {
                            let entry = self.atom_entry(atom)?;
                            feed.entries.push(entry);
                        }
                        _ => self.skip(&e)?,
                    }
                }
                Event::Empty(e) => {
                    let (ns, local) = self.element(&e);
                    if ns == atom && local.as_ref() == b"link" {
                        feed.links.extend(self.atom_link(&e));
                    }
                }
                Event::End(_) => return Ok(()),
                Event::Eof => return Err(ParseError::UnexpectedEof),
                _ => {}
            }
        }
    }

    fn atom_entry(&mut self, atom: Ns) -> Result<SyndicationEntry, ParseError> {
        let mut entry = SyndicationEntry::default();
        loop {
            match self.next()? {
                Event::Start(e) => {
                    let (ns, local) = self.element(&e);
                    match (ns, local.as_ref()) {
                        (Ns::Media, _) => self.media(&e, false, &mut entry, 0)?,
                        (Ns::Dc, b"creator") => push_non_empty(&mut entry.authors, self.text()?),
                        (ns, local) if ns == atom => match local {
                            b"id" => entry.id = non_empty(self.text()?),
                            b"title" => entry.title = Some(self.text_construct(&e)?),
                            b"link" => {
                                self.entry_atom_link(&e, &mut entry);
                                self.skip(&e)?;
                            }
                            b"content" => {
                                let content_type = self.attr(&e, b"type");
                                let value = self.text_construct(&e)?;
                                entry.contents.push(Content {
                                    content_type,
                                    value,
                                });
                            }
                            b"summary" => entry.description = Some(self.text_construct(&e)?),
                            b"author" => entry.authors.extend(self.atom_person()?),
                            b"published" | b"issued" => {
                                entry.published = parse_date(&self.text()?);
                            }
                            b"updated" | b"modified" => {
                                entry.updated = parse_date(&self.text()?);
                            }
                            _ => self.skip(&e)?,
                        },
                        _ => self.skip(&e)?,
                    }
                }
                Event::Empty(e) => {
                    let (ns, local) = self.element(&e);
                    match (ns, local.as_ref()) {
                        (Ns::Media, _) => self.media(&e, true, &mut entry, 0)?,
                        (ns, b"link") if ns == atom => self.entry_atom_link(&e, &mut entry),
                        (ns, b"content") if ns == atom => {
                            let content_type = self.attr(&e, b"type");
                            entry.contents.push(Content {
                                content_type,
                                value: String::new(),
                            });
                        }
                        _ => {}
                    }
                }
                Event::End(_) => return Ok(entry),
                Event::Eof => return Err(ParseError::UnexpectedEof),
                _ => {}
            }
        }
    }

    fn atom_link(&self, e: &BytesStart<'_>) -> Option<Link> {
        Some(Link {
            href: self.attr(e, b"href")?,
            rel: self.attr(e, b"rel"),
            media_type: self.attr(e, b"type"),
        })
    }

    /// `rel="enclosure"` becomes an enclosure; the first alternate (or rel-less)
    /// link becomes the entry link. Other relations are ignored.
    fn entry_atom_link(&self, e: &BytesStart<'_>, entry: &mut SyndicationEntry) {
        let Some(link) = self.atom_link(e) else {
            return;
        };
        match link.rel.as_deref() {
            Some(rel) if rel.eq_ignore_ascii_case("enclosure") => {
                entry.enclosures.push(Enclosure {
                    url: Some(link.href),
                    media_type: link.media_type,
                    length: self.attr(e, b"length").and_then(|l| l.parse().ok()),
                });
            }
            None => {
                entry.link.get_or_insert(link.href);
            }
            Some(rel) if rel.eq_ignore_ascii_case("alternate") => {
                entry.link.get_or_insert(link.href);
            }
            Some(_) => {}
        }
    }

    /// Reads an Atom person construct, returning its name (or email as a fallback).
    fn atom_person(&mut self) -> Result<Option<String>, ParseError> {
        let mut name = None;
        let mut email = None;
        loop {
            match self.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"name" => name = non_empty(self.text()?),
                    b"email" => email = non_empty(self.text()?),
                    _ => self.skip(&e)?,
                },
                Event::End(_) => return Ok(name.or(email)),
                Event::Eof => return Err(ParseError::UnexpectedEof),
                _ => {}
            }
        }
    }
}

fn push_unescaped(out: &mut String, text: &BytesText<'_>) {
    match text.unescape_with(resolve_entity) {
        Ok(unescaped) => out.push_str(&unescaped),
        Err(e) => {
            tracing::debug!(error = %e, "Keeping text with unknown entity as written");
            out.push_str(&String::from_utf8_lossy(text));
        }
    }
}

/// XML builtins plus the HTML entities that show up most in hand-written feeds.
fn resolve_entity(name: &str) -> Option<&'static str> {
    let value = match name {
        "lt" => "<",
        "gt" => ">",
        "amp" => "&",
        "apos" => "'",
        "quot" => "\"",
        "nbsp" => "\u{a0}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "euro" => "\u{20ac}",
        _ => return None,
    };
    Some(value)
}

/// Atom xhtml constructs wrap their markup in a single `<div>`; drop it.
///
/// Markup made of several top-level elements is returned as is.
fn unwrap_xhtml_div(markup: &str) -> &str {
    if !markup.starts_with("<div") || !markup.ends_with("</div>") {
        return markup;
    }
    let Some(open_end) = markup.find('>') else {
        return markup;
    };
    let inner_end = markup.len() - "</div>".len();
    if open_end >= inner_end || markup[..open_end].ends_with('/') {
        return markup;
    }

    let inner = &markup[open_end + 1..inner_end];
    if div_closes_early(inner) {
        markup
    } else {
        inner.trim()
    }
}

/// Whether `inner` closes more `<div>`s than it opens, i.e. the wrapper
/// ended before the last `</div>`.
fn div_closes_early(inner: &str) -> bool {
    let mut depth = 0usize;
    let mut rest = inner;
    while let Some(pos) = rest.find('<') {
        rest = &rest[pos..];
        if let Some(after) = rest.strip_prefix("</div>") {
            match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return true,
            }
            rest = after;
        } else if rest
            .strip_prefix("<div")
            .is_some_and(|r| r.starts_with(|c: char| c == '>' || c == '/' || c.is_whitespace()))
        {
            let tag_end = rest.find('>').unwrap_or(rest.len());
            if !rest[..tag_end].ends_with('/') {
                depth += 1;
            }
            rest = &rest[tag_end..];
        } else {
            rest = &rest[1..];
        }
    }
    false
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

fn push_non_empty(list: &mut Vec<String>, value: String) {
    if !value.is_empty() {
        list.push(value);
    }
}

/// Parses the date formats found in real feeds.
///
/// Tries RFC 3339 and RFC 2822 first, then tolerant variants: any weekday
/// spelling, `Z`/`UTC` zones in RFC 2822 dates, missing seconds, and ISO dates
/// without an offset (taken as UTC).
pub(crate) fn parse_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let parsed = DateTime::parse_from_rfc3339(s)
        .ok()
        .or_else(|| DateTime::parse_from_rfc2822(s).ok())
        .or_else(|| parse_lenient_rfc2822(s))
        .or_else(|| parse_iso_variants(s));

    if parsed.is_none() {
        tracing::debug!(date = %s, "Unrecognized date format");
    }
    parsed
}

fn parse_lenient_rfc2822(s: &str) -> Option<DateTime<FixedOffset>> {
    let without_weekday = match s.split_once(',') {
        Some((_, rest)) => rest.trim(),
        None => s,
    };
    let (body, zone) = without_weekday.rsplit_once(' ')?;
    let zone = match zone {
        "Z" | "z" | "UT" | "UTC" | "utc" | "GMT" => "+0000",
        other => other,
    };
    let candidate = format!("{body} {zone}");

    DateTime::parse_from_rfc2822(&candidate)
        .ok()
        .or_else(|| DateTime::parse_from_str(&candidate, "%d %b %Y %H:%M:%S %z").ok())
        .or_else(|| DateTime::parse_from_str(&candidate, "%d %B %Y %H:%M:%S %z").ok())
        .or_else(|| DateTime::parse_from_str(&candidate, "%d %b %Y %H:%M %z").ok())
}

fn parse_iso_variants(s: &str) -> Option<DateTime<FixedOffset>> {
    const WITH_OFFSET: &[&str] = &[
        "%Y-%m-%dT%H:%M%:z",
        "%Y-%m-%dT%H:%M:%S%.f%z",
        "%Y-%m-%d %H:%M:%S%.f%:z",
        "%Y-%m-%d %H:%M:%S %z",
    ];
    const NAIVE: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

    for format in WITH_OFFSET {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    for format in NAIVE {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc().fixed_offset())
}
