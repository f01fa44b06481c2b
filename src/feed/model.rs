//! Format-neutral syndication model produced by [`parse`](super::parse).
//!
//! RSS 0.9x/2.0, RSS 1.0 and Atom all map onto these types. Values are kept
//! as written in the document (no HTML stripping, no URL resolution); the
//! derivations live in [`extract`](super::extract).

use chrono::{DateTime, FixedOffset};

/// A parsed feed document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyndicationFeed {
    /// Channel/feed title, if present
    pub title: Option<String>,
    /// Feed-level links in document order (alternate, self, hub, ...)
    pub links: Vec<Link>,
    /// Feed-level author names in document order
    pub authors: Vec<String>,
    /// Entries in document order
    pub entries: Vec<SyndicationEntry>,
}

impl SyndicationFeed {
    /// Gives every author-less entry a copy of the feed-level author list.
    ///
    /// Entries that already name an author are left untouched; nothing is merged.
    pub fn inherit_feed_authors(&mut self) {
        let authors = &self.authors;
        for entry in self.entries.iter_mut().filter(|e| e.authors.is_empty()) {
            entry.authors = authors.clone();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Link {
    pub href: String,
    /// Link relation (`self`, `alternate`, `hub`, ...); `None` when not given
    pub rel: Option<String>,
    pub media_type: Option<String>,
}

/// One content block of an entry (Atom `<content>`, RSS `<content:encoded>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    /// Declared type (`html`, `xhtml`, `text`, or a MIME type); `None` when not given
    pub content_type: Option<String>,
    pub value: String,
}

impl Content {
    pub fn new(content_type: Option<&str>, value: impl Into<String>) -> Self {
        Self {
            content_type: content_type.map(str::to_owned),
            value: value.into(),
        }
    }

    /// `true` for `html` and `xhtml` blocks (ASCII case-insensitive).
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("html") || t.eq_ignore_ascii_case("xhtml"))
    }
}

/// A single feed item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyndicationEntry {
    /// RSS `<guid>` / Atom `<id>`
    pub id: Option<String>,
    pub title: Option<String>,
    /// RSS `<link>` / Atom alternate link, as written
    pub link: Option<String>,
    pub contents: Vec<Content>,
    /// RSS `<description>` / Atom `<summary>`
    pub description: Option<String>,
    pub authors: Vec<String>,
    pub published: Option<DateTime<FixedOffset>>,
    pub updated: Option<DateTime<FixedOffset>>,
    pub enclosures: Vec<Enclosure>,
    /// Media RSS (`media:` namespace) data, present only when the entry uses it
    pub media: Option<MediaExtension>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enclosure {
    pub url: Option<String>,
    pub media_type: Option<String>,
    pub length: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaExtension {
    /// `media:thumbnail` URLs in document order
    pub thumbnails: Vec<String>,
    /// `media:content` elements in document order
    pub contents: Vec<MediaContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaContent {
    /// `medium` attribute (`image`, `video`, `audio`, ...)
    pub medium: Option<String>,
    pub url: Option<String>,
}
