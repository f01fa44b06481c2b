use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use super::model::{SyndicationEntry, SyndicationFeed};
use crate::util::{resolve_absolute_url, truncate_chars, HtmlToText, ScraperText};

/// Maximum snippet length, in characters.
pub const SNIPPET_MAX_CHARS: usize = 200;

/// UI-ready fields derived from one feed entry.
///
/// `thumbnail_url`, `enclosure_url`, `self_link` and `link` are absolute URLs
/// or `None`; `snippet` holds at most [`SNIPPET_MAX_CHARS`] characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub id: String,
    pub title: String,
    pub plain_title: String,
    /// HTML as published
    pub description: String,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_date_iso8601: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enclosure_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

/// Derives [`NormalizedItem`] fields from parsed entries.
///
/// Every derivation is a pure function of the feed, the entry, and the base
/// URL used to absolutize links. HTML stripping goes through the injected
/// [`HtmlToText`] implementation.
#[derive(Debug, Clone)]
pub struct FieldExtractor<C = ScraperText> {
    base: Option<Url>,
    converter: C,
}

impl FieldExtractor {
    pub fn new(base: Option<Url>) -> Self {
        Self {
            base,
            converter: ScraperText,
        }
    }
}

impl<C: HtmlToText> FieldExtractor<C> {
    pub fn with_converter(base: Option<Url>, converter: C) -> Self {
        Self { base, converter }
    }

    pub fn base(&self) -> Option<&Url> {
        self.base.as_ref()
    }

    /// Applies every derivation to each entry of `feed`, in document order.
    pub fn normalize_feed(&self, feed: &SyndicationFeed) -> Vec<NormalizedItem> {
        feed.entries
            .iter()
            .map(|entry| self.normalize(feed, entry))
            .collect()
    }

    pub fn normalize(&self, feed: &SyndicationFeed, entry: &SyndicationEntry) -> NormalizedItem {
        let description = description(entry).to_owned();
        let link = entry.link.as_deref().and_then(|l| self.resolve(l));

        NormalizedItem {
            id: item_id(entry, link.as_deref()),
            title: title(entry).to_owned(),
            plain_title: self.plain_title(entry),
            snippet: self.snippet_of(&description),
            description,
            publish_date_iso8601: publish_date_iso8601(entry),
            thumbnail_url: self.thumbnail_url(entry),
            enclosure_url: self.first_enclosure_url(entry),
            self_link: self.self_link(feed),
            link,
            author: entry.authors.first().cloned(),
        }
    }

    pub fn plain_title(&self, entry: &SyndicationEntry) -> String {
        self.converter.html_to_plain_text(title(entry))
    }

    /// Plain text of the entry description, cut to [`SNIPPET_MAX_CHARS`].
    pub fn snippet(&self, entry: &SyndicationEntry) -> String {
        self.snippet_of(description(entry))
    }

    fn snippet_of(&self, description: &str) -> String {
        let plain = self.converter.html_to_plain_text(description);
        truncate_chars(&plain, SNIPPET_MAX_CHARS).to_owned()
    }

    pub fn first_enclosure_url(&self, entry: &SyndicationEntry) -> Option<String> {
        let url = entry.enclosures.first()?.url.as_deref()?;
        self.resolve(url)
    }

    /// First feed-level link with `rel="self"` (ASCII case-insensitive).
    pub fn self_link(&self, feed: &SyndicationFeed) -> Option<String> {
        let link = feed
            .links
            .iter()
            .find(|l| l.rel.as_deref().is_some_and(|r| r.eq_ignore_ascii_case("self")))?;
        self.resolve(&link.href)
    }

    /// Media RSS thumbnail: the first `media:thumbnail`, else the first
    /// `media:content` with `medium="image"`.
    pub fn thumbnail_url(&self, entry: &SyndicationEntry) -> Option<String> {
        let media = entry.media.as_ref()?;
        let url = match media.thumbnails.first() {
            Some(thumbnail) => thumbnail.as_str(),
            None => media
                .contents
                .iter()
                .find(|c| {
                    c.medium
                        .as_deref()
                        .is_some_and(|m| m.eq_ignore_ascii_case("image"))
                })?
                .url
                .as_deref()?,
        };
        self.resolve(url)
    }

    fn resolve(&self, link: &str) -> Option<String> {
        resolve_absolute_url(self.base.as_ref(), link)
    }
}

/// Picks the base URL for resolving relative links: the feed's self link when
/// it is absolute, otherwise the URL the document was fetched from.
pub fn base_url_for(feed: &SyndicationFeed, fetched_url: &str) -> Option<Url> {
    feed.links
        .iter()
        .filter(|l| l.rel.as_deref().is_some_and(|r| r.eq_ignore_ascii_case("self")))
        .find_map(|l| Url::parse(l.href.trim()).ok())
        .or_else(|| Url::parse(fetched_url).ok())
}

pub fn title(entry: &SyndicationEntry) -> &str {
    entry.title.as_deref().unwrap_or("")
}

/// The entry body as HTML.
///
/// With content blocks: the first `html`/`xhtml` block, or the first block
/// when none is HTML. Without: the RSS description, or `""`.
pub fn description(entry: &SyndicationEntry) -> &str {
    match entry.contents.first() {
        Some(first) => entry
            .contents
            .iter()
            .find(|c| c.is_html())
            .unwrap_or(first)
            .value
            .as_str(),
        None => entry.description.as_deref().unwrap_or(""),
    }
}

/// Published date, falling back to the updated date, as UTC RFC 3339 with
/// millisecond precision.
pub fn publish_date_iso8601(entry: &SyndicationEntry) -> Option<String> {
    entry.published.or(entry.updated).map(|d| to_iso8601(&d))
}

fn to_iso8601(date: &DateTime<FixedOffset>) -> String {
    date.with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Stable item identifier: the entry id, then the resolved link, then a hash.
fn item_id(entry: &SyndicationEntry, resolved_link: Option<&str>) -> String {
    if let Some(id) = entry.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        return id.to_owned();
    }
    if let Some(link) = resolved_link {
        return link.to_owned();
    }

    let input = format!(
        "{}|{}|{}",
        entry.link.as_deref().unwrap_or(""),
        title(entry),
        entry
            .published
            .map(|p| p.timestamp().to_string())
            .unwrap_or_default()
    );
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::model::{Content, Enclosure, Link, MediaContent, MediaExtension};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn base() -> Url {
        Url::parse("https://example.com/feed/").unwrap()
    }

    fn extractor() -> FieldExtractor {
        FieldExtractor::new(Some(base()))
    }

    fn image(url: &str) -> MediaContent {
        MediaContent {
            medium: Some("IMAGE".into()),
            url: Some(url.into()),
        }
    }

    #[test]
    fn test_title_defaults_to_empty() {
        let entry = SyndicationEntry::default();
        assert_eq!(title(&entry), "");
        assert_eq!(extractor().plain_title(&entry), "");
    }

    #[test]
    fn test_plain_title_strips_html() {
        let entry = SyndicationEntry {
            title: Some("Breaking: <b>Rust</b> &amp; more".into()),
            ..Default::default()
        };
        assert_eq!(extractor().plain_title(&entry), "Breaking: Rust & more");
    }

    #[test]
    fn test_description_prefers_html_block() {
        let entry = SyndicationEntry {
            contents: vec![
                Content::new(Some("text"), "plain first"),
                Content::new(Some("HTML"), "<p>rich</p>"),
            ],
            description: Some("rss description".into()),
            ..Default::default()
        };
        assert_eq!(description(&entry), "<p>rich</p>");
    }

    #[test]
    fn test_description_first_html_block_wins() {
        let entry = SyndicationEntry {
            contents: vec![
                Content::new(Some("xhtml"), "<p>first</p>"),
                Content::new(Some("html"), "<p>second</p>"),
            ],
            ..Default::default()
        };
        assert_eq!(description(&entry), "<p>first</p>");
    }

    #[test]
    fn test_description_falls_back_to_first_block() {
        let entry = SyndicationEntry {
            contents: vec![
                Content::new(Some("text"), "one"),
                Content::new(None, "two"),
            ],
            ..Default::default()
        };
        assert_eq!(description(&entry), "one");
    }

    #[test]
    fn test_description_without_contents() {
        let with_rss = SyndicationEntry {
            description: Some("from rss".into()),
            ..Default::default()
        };
        assert_eq!(description(&with_rss), "from rss");
        assert_eq!(description(&SyndicationEntry::default()), "");
    }

    #[test]
    fn test_snippet_truncates_to_200_chars() {
        let entry = SyndicationEntry {
            description: Some("a".repeat(500)),
            ..Default::default()
        };
        let snippet = extractor().snippet(&entry);
        assert_eq!(snippet.chars().count(), 200);
    }

    #[test]
    fn test_snippet_is_plain_text() {
        let entry = SyndicationEntry {
            description: Some("<p>Hello <em>there</em></p><script>x()</script>".into()),
            ..Default::default()
        };
        assert_eq!(extractor().snippet(&entry), "Hello there");
    }

    #[test]
    fn test_publish_date_prefers_published() {
        let published = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 2, 4, 4, 5)
            .unwrap();
        let updated = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap().fixed_offset();
        let entry = SyndicationEntry {
            published: Some(published),
            updated: Some(updated),
            ..Default::default()
        };
        assert_eq!(
            publish_date_iso8601(&entry).as_deref(),
            Some("2024-01-02T03:04:05.000Z")
        );
    }

    #[test]
    fn test_publish_date_falls_back_to_updated() {
        let updated = Utc.with_ymd_and_hms(2024, 6, 7, 8, 9, 10).unwrap().fixed_offset();
        let entry = SyndicationEntry {
            updated: Some(updated),
            ..Default::default()
        };
        assert_eq!(
            publish_date_iso8601(&entry).as_deref(),
            Some("2024-06-07T08:09:10.000Z")
        );
        assert_eq!(publish_date_iso8601(&SyndicationEntry::default()), None);
    }

    #[test]
    fn test_first_enclosure_url() {
        let ex = extractor();
        assert_eq!(ex.first_enclosure_url(&SyndicationEntry::default()), None);

        let no_url = SyndicationEntry {
            enclosures: vec![
                Enclosure::default(),
                Enclosure {
                    url: Some("https://example.com/b.mp3".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert_eq!(ex.first_enclosure_url(&no_url), None);

        let relative = SyndicationEntry {
            enclosures: vec![Enclosure {
                url: Some("audio/a.mp3".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(
            ex.first_enclosure_url(&relative).as_deref(),
            Some("https://example.com/feed/audio/a.mp3")
        );
    }

    #[test]
    fn test_self_link_case_insensitive() {
        let feed = SyndicationFeed {
            links: vec![
                Link {
                    href: "https://example.com/".into(),
                    rel: Some("alternate".into()),
                    media_type: None,
                },
                Link {
                    href: "/feed.xml".into(),
                    rel: Some("SELF".into()),
                    media_type: None,
                },
            ],
            ..Default::default()
        };
        assert_eq!(
            extractor().self_link(&feed).as_deref(),
            Some("https://example.com/feed.xml")
        );
        assert_eq!(extractor().self_link(&SyndicationFeed::default()), None);
    }

    #[test]
    fn test_thumbnail_absent_without_media() {
        assert_eq!(extractor().thumbnail_url(&SyndicationEntry::default()), None);
    }

    #[test]
    fn test_thumbnail_beats_image_content() {
        let entry = SyndicationEntry {
            media: Some(MediaExtension {
                thumbnails: vec!["thumbs/t.jpg".into()],
                contents: vec![image("https://cdn.example.com/big.jpg")],
            }),
            ..Default::default()
        };
        assert_eq!(
            extractor().thumbnail_url(&entry).as_deref(),
            Some("https://example.com/feed/thumbs/t.jpg")
        );
    }

    #[test]
    fn test_thumbnail_from_first_image_content() {
        let entry = SyndicationEntry {
            media: Some(MediaExtension {
                thumbnails: vec![],
                contents: vec![
                    MediaContent {
                        medium: Some("video".into()),
                        url: Some("https://cdn.example.com/v.mp4".into()),
                    },
                    image("https://cdn.example.com/1.jpg"),
                    image("https://cdn.example.com/2.jpg"),
                ],
            }),
            ..Default::default()
        };
        assert_eq!(
            extractor().thumbnail_url(&entry).as_deref(),
            Some("https://cdn.example.com/1.jpg")
        );
    }

    #[test]
    fn test_relative_thumbnail_without_base_is_dropped() {
        let entry = SyndicationEntry {
            media: Some(MediaExtension {
                thumbnails: vec!["t.jpg".into()],
                contents: vec![],
            }),
            ..Default::default()
        };
        assert_eq!(FieldExtractor::new(None).thumbnail_url(&entry), None);
    }

    #[test]
    fn test_base_url_prefers_absolute_self_link() {
        let mut feed = SyndicationFeed {
            links: vec![Link {
                href: "https://canonical.example.org/rss".into(),
                rel: Some("self".into()),
                media_type: None,
            }],
            ..Default::default()
        };
        assert_eq!(
            base_url_for(&feed, "http://mirror.example.net/rss").map(String::from).as_deref(),
            Some("https://canonical.example.org/rss")
        );

        feed.links[0].href = "/rss".into();
        assert_eq!(
            base_url_for(&feed, "http://mirror.example.net/rss").map(String::from).as_deref(),
            Some("http://mirror.example.net/rss")
        );
    }

    #[test]
    fn test_item_id_fallbacks() {
        let with_id = SyndicationEntry {
            id: Some("  guid-1 ".into()),
            link: Some("https://example.com/a".into()),
            ..Default::default()
        };
        assert_eq!(extractor().normalize(&SyndicationFeed::default(), &with_id).id, "guid-1");

        let with_link = SyndicationEntry {
            id: Some("   ".into()),
            link: Some("/a".into()),
            ..Default::default()
        };
        assert_eq!(
            extractor().normalize(&SyndicationFeed::default(), &with_link).id,
            "https://example.com/a"
        );

        let bare = SyndicationEntry {
            title: Some("Only a title".into()),
            ..Default::default()
        };
        let id = FieldExtractor::new(None)
            .normalize(&SyndicationFeed::default(), &bare)
            .id;
        assert_eq!(id.len(), 64);
        assert_eq!(
            id,
            FieldExtractor::new(None)
                .normalize(&SyndicationFeed::default(), &bare)
                .id
        );
    }

    #[test]
    fn test_normalize_feed_end_to_end() {
        let feed = SyndicationFeed {
            links: vec![Link {
                href: "https://example.com/feed.xml".into(),
                rel: Some("self".into()),
                media_type: None,
            }],
            authors: vec!["Feed Author".into()],
            entries: vec![SyndicationEntry {
                id: Some("1".into()),
                title: Some("Hello &amp; welcome".into()),
                link: Some("/posts/1".into()),
                description: Some("<p>Body</p>".into()),
                authors: vec!["Alice".into()],
                ..Default::default()
            }],
            ..Default::default()
        };
        let items = extractor().normalize_feed(&feed);

        assert_eq!(
            items,
            vec![NormalizedItem {
                id: "1".into(),
                title: "Hello &amp; welcome".into(),
                plain_title: "Hello & welcome".into(),
                description: "<p>Body</p>".into(),
                snippet: "Body".into(),
                publish_date_iso8601: None,
                thumbnail_url: None,
                enclosure_url: None,
                self_link: Some("https://example.com/feed.xml".into()),
                link: Some("https://example.com/posts/1".into()),
                author: Some("Alice".into()),
            }]
        );
    }

    #[test]
    fn test_custom_converter_is_used() {
        struct Shouty;
        impl HtmlToText for Shouty {
            fn html_to_plain_text(&self, html: &str) -> String {
                html.to_uppercase()
            }
        }

        let entry = SyndicationEntry {
            title: Some("quiet".into()),
            ..Default::default()
        };
        let ex = FieldExtractor::with_converter(None, Shouty);
        assert_eq!(ex.plain_title(&entry), "QUIET");
    }

    proptest! {
        #[test]
        fn snippet_never_exceeds_limit(text in "\\PC{0,600}") {
            let entry = SyndicationEntry {
                description: Some(text),
                ..Default::default()
            };
            let snippet = extractor().snippet(&entry);
            prop_assert!(snippet.chars().count() <= SNIPPET_MAX_CHARS);
        }
    }
}
