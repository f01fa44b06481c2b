use std::time::Duration;

use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

use super::fetcher::{FeedSource, FetchClient, FetchError};
use super::model::SyndicationFeed;
use super::parser::{parse, ParseError};
use crate::util::{resolve_absolute_url, strip_control_chars};

const RSS_TYPE: &str = "application/rss+xml";
const ATOM_TYPE: &str = "application/atom+xml";
const JSON_FEED_TYPE: &str = "application/feed+json";

/// A feed advertised by an HTML page via `<link rel="alternate">`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternateLink {
    /// Absolute feed URL
    pub href: String,
    /// Lowercased `type` attribute
    pub media_type: String,
}

/// Which syndication format to pick when a page advertises several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FeedPreference {
    #[default]
    Atom,
    Rss,
}

impl FeedPreference {
    fn media_type(self) -> &'static str {
        match self {
            Self::Atom => ATOM_TYPE,
            Self::Rss => RSS_TYPE,
        }
    }
}

/// A feed found at, or advertised by, a URL.
#[derive(Debug, Clone)]
pub struct DiscoveredFeed {
    /// URL the feed document was fetched from
    pub feed_url: String,
    /// Feed title with control characters removed, if the feed has one
    pub title: Option<String>,
    pub feed: SyndicationFeed,
}

/// Errors that can occur during feed discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),
    /// The page advertised a feed but the linked document is not one
    #[error("Linked feed could not be parsed: {0}")]
    Parse(#[from] ParseError),
    /// The URL is neither a feed nor a page advertising one
    #[error("Not a feed: no RSS/Atom content found")]
    NotAFeed,
}

/// Discovers a feed from a URL.
///
/// Accepts either a direct feed URL or an HTML page URL. For HTML pages,
/// scans for `<link rel="alternate">` tags pointing to feeds, then fetches and
/// parses the one matching `preference` (or the first advertised feed).
///
/// # Errors
///
/// Returns [`DiscoveryError::Fetch`] if either request fails,
/// [`DiscoveryError::NotAFeed`] if the page has no usable feed link, and
/// [`DiscoveryError::Parse`] if the advertised feed does not parse.
pub async fn discover(
    client: &FetchClient,
    source: &FeedSource,
    preference: FeedPreference,
    timeout: Duration,
) -> Result<DiscoveredFeed, DiscoveryError> {
    let page = client.fetch(source, timeout).await?;

    // Try feed first, fall back to HTML scan
    if let Ok(feed) = parse(&page.bytes) {
        return Ok(discovered(page.url, feed));
    }

    let html = String::from_utf8_lossy(&page.bytes);
    let base = Url::parse(&page.url).ok();
    let links = find_feed_links(&html, base.as_ref());
    let link = pick_feed_link(&links, preference).ok_or(DiscoveryError::NotAFeed)?;

    tracing::debug!(page = %page.url, feed = %link.href, media_type = %link.media_type, "Found alternate feed link");

    let linked = FeedSource {
        url: link.href.clone(),
        tls: source.tls,
    };
    let fetched = client.fetch(&linked, timeout).await?;
    let feed = parse(&fetched.bytes)?;
    Ok(discovered(fetched.url, feed))
}

fn discovered(feed_url: String, feed: SyndicationFeed) -> DiscoveredFeed {
    // SEC-016: feed titles are attacker-controlled and end up on terminals
    let title = feed
        .title
        .as_deref()
        .map(|t| strip_control_chars(t).into_owned());
    DiscoveredFeed {
        feed_url,
        title,
        feed,
    }
}

/// Lists the feeds an HTML page advertises, in document order.
///
/// Matches `<link>` elements whose `rel` contains `alternate` and whose `type`
/// is RSS, Atom, or JSON Feed. Hrefs are resolved against `base`; links that
/// cannot be made absolute are dropped.
pub fn find_feed_links(html: &str, base: Option<&Url>) -> Vec<AlternateLink> {
    let Ok(selector) = Selector::parse("link[rel][type][href]") else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    document
        .select(&selector)
        .filter_map(|element| {
            let attrs = element.value();
            let rel = attrs.attr("rel")?;
            if !rel
                .split_ascii_whitespace()
                .any(|r| r.eq_ignore_ascii_case("alternate"))
            {
                return None;
            }

            let media_type = attrs.attr("type")?.trim().to_ascii_lowercase();
            if !matches!(media_type.as_str(), RSS_TYPE | ATOM_TYPE | JSON_FEED_TYPE) {
                return None;
            }

            let href = resolve_absolute_url(base, attrs.attr("href")?)?;
            Some(AlternateLink { href, media_type })
        })
        .collect()
}

/// The first link of the preferred format, else the first RSS or Atom link.
///
/// JSON Feed links are listed by [`find_feed_links`] but never picked, since
/// the parser handles XML formats only.
pub fn pick_feed_link(links: &[AlternateLink], preference: FeedPreference) -> Option<&AlternateLink> {
    links
        .iter()
        .find(|l| l.media_type == preference.media_type())
        .or_else(|| links.iter().find(|l| l.media_type != JSON_FEED_TYPE))
}
