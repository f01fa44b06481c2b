//! Feed ingestion: fetching, parsing, and field extraction.
//!
//! - **Fetching**: HTTP retrieval with an on-disk response cache, bounded
//!   timeouts, and per-source opt-in to unverified TLS
//! - **Parsing**: RSS 0.9x/2.0, RSS 1.0 (RDF) and Atom into one model
//! - **Extraction**: UI-ready fields (plain title, snippet, dates, absolute URLs)
//! - **Discovery**: finding the feed advertised by an HTML page
//!
//! # Architecture
//!
//! - [`fetcher`] - [`FetchClient`], a pair of reqwest clients plus [`cache`]
//! - [`parser`] - quick-xml event parser producing [`SyndicationFeed`]
//! - [`extract`] - [`FieldExtractor`] deriving [`NormalizedItem`]s
//! - [`discovery`] - `<link rel="alternate">` lookup
//! - [`ingest`] - fetch → parse → normalize in one call
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use feedsync::feed::{ingest, FeedSource, FetchClient, FetchConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = FetchClient::new(FetchConfig::default()).await?;
//! let feed = ingest(&client, &FeedSource::new("example.com/rss"), Duration::from_secs(30)).await?;
//! for item in &feed.items {
//!     println!("{} {}", item.plain_title, item.snippet);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod discovery;
pub mod extract;
pub mod fetcher;
pub mod ingest;
pub mod model;
pub mod parser;

pub use cache::{CacheError, ResponseCache};
pub use discovery::{
    discover, find_feed_links, pick_feed_link, AlternateLink, DiscoveredFeed, DiscoveryError,
    FeedPreference,
};
pub use extract::{base_url_for, FieldExtractor, NormalizedItem, SNIPPET_MAX_CHARS};
pub use fetcher::{
    FeedSource, FetchClient, FetchConfig, FetchError, Fetched, ResponseOrigin, SharedFetchClient,
    TlsPolicy,
};
pub use ingest::{ingest, ingest_all, IngestError, IngestedFeed};
pub use model::{
    Content, Enclosure, Link, MediaContent, MediaExtension, SyndicationEntry, SyndicationFeed,
};
pub use parser::{parse, ParseError};
