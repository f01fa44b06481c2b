use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use super::extract::{base_url_for, FieldExtractor, NormalizedItem};
use super::fetcher::{FeedSource, FetchClient, FetchError, ResponseOrigin};
use super::parser::{parse, ParseError};
use crate::util::strip_control_chars;

/// Feeds fetched at the same time by [`ingest_all`].
const MAX_CONCURRENT_FETCHES: usize = 10;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

/// The normalized items of one feed, ready for the UI or persistence layer.
#[derive(Debug, Clone, Serialize)]
pub struct IngestedFeed {
    /// URL the document was fetched from
    pub source_url: String,
    pub title: Option<String>,
    pub items: Vec<NormalizedItem>,
    #[serde(skip)]
    pub origin: ResponseOrigin,
}

/// Fetches, parses, and normalizes one feed.
///
/// Relative links are resolved against the feed's self link when it is
/// absolute, otherwise against the fetched URL.
///
/// # Errors
///
/// Returns [`IngestError::Fetch`] or [`IngestError::Parse`]; a failed fetch is
/// not retried.
pub async fn ingest(
    client: &FetchClient,
    source: &FeedSource,
    timeout: Duration,
) -> Result<IngestedFeed, IngestError> {
    let fetched = client.fetch(source, timeout).await?;
    let feed = parse(&fetched.bytes)?;

    let extractor = FieldExtractor::new(base_url_for(&feed, &fetched.url));
    let items = extractor.normalize_feed(&feed);

    tracing::debug!(
        url = %fetched.url,
        origin = ?fetched.origin,
        items = items.len(),
        "Ingested feed"
    );

    Ok(IngestedFeed {
        title: feed
            .title
            .as_deref()
            .map(|t| strip_control_chars(t).into_owned()),
        source_url: fetched.url,
        items,
        origin: fetched.origin,
    })
}

/// Ingests many feeds concurrently with progress reporting.
///
/// At most 10 feeds are in flight at once. Results are returned in
/// completion order, each paired with its source; one failing feed never
/// affects the others. When `progress_tx` is given, a `(completed, total)`
/// tuple is sent after every feed.
pub async fn ingest_all(
    client: &FetchClient,
    sources: Arc<Vec<FeedSource>>,
    timeout: Duration,
    progress_tx: Option<mpsc::Sender<(usize, usize)>>,
) -> Vec<(FeedSource, Result<IngestedFeed, IngestError>)> {
    if sources.is_empty() {
        return Vec::new();
    }

    let total = sources.len();
    let completed = Arc::new(AtomicUsize::new(0));

    stream::iter(sources.iter().cloned())
        .map(|source| {
            let client = client.clone();
            let progress_tx = progress_tx.clone();
            let completed = completed.clone();

            async move {
                let result = ingest(&client, &source, timeout).await;
                if let Err(e) = &result {
                    tracing::warn!(url = %source.url, error = %e, "Feed ingest failed");
                }

                let done = completed.fetch_add(1, Ordering::Relaxed).saturating_add(1);
                if let Some(tx) = progress_tx {
                    if let Err(e) = tx.send((done, total)).await {
                        tracing::warn!(error = %e, done, total, "Progress channel send failed (receiver dropped)");
                    }
                }

                (source, result)
            }
        })
        .buffer_unordered(MAX_CONCURRENT_FETCHES)
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::fetcher::FetchConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(10);

    const RSS: &str = r#"<rss version="2.0"><channel>
        <title>Mock Feed</title>
        <item><guid>a</guid><title>A</title><link>/posts/a</link></item>
        <item><guid>b</guid><title>B</title></item>
    </channel></rss>"#;

    async fn client() -> FetchClient {
        FetchClient::new(FetchConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_ingest_resolves_against_fetched_url() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blog/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&mock_server)
            .await;

        let url = format!("{}/blog/rss", mock_server.uri());
        let ingested = ingest(&client().await, &FeedSource::new(&url), TIMEOUT)
            .await
            .unwrap();

        assert_eq!(ingested.source_url, url);
        assert_eq!(ingested.title.as_deref(), Some("Mock Feed"));
        assert_eq!(ingested.items.len(), 2);
        assert_eq!(
            ingested.items[0].link.as_deref(),
            Some(format!("{}/posts/a", mock_server.uri()).as_str())
        );
        assert_eq!(ingested.origin, ResponseOrigin::Network);
    }

    #[tokio::test]
    async fn test_ingest_parse_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss><channel>"))
            .mount(&mock_server)
            .await;

        let result = ingest(&client().await, &FeedSource::new(mock_server.uri()), TIMEOUT).await;
        assert!(matches!(result, Err(IngestError::Parse(_))));
    }

    #[tokio::test]
    async fn test_ingest_all_reports_progress_and_isolates_failures() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&mock_server)
            .await;

        let sources = Arc::new(vec![
            FeedSource::new(format!("{}/ok", mock_server.uri())),
            FeedSource::new(format!("{}/gone", mock_server.uri())),
        ]);
        let (tx, mut rx) = mpsc::channel(8);

        let results = ingest_all(&client().await, sources, TIMEOUT, Some(tx)).await;

        assert_eq!(results.len(), 2);
        let ok = results.iter().find(|(s, _)| s.url.ends_with("/ok")).unwrap();
        assert_eq!(ok.1.as_ref().unwrap().items.len(), 2);
        let gone = results.iter().find(|(s, _)| s.url.ends_with("/gone")).unwrap();
        assert!(matches!(
            gone.1,
            Err(IngestError::Fetch(FetchError::HttpStatus(410)))
        ));

        let mut progress = Vec::new();
        while let Ok(update) = rx.try_recv() {
            progress.push(update);
        }
        assert_eq!(progress, vec![(1, 2), (2, 2)]);
    }

    #[tokio::test]
    async fn test_ingest_all_empty() {
        let results = ingest_all(&client().await, Arc::new(Vec::new()), TIMEOUT, None).await;
        assert!(results.is_empty());
    }
}
