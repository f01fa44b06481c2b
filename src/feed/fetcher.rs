use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use reqwest::header::{CACHE_CONTROL, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::OnceCell;

use super::cache::{CacheControl, CachedResponse, ResponseCache, DEFAULT_CACHE_SIZE_BYTES};
use crate::util::normalize_feed_url;

/// Response bodies above this size are rejected (10 MiB).
pub const MAX_FEED_SIZE: usize = 10 * 1024 * 1024;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_REDIRECTS: usize = 10;

/// Errors that can occur while fetching a feed document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, redirects, etc.)
    #[error("Request failed: {0}")]
    Network(reqwest::Error),
    /// HTTP response with a non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Connect, read, or overall request deadline exceeded
    #[error("Request timed out")]
    Timeout {
        /// The per-call deadline, when that is what ran out
        deadline: Option<Duration>,
        /// The connect or read timeout reported by the HTTP client
        #[source]
        source: Option<reqwest::Error>,
    },
    /// Response body exceeded the 10 MiB limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// HTTP client or response cache could not be constructed
    #[error("Fetch client initialization failed: {0}")]
    Init(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                deadline: None,
                source: Some(e),
            }
        } else {
            Self::Network(e)
        }
    }
}

/// Certificate handling for one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsPolicy {
    #[default]
    Verify,
    /// Accept any certificate and host name. Only for sources the user explicitly marked.
    TrustAll,
}

/// A feed location plus its TLS policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub url: String,
    pub tls: TlsPolicy,
}

impl FeedSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tls: TlsPolicy::Verify,
        }
    }

    pub fn trust_all(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tls: TlsPolicy::TrustAll,
        }
    }
}

/// Where a fetched body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOrigin {
    /// Fresh cache entry, no request made
    Cache,
    /// Full response from the server
    Network,
    /// Server answered 304; cached body reused
    Revalidated,
}

#[derive(Debug, Clone)]
pub struct Fetched {
    /// The URL actually requested (after scheme inference)
    pub url: String,
    pub bytes: Vec<u8>,
    pub origin: ResponseOrigin,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Directory for the response cache; `None` disables caching
    pub cache_dir: Option<PathBuf>,
    pub cache_size_bytes: u64,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Hosts always fetched with certificate verification disabled
    pub insecure_hosts: Vec<String>,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            cache_size_bytes: DEFAULT_CACHE_SIZE_BYTES,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            insecure_hosts: Vec::new(),
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

/// HTTP client for feed documents with an on-disk response cache.
///
/// Cheap to clone; clones share connection pools and the cache. The
/// certificate-ignoring client is only built the first time a source needs it.
#[derive(Clone)]
pub struct FetchClient {
    inner: Arc<Inner>,
}

struct Inner {
    strict: reqwest::Client,
    trust_all: OnceCell<reqwest::Client>,
    cache: Option<ResponseCache>,
    config: FetchConfig,
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient")
            .field("config", &self.inner.config)
            .field("cache", &self.inner.cache.is_some())
            .field("trust_all_built", &self.inner.trust_all.initialized())
            .finish()
    }
}

impl FetchClient {
    /// Builds the verifying HTTP client and opens the response cache.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Init`] if the TLS backend cannot be initialized
    /// or the cache database cannot be opened.
    pub async fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let strict = build_http_client(&config, false)?;
        let cache = match &config.cache_dir {
            Some(dir) => Some(
                ResponseCache::open(dir, config.cache_size_bytes)
                    .await
                    .map_err(|e| FetchError::Init(e.to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                strict,
                trust_all: OnceCell::new(),
                cache,
                config,
            }),
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.inner.cache.as_ref()
    }

    /// Fetches a feed document.
    ///
    /// A URL without `http://` or `https://` is fetched over `http://`. A fresh
    /// cached body is returned without touching the network; a stale one is
    /// revalidated with `If-None-Match`/`If-Modified-Since`.
    ///
    /// `timeout` bounds the whole call, including the cache lookup and body
    /// download. Connect and read timeouts from [`FetchConfig`] apply as well.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Timeout`] - any deadline exceeded
    /// - [`FetchError::HttpStatus`] - non-2xx response
    /// - [`FetchError::ResponseTooLarge`] - body over 10 MiB
    /// - [`FetchError::Network`] - connection, TLS, or redirect failure
    ///
    /// Cache failures are logged and never surface as errors. Bodies fetched
    /// without certificate verification are cached apart from verified ones.
    pub async fn fetch(&self, source: &FeedSource, timeout: Duration) -> Result<Fetched, FetchError> {
        let url = normalize_feed_url(&source.url);
        match tokio::time::timeout(timeout, self.fetch_url(&url, source.tls)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(url = %url, timeout_ms = timeout.as_millis() as u64, "Fetch deadline exceeded");
                Err(FetchError::Timeout {
                    deadline: Some(timeout),
                    source: None,
                })
            }
        }
    }

    async fn fetch_url(&self, url: &str, tls: TlsPolicy) -> Result<Fetched, FetchError> {
        let verified = tls == TlsPolicy::Verify && !self.is_insecure_host(url);
        let client = self.client_for(url, verified).await?;
        let key = cache_key(url, verified);
        let cached = self.cached(&key).await;

        if let Some(entry) = &cached {
            if entry.is_fresh(Utc::now().timestamp()) {
                tracing::debug!(url = %url, origin = ?ResponseOrigin::Cache, "Fetched feed");
                return Ok(Fetched {
                    url: url.to_owned(),
                    bytes: entry.body.clone(),
                    origin: ResponseOrigin::Cache,
                });
            }
        }

        let mut request = client.get(url);
        if let Some(entry) = &cached {
            if let Some(etag) = &entry.etag {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = &entry.last_modified {
                request = request.header(IF_MODIFIED_SINCE, last_modified);
            }
        }

        let response = request.send().await?;
        let status = response.status();
        let control = header_str(&response, CACHE_CONTROL)
            .map(CacheControl::parse)
            .unwrap_or_default();
        let now = Utc::now().timestamp();

        if status == StatusCode::NOT_MODIFIED {
            if let Some(entry) = cached.filter(CachedResponse::has_validators) {
                if let Some(cache) = &self.inner.cache {
                    if let Err(e) = cache.refresh(&key, control.expires_at(now)).await {
                        tracing::warn!(url = %url, error = %e, "Failed to refresh cache entry");
                    }
                }
                tracing::debug!(url = %url, origin = ?ResponseOrigin::Revalidated, "Fetched feed");
                return Ok(Fetched {
                    url: url.to_owned(),
                    bytes: entry.body,
                    origin: ResponseOrigin::Revalidated,
                });
            }
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let etag = header_str(&response, ETAG).map(str::to_owned);
        let last_modified = header_str(&response, LAST_MODIFIED).map(str::to_owned);
        let body = read_limited_bytes(response, MAX_FEED_SIZE).await?;

        let entry = CachedResponse {
            body,
            etag,
            last_modified,
            expires_at: control.expires_at(now),
        };
        if let Some(cache) = &self.inner.cache {
            // Bodies that can be neither served fresh nor revalidated only take space
            let stored = if control.no_store || !entry.is_reusable() {
                cache.remove(&key).await
            } else {
                cache.store(&key, &entry).await
            };
            if let Err(e) = stored {
                tracing::warn!(url = %url, error = %e, "Failed to update response cache");
            }
        }

        tracing::debug!(
            url = %url,
            origin = ?ResponseOrigin::Network,
            bytes = entry.body.len(),
            "Fetched feed"
        );
        Ok(Fetched {
            url: url.to_owned(),
            bytes: entry.body,
            origin: ResponseOrigin::Network,
        })
    }

    async fn cached(&self, url: &str) -> Option<CachedResponse> {
        let cache = self.inner.cache.as_ref()?;
        match cache.get(url).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Response cache lookup failed");
                None
            }
        }
    }

    async fn client_for(&self, url: &str, verified: bool) -> Result<&reqwest::Client, FetchError> {
        if verified {
            return Ok(&self.inner.strict);
        }

        tracing::warn!(url = %url, "Fetching with certificate verification disabled");
        self.inner
            .trust_all
            .get_or_try_init(|| async { build_http_client(&self.inner.config, true) })
            .await
    }

    fn is_insecure_host(&self, url: &str) -> bool {
        let insecure = &self.inner.config.insecure_hosts;
        if insecure.is_empty() {
            return false;
        }
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .is_some_and(|host| insecure.iter().any(|h| h.eq_ignore_ascii_case(&host)))
    }
}

/// A [`FetchClient`] built on first use and shared afterwards.
///
/// Concurrent first callers wait on a single construction. If construction
/// fails, that caller gets the error and the next call tries again.
#[derive(Debug)]
pub struct SharedFetchClient {
    config: FetchConfig,
    client: OnceCell<FetchClient>,
}

impl SharedFetchClient {
    pub fn new(config: FetchConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<&FetchClient, FetchError> {
        self.client
            .get_or_try_init(|| FetchClient::new(self.config.clone()))
            .await
    }
}

/// Response cache key. Unverified fetches get their own namespace so a body
/// fetched without TLS checks is never served to a verified fetch.
fn cache_key(url: &str, verified: bool) -> Cow<'_, str> {
    if verified {
        Cow::Borrowed(url)
    } else {
        Cow::Owned(format!("unverified {url}"))
    }
}

fn build_http_client(config: &FetchConfig, trust_all: bool) -> Result<reqwest::Client, FetchError> {
    let mut builder = reqwest::Client::builder()
        .redirect(redirect_policy())
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout)
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .user_agent(config.user_agent.as_str());
    if trust_all {
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder.build().map_err(|e| FetchError::Init(e.to_string()))
}

fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

fn header_str(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<&str> {
    response.headers().get(name)?.to_str().ok()
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: Content-Length already over the limit
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
