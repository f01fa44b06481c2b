use url::Url;

/// Infers a scheme for a bare feed URL.
///
/// Anything that does not start with `http://` or `https://` (ASCII
/// case-insensitive) gets `http://` prepended. Surrounding whitespace is trimmed.
///
/// # Examples
///
/// ```
/// use feedsync::util::normalize_feed_url;
///
/// assert_eq!(normalize_feed_url("example.com/rss"), "http://example.com/rss");
/// assert_eq!(normalize_feed_url("https://example.com/rss"), "https://example.com/rss");
/// ```
pub fn normalize_feed_url(url: &str) -> String {
    let trimmed = url.trim();
    if has_http_scheme(trimmed) {
        trimmed.to_owned()
    } else {
        format!("http://{trimmed}")
    }
}

fn has_http_scheme(url: &str) -> bool {
    let starts_with = |prefix: &str| {
        url.as_bytes()
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix.as_bytes()))
    };
    starts_with("http://") || starts_with("https://")
}

/// Resolves a possibly relative link into an absolute URL.
///
/// - Absolute links are returned in normalized form
/// - Protocol-relative links (`//host/path`) take the base scheme, or `https` without a base
/// - Relative links are joined onto `base`
///
/// Returns `None` for empty links and for relative links that cannot be
/// resolved (no base, or the join fails), so callers never see a relative URL.
///
/// # Examples
///
/// ```
/// use feedsync::util::resolve_absolute_url;
/// use url::Url;
///
/// let base = Url::parse("https://example.com/blog/feed.xml").unwrap();
/// assert_eq!(
///     resolve_absolute_url(Some(&base), "../img/a.png").as_deref(),
///     Some("https://example.com/img/a.png")
/// );
/// assert_eq!(resolve_absolute_url(None, "img/a.png"), None);
/// ```
pub fn resolve_absolute_url(base: Option<&Url>, link: &str) -> Option<String> {
    let link = link.trim();
    if link.is_empty() {
        return None;
    }

    match Url::parse(link) {
        Ok(absolute) => Some(absolute.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => base.join(link).ok().map(|u| u.to_string()),
            // SEC-014: Protocol-relative; the URL parser normalizes it and rejects credential tricks
            None if link.starts_with("//") => {
                Url::parse(&format!("https:{link}")).ok().map(|u| u.to_string())
            }
            None => None,
        },
        Err(e) => {
            tracing::debug!(link = %link, error = %e, "Dropping unparseable link");
            None
        }
    }
}
