//! Utility functions shared by the fetch, parse, and extraction layers.
//!
//! - **Text processing**: HTML to plain text, character-safe truncation,
//!   control-character stripping
//! - **URL handling**: scheme inference for bare feed URLs and resolution of
//!   relative links against a base
//!
//! # Examples
//!
//! ```
//! use feedsync::util::{html_to_plain_text, normalize_feed_url, truncate_chars};
//!
//! assert_eq!(normalize_feed_url("example.com/feed"), "http://example.com/feed");
//! assert_eq!(html_to_plain_text("<p>Hello <b>world</b></p>"), "Hello world");
//! assert_eq!(truncate_chars("héllo", 2), "hé");
//! ```

mod link;
mod text;

pub use link::{normalize_feed_url, resolve_absolute_url};
pub use text::{html_to_plain_text, strip_control_chars, truncate_chars, HtmlToText, ScraperText};
