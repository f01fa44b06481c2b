//! Feed ingestion core: cached RSS/Atom fetching, item normalization, and
//! snapshot deltas for keyed record sets.

pub mod config;
pub mod delta;
pub mod feed;
pub mod util;
