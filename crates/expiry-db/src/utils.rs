//! Shared utility functions

use url::Url;

use crate::error::DbError;

/// Separator between cache name and URL in derived entry ids
const ID_SEPARATOR: char = '|';

/// Normalize a request URL for use as an index key
///
/// Relative URLs are resolved against `base` and the fragment is removed.
/// The query string is kept, so `/a?v=1` and `/a?v=2` are tracked separately.
/// Normalizing an already-normalized URL returns it unchanged.
///
/// # Examples
///
/// ```
/// use expiry_db::{Url, normalize_url};
///
/// let base = Url::parse("https://example.com/app/").unwrap();
/// assert_eq!(
///     normalize_url(&base, "img.png?v=2#top").unwrap(),
///     "https://example.com/app/img.png?v=2"
/// );
/// ```
pub fn normalize_url(base: &Url, url: &str) -> Result<String, DbError> {
    let mut parsed = base
        .join(url)
        .map_err(|e| DbError::InvalidUrl(format!("{}: {}", url, e)))?;
    parsed.set_fragment(None);
    Ok(parsed.into())
}

/// Derive the physical key for a `(cache_name, url)` pair
pub fn entry_id(cache_name: &str, normalized_url: &str) -> String {
    format!("{}{}{}", cache_name, ID_SEPARATOR, normalized_url)
}
