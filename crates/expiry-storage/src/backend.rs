//! Content cache traits

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode, header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

use crate::error::StorageError;

/// Obsolete `Date` formats HTTP recipients must still accept
const RFC850_FORMAT: &str = "%A, %d-%b-%y %H:%M:%S GMT";
const ASCTIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Options controlling how a request URL is matched against stored entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchOptions {
    /// Compare URLs without their query string
    pub ignore_search: bool,
    /// Accepted for compatibility; the provided backends only store GETs
    pub ignore_method: bool,
    /// Accepted for compatibility; the provided backends do not track `Vary`
    pub ignore_vary: bool,
}

/// A response held in a content cache
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// The `Date` header as milliseconds since the Unix epoch
    ///
    /// Accepts IMF-fixdate (and any RFC 2822 date), RFC 850 and asctime.
    /// Returns `None` when the header is missing or cannot be parsed.
    pub fn date(&self) -> Option<i64> {
        let value = self.headers.get(header::DATE)?.to_str().ok()?.trim();
        if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(value) {
            return Some(dt.timestamp_millis());
        }
        [RFC850_FORMAT, ASCTIME_FORMAT]
            .iter()
            .find_map(|format| chrono::NaiveDateTime::parse_from_str(value, format).ok())
            .map(|dt| dt.and_utc().timestamp_millis())
    }
}

/// A single named cache of URL-keyed responses
#[async_trait]
pub trait ContentCache: Send + Sync {
    /// Find the first response stored for `url`
    async fn match_url(
        &self,
        url: &str,
        options: &MatchOptions,
    ) -> Result<Option<CachedResponse>, StorageError>;

    /// Store a response for `url`, replacing any previous one
    async fn put(&self, url: &str, response: CachedResponse) -> Result<(), StorageError>;

    /// Delete every response matching `url`; returns whether any was removed
    async fn delete(&self, url: &str, options: &MatchOptions) -> Result<bool, StorageError>;

    /// List stored URLs, optionally only those matching `url`
    async fn keys(
        &self,
        url: Option<&str>,
        options: &MatchOptions,
    ) -> Result<Vec<String>, StorageError>;
}

/// The set of named content caches
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a cache by name, creating it if it does not exist
    async fn open(&self, name: &str) -> Result<Arc<dyn ContentCache>, StorageError>;

    /// Delete a cache and all of its entries; returns whether it existed
    async fn delete(&self, name: &str) -> Result<bool, StorageError>;

    /// Check if a cache exists
    async fn has(&self, name: &str) -> Result<bool, StorageError>;

    /// Names of all existing caches
    async fn cache_names(&self) -> Result<Vec<String>, StorageError>;
}

/// Canonical key for a request URL
///
/// Resolves `url` against `base` when one is given and drops the fragment,
/// matching how the timestamp index identifies URLs. Input that does not
/// parse only loses its fragment.
pub fn cache_key(base: Option<&Url>, url: &str) -> String {
    let parsed = match base {
        Some(base) => base.join(url),
        None => Url::parse(url),
    };
    match parsed {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.into()
        }
        Err(_) => url.split('#').next().unwrap_or(url).to_string(),
    }
}

/// Compare a stored URL against a requested one under `options`
///
/// Both sides are expected to be [`cache_key`]s.
pub fn urls_match(stored: &str, requested: &str, options: &MatchOptions) -> bool {
    if options.ignore_search {
        strip_search(stored) == strip_search(requested)
    } else {
        stored == requested
    }
}

fn strip_search(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Reject cache names no backend can store
pub fn validate_cache_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() {
        return Err(StorageError::InvalidCacheName(
            "cache name must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn response_with_date(date: Option<&str>) -> CachedResponse {
        let mut headers = HeaderMap::new();
        if let Some(date) = date {
            headers.insert(header::DATE, HeaderValue::from_str(date).unwrap());
        }
        CachedResponse::new(StatusCode::OK, headers, Bytes::from_static(b"x"))
    }

    #[test]
    fn test_date_header() {
        let response = response_with_date(Some("Thu, 01 Jan 1970 00:01:00 GMT"));
        assert_eq!(response.date(), Some(60_000));

        assert_eq!(response_with_date(None).date(), None);
        assert_eq!(response_with_date(Some("yesterday")).date(), None);
    }

    #[test]
    fn test_obsolete_date_formats() {
        let imf = response_with_date(Some("Sun, 06 Nov 1994 08:49:37 GMT"));
        let rfc850 = response_with_date(Some("Sunday, 06-Nov-94 08:49:37 GMT"));
        let asctime = response_with_date(Some("Sun Nov  6 08:49:37 1994"));

        assert_eq!(imf.date(), Some(784_111_777_000));
        assert_eq!(rfc850.date(), imf.date());
        assert_eq!(asctime.date(), imf.date());
    }

    #[test]
    fn test_cache_key() {
        let base = Url::parse("https://example.com/app/").unwrap();

        assert_eq!(cache_key(None, "https://example.com/a#top"), "https://example.com/a");
        assert_eq!(cache_key(Some(&base), "img.png#x"), "https://example.com/app/img.png");
        assert_eq!(cache_key(Some(&base), "/a?v=1"), "https://example.com/a?v=1");
        assert_eq!(cache_key(None, "relative#frag"), "relative");
        assert_eq!(
            cache_key(None, &cache_key(None, "https://example.com/a?q#f")),
            "https://example.com/a?q"
        );
    }

    #[test]
    fn test_urls_match() {
        let exact = MatchOptions::default();
        let ignore = MatchOptions {
            ignore_search: true,
            ..Default::default()
        };

        assert!(urls_match("https://e.com/a", "https://e.com/a", &exact));
        assert!(!urls_match("https://e.com/a?v=1", "https://e.com/a", &exact));
        assert!(urls_match("https://e.com/a?v=1", "https://e.com/a?v=2", &ignore));
        assert!(!urls_match("https://e.com/a?v=1", "https://e.com/b", &ignore));
    }

    #[test]
    fn test_match_options_deserialize() {
        let options: MatchOptions = serde_json::from_str(r#"{"ignore_search": true}"#).unwrap();
        assert!(options.ignore_search);
        assert!(!options.ignore_vary);
    }
}
