//! Expiration configuration

use expiry_storage::MatchOptions;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CoreError;

/// Eviction limits applied to every cache a plugin manages
///
/// At least one of `max_entries` and `max_age_seconds` should be set,
/// otherwise nothing is ever evicted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpirationConfig {
    /// Keep at most this many entries per cache; zero means unlimited
    #[serde(default)]
    pub max_entries: Option<usize>,
    /// Evict entries not confirmed fresh within this many seconds
    #[serde(default)]
    pub max_age_seconds: Option<u64>,
    /// Passed to the content cache when deleting expired entries
    #[serde(default)]
    pub match_options: MatchOptions,
    /// Purge every managed cache when storage quota is exceeded
    #[serde(default)]
    pub purge_on_quota_error: bool,
}

impl ExpirationConfig {
    /// Check the limits, warning when they can have no effect
    pub fn validate(&self) -> Result<(), CoreError> {
        self.check_limits()?;
        if self.max_entries().is_none() && self.max_age_seconds.is_none() {
            warn!("Neither max_entries nor max_age_seconds is set; nothing will be expired");
        }
        Ok(())
    }

    /// Reject limits that can never be satisfied, without logging
    pub fn check_limits(&self) -> Result<(), CoreError> {
        if self.max_age_seconds == Some(0) {
            return Err(CoreError::InvalidConfiguration(
                "max_age_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The count limit, treating zero as unset
    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries.filter(|&n| n > 0)
    }

    /// The age limit in milliseconds
    pub fn max_age_millis(&self) -> Option<i64> {
        self.max_age_seconds
            .map(|secs| i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000))
    }
}
