//! Expiration policy
//!
//! Pure victim selection over a snapshot of the timestamp index. Keeping this
//! separate from the scan means the index is never mutated while it is being
//! walked: the store reads a snapshot, asks this module which rows to drop,
//! and only then deletes them.

use crate::models::TimestampEntry;

/// Age threshold for a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cutoff {
    /// No age-based eviction
    #[default]
    Disabled,
    /// Evict entries whose timestamp is strictly below this value (ms)
    OlderThan(i64),
    /// Evict every entry regardless of age or count
    Everything,
}

impl Cutoff {
    /// Build a cutoff from a minimum timestamp; zero or below disables it
    pub fn from_millis(min_timestamp: i64) -> Self {
        if min_timestamp <= 0 {
            Cutoff::Disabled
        } else {
            Cutoff::OlderThan(min_timestamp)
        }
    }

    /// Whether an entry with this timestamp falls below the threshold
    pub fn is_expired(&self, timestamp: i64) -> bool {
        match self {
            Cutoff::Disabled => false,
            Cutoff::OlderThan(min) => timestamp < *min,
            Cutoff::Everything => true,
        }
    }
}

/// Select the entries to evict from a newest-first snapshot
///
/// An entry is a victim when it is older than `cutoff`, or when `max_count`
/// entries have already been kept. Entries that survive count toward the
/// kept total, so count-based eviction never touches the `max_count` most
/// recent survivors. A `max_count` of zero disables count-based eviction.
///
/// Returns indices into `snapshot`, in snapshot order.
pub fn select_expired(
    snapshot: &[TimestampEntry],
    cutoff: Cutoff,
    max_count: Option<usize>,
) -> Vec<usize> {
    let max_count = max_count.filter(|&n| n > 0);
    let mut kept = 0usize;
    let mut victims = Vec::new();

    for (index, entry) in snapshot.iter().enumerate() {
        let over_count = max_count.is_some_and(|max| kept >= max);
        if cutoff.is_expired(entry.timestamp) || over_count {
            victims.push(index);
        } else {
            kept += 1;
        }
    }

    victims
}
