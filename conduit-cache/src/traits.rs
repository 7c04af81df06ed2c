//! Cache statistics and diagnostic entry descriptions.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::key::HandleKey;

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from an existing entry.
    pub hits: u64,
    /// Lookups that found no entry and ran the factory.
    pub misses: u64,
    /// Lookups that skipped the cache because the scheme opted out.
    ///
    /// Counted by the provider; a bare [`HandleCache`](crate::HandleCache)
    /// always reports zero.
    pub bypasses: u64,
    /// Successful constructions stored in the cache.
    pub constructions: u64,
    /// Factory calls that failed on a miss.
    pub construction_failures: u64,
    /// Number of entries currently in the cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0) over cached lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Description of one cached entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub key: HandleKey,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    constructions: AtomicU64,
    construction_failures: AtomicU64,
    entries: AtomicU64,
}

impl StatCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn constructed(&self) {
        self.constructions.fetch_add(1, Ordering::Relaxed);
        self.entries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn construction_failed(&self) {
        self.construction_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn removed(&self) {
        self.entries.fetch_sub(1, Ordering::Relaxed);
    }

    /// Bypasses never reach the cache, so they are reported as zero here.
    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            bypasses: 0,
            constructions: self.constructions.load(Ordering::Relaxed),
            construction_failures: self.construction_failures.load(Ordering::Relaxed),
            entry_count: self.entries.load(Ordering::Relaxed),
        }
    }
}
