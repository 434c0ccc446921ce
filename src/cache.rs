//! Snapshot cache of the last successful market data fetch

use crate::{
    constants::{CACHE_EXPIRY_SECS, MARKET_DATA_CACHE_KEY},
    error::StorageError,
    storage::KeyValueStore,
    types::Quote,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Persisted form of a cached snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// When the snapshot was saved (epoch milliseconds)
    pub timestamp: i64,
    pub data: Vec<Quote>,
}

impl CacheEntry {
    fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.timestamp
    }
}

/// Best-effort quote cache on top of a [`KeyValueStore`]
///
/// Never fails: write errors are logged, read errors count as a miss.
#[derive(Clone)]
pub struct QuoteCache {
    store: Arc<dyn KeyValueStore>,
    key: String,
    expiry: Duration,
}

impl QuoteCache {
    /// Creates a cache with the default key and expiry
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_expiry(store, Duration::from_secs(CACHE_EXPIRY_SECS))
    }

    pub fn with_expiry(store: Arc<dyn KeyValueStore>, expiry: Duration) -> Self {
        Self {
            store,
            key: MARKET_DATA_CACHE_KEY.to_string(),
            expiry,
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Saves `quotes` as the current snapshot, overwriting any previous one
    pub async fn save(&self, quotes: &[Quote]) {
        if let Err(e) = self.try_save(quotes).await {
            tracing::warn!(error = %e, key = %self.key, "Failed to save market data to cache");
        }
    }

    async fn try_save(&self, quotes: &[Quote]) -> Result<(), StorageError> {
        let entry = CacheEntry {
            timestamp: Utc::now().timestamp_millis(),
            data: quotes.to_vec(),
        };
        let json = serde_json::to_string(&entry)?;
        self.store.set(&self.key, &json).await?;
        tracing::debug!(count = quotes.len(), "Cached market data");
        Ok(())
    }

    /// Loads the cached snapshot
    ///
    /// Returns `None` when nothing is stored, the entry cannot be read, or it
    /// has expired and `ignore_expiry` is false.
    pub async fn load(&self, ignore_expiry: bool) -> Option<Vec<Quote>> {
        let entry = match self.read_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, key = %self.key, "Failed to load market data from cache");
                return None;
            }
        };

        let age_ms = entry.age_ms(Utc::now().timestamp_millis());
        if ignore_expiry || age_ms < self.expiry.as_millis() as i64 {
            tracing::debug!(age_ms, ignore_expiry, "Cache hit");
            Some(entry.data)
        } else {
            tracing::debug!(age_ms, "Cache entry expired");
            None
        }
    }

    async fn read_entry(&self) -> Result<Option<CacheEntry>, StorageError> {
        match self.store.get(&self.key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Drops the cached snapshot
    pub async fn clear(&self) {
        if let Err(e) = self.store.remove(&self.key).await {
            tracing::warn!(error = %e, key = %self.key, "Failed to clear market data cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{mock::FailingStore, MemoryStore};

    fn sample() -> Vec<Quote> {
        vec![
            Quote::new("bitcoin", "btc", "Bitcoin", 64000.0, 1.5, "btc.png"),
            Quote::new("ethereum", "eth", "Ethereum", 3100.0, -0.4, "eth.png"),
        ]
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let cache = QuoteCache::new(Arc::new(MemoryStore::new()));
        assert_eq!(cache.load(false).await, None);

        cache.save(&sample()).await;
        assert_eq!(cache.load(false).await, Some(sample()));
        assert_eq!(cache.load(true).await, Some(sample()));
    }

    #[tokio::test]
    async fn test_expired_entry_only_served_when_ignoring_expiry() {
        let store = Arc::new(MemoryStore::new());
        let entry = CacheEntry {
            timestamp: Utc::now().timestamp_millis() - 31 * 60 * 1000,
            data: sample(),
        };
        store
            .set(MARKET_DATA_CACHE_KEY, &serde_json::to_string(&entry).unwrap())
            .await
            .unwrap();

        let cache = QuoteCache::new(store);
        assert_eq!(cache.load(false).await, None);
        assert_eq!(cache.load(true).await, Some(sample()));
    }

    #[tokio::test]
    async fn test_save_overwrites_previous_snapshot() {
        let cache = QuoteCache::new(Arc::new(MemoryStore::new()));
        cache.save(&sample()).await;

        let newer = vec![Quote::new("solana", "sol", "Solana", 150.0, 3.0, "sol.png")];
        cache.save(&newer).await;
        assert_eq!(cache.load(false).await, Some(newer));
    }

    #[tokio::test]
    async fn test_corrupt_entry_reads_as_miss() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(MARKET_DATA_CACHE_KEY, "{not json")
            .await
            .unwrap();

        let cache = QuoteCache::new(store);
        assert_eq!(cache.load(true).await, None);
    }

    #[tokio::test]
    async fn test_broken_store_is_swallowed() {
        let cache = QuoteCache::new(Arc::new(FailingStore));
        cache.save(&sample()).await;
        assert_eq!(cache.load(true).await, None);
        cache.clear().await;
    }

    #[tokio::test]
    async fn test_clear_removes_snapshot() {
        let cache = QuoteCache::new(Arc::new(MemoryStore::new()));
        cache.save(&sample()).await;
        cache.clear().await;
        assert_eq!(cache.load(true).await, None);
    }
}
