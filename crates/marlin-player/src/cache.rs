//! Expiring key-value cache used for resume records and content links.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Bucket holding resume records.
pub const COMMON_BUCKET: &str = "common";
/// Bucket holding `content id -> info-hash` links.
pub const LINKS_BUCKET: &str = "links";

/// Bucketed cache with per-entry expiry.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Fetch a live entry.
    async fn get(&self, bucket: &str, key: &str) -> anyhow::Result<Option<Value>>;

    /// Insert or replace an entry that expires after `ttl`.
    async fn set(&self, bucket: &str, key: &str, ttl: Duration, value: Value)
    -> anyhow::Result<()>;

    /// Remove an entry; missing keys are not an error.
    async fn delete(&self, bucket: &str, key: &str) -> anyhow::Result<()>;
}

/// In-process cache backed by a hash map.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<(String, String), (Value, Instant)>>,
}

impl MemoryCache {
    /// Construct an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries across all buckets.
    pub async fn live_entries(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn get(&self, bucket: &str, key: &str) -> anyhow::Result<Option<Value>> {
        let mut entries = self.entries.lock().await;
        let id = (bucket.to_string(), key.to_string());
        match entries.get(&id) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(&id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
        value: Value,
    ) -> anyhow::Result<()> {
        let expires = Instant::now() + ttl;
        self.entries
            .lock()
            .await
            .insert((bucket.to_string(), key.to_string()), (value, expires));
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> anyhow::Result<()> {
        self.entries
            .lock()
            .await
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}
