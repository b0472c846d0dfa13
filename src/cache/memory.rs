use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use moka::policy::Expiry;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::cache::{CacheEntry, LinkCache};

#[derive(Debug, Clone)]
struct CachedTarget {
    original_url: String,
    deadline: Instant,
}

/// Expires each entry at the deadline computed when it was written
struct DeadlineExpiry;

impl Expiry<String, CachedTarget> for DeadlineExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedTarget,
        created_at: Instant,
    ) -> Option<Duration> {
        Some(value.deadline.saturating_duration_since(created_at))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedTarget,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        // An overwrite carries a freshly computed TTL; never keep the old one.
        Some(value.deadline.saturating_duration_since(updated_at))
    }
}

/// In-process cache backed by moka
pub struct MokaLinkCache {
    inner: Cache<String, CachedTarget>,
}

impl MokaLinkCache {
    pub fn new(max_entries: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(DeadlineExpiry)
            .build();

        debug!(max_entries, "moka link cache initialized");
        Self { inner }
    }
}

#[async_trait]
impl LinkCache for MokaLinkCache {
    async fn get(&self, code: &str) -> Result<Option<CacheEntry>> {
        let Some(target) = self.inner.get(code).await else {
            return Ok(None);
        };

        let remaining_ttl = target.deadline.saturating_duration_since(Instant::now());
        if remaining_ttl.is_zero() {
            return Ok(None);
        }

        Ok(Some(CacheEntry {
            original_url: target.original_url,
            remaining_ttl,
        }))
    }

    async fn insert(&self, code: &str, original_url: &str, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            self.inner.invalidate(code).await;
            return Ok(());
        }

        let target = CachedTarget {
            original_url: original_url.to_string(),
            deadline: Instant::now() + ttl,
        };
        self.inner.insert(code.to_string(), target).await;
        Ok(())
    }

    async fn remove(&self, code: &str) -> Result<()> {
        self.inner.invalidate(code).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_get() {
        let cache = MokaLinkCache::new(100);
        cache
            .insert("abc", "https://example.com", Duration::from_secs(60))
            .await
            .unwrap();

        let entry = cache.get("abc").await.unwrap().expect("entry should be cached");
        assert_eq!(entry.original_url, "https://example.com");
        assert!(entry.is_live());
        assert!(entry.remaining_ttl <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_entry_expires_with_its_own_ttl() {
        let cache = MokaLinkCache::new(100);
        cache
            .insert("short", "https://example.com", Duration::from_millis(50))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get("short").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_ttl() {
        let cache = MokaLinkCache::new(100);
        cache
            .insert("code", "https://old.example.com", Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .insert("code", "https://new.example.com", Duration::from_millis(50))
            .await
            .unwrap();

        let entry = cache.get("code").await.unwrap().unwrap();
        assert_eq!(entry.original_url, "https://new.example.com");

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get("code").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let cache = MokaLinkCache::new(100);
        cache
            .insert("gone", "https://example.com", Duration::from_secs(60))
            .await
            .unwrap();
        cache.remove("gone").await.unwrap();
        assert!(cache.get("gone").await.unwrap().is_none());

        // removing again is fine
        cache.remove("gone").await.unwrap();
    }
}
