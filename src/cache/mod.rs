//! Fast, volatile code -> URL mappings for the redirect path.
//!
//! The cache never holds link data the durable store does not have. Every entry
//! carries its own expiry, derived from the link's remaining lifetime and capped
//! by `max_ttl`, so a warm entry can never outlive the link it mirrors.

pub mod memory;
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::models::Link;

pub use self::memory::MokaLinkCache;
pub use self::redis::RedisLinkCache;

/// A cached mapping together with the time it has left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub original_url: String,
    pub remaining_ttl: Duration,
}

impl CacheEntry {
    pub fn is_live(&self) -> bool {
        !self.remaining_ttl.is_zero()
    }
}

#[async_trait]
pub trait LinkCache: Send + Sync {
    async fn get(&self, code: &str) -> Result<Option<CacheEntry>>;

    async fn insert(&self, code: &str, original_url: &str, ttl: Duration) -> Result<()>;

    async fn remove(&self, code: &str) -> Result<()>;
}

/// TTL to populate the cache with for `link`, or `None` if it must not be cached.
///
/// Links without an expiry get `max_ttl`; others get whatever is smaller of their
/// remaining life and `max_ttl`.
pub fn cache_ttl(link: &Link, now_millis: i64, max_ttl: Duration) -> Option<Duration> {
    let Some(expires_at) = link.expires_at else {
        return Some(max_ttl);
    };

    let remaining_ms = expires_at.saturating_mul(1000).saturating_sub(now_millis);
    if remaining_ms <= 0 {
        return None;
    }

    Some(Duration::from_millis(remaining_ms as u64).min(max_ttl))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(expires_at: Option<i64>) -> Link {
        Link {
            code: "abc1234".to_string(),
            original_url: "https://example.com".to_string(),
            owner_id: None,
            created_at: 0,
            expires_at,
            last_accessed_at: None,
            click_count: 0,
        }
    }

    #[test]
    fn test_ttl_without_expiry_uses_cap() {
        let max = Duration::from_secs(300);
        assert_eq!(cache_ttl(&link(None), 1_000_000, max), Some(max));
    }

    #[test]
    fn test_ttl_bounded_by_remaining_life() {
        let max = Duration::from_secs(300);
        // expires 10s after "now"
        let ttl = cache_ttl(&link(Some(1_010)), 1_000_000, max);
        assert_eq!(ttl, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_ttl_bounded_by_cap() {
        let max = Duration::from_secs(60);
        let ttl = cache_ttl(&link(Some(100_000)), 1_000_000, max);
        assert_eq!(ttl, Some(max));
    }

    #[test]
    fn test_expired_link_is_not_cached() {
        let max = Duration::from_secs(60);
        assert_eq!(cache_ttl(&link(Some(1_000)), 1_000_000, max), None);
        assert_eq!(cache_ttl(&link(Some(999)), 1_000_000, max), None);
    }
}
