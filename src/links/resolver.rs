use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{bounded_cache, bounded_store};
use crate::cache::{cache_ttl, LinkCache};
use crate::config::CacheConfig;
use crate::error::{LinkError, LinkResult};
use crate::stats::{ClickAggregator, ClickEvent};
use crate::storage::Storage;

/// Outcome of a successful lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub original_url: String,
    pub cache_hit: bool,
}

/// Read path of a redirect: cache first, then the store.
///
/// The cache is an accelerator only. Any cache error or timeout degrades to a
/// store lookup; only store failures reach the caller.
pub struct LinkResolver {
    storage: Arc<dyn Storage>,
    cache: Arc<dyn LinkCache>,
    clicks: Arc<ClickAggregator>,
    max_cache_ttl: Duration,
    cache_timeout: Duration,
    store_timeout: Duration,
}

impl LinkResolver {
    pub fn new(
        storage: Arc<dyn Storage>,
        cache: Arc<dyn LinkCache>,
        clicks: Arc<ClickAggregator>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            storage,
            cache,
            clicks,
            max_cache_ttl: config.max_ttl(),
            cache_timeout: config.cache_timeout(),
            store_timeout: config.store_timeout(),
        }
    }

    pub async fn resolve(&self, code: &str) -> LinkResult<Resolution> {
        let resolution = match self.lookup_cache(code).await {
            Some(original_url) => Resolution {
                original_url,
                cache_hit: true,
            },
            None => Resolution {
                original_url: self.lookup_store(code).await?,
                cache_hit: false,
            },
        };

        self.clicks.record(ClickEvent::now(code)).await;

        Ok(resolution)
    }

    async fn lookup_cache(&self, code: &str) -> Option<String> {
        match bounded_cache(self.cache_timeout, self.cache.get(code)).await {
            Ok(Some(entry)) if entry.is_live() => Some(entry.original_url),
            Ok(_) => None,
            Err(e) => {
                warn!(code = %code, error = %e, "cache lookup failed, falling back to store");
                None
            }
        }
    }

    async fn lookup_store(&self, code: &str) -> LinkResult<String> {
        let link = bounded_store(self.store_timeout, self.storage.get(code))
            .await?
            .ok_or(LinkError::NotFound)?;

        let now = chrono::Utc::now();
        if link.is_expired_at(now.timestamp()) {
            debug!(code = %code, "link expired, purging");
            self.spawn_purge(code.to_string());
            return Err(LinkError::Expired);
        }

        if let Some(ttl) = cache_ttl(&link, now.timestamp_millis(), self.max_cache_ttl) {
            if let Err(e) = bounded_cache(
                self.cache_timeout,
                self.cache.insert(code, &link.original_url, ttl),
            )
            .await
            {
                warn!(code = %code, error = %e, "failed to populate cache");
            }
        }

        Ok(link.original_url)
    }

    fn spawn_purge(&self, code: String) {
        let storage = Arc::clone(&self.storage);
        let cache = Arc::clone(&self.cache);
        let store_timeout = self.store_timeout;
        let cache_timeout = self.cache_timeout;

        tokio::spawn(async move {
            if let Err(e) = bounded_store(store_timeout, storage.delete(&code)).await {
                warn!(code = %code, error = %e, "failed to purge expired link");
            }
            if let Err(e) = bounded_cache(cache_timeout, cache.remove(&code)).await {
                warn!(code = %code, error = %e, "failed to evict expired link from cache");
            }
        });
    }
}
