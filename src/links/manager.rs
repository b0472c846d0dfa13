use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use super::{bounded_cache, bounded_store, CodeGenerator};
use crate::cache::{cache_ttl, LinkCache};
use crate::config::Config;
use crate::error::{LinkError, LinkResult};
use crate::models::{unix_now, CreateLink, Link, LinkDraft, LinkPatch, LinkStats};
use crate::stats::ClickAggregator;
use crate::storage::Storage;

pub const MAX_URL_LENGTH: usize = 2048;

/// Syntactic check of a redirect target. Reachability is never checked.
pub fn validate_url(raw: &str) -> LinkResult<()> {
    if raw.len() > MAX_URL_LENGTH {
        return Err(LinkError::InvalidUrl(format!(
            "url exceeds {MAX_URL_LENGTH} characters"
        )));
    }

    let parsed = Url::parse(raw).map_err(|e| LinkError::InvalidUrl(format!("{raw}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(LinkError::InvalidUrl(format!(
                "unsupported scheme '{other}', expected http or https"
            )))
        }
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(LinkError::InvalidUrl(format!("{raw}: missing host")));
    }

    Ok(())
}

fn validate_expiry(expires_at: i64, now: i64) -> LinkResult<()> {
    if expires_at <= now {
        return Err(LinkError::InvalidExpiry(format!(
            "expires_at {expires_at} is not in the future"
        )));
    }
    Ok(())
}

/// Create, update, delete and query links.
///
/// The store is written first; cache entries are evicted afterwards so a
/// concurrent reader can at worst repopulate from the new record.
pub struct LinkManager {
    storage: Arc<dyn Storage>,
    cache: Arc<dyn LinkCache>,
    clicks: Arc<ClickAggregator>,
    codes: CodeGenerator,
    anonymous_links_mutable: bool,
    search_max_limit: i64,
    max_cache_ttl: Duration,
    cache_timeout: Duration,
    store_timeout: Duration,
}

impl LinkManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        cache: Arc<dyn LinkCache>,
        clicks: Arc<ClickAggregator>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            storage,
            cache,
            clicks,
            codes: CodeGenerator::new(&config.codes, config.cache.store_timeout())?,
            anonymous_links_mutable: config.links.anonymous_links_mutable,
            search_max_limit: config.links.search_max_limit.max(1),
            max_cache_ttl: config.cache.max_ttl(),
            cache_timeout: config.cache.cache_timeout(),
            store_timeout: config.cache.store_timeout(),
        })
    }

    pub async fn create(&self, request: CreateLink) -> LinkResult<Link> {
        validate_url(&request.original_url)?;

        let clock = chrono::Utc::now();
        let now = clock.timestamp();
        if let Some(expires_at) = request.expires_at {
            validate_expiry(expires_at, now)?;
        }

        let draft = LinkDraft {
            original_url: request.original_url,
            owner_id: request.owner_id,
            created_at: now,
            expires_at: request.expires_at,
        };

        let link = self
            .codes
            .generate(self.storage.as_ref(), request.custom_alias.as_deref(), &draft)
            .await?;

        info!(code = %link.code, owner = ?link.owner_id, "created link");

        // Warm the cache; the link is already durable so failure only costs a miss
        if let Some(ttl) = cache_ttl(&link, clock.timestamp_millis(), self.max_cache_ttl) {
            if let Err(e) = bounded_cache(
                self.cache_timeout,
                self.cache.insert(&link.code, &link.original_url, ttl),
            )
            .await
            {
                warn!(code = %link.code, error = %e, "failed to warm cache for new link");
            }
        }

        Ok(link)
    }

    pub async fn update(
        &self,
        code: &str,
        patch: LinkPatch,
        requester: Option<&str>,
    ) -> LinkResult<Link> {
        if let Some(original_url) = &patch.original_url {
            validate_url(original_url)?;
        }
        if let Some(Some(expires_at)) = patch.expires_at {
            validate_expiry(expires_at, unix_now())?;
        }

        let existing = self.find(code).await?.ok_or(LinkError::NotFound)?;
        self.authorize(&existing, requester)?;

        if patch.is_empty() {
            return Ok(existing);
        }

        let updated = bounded_store(self.store_timeout, self.storage.update(code, &patch))
            .await?
            .ok_or(LinkError::NotFound)?;

        self.evict(code).await;
        info!(code = %code, "updated link");

        Ok(updated)
    }

    /// Remove a link without an ownership check. Returns whether a record existed.
    pub async fn delete(&self, code: &str) -> LinkResult<bool> {
        let removed = bounded_store(self.store_timeout, self.storage.delete(code)).await?;

        self.evict(code).await;
        self.clicks.forget(code);

        if removed {
            info!(code = %code, "deleted link");
        }
        Ok(removed)
    }

    /// Remove a link on behalf of `requester`. Deleting an absent link succeeds.
    pub async fn delete_as(&self, code: &str, requester: Option<&str>) -> LinkResult<bool> {
        let Some(existing) = self.find(code).await? else {
            return Ok(false);
        };
        self.authorize(&existing, requester)?;
        self.delete(code).await
    }

    pub async fn search(&self, original_url: &str, limit: i64, offset: i64) -> LinkResult<Vec<Link>> {
        let limit = limit.clamp(1, self.search_max_limit);
        let offset = offset.max(0);

        bounded_store(
            self.store_timeout,
            self.storage.find_by_original_url(original_url, limit, offset),
        )
        .await
    }

    pub async fn list_expired(&self) -> LinkResult<Vec<Link>> {
        self.list_expired_at(unix_now()).await
    }

    pub async fn list_expired_at(&self, now: i64) -> LinkResult<Vec<Link>> {
        bounded_store(self.store_timeout, self.storage.find_expired(now)).await
    }

    /// Links not accessed (or, if never accessed, created) within `threshold` of `now`.
    /// Clicks still buffered in memory count as accesses.
    pub async fn list_unused(&self, threshold: Duration, now: i64) -> LinkResult<Vec<Link>> {
        let threshold_secs = i64::try_from(threshold.as_secs()).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(threshold_secs);

        // Waits out any flush in progress, so no click is in flight between
        // the buffer and the store while candidates are read.
        self.clicks.flush().await;

        let candidates = bounded_store(
            self.store_timeout,
            self.storage.find_unused(threshold_secs, now),
        )
        .await?;

        Ok(candidates
            .into_iter()
            .filter(|link| {
                self.clicks
                    .buffered(&link.code)
                    .is_none_or(|pending| pending.last_accessed_at < cutoff)
            })
            .collect())
    }

    /// Counters for `code`, including clicks not yet flushed to the store
    pub async fn stats(&self, code: &str) -> LinkResult<LinkStats> {
        // Buffer first, so a flush racing this read can only over-count
        let pending = self.clicks.buffered(code);
        let link = self.find(code).await?.ok_or(LinkError::NotFound)?;

        let mut stats = LinkStats {
            code: link.code,
            click_count: link.click_count,
            created_at: link.created_at,
            last_accessed_at: link.last_accessed_at,
            expires_at: link.expires_at,
        };

        if let Some(pending) = pending {
            stats.click_count += pending.count as i64;
            stats.last_accessed_at = Some(
                stats
                    .last_accessed_at
                    .map_or(pending.last_accessed_at, |at| at.max(pending.last_accessed_at)),
            );
        }

        Ok(stats)
    }

    async fn find(&self, code: &str) -> LinkResult<Option<Link>> {
        bounded_store(self.store_timeout, self.storage.get(code)).await
    }

    fn authorize(&self, link: &Link, requester: Option<&str>) -> LinkResult<()> {
        match (link.owner_id.as_deref(), requester) {
            (Some(owner), Some(requester)) if owner == requester => Ok(()),
            (Some(_), _) => Err(LinkError::Forbidden),
            (None, _) if self.anonymous_links_mutable => Ok(()),
            (None, _) => Err(LinkError::Forbidden),
        }
    }

    async fn evict(&self, code: &str) {
        if let Err(e) = bounded_cache(self.cache_timeout, self.cache.remove(code)).await {
            warn!(code = %code, error = %e, "failed to evict cache entry");
        }
    }
}
