//! Wiring of the link components into one running engine.

use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use tracing::info;

use crate::api::{create_router, AppState};
use crate::auth::{AccountService, AuthService};
use crate::cache::{LinkCache, MokaLinkCache, RedisLinkCache};
use crate::config::{CacheBackend, Config, DatabaseBackend};
use crate::links::{LinkManager, LinkResolver};
use crate::reclaim::{ReclaimHandle, Reclaimer};
use crate::stats::ClickAggregator;
use crate::storage::{PostgresStorage, SqliteStorage, Storage};

pub struct Engine {
    pub config: Config,
    pub storage: Arc<dyn Storage>,
    pub cache: Arc<dyn LinkCache>,
    pub clicks: Arc<ClickAggregator>,
    pub manager: Arc<LinkManager>,
    pub resolver: Arc<LinkResolver>,
    pub reclaimer: Arc<Reclaimer>,
}

impl Engine {
    /// Open the configured store and cache, then assemble the engine
    pub async fn connect(config: Config) -> Result<Self> {
        let storage: Arc<dyn Storage> = match config.database.backend {
            DatabaseBackend::Sqlite => {
                info!("Using SQLite storage: {}", config.database.url);
                Arc::new(
                    SqliteStorage::new(&config.database.url, config.database.max_connections)
                        .await?,
                )
            }
            DatabaseBackend::Postgres => {
                info!("Using PostgreSQL storage");
                Arc::new(
                    PostgresStorage::new(&config.database.url, config.database.max_connections)
                        .await?,
                )
            }
        };

        info!("Initializing database...");
        storage.init().await.context("failed to initialize database")?;

        let cache: Arc<dyn LinkCache> = match config.cache.backend {
            CacheBackend::Memory => {
                info!(max_entries = config.cache.max_entries, "Using in-memory cache");
                Arc::new(MokaLinkCache::new(config.cache.max_entries))
            }
            CacheBackend::Redis => {
                let url = config
                    .cache
                    .redis_url
                    .as_deref()
                    .context("REDIS_URL must be set when CACHE_BACKEND=redis")?;
                info!("Using Redis cache");
                Arc::new(RedisLinkCache::new(url, &config.cache.redis_key_prefix)?)
            }
        };

        Self::from_parts(config, storage, cache)
    }

    /// Assemble the engine around an already initialized store and cache.
    /// Must run inside a Tokio runtime: the click flusher is spawned here.
    pub fn from_parts(
        config: Config,
        storage: Arc<dyn Storage>,
        cache: Arc<dyn LinkCache>,
    ) -> Result<Self> {
        let clicks = Arc::new(ClickAggregator::new(
            Arc::clone(&storage),
            &config.clicks,
            config.cache.store_timeout(),
        ));

        let manager = Arc::new(LinkManager::new(
            Arc::clone(&storage),
            Arc::clone(&cache),
            Arc::clone(&clicks),
            &config,
        )?);

        let resolver = Arc::new(LinkResolver::new(
            Arc::clone(&storage),
            Arc::clone(&cache),
            Arc::clone(&clicks),
            &config.cache,
        ));

        let reclaimer = Arc::new(Reclaimer::new(
            Arc::clone(&manager),
            config.reclaim.unused_threshold(),
        ));

        Ok(Self {
            config,
            storage,
            cache,
            clicks,
            manager,
            resolver,
            reclaimer,
        })
    }

    /// HTTP router over this engine
    pub fn router(&self) -> Result<Router> {
        let auth_service = Arc::new(AuthService::new(&self.config.auth)?);
        let accounts = auth_service.jwt().map(|jwt| {
            Arc::new(AccountService::new(
                Arc::clone(&self.storage),
                jwt,
                self.config.cache.store_timeout(),
            ))
        });
        let state = Arc::new(AppState {
            manager: Arc::clone(&self.manager),
            resolver: Arc::clone(&self.resolver),
            accounts,
        });
        Ok(create_router(state, auth_service))
    }

    /// Start the reclamation schedule: one pass now, then every interval
    pub fn start_reclaimer(&self) -> ReclaimHandle {
        Arc::clone(&self.reclaimer).spawn(self.config.reclaim.interval())
    }

    /// Flush buffered clicks, bounded by the configured shutdown timeout
    pub async fn shutdown(&self) -> bool {
        self.clicks
            .shutdown(self.config.clicks.shutdown_timeout())
            .await
    }
}
