use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::cache::{CacheEntry, LinkCache};

/// Shared cache backed by Redis. Entries are written with `PSETEX` and read back
/// together with their `PTTL`, so the remaining lifetime comes from Redis itself.
pub struct RedisLinkCache {
    client: redis::Client,
    connection: Arc<RwLock<Option<MultiplexedConnection>>>,
    key_prefix: String,
}

impl RedisLinkCache {
    pub fn new(url: &str, key_prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid Redis url")?;

        debug!(key_prefix, "redis link cache created");
        Ok(Self {
            client,
            connection: Arc::new(RwLock::new(None)),
            key_prefix: key_prefix.to_string(),
        })
    }

    async fn get_connection(&self) -> Result<MultiplexedConnection> {
        {
            let guard = self.connection.read().await;
            if let Some(ref conn) = *guard {
                return Ok(conn.clone());
            }
        }

        let mut guard = self.connection.write().await;
        if let Some(ref conn) = *guard {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("failed to connect to Redis")?;
        *guard = Some(conn.clone());
        debug!("redis connection established");

        Ok(conn)
    }

    async fn reset_connection(&self) {
        let mut guard = self.connection.write().await;
        *guard = None;
        debug!("redis connection reset after error");
    }

    fn make_key(&self, code: &str) -> String {
        format!("{}{}", self.key_prefix, code)
    }

    /// Run `op` on a live connection, dropping the connection if it fails so the
    /// next call reconnects.
    async fn with_connection<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut + Send,
        Fut: std::future::Future<Output = redis::RedisResult<T>> + Send,
    {
        let conn = match self.get_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                self.reset_connection().await;
                return Err(e);
            }
        };

        match op(conn).await {
            Ok(value) => Ok(value),
            Err(e) => {
                self.reset_connection().await;
                Err(anyhow::Error::new(e).context("redis command failed"))
            }
        }
    }
}

#[async_trait]
impl LinkCache for RedisLinkCache {
    async fn get(&self, code: &str) -> Result<Option<CacheEntry>> {
        let key = self.make_key(code);

        let (value, pttl): (Option<String>, i64) = self
            .with_connection(|mut conn| async move {
                redis::pipe()
                    .get(&key)
                    .pttl(&key)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        match value {
            // PTTL is -1 without an expiry and -2 for a missing key; neither is live.
            Some(original_url) if pttl > 0 => Ok(Some(CacheEntry {
                original_url,
                remaining_ttl: Duration::from_millis(pttl as u64),
            })),
            Some(_) => {
                trace!(code, pttl, "ignoring redis entry without remaining ttl");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn insert(&self, code: &str, original_url: &str, ttl: Duration) -> Result<()> {
        let ttl_ms = ttl.as_millis() as u64;
        if ttl_ms == 0 {
            return self.remove(code).await;
        }

        let key = self.make_key(code);
        let value = original_url.to_string();
        self.with_connection(|mut conn| async move {
            let _: () = conn.pset_ex(key, value, ttl_ms).await?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, code: &str) -> Result<()> {
        let key = self.make_key(code);
        self.with_connection(|mut conn| async move {
            let _: i64 = conn.del(key).await?;
            Ok(())
        })
        .await
    }
}
