//! Link lifecycle: code generation, resolution and management.

pub mod codegen;
pub mod manager;
pub mod resolver;

pub use codegen::CodeGenerator;
pub use manager::LinkManager;
pub use resolver::{LinkResolver, Resolution};

use std::future::Future;
use std::time::Duration;

use crate::error::{LinkError, LinkResult};

/// Run a store call under `limit`, mapping failures and timeouts to
/// `StoreUnavailable`.
pub(crate) async fn bounded_store<T, F>(limit: Duration, op: F) -> LinkResult<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(LinkError::StoreUnavailable(e)),
        Err(_) => Err(LinkError::StoreUnavailable(anyhow::anyhow!(
            "store call timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

/// Same as [`bounded_store`] for the cache, mapping to `CacheUnavailable`.
pub(crate) async fn bounded_cache<T, F>(limit: Duration, op: F) -> LinkResult<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(LinkError::CacheUnavailable(e)),
        Err(_) => Err(LinkError::CacheUnavailable(anyhow::anyhow!(
            "cache call timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
