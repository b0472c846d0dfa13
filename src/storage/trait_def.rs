use crate::models::{Link, LinkPatch, NewLink, User};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("key already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Durable, authoritative store of link records.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Insert a link unless its code is taken. This single conditional write is the
    /// only uniqueness guarantee code generation relies on.
    async fn insert_if_absent(&self, link: &NewLink) -> StorageResult<Link>;

    /// Get a link by code
    async fn get(&self, code: &str) -> Result<Option<Link>>;

    /// All links pointing at `original_url`, newest first
    async fn find_by_original_url(
        &self,
        original_url: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Link>>;

    /// Links whose `expires_at` is at or before `now`
    async fn find_expired(&self, now: i64) -> Result<Vec<Link>>;

    /// Links last accessed (or, if never accessed, created) more than
    /// `threshold_secs` before `now`
    async fn find_unused(&self, threshold_secs: i64, now: i64) -> Result<Vec<Link>>;

    /// Add `delta` to the click counter and advance `last_accessed_at`.
    /// Returns false if the link no longer exists.
    async fn increment_clicks(&self, code: &str, delta: i64, last_accessed_at: i64)
        -> Result<bool>;

    /// Apply a partial update, returning the new record if the link exists
    async fn update(&self, code: &str, patch: &LinkPatch) -> Result<Option<Link>>;

    /// Delete a link. Returns false if nothing was deleted.
    async fn delete(&self, code: &str) -> Result<bool>;

    /// Create an account. Fails with `Conflict` if the username is taken.
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        created_at: i64,
    ) -> StorageResult<User>;

    async fn get_user(&self, username: &str) -> Result<Option<User>>;
}
