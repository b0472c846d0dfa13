use crate::models::{Link, LinkPatch, NewLink, User};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;

const LINK_COLUMNS: &str =
    "code, original_url, owner_id, created_at, expires_at, last_accessed_at, click_count";

const USER_COLUMNS: &str = "username, password_hash, created_at";

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid SQLite url '{database_url}'"))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                code TEXT PRIMARY KEY NOT NULL,
                original_url TEXT NOT NULL,
                owner_id TEXT,
                created_at INTEGER NOT NULL,
                expires_at INTEGER,
                last_accessed_at INTEGER,
                click_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_original_url ON links(original_url)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_expires_at ON links(expires_at)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_links_last_accessed_at ON links(last_accessed_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY NOT NULL,
                password_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn insert_if_absent(&self, link: &NewLink) -> StorageResult<Link> {
        let inserted = sqlx::query_as::<_, Link>(&format!(
            r#"
            INSERT INTO links (code, original_url, owner_id, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(code) DO NOTHING
            RETURNING {LINK_COLUMNS}
            "#
        ))
        .bind(&link.code)
        .bind(&link.original_url)
        .bind(&link.owner_id)
        .bind(link.created_at)
        .bind(link.expires_at)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        inserted.ok_or(StorageError::Conflict)
    }

    async fn get(&self, code: &str) -> Result<Option<Link>> {
        let link = sqlx::query_as::<_, Link>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE code = ?"
        ))
        .bind(code)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(link)
    }

    async fn find_by_original_url(
        &self,
        original_url: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Link>> {
        let links = sqlx::query_as::<_, Link>(&format!(
            r#"
            SELECT {LINK_COLUMNS}
            FROM links
            WHERE original_url = ?
            ORDER BY created_at DESC, code ASC
            LIMIT ? OFFSET ?
            "#
        ))
        .bind(original_url)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(links)
    }

    async fn find_expired(&self, now: i64) -> Result<Vec<Link>> {
        let links = sqlx::query_as::<_, Link>(&format!(
            r#"
            SELECT {LINK_COLUMNS}
            FROM links
            WHERE expires_at IS NOT NULL AND expires_at <= ?
            ORDER BY expires_at ASC
            "#
        ))
        .bind(now)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(links)
    }

    async fn find_unused(&self, threshold_secs: i64, now: i64) -> Result<Vec<Link>> {
        let cutoff = now.saturating_sub(threshold_secs);
        let links = sqlx::query_as::<_, Link>(&format!(
            r#"
            SELECT {LINK_COLUMNS}
            FROM links
            WHERE COALESCE(last_accessed_at, created_at) < ?
            ORDER BY COALESCE(last_accessed_at, created_at) ASC
            "#
        ))
        .bind(cutoff)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(links)
    }

    async fn increment_clicks(
        &self,
        code: &str,
        delta: i64,
        last_accessed_at: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE links
            SET click_count = click_count + ?,
                last_accessed_at = MAX(COALESCE(last_accessed_at, 0), ?)
            WHERE code = ?
            "#,
        )
        .bind(delta)
        .bind(last_accessed_at)
        .bind(code)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update(&self, code: &str, patch: &LinkPatch) -> Result<Option<Link>> {
        let (set_expiry, expires_at) = match patch.expires_at {
            Some(value) => (true, value),
            None => (false, None),
        };

        let link = sqlx::query_as::<_, Link>(&format!(
            r#"
            UPDATE links
            SET original_url = COALESCE(?, original_url),
                expires_at = CASE WHEN ? THEN ? ELSE expires_at END
            WHERE code = ?
            RETURNING {LINK_COLUMNS}
            "#
        ))
        .bind(patch.original_url.as_deref())
        .bind(set_expiry)
        .bind(expires_at)
        .bind(code)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(link)
    }

    async fn delete(&self, code: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM links WHERE code = ?")
            .bind(code)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        created_at: i64,
    ) -> StorageResult<User> {
        let inserted = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, password_hash, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT (username) DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(username)
        .bind(password_hash)
        .bind(created_at)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        inserted.ok_or(StorageError::Conflict)
    }

    async fn get_user(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
        ))
        .bind(username)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(user)
    }
}
