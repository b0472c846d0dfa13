use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Characters of generated codes: case-sensitive alphanumerics without the
/// easily confused `0 O 1 l I`.
pub const DEFAULT_CODE_ALPHABET: &str =
    "23456789abcdefghijkmnopqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub auth: AuthConfig,
    pub codes: CodeConfig,
    pub links: LinkPolicyConfig,
    pub reclaim: ReclaimConfig,
    pub clicks: ClickConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: Option<String>,
    pub redis_key_prefix: String,
    pub max_entries: u64,
    /// Upper bound on how long any entry may live in the cache
    pub max_ttl_secs: u64,
    pub cache_timeout_ms: u64,
    pub store_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    None,
    Jwt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    #[serde(default)]
    pub jwt: Option<JwtConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    #[serde(default)]
    pub issuer: Option<String>,
    /// Lifetime of tokens issued by register and login
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

const DEFAULT_TOKEN_TTL_SECS: u64 = 3_600;

fn default_token_ttl_secs() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}

impl JwtConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeConfig {
    pub length: usize,
    pub alphabet: String,
    pub max_attempts: usize,
    pub alias_min_length: usize,
    pub alias_max_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkPolicyConfig {
    /// Whether links created without an owner may be updated or deleted by anyone
    pub anonymous_links_mutable: bool,
    pub search_max_limit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclaimConfig {
    pub interval_secs: u64,
    /// Links untouched for longer than this are reclaimed. 0 disables the pass.
    pub unused_threshold_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickConfig {
    pub flush_interval_ms: u64,
    /// Buffered events that wake the flusher early
    pub batch_size: usize,
    /// Buffered events at which recording flushes synchronously
    pub buffer_capacity: usize,
    pub shutdown_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::Sqlite,
            url: "sqlite://./relink.db".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: None,
            redis_key_prefix: "relink:".to_string(),
            max_entries: 100_000,
            max_ttl_secs: 3600,
            cache_timeout_ms: 50,
            store_timeout_ms: 2000,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::None,
            jwt: None,
        }
    }
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            length: 7,
            alphabet: DEFAULT_CODE_ALPHABET.to_string(),
            max_attempts: 5,
            alias_min_length: 3,
            alias_max_length: 20,
        }
    }
}

impl Default for LinkPolicyConfig {
    fn default() -> Self {
        Self {
            anonymous_links_mutable: true,
            search_max_limit: 100,
        }
    }
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            unused_threshold_secs: 30 * 24 * 3600,
        }
    }
}

impl Default for ClickConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 1000,
            batch_size: 1000,
            buffer_capacity: 100_000,
            shutdown_timeout_secs: 5,
        }
    }
}

impl CacheConfig {
    pub fn max_ttl(&self) -> Duration {
        Duration::from_secs(self.max_ttl_secs)
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl ReclaimConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn unused_threshold(&self) -> Option<Duration> {
        (self.unused_threshold_secs > 0).then(|| Duration::from_secs(self.unused_threshold_secs))
    }
}

impl ClickConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_defaults = DatabaseConfig::default();
        let database = DatabaseConfig {
            backend,
            url: std::env::var("DATABASE_URL").unwrap_or(database_defaults.url),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", database_defaults.max_connections)?,
        };

        let server_defaults = ServerConfig::default();
        let server = ServerConfig {
            host: std::env::var("API_HOST").unwrap_or(server_defaults.host),
            port: env_or("API_PORT", server_defaults.port)?,
        };

        let cache_backend = match std::env::var("CACHE_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => CacheBackend::Memory,
            "redis" => CacheBackend::Redis,
            other => {
                tracing::warn!(
                    "Unknown CACHE_BACKEND '{other}', falling back to 'memory'. Supported values: memory, redis"
                );
                CacheBackend::Memory
            }
        };

        let redis_url = std::env::var("REDIS_URL").ok();
        if cache_backend == CacheBackend::Redis && redis_url.is_none() {
            bail!("REDIS_URL must be set when CACHE_BACKEND=redis");
        }

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            backend: cache_backend,
            redis_url,
            redis_key_prefix: std::env::var("REDIS_KEY_PREFIX")
                .unwrap_or(cache_defaults.redis_key_prefix),
            max_entries: env_or("CACHE_MAX_ENTRIES", cache_defaults.max_entries)?,
            max_ttl_secs: env_or("CACHE_MAX_TTL_SECS", cache_defaults.max_ttl_secs)?,
            cache_timeout_ms: env_or("CACHE_TIMEOUT_MS", cache_defaults.cache_timeout_ms)?,
            store_timeout_ms: env_or("STORE_TIMEOUT_MS", cache_defaults.store_timeout_ms)?,
        };

        if cache.cache_timeout_ms >= cache.store_timeout_ms {
            tracing::warn!(
                cache_timeout_ms = cache.cache_timeout_ms,
                store_timeout_ms = cache.store_timeout_ms,
                "cache timeout should be shorter than store timeout"
            );
        }

        let auth_mode = match std::env::var("AUTH_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => AuthMode::None,
            "jwt" => AuthMode::Jwt,
            other => {
                tracing::warn!(
                    "Unknown AUTH_MODE '{other}', falling back to 'none'. Supported values: none, jwt"
                );
                AuthMode::None
            }
        };

        let jwt = if auth_mode == AuthMode::Jwt {
            let secret =
                std::env::var("JWT_SECRET").context("JWT_SECRET must be set when AUTH_MODE=jwt")?;
            Some(JwtConfig {
                secret,
                issuer: std::env::var("JWT_ISSUER").ok(),
                token_ttl_secs: env_or("JWT_TOKEN_TTL_SECS", DEFAULT_TOKEN_TTL_SECS)?,
            })
        } else {
            None
        };

        let code_defaults = CodeConfig::default();
        let codes = CodeConfig {
            length: env_or("SHORT_CODE_LENGTH", code_defaults.length)?,
            alphabet: std::env::var("SHORT_CODE_ALPHABET").unwrap_or(code_defaults.alphabet),
            max_attempts: env_or("SHORT_CODE_MAX_ATTEMPTS", code_defaults.max_attempts)?,
            alias_min_length: env_or("ALIAS_MIN_LENGTH", code_defaults.alias_min_length)?,
            alias_max_length: env_or("ALIAS_MAX_LENGTH", code_defaults.alias_max_length)?,
        };

        let policy_defaults = LinkPolicyConfig::default();
        let links = LinkPolicyConfig {
            anonymous_links_mutable: env_flag(
                "ANONYMOUS_LINKS_MUTABLE",
                policy_defaults.anonymous_links_mutable,
            ),
            search_max_limit: env_or("SEARCH_MAX_LIMIT", policy_defaults.search_max_limit)?,
        };

        let reclaim_defaults = ReclaimConfig::default();
        let reclaim = ReclaimConfig {
            interval_secs: env_or("RECLAIM_INTERVAL_SECS", reclaim_defaults.interval_secs)?,
            unused_threshold_secs: env_or(
                "UNUSED_LINK_THRESHOLD_SECS",
                reclaim_defaults.unused_threshold_secs,
            )?,
        };

        let click_defaults = ClickConfig::default();
        let clicks = ClickConfig {
            flush_interval_ms: env_or("CLICK_FLUSH_INTERVAL_MS", click_defaults.flush_interval_ms)?,
            batch_size: env_or("CLICK_BATCH_SIZE", click_defaults.batch_size)?,
            buffer_capacity: env_or("CLICK_BUFFER_CAPACITY", click_defaults.buffer_capacity)?,
            shutdown_timeout_secs: env_or(
                "CLICK_SHUTDOWN_TIMEOUT_SECS",
                click_defaults.shutdown_timeout_secs,
            )?,
        };

        Ok(Config {
            database,
            server,
            cache,
            auth: AuthConfig {
                mode: auth_mode,
                jwt,
            },
            codes,
            links,
            reclaim,
            clicks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_alphabet_avoids_ambiguous_characters() {
        for c in ['0', 'O', '1', 'l', 'I'] {
            assert!(!DEFAULT_CODE_ALPHABET.contains(c), "alphabet contains {c}");
        }
        assert!(DEFAULT_CODE_ALPHABET.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_default_timeouts_prefer_cache() {
        let cache = CacheConfig::default();
        assert!(cache.cache_timeout() < cache.store_timeout());
    }

    #[test]
    fn test_zero_unused_threshold_disables_pass() {
        let reclaim = ReclaimConfig {
            interval_secs: 60,
            unused_threshold_secs: 0,
        };
        assert!(reclaim.unused_threshold().is_none());
        assert_eq!(ReclaimConfig::default().unused_threshold(), Some(Duration::from_secs(2_592_000)));
    }
}
