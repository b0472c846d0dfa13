use thiserror::Error;

/// Failures surfaced by the link engine.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("short link not found")]
    NotFound,
    #[error("short link has expired")]
    Expired,
    #[error("alias '{0}' is already taken")]
    AliasTaken(String),
    #[error("could not generate a unique code after {attempts} attempts; widen the code length or alphabet")]
    GenerationExhausted { attempts: usize },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid alias: {0}")]
    InvalidAlias(String),
    #[error("invalid expiry: {0}")]
    InvalidExpiry(String),
    #[error("not permitted to modify this link")]
    Forbidden,
    #[error("storage unavailable: {0:#}")]
    StoreUnavailable(anyhow::Error),
    #[error("cache unavailable: {0:#}")]
    CacheUnavailable(anyhow::Error),
}

pub type LinkResult<T> = Result<T, LinkError>;

/// Failures of account registration and login.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("accounts are not enabled")]
    Disabled,
    #[error("user '{0}' already exists")]
    UserExists(String),
    #[error("user '{0}' not found")]
    UserNotFound(String),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid {0}")]
    InvalidInput(String),
    #[error("storage unavailable: {0:#}")]
    StoreUnavailable(anyhow::Error),
    #[error(transparent)]
    Internal(anyhow::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;
