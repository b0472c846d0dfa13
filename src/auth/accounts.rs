//! Username/password accounts that mint bearer tokens
//!
//! Registration stores an Argon2id hash and returns a token right away, the
//! same token login hands out. The token's `sub` is the username, so links
//! created with it are owned by that account.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::jwt::JwtService;
use super::password::{hash_password, verify_password};
use crate::error::{AuthError, AuthResult};
use crate::models::{unix_now, Credentials, TokenResponse, User};
use crate::storage::{Storage, StorageError};

const MAX_USERNAME_LENGTH: usize = 64;

pub struct AccountService {
    storage: Arc<dyn Storage>,
    jwt: Arc<JwtService>,
    store_timeout: Duration,
}

impl AccountService {
    pub fn new(storage: Arc<dyn Storage>, jwt: Arc<JwtService>, store_timeout: Duration) -> Self {
        Self {
            storage,
            jwt,
            store_timeout,
        }
    }

    pub async fn register(&self, credentials: Credentials) -> AuthResult<TokenResponse> {
        validate_username(&credentials.username)?;
        if credentials.password.is_empty() {
            return Err(AuthError::InvalidInput("password: must not be empty".to_string()));
        }

        let Credentials { username, password } = credentials;
        let password_hash = run_blocking(move || hash_password(&password)).await?;

        let created = tokio::time::timeout(
            self.store_timeout,
            self.storage.create_user(&username, &password_hash, unix_now()),
        )
        .await
        .map_err(|_| self.timed_out())?;

        match created {
            Ok(user) => {
                info!(username = %user.username, "registered user");
                self.token_for(&user)
            }
            Err(StorageError::Conflict) => {
                warn!(username = %username, "registration for existing user");
                Err(AuthError::UserExists(username))
            }
            Err(StorageError::Other(e)) => Err(AuthError::StoreUnavailable(e)),
        }
    }

    pub async fn login(&self, credentials: Credentials) -> AuthResult<TokenResponse> {
        let user = tokio::time::timeout(
            self.store_timeout,
            self.storage.get_user(&credentials.username),
        )
        .await
        .map_err(|_| self.timed_out())?
        .map_err(AuthError::StoreUnavailable)?
        .ok_or_else(|| AuthError::UserNotFound(credentials.username.clone()))?;

        let password = credentials.password;
        let stored = user.password_hash.clone();
        if !run_blocking(move || verify_password(&password, &stored)).await? {
            warn!(username = %user.username, "login with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        info!(username = %user.username, "user logged in");
        self.token_for(&user)
    }

    fn token_for(&self, user: &User) -> AuthResult<TokenResponse> {
        let token = self.jwt.issue(&user.username).map_err(AuthError::Internal)?;
        Ok(TokenResponse::bearer(token))
    }

    fn timed_out(&self) -> AuthError {
        AuthError::StoreUnavailable(anyhow::anyhow!(
            "store call timed out after {}ms",
            self.store_timeout.as_millis()
        ))
    }
}

fn validate_username(username: &str) -> AuthResult<()> {
    let length = username.chars().count();
    if length == 0 || length > MAX_USERNAME_LENGTH {
        return Err(AuthError::InvalidInput(format!(
            "username: must be 1 to {MAX_USERNAME_LENGTH} characters"
        )));
    }
    if username.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AuthError::InvalidInput(
            "username: must not contain whitespace".to_string(),
        ));
    }
    Ok(())
}

/// Argon2 is CPU-bound; keep it off the async workers
async fn run_blocking<T, F>(work: F) -> AuthResult<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AuthError::Internal(e.into()))?
        .map_err(AuthError::Internal)
}
