use anyhow::{bail, Result};
use std::time::Duration;
use tracing::{debug, error};

use crate::config::CodeConfig;
use crate::error::{LinkError, LinkResult};
use crate::models::{Link, LinkDraft, NewLink};
use crate::storage::{Storage, StorageError};

/// Path segments under `/v1/links/` that a code must never shadow.
pub const RESERVED_CODES: &[&str] = &["search", "expired", "shorten", "stats"];

pub fn is_reserved(code: &str) -> bool {
    RESERVED_CODES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(code))
}

/// Produces short codes and claims them in the store.
///
/// Uniqueness is decided by the store's conditional insert alone: a candidate
/// is only "free" if `insert_if_absent` accepted it.
pub struct CodeGenerator {
    alphabet: Vec<char>,
    length: usize,
    max_attempts: usize,
    alias_min_length: usize,
    alias_max_length: usize,
    store_timeout: Duration,
}

impl CodeGenerator {
    pub fn new(config: &CodeConfig, store_timeout: Duration) -> Result<Self> {
        let mut alphabet: Vec<char> = Vec::with_capacity(config.alphabet.len());
        for c in config.alphabet.chars() {
            if !alphabet.contains(&c) {
                alphabet.push(c);
            }
        }

        if alphabet.len() < 2 {
            bail!("code alphabet needs at least 2 distinct characters");
        }
        if config.length == 0 {
            bail!("code length must be at least 1");
        }
        if config.max_attempts == 0 {
            bail!("code generation needs at least 1 attempt");
        }
        if config.alias_min_length == 0 || config.alias_min_length > config.alias_max_length {
            bail!(
                "invalid alias length bounds {}..={}",
                config.alias_min_length,
                config.alias_max_length
            );
        }

        Ok(Self {
            alphabet,
            length: config.length,
            max_attempts: config.max_attempts,
            alias_min_length: config.alias_min_length,
            alias_max_length: config.alias_max_length,
            store_timeout,
        })
    }

    /// Check a caller-chosen alias before any store access
    pub fn validate_alias(&self, alias: &str) -> LinkResult<()> {
        let len = alias.chars().count();
        if len < self.alias_min_length || len > self.alias_max_length {
            return Err(LinkError::InvalidAlias(format!(
                "alias must be {}-{} characters",
                self.alias_min_length, self.alias_max_length
            )));
        }

        if !alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(LinkError::InvalidAlias(
                "alias may only contain letters, digits, '-' and '_'".to_string(),
            ));
        }

        if is_reserved(alias) {
            return Err(LinkError::InvalidAlias(format!("'{alias}' is reserved")));
        }

        Ok(())
    }

    /// A random candidate code. Not yet claimed.
    pub fn candidate(&self) -> String {
        (0..self.length)
            .map(|_| self.alphabet[rand::random_range(0..self.alphabet.len())])
            .collect()
    }

    /// Claim a code for `draft` and insert the link.
    ///
    /// A custom alias is attempted once and fails with `AliasTaken` on conflict.
    /// Random codes are retried up to the configured number of attempts.
    pub async fn generate(
        &self,
        storage: &dyn Storage,
        custom_alias: Option<&str>,
        draft: &LinkDraft,
    ) -> LinkResult<Link> {
        if let Some(alias) = custom_alias {
            self.validate_alias(alias)?;
            return match self.try_insert(storage, &draft.with_code(alias)).await? {
                Some(link) => Ok(link),
                None => Err(LinkError::AliasTaken(alias.to_string())),
            };
        }

        for attempt in 1..=self.max_attempts {
            let code = self.candidate();
            if is_reserved(&code) {
                debug!(code = %code, "skipping reserved candidate");
                continue;
            }

            if let Some(link) = self.try_insert(storage, &draft.with_code(&code)).await? {
                return Ok(link);
            }
            debug!(code = %code, attempt, "code collision, retrying");
        }

        error!(
            attempts = self.max_attempts,
            length = self.length,
            alphabet_size = self.alphabet.len(),
            "code space exhausted; increase SHORT_CODE_LENGTH or widen SHORT_CODE_ALPHABET"
        );
        Err(LinkError::GenerationExhausted {
            attempts: self.max_attempts,
        })
    }

    /// `Ok(None)` means the code was already taken
    async fn try_insert(&self, storage: &dyn Storage, link: &NewLink) -> LinkResult<Option<Link>> {
        match tokio::time::timeout(self.store_timeout, storage.insert_if_absent(link)).await {
            Ok(Ok(link)) => Ok(Some(link)),
            Ok(Err(StorageError::Conflict)) => Ok(None),
            Ok(Err(StorageError::Other(e))) => Err(LinkError::StoreUnavailable(e)),
            Err(_) => Err(LinkError::StoreUnavailable(anyhow::anyhow!(
                "insert timed out after {}ms",
                self.store_timeout.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    fn generator(config: CodeConfig) -> CodeGenerator {
        CodeGenerator::new(&config, Duration::from_secs(2)).unwrap()
    }

    fn draft() -> LinkDraft {
        LinkDraft {
            original_url: "https://example.com/page".to_string(),
            owner_id: None,
            created_at: 1_000,
            expires_at: None,
        }
    }

    async fn memory_storage() -> SqliteStorage {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        storage
    }

    #[test]
    fn test_rejects_degenerate_alphabet() {
        let config = CodeConfig {
            alphabet: "aaaa".to_string(),
            ..CodeConfig::default()
        };
        assert!(CodeGenerator::new(&config, Duration::from_secs(1)).is_err());

        let config = CodeConfig {
            length: 0,
            ..CodeConfig::default()
        };
        assert!(CodeGenerator::new(&config, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_candidate_uses_alphabet_and_length() {
        let generator = generator(CodeConfig {
            length: 12,
            alphabet: "xyz".to_string(),
            ..CodeConfig::default()
        });

        for _ in 0..100 {
            let code = generator.candidate();
            assert_eq!(code.len(), 12);
            assert!(code.chars().all(|c| "xyz".contains(c)));
        }
    }

    #[test]
    fn test_alias_validation() {
        let generator = generator(CodeConfig::default());

        assert!(generator.validate_alias("my-link_01").is_ok());
        assert!(matches!(
            generator.validate_alias("ab"),
            Err(LinkError::InvalidAlias(_))
        ));
        assert!(matches!(
            generator.validate_alias(&"a".repeat(21)),
            Err(LinkError::InvalidAlias(_))
        ));
        assert!(matches!(
            generator.validate_alias("has space"),
            Err(LinkError::InvalidAlias(_))
        ));
        assert!(matches!(
            generator.validate_alias("héllo"),
            Err(LinkError::InvalidAlias(_))
        ));
        assert!(matches!(
            generator.validate_alias("Search"),
            Err(LinkError::InvalidAlias(_))
        ));
    }

    #[tokio::test]
    async fn test_generates_distinct_codes() {
        let storage = memory_storage().await;
        let generator = generator(CodeConfig::default());

        let mut codes = std::collections::HashSet::new();
        for _ in 0..50 {
            let link = generator.generate(&storage, None, &draft()).await.unwrap();
            assert_eq!(link.code.len(), 7);
            assert!(codes.insert(link.code));
        }
    }

    #[tokio::test]
    async fn test_alias_conflict_is_not_retried() {
        let storage = memory_storage().await;
        let generator = generator(CodeConfig::default());

        let first = generator
            .generate(&storage, Some("promo"), &draft())
            .await
            .unwrap();
        assert_eq!(first.code, "promo");

        let second = generator.generate(&storage, Some("promo"), &draft()).await;
        assert!(matches!(second, Err(LinkError::AliasTaken(alias)) if alias == "promo"));
    }

    #[tokio::test]
    async fn test_exhausted_code_space() {
        let storage = memory_storage().await;
        let generator = generator(CodeConfig {
            length: 1,
            alphabet: "ab".to_string(),
            max_attempts: 5,
            ..CodeConfig::default()
        });

        for code in ["a", "b"] {
            storage.insert_if_absent(&draft().with_code(code)).await.unwrap();
        }

        let result = generator.generate(&storage, None, &draft()).await;
        assert!(matches!(
            result,
            Err(LinkError::GenerationExhausted { attempts: 5 })
        ));
    }
}
