use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Link {
    pub code: String,
    pub original_url: String,
    pub owner_id: Option<String>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub last_accessed_at: Option<i64>,
    pub click_count: i64,
}

impl Link {
    /// A link whose expiry is at or before `now` must never be resolved.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Everything needed to create a link except its code.
#[derive(Debug, Clone)]
pub struct LinkDraft {
    pub original_url: String,
    pub owner_id: Option<String>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

impl LinkDraft {
    pub fn with_code(&self, code: impl Into<String>) -> NewLink {
        NewLink {
            code: code.into(),
            original_url: self.original_url.clone(),
            owner_id: self.owner_id.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// Row handed to `Storage::insert_if_absent`.
#[derive(Debug, Clone)]
pub struct NewLink {
    pub code: String,
    pub original_url: String,
    pub owner_id: Option<String>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

/// Partial update. `expires_at: Some(None)` clears the expiry.
#[derive(Debug, Clone, Default)]
pub struct LinkPatch {
    pub original_url: Option<String>,
    pub expires_at: Option<Option<i64>>,
}

impl LinkPatch {
    pub fn is_empty(&self) -> bool {
        self.original_url.is_none() && self.expires_at.is_none()
    }
}

/// Input of `LinkManager::create`.
#[derive(Debug, Clone)]
pub struct CreateLink {
    pub original_url: String,
    pub custom_alias: Option<String>,
    pub expires_at: Option<i64>,
    pub owner_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateLinkRequest {
    pub original_url: String,
    pub custom_alias: Option<String>,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLinkRequest {
    pub original_url: Option<String>,
    #[serde(default, deserialize_with = "present_or_null")]
    pub expires_at: Option<Option<i64>>,
}

impl From<UpdateLinkRequest> for LinkPatch {
    fn from(request: UpdateLinkRequest) -> Self {
        LinkPatch {
            original_url: request.original_url,
            expires_at: request.expires_at,
        }
    }
}

/// Distinguishes an explicit `null` from a missing field.
fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    pub code: String,
    pub click_count: i64,
    pub created_at: i64,
    pub last_accessed_at: Option<i64>,
    pub expires_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_request_distinguishes_null_from_missing() {
        let missing: UpdateLinkRequest =
            serde_json::from_str(r#"{"original_url": "https://example.com"}"#).unwrap();
        assert_eq!(missing.expires_at, None);

        let cleared: UpdateLinkRequest = serde_json::from_str(r#"{"expires_at": null}"#).unwrap();
        assert_eq!(cleared.expires_at, Some(None));

        let set: UpdateLinkRequest = serde_json::from_str(r#"{"expires_at": 1700000000}"#).unwrap();
        assert_eq!(set.expires_at, Some(Some(1_700_000_000)));
    }

    #[test]
    fn expiry_boundary_counts_as_expired() {
        let link = Link {
            code: "abc".to_string(),
            original_url: "https://example.com".to_string(),
            owner_id: None,
            created_at: 0,
            expires_at: Some(100),
            last_accessed_at: None,
            click_count: 0,
        };
        assert!(!link.is_expired_at(99));
        assert!(link.is_expired_at(100));
    }
}
