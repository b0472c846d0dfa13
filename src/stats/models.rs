//! Data models for click accounting

use serde::{Deserialize, Serialize};

/// A single successful redirect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickEvent {
    /// Short code that was resolved
    pub code: String,

    /// Time of the redirect (Unix timestamp)
    pub at: i64,
}

impl ClickEvent {
    pub fn now(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            at: crate::models::unix_now(),
        }
    }
}

/// Clicks buffered for one code and not yet written to the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingClicks {
    pub count: u64,
    pub last_accessed_at: i64,
    /// Order in which this batch was opened; lower is older
    pub opened: u64,
}

impl PendingClicks {
    pub fn opened(opened: u64) -> Self {
        Self {
            opened,
            ..Self::default()
        }
    }

    pub fn absorb(&mut self, at: i64) {
        self.count += 1;
        self.last_accessed_at = self.last_accessed_at.max(at);
    }

    pub fn merge(&mut self, other: PendingClicks) {
        self.count += other.count;
        self.last_accessed_at = self.last_accessed_at.max(other.last_accessed_at);
        self.opened = self.opened.min(other.opened);
    }
}

/// Outcome of one flush cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Codes whose increments reached the store
    pub flushed_codes: usize,
    /// Clicks written
    pub flushed_clicks: u64,
    /// Codes re-queued after a store failure
    pub requeued_codes: usize,
}
