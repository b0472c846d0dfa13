//! Click statistics
//!
//! Redirects never wait on statistics persistence: clicks are buffered in
//! process and written to the store as per-code relative increments.

pub mod aggregator;
pub mod models;

pub use aggregator::ClickAggregator;
pub use models::{ClickEvent, FlushReport, PendingClicks};
