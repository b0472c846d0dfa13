//! In-memory click aggregation with periodic flush
//!
//! Redirects record clicks into a per-code buffer; a background task turns each
//! code's buffered clicks into a single relative increment against the store.
//! The flusher wakes on a fixed interval, or early once `batch_size` events are
//! buffered. When `capacity` is reached the recording caller force-flushes the
//! oldest batches instead of dropping events, within one store timeout.

use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::ClickConfig;
use crate::stats::models::{ClickEvent, FlushReport, PendingClicks};
use crate::storage::Storage;

/// State shared between recorders and the flush task
struct ClickBuffer {
    storage: Arc<dyn Storage>,
    clicks: DashMap<String, PendingClicks>,
    /// Events currently buffered across all codes
    pending: AtomicU64,
    /// Source of `PendingClicks::opened`
    next_batch: AtomicU64,
    /// Bound on every increment issued against the store
    store_timeout: Duration,
    /// Serializes flushes so a full buffer is drained once, not by every caller
    flush_gate: Mutex<()>,
}

impl ClickBuffer {
    async fn flush(&self) -> FlushReport {
        let _gate = self.flush_gate.lock().await;

        let mut report = FlushReport::default();
        let codes: Vec<String> = self
            .clicks
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        for code in codes {
            self.flush_code(&code, self.store_timeout, &mut report)
                .await;
        }

        report
    }

    /// Flush the oldest batches until the buffer drops below `capacity`,
    /// spending at most one store timeout. Gives up immediately if another
    /// flush is already draining the buffer.
    async fn flush_oldest(&self, capacity: u64) -> FlushReport {
        let mut report = FlushReport::default();
        let Ok(_gate) = self.flush_gate.try_lock() else {
            return report;
        };

        let deadline = Instant::now() + self.store_timeout;
        while self.pending.load(Ordering::Acquire) >= capacity {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || report.requeued_codes > 0 {
                break;
            }

            let oldest = self
                .clicks
                .iter()
                .min_by_key(|entry| entry.value().opened)
                .map(|entry| entry.key().clone());
            let Some(code) = oldest else {
                break;
            };

            self.flush_code(&code, remaining, &mut report).await;
        }

        report
    }

    async fn flush_code(&self, code: &str, limit: Duration, report: &mut FlushReport) {
        // Removing the entry hands its clicks to this flush; new clicks for the
        // same code start a fresh entry.
        let Some((code, batch)) = self.clicks.remove(code) else {
            return;
        };
        self.pending.fetch_sub(batch.count, Ordering::AcqRel);

        let write = self
            .storage
            .increment_clicks(&code, batch.count as i64, batch.last_accessed_at);

        match tokio::time::timeout(limit, write).await {
            Ok(Ok(true)) => {
                report.flushed_codes += 1;
                report.flushed_clicks += batch.count;
            }
            Ok(Ok(false)) => {
                debug!(code = %code, clicks = batch.count, "dropping clicks for deleted link");
            }
            Ok(Err(e)) => {
                warn!(code = %code, error = %e, "failed to flush clicks, re-queueing");
                self.requeue(code, batch);
                report.requeued_codes += 1;
            }
            Err(_) => {
                warn!(
                    code = %code,
                    timeout_ms = limit.as_millis() as u64,
                    "click flush timed out, re-queueing"
                );
                self.requeue(code, batch);
                report.requeued_codes += 1;
            }
        }
    }

    fn requeue(&self, code: String, batch: PendingClicks) {
        self.pending.fetch_add(batch.count, Ordering::AcqRel);
        self.clicks
            .entry(code)
            .and_modify(|pending| pending.merge(batch))
            .or_insert(batch);
    }
}

/// Batches click events per code and writes them to the store
pub struct ClickAggregator {
    buffer: Arc<ClickBuffer>,
    batch_size: u64,
    capacity: u64,
    /// After a failed forced flush, recorders skip forcing until this time (ms)
    force_backoff_until: AtomicI64,
    force_backoff: Duration,
    wake: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ClickAggregator {
    /// Create the aggregator and spawn its flush task. Every store write is
    /// bounded by `store_timeout`.
    pub fn new(storage: Arc<dyn Storage>, config: &ClickConfig, store_timeout: Duration) -> Self {
        let buffer = Arc::new(ClickBuffer {
            storage,
            clicks: DashMap::new(),
            pending: AtomicU64::new(0),
            next_batch: AtomicU64::new(0),
            store_timeout,
            flush_gate: Mutex::new(()),
        });
        let wake = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_flusher(
            Arc::clone(&buffer),
            Arc::clone(&wake),
            shutdown_rx,
            config.flush_interval(),
        ));

        Self {
            buffer,
            batch_size: config.batch_size.max(1) as u64,
            capacity: config.buffer_capacity.max(1) as u64,
            force_backoff_until: AtomicI64::new(0),
            force_backoff: config.flush_interval(),
            wake,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Record a click. Returns immediately unless the buffer is full, in which
    /// case it waits at most one store timeout.
    pub async fn record(&self, event: ClickEvent) {
        let buffered = self.buffer.pending.fetch_add(1, Ordering::AcqRel) + 1;
        let opened = self.buffer.next_batch.fetch_add(1, Ordering::Relaxed);
        self.buffer
            .clicks
            .entry(event.code)
            .or_insert_with(|| PendingClicks::opened(opened))
            .absorb(event.at);

        if buffered >= self.capacity {
            self.relieve_pressure().await;
        } else if buffered >= self.batch_size {
            self.wake.notify_one();
        }
    }

    async fn relieve_pressure(&self) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        if now_ms < self.force_backoff_until.load(Ordering::Acquire) {
            return;
        }

        debug!(capacity = self.capacity, "click buffer full, flushing oldest batches");
        let report = self.buffer.flush_oldest(self.capacity).await;

        if report.requeued_codes > 0 {
            let retry_at = now_ms + self.force_backoff.as_millis() as i64;
            self.force_backoff_until.store(retry_at, Ordering::Release);
            warn!(
                pending = self.pending_events(),
                capacity = self.capacity,
                "store unavailable for forced click flush, buffering past capacity"
            );
        }
    }

    /// Flush everything buffered right now
    pub async fn flush(&self) -> FlushReport {
        self.buffer.flush().await
    }

    /// Clicks for `code` that have not reached the store yet
    pub fn buffered(&self, code: &str) -> Option<PendingClicks> {
        self.buffer.clicks.get(code).map(|entry| *entry.value())
    }

    /// Discard buffered clicks for a deleted link
    pub fn forget(&self, code: &str) {
        if let Some((_, batch)) = self.buffer.clicks.remove(code) {
            self.buffer.pending.fetch_sub(batch.count, Ordering::AcqRel);
        }
    }

    /// Number of buffered events across all codes
    pub fn pending_events(&self) -> u64 {
        self.buffer.pending.load(Ordering::Acquire)
    }

    /// Stop the flush task after a final flush, waiting at most `timeout`.
    /// Returns false if the drain did not complete in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let _ = self.shutdown_tx.send(true);

        let Some(task) = self.task.lock().await.take() else {
            return true;
        };

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(error = %e, "click flush task failed during shutdown");
                false
            }
            Err(_) => {
                warn!(
                    pending = self.pending_events(),
                    "click buffer drain timed out, remaining clicks are lost"
                );
                false
            }
        }
    }
}

async fn run_flusher(
    buffer: Arc<ClickBuffer>,
    wake: Arc<Notify>,
    mut shutdown_rx: watch::Receiver<bool>,
    flush_interval: Duration,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Skip the first tick which fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = wake.notified() => {}
            _ = shutdown_rx.changed() => {
                info!("Shutdown signal received, flushing click buffer...");
                let report = buffer.flush().await;
                info!(
                    codes = report.flushed_codes,
                    clicks = report.flushed_clicks,
                    requeued = report.requeued_codes,
                    "Click buffer flushed on shutdown"
                );
                break;
            }
        }

        let report = buffer.flush().await;
        if report.flushed_codes > 0 || report.requeued_codes > 0 {
            debug!(
                codes = report.flushed_codes,
                clicks = report.flushed_clicks,
                requeued = report.requeued_codes,
                "flushed click buffer"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Link, LinkPatch, NewLink, User};
    use crate::storage::{SqliteStorage, StorageResult};
    use async_trait::async_trait;

    const STORE_TIMEOUT: Duration = Duration::from_secs(2);

    /// Store whose click increments never complete
    struct StalledIncrements {
        inner: Arc<dyn Storage>,
    }

    #[async_trait]
    impl Storage for StalledIncrements {
        async fn init(&self) -> anyhow::Result<()> {
            self.inner.init().await
        }

        async fn insert_if_absent(&self, link: &NewLink) -> StorageResult<Link> {
            self.inner.insert_if_absent(link).await
        }

        async fn get(&self, code: &str) -> anyhow::Result<Option<Link>> {
            self.inner.get(code).await
        }

        async fn find_by_original_url(
            &self,
            original_url: &str,
            limit: i64,
            offset: i64,
        ) -> anyhow::Result<Vec<Link>> {
            self.inner
                .find_by_original_url(original_url, limit, offset)
                .await
        }

        async fn find_expired(&self, now: i64) -> anyhow::Result<Vec<Link>> {
            self.inner.find_expired(now).await
        }

        async fn find_unused(&self, threshold_secs: i64, now: i64) -> anyhow::Result<Vec<Link>> {
            self.inner.find_unused(threshold_secs, now).await
        }

        async fn increment_clicks(
            &self,
            _code: &str,
            _delta: i64,
            _last_accessed_at: i64,
        ) -> anyhow::Result<bool> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(true)
        }

        async fn update(&self, code: &str, patch: &LinkPatch) -> anyhow::Result<Option<Link>> {
            self.inner.update(code, patch).await
        }

        async fn delete(&self, code: &str) -> anyhow::Result<bool> {
            self.inner.delete(code).await
        }

        async fn create_user(
            &self,
            username: &str,
            password_hash: &str,
            created_at: i64,
        ) -> StorageResult<User> {
            self.inner
                .create_user(username, password_hash, created_at)
                .await
        }

        async fn get_user(&self, username: &str) -> anyhow::Result<Option<User>> {
            self.inner.get_user(username).await
        }
    }

    async fn setup_storage(codes: &[&str]) -> Arc<dyn Storage> {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        for code in codes {
            storage
                .insert_if_absent(&NewLink {
                    code: code.to_string(),
                    original_url: format!("https://example.com/{code}"),
                    owner_id: None,
                    created_at: 1_000,
                    expires_at: None,
                })
                .await
                .unwrap();
        }
        Arc::new(storage)
    }

    fn quiet_config() -> ClickConfig {
        ClickConfig {
            flush_interval_ms: 60_000,
            batch_size: 10_000,
            buffer_capacity: 100_000,
            shutdown_timeout_secs: 5,
        }
    }

    fn click(code: &str, at: i64) -> ClickEvent {
        ClickEvent {
            code: code.to_string(),
            at,
        }
    }

    #[tokio::test]
    async fn test_flush_issues_one_increment_per_code() {
        let storage = setup_storage(&["a", "b"]).await;
        let aggregator = ClickAggregator::new(Arc::clone(&storage), &quiet_config(), STORE_TIMEOUT);

        for at in 0..5 {
            aggregator.record(click("a", 2_000 + at)).await;
        }
        aggregator.record(click("b", 3_000)).await;
        aggregator.record(click("b", 2_500)).await;

        let buffered = aggregator.buffered("a").unwrap();
        assert_eq!(buffered.count, 5);
        assert_eq!(buffered.last_accessed_at, 2_004);
        assert_eq!(aggregator.pending_events(), 7);

        let report = aggregator.flush().await;
        assert_eq!(report.flushed_codes, 2);
        assert_eq!(report.flushed_clicks, 7);
        assert_eq!(aggregator.pending_events(), 0);

        let a = storage.get("a").await.unwrap().unwrap();
        assert_eq!(a.click_count, 5);
        assert_eq!(a.last_accessed_at, Some(2_004));

        let b = storage.get("b").await.unwrap().unwrap();
        assert_eq!(b.click_count, 2);
        assert_eq!(b.last_accessed_at, Some(3_000));
    }

    #[tokio::test]
    async fn test_full_buffer_flushes_synchronously() {
        let storage = setup_storage(&["hot"]).await;
        let config = ClickConfig {
            buffer_capacity: 3,
            ..quiet_config()
        };
        let aggregator = ClickAggregator::new(Arc::clone(&storage), &config, STORE_TIMEOUT);

        aggregator.record(click("hot", 10)).await;
        aggregator.record(click("hot", 11)).await;
        assert_eq!(storage.get("hot").await.unwrap().unwrap().click_count, 0);

        aggregator.record(click("hot", 12)).await;
        assert_eq!(aggregator.pending_events(), 0);
        assert_eq!(storage.get("hot").await.unwrap().unwrap().click_count, 3);
    }

    #[tokio::test]
    async fn test_batch_size_wakes_flusher() {
        let storage = setup_storage(&["batch"]).await;
        let config = ClickConfig {
            batch_size: 2,
            ..quiet_config()
        };
        let aggregator = ClickAggregator::new(Arc::clone(&storage), &config, STORE_TIMEOUT);

        aggregator.record(click("batch", 10)).await;
        aggregator.record(click("batch", 11)).await;

        let mut flushed = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if storage.get("batch").await.unwrap().unwrap().click_count == 2 {
                flushed = true;
                break;
            }
        }
        assert!(flushed, "count trigger should flush before the interval");
    }

    #[tokio::test]
    async fn test_shutdown_drains_buffer() {
        let storage = setup_storage(&["drain"]).await;
        let aggregator = ClickAggregator::new(Arc::clone(&storage), &quiet_config(), STORE_TIMEOUT);

        for at in 0..4 {
            aggregator.record(click("drain", at)).await;
        }

        assert!(aggregator.shutdown(Duration::from_secs(5)).await);
        assert_eq!(storage.get("drain").await.unwrap().unwrap().click_count, 4);

        // a second shutdown is a no-op
        assert!(aggregator.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_clicks_for_deleted_link_are_dropped() {
        let storage = setup_storage(&["keep"]).await;
        let aggregator = ClickAggregator::new(Arc::clone(&storage), &quiet_config(), STORE_TIMEOUT);

        aggregator.record(click("missing", 10)).await;
        aggregator.record(click("keep", 10)).await;

        let report = aggregator.flush().await;
        assert_eq!(report.flushed_codes, 1);
        assert_eq!(report.requeued_codes, 0);
        assert!(aggregator.buffered("missing").is_none());
    }

    #[tokio::test]
    async fn test_forget_discards_pending_clicks() {
        let storage = setup_storage(&["gone"]).await;
        let aggregator = ClickAggregator::new(Arc::clone(&storage), &quiet_config(), STORE_TIMEOUT);

        aggregator.record(click("gone", 10)).await;
        aggregator.record(click("gone", 11)).await;
        aggregator.forget("gone");

        assert_eq!(aggregator.pending_events(), 0);
        assert!(aggregator.buffered("gone").is_none());
        aggregator.flush().await;
        assert_eq!(storage.get("gone").await.unwrap().unwrap().click_count, 0);
    }

    #[tokio::test]
    async fn test_full_buffer_flushes_oldest_code_first() {
        let storage = setup_storage(&["a", "b", "c"]).await;
        let config = ClickConfig {
            buffer_capacity: 3,
            ..quiet_config()
        };
        let aggregator = ClickAggregator::new(Arc::clone(&storage), &config, STORE_TIMEOUT);

        aggregator.record(click("a", 10)).await;
        aggregator.record(click("b", 11)).await;
        aggregator.record(click("c", 12)).await;

        assert_eq!(aggregator.pending_events(), 2);
        assert!(aggregator.buffered("a").is_none());
        assert_eq!(storage.get("a").await.unwrap().unwrap().click_count, 1);
        assert_eq!(storage.get("b").await.unwrap().unwrap().click_count, 0);
        assert_eq!(storage.get("c").await.unwrap().unwrap().click_count, 0);
    }

    #[tokio::test]
    async fn test_full_buffer_with_stalled_store_stays_bounded() {
        let inner = setup_storage(&["slow"]).await;
        let storage: Arc<dyn Storage> = Arc::new(StalledIncrements { inner });
        let config = ClickConfig {
            buffer_capacity: 2,
            ..quiet_config()
        };
        let aggregator =
            ClickAggregator::new(Arc::clone(&storage), &config, Duration::from_millis(100));

        aggregator.record(click("slow", 10)).await;

        let started = std::time::Instant::now();
        aggregator.record(click("slow", 11)).await;
        assert!(started.elapsed() < Duration::from_secs(1));

        // Nothing is lost when the forced flush gives up
        assert_eq!(aggregator.pending_events(), 2);
        assert_eq!(aggregator.buffered("slow").unwrap().count, 2);

        // Recorders back off instead of waiting on the store again
        let started = std::time::Instant::now();
        aggregator.record(click("slow", 12)).await;
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(aggregator.pending_events(), 3);
    }

    #[tokio::test]
    async fn test_timed_out_flush_requeues_clicks() {
        let inner = setup_storage(&["slow"]).await;
        let storage: Arc<dyn Storage> = Arc::new(StalledIncrements { inner });
        let aggregator =
            ClickAggregator::new(Arc::clone(&storage), &quiet_config(), Duration::from_millis(50));

        aggregator.record(click("slow", 10)).await;
        let report = aggregator.flush().await;

        assert_eq!(report.flushed_codes, 0);
        assert_eq!(report.requeued_codes, 1);
        assert_eq!(aggregator.buffered("slow").unwrap().count, 1);
    }
}
