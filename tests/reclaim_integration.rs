//! Reclamation scheduler integration tests

use relink::cache::MokaLinkCache;
use relink::config::Config;
use relink::models::{unix_now, CreateLink, NewLink};
use relink::reclaim::Reclaimer;
use relink::storage::{SqliteStorage, Storage};
use relink::Engine;
use std::sync::Arc;
use std::time::Duration;

const DAY: i64 = 24 * 3600;

async fn setup_engine() -> Engine {
    let mut config = Config::default();
    config.clicks.flush_interval_ms = 60_000;
    config.reclaim.unused_threshold_secs = 30 * DAY as u64;

    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Engine::from_parts(
        config,
        Arc::new(storage),
        Arc::new(MokaLinkCache::new(1_000)),
    )
    .unwrap()
}

async fn insert(engine: &Engine, code: &str, created_at: i64, expires_at: Option<i64>) {
    engine
        .storage
        .insert_if_absent(&NewLink {
            code: code.to_string(),
            original_url: format!("https://example.com/{code}"),
            owner_id: None,
            created_at,
            expires_at,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_pass_removes_expired_and_unused_links() {
    let engine = setup_engine().await;
    let now = unix_now();

    insert(&engine, "expired", now - DAY, Some(now - 10)).await;
    insert(&engine, "forgotten", now - 40 * DAY, None).await;
    insert(&engine, "active", now - 40 * DAY, None).await;
    insert(&engine, "fresh", now - DAY, Some(now + DAY)).await;

    // Recently clicked, so not unused despite its age
    engine
        .storage
        .increment_clicks("active", 1, now - DAY)
        .await
        .unwrap();

    let report = engine.reclaimer.run_once(now).await;
    assert_eq!(report.expired, 1);
    assert_eq!(report.unused, 1);
    assert_eq!(report.failed, 0);

    assert!(engine.storage.get("expired").await.unwrap().is_none());
    assert!(engine.storage.get("forgotten").await.unwrap().is_none());
    assert!(engine.storage.get("active").await.unwrap().is_some());
    assert!(engine.storage.get("fresh").await.unwrap().is_some());

    // Nothing left to do on a second pass
    let again = engine.reclaimer.run_once(now).await;
    assert_eq!(again.reclaimed(), 0);
}

#[tokio::test]
async fn test_buffered_click_keeps_old_link_alive() {
    let engine = setup_engine().await;
    let now = unix_now();

    insert(&engine, "hot", now - 40 * DAY, None).await;

    // The click is still in the buffer, the store has never seen it
    engine.resolver.resolve("hot").await.unwrap();
    assert_eq!(engine.storage.get("hot").await.unwrap().unwrap().click_count, 0);

    let report = engine.reclaimer.run_once(now).await;
    assert_eq!(report.unused, 0);
    assert!(engine.storage.get("hot").await.unwrap().is_some());
}

#[tokio::test]
async fn test_link_both_expired_and_unused_is_counted_once() {
    let engine = setup_engine().await;
    let now = unix_now();

    insert(&engine, "oldexp", now - 60 * DAY, Some(now - 50 * DAY)).await;

    let report = engine.reclaimer.run_once(now).await;
    assert_eq!(report.expired, 1);
    assert_eq!(report.unused, 0);
}

#[tokio::test]
async fn test_disabled_threshold_keeps_unused_links() {
    let engine = setup_engine().await;
    let now = unix_now();

    insert(&engine, "ancient", now - 365 * DAY, None).await;

    let reclaimer = Reclaimer::new(Arc::clone(&engine.manager), None);
    let report = reclaimer.run_once(now).await;
    assert_eq!(report.reclaimed(), 0);
    assert!(engine.storage.get("ancient").await.unwrap().is_some());
}

#[tokio::test]
async fn test_reclaimed_link_leaves_cache() {
    let engine = setup_engine().await;
    let link = engine
        .manager
        .create(CreateLink {
            original_url: "https://example.com/cached".to_string(),
            custom_alias: None,
            expires_at: Some(unix_now() + 3_600),
            owner_id: None,
        })
        .await
        .unwrap();
    assert!(engine.cache.get(&link.code).await.unwrap().is_some());

    let report = engine.reclaimer.run_once(unix_now() + 7_200).await;
    assert_eq!(report.expired, 1);
    assert!(engine.cache.get(&link.code).await.unwrap().is_none());
}

#[tokio::test]
async fn test_scheduler_runs_at_startup_and_stops() {
    let engine = setup_engine().await;
    let now = unix_now();
    insert(&engine, "startup", now - DAY, Some(now - 1)).await;

    let handle = Arc::clone(&engine.reclaimer).spawn(Duration::from_secs(3_600));

    let mut reclaimed = false;
    for _ in 0..50 {
        if engine.storage.get("startup").await.unwrap().is_none() {
            reclaimed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(reclaimed, "first pass should run without waiting an interval");

    tokio::time::timeout(Duration::from_secs(2), handle.stop())
        .await
        .expect("scheduler should stop between passes");
}
