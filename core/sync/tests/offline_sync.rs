//! End-to-end offline-sync scenarios against in-memory doubles and a real
//! SQLite store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use tether_common::{EntityType, Operation, RecordState};
use tether_remote::MemoryRemote;
use tether_store::{LocalStore, MemoryStore, SqliteStore};
use tether_sync::{ConnectivityEvent, SyncConfig, SyncEngine};

async fn engine_with(
    store: Arc<dyn LocalStore>,
    remote: Arc<MemoryRemote>,
    online: bool,
) -> SyncEngine {
    let config = SyncConfig {
        device_name: "integration test".to_string(),
        platform: "linux".to_string(),
        assume_online: online,
    };
    SyncEngine::new(store, remote, config).await.unwrap()
}

async fn wait_until_drained(engine: &SyncEngine) {
    for _ in 0..100 {
        if engine.sync_status().pending == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue never drained");
}

// Offline message send: immediately visible as pending, exactly one queued
// create, synced after reconnect.
#[tokio::test]
async fn scenario_offline_message_send_and_reconnect() {
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(MemoryRemote::new());
    let mut engine = engine_with(store.clone(), remote.clone(), false).await;
    let handle = engine.init_monitor();
    let engine = Arc::new(engine);

    let drain_engine = engine.clone();
    tokio::spawn(async move {
        handle
            .run(move || {
                let engine = drain_engine.clone();
                async move { engine.process_sync_queue().await }
            })
            .await;
    });

    engine
        .queue_operation(
            Operation::Create,
            EntityType::Messages,
            json!({"channel_id": "C1", "sender_id": "U1", "body": "hello"}),
            None,
        )
        .await
        .unwrap();

    // Immediately visible via a cache query, flagged pending.
    let visible = engine
        .query_cache(EntityType::Messages, |r| r.payload["channel_id"] == "C1")
        .await;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].state, RecordState::Pending);

    // Exactly one create queue item exists, durably.
    let queued = store.load_queue().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].operation, Operation::Create);
    assert!(remote.dispatch_log().is_empty());

    // Reconnect triggers the drain.
    engine
        .monitor()
        .unwrap()
        .report(ConnectivityEvent::Online)
        .await;
    wait_until_drained(&engine).await;

    assert_eq!(remote.record_count(EntityType::Messages), 1);
    assert!(store.load_queue().await.unwrap().is_empty());
    let visible = engine
        .query_cache(EntityType::Messages, |r| r.payload["channel_id"] == "C1")
        .await;
    assert_eq!(visible[0].state, RecordState::Synced);
}

// A task update fails once (simulated network error), retry_count goes
// 0 -> 1, then a manual retry succeeds and the item is removed.
#[tokio::test]
async fn scenario_failed_update_then_manual_retry() {
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(MemoryRemote::new());
    remote.seed(
        EntityType::Tasks,
        json!({"id": "t1", "title": "ship", "status": "open"}),
        Utc::now(),
    );
    let engine = engine_with(store.clone(), remote.clone(), true).await;

    remote.fail_next(1);
    let item = engine
        .queue_operation(
            Operation::Update,
            EntityType::Tasks,
            json!({"status": "completed"}),
            Some("t1"),
        )
        .await
        .unwrap();

    // The immediate online drain hit the injected failure.
    let queued = store.load_queue().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, item.id);
    assert_eq!(queued[0].retry_count, 1);

    // Manual retry.
    let report = engine.process_sync_queue().await;
    assert_eq!(report.acked, 1);
    assert!(store.load_queue().await.unwrap().is_empty());
    assert_eq!(
        remote.record(EntityType::Tasks, "t1").unwrap()["status"],
        "completed"
    );
}

// Pull with checkpoint T0 and two server records updated at T1 > T0 yields
// both records locally and advances the checkpoint to >= T1.
#[tokio::test]
async fn scenario_incremental_pull_advances_checkpoint() {
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(MemoryRemote::new());
    let engine = engine_with(store.clone(), remote.clone(), true).await;

    let t0 = Utc::now() - chrono::Duration::hours(1);
    store
        .set_meta("checkpoint:messages", &t0.to_rfc3339())
        .await
        .unwrap();

    let t1 = Utc::now();
    remote.seed(
        EntityType::Messages,
        json!({"id": "m1", "channel_id": "C1", "sender_id": "U1", "body": "a"}),
        t1,
    );
    remote.seed(
        EntityType::Messages,
        json!({"id": "m2", "channel_id": "C1", "sender_id": "U2", "body": "b"}),
        t1,
    );

    let report = engine.sync_from_server(EntityType::Messages).await;

    assert_eq!(report.fetched, 2);
    assert_eq!(engine.get_all_from_cache(EntityType::Messages).await.len(), 2);
    assert!(report.checkpoint.unwrap() >= t1);
    assert!(engine.checkpoint(EntityType::Messages).await >= t1);
}

// Overlapping drain triggers never send a queue item twice.
#[tokio::test]
async fn overlapping_drains_are_single_flight() {
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(MemoryRemote::new());
    let engine = engine_with(store.clone(), remote.clone(), false).await;

    for i in 0..3 {
        engine
            .queue_operation(
                Operation::Create,
                EntityType::Messages,
                json!({"channel_id": "C1", "sender_id": "U1", "body": format!("msg {i}")}),
                None,
            )
            .await
            .unwrap();
    }

    engine.set_online(true);
    remote.set_latency(Duration::from_millis(20));

    let engine = Arc::new(engine);
    let (first, second) = tokio::join!(engine.process_sync_queue(), engine.process_sync_queue());

    // One trigger did the work; the overlapping one was a no-op.
    assert_eq!(first.attempted + second.attempted, 3);
    assert_eq!(first.acked + second.acked, 3);
    assert_eq!(remote.dispatch_log().len(), 3);
}

// After a simulated restart the reconstructed queue equals exactly the
// unacknowledged items, in original order.
#[tokio::test]
async fn queue_survives_restart_with_sqlite() {
    let dir = tempfile::TempDir::new().unwrap();
    let db_path = dir.path().join("tether.db");
    let remote = Arc::new(MemoryRemote::new());

    let enqueued_ids: Vec<String> = {
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        let engine = engine_with(store, remote.clone(), false).await;

        let mut ids = Vec::new();
        for i in 0..3 {
            let item = engine
                .queue_operation(
                    Operation::Create,
                    EntityType::Tasks,
                    json!({"title": format!("task {i}")}),
                    None,
                )
                .await
                .unwrap();
            ids.push(item.id);
        }
        ids
    };

    // Restart: fresh store and engine over the same database file.
    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    let engine = engine_with(store.clone(), remote.clone(), false).await;

    assert_eq!(engine.sync_status().pending, 3);
    let reloaded: Vec<String> = store
        .load_queue()
        .await
        .unwrap()
        .into_iter()
        .map(|item| item.id)
        .collect();
    assert_eq!(reloaded, enqueued_ids);

    // The reconstructed queue drains normally.
    engine.set_online(true);
    let report = engine.process_sync_queue().await;
    assert_eq!(report.acked, 3);
    assert_eq!(remote.record_count(EntityType::Tasks), 3);
}

// Device identity is created lazily and registration is reflected backend
// side with the same id.
#[tokio::test]
async fn device_registration_uses_stable_id() {
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(MemoryRemote::new());
    let engine = engine_with(store, remote.clone(), true).await;

    let device_id = engine.device_id().await;
    engine.register_device().await;

    let devices = remote.registered_devices();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_id, device_id);
    assert_eq!(devices[0].name, "integration test");
}
