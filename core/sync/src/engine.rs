//! Sync engine: consumer cache API, optimistic writes, and the queue drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tether_common::{
    CacheRecord, EntityPayload, EntityType, Error, Operation, QueueItem, RecordState, Result,
};
use tether_remote::{AuditEntry, AuditStatus, RemoteService};
use tether_store::LocalStore;

use crate::device::DeviceIdentity;
use crate::events::{self, EventBus, Subscription};
use crate::monitor::{NetworkMonitor, NetworkMonitorHandle};
use crate::queue::SyncQueue;

/// Metadata keys owned by the engine.
pub(crate) mod meta {
    use tether_common::EntityType;

    /// Time of the last completed drain pass.
    pub const LAST_SYNC: &str = "last_sync";

    /// Per-type incremental pull checkpoint.
    pub fn checkpoint(entity_type: EntityType) -> String {
        format!("checkpoint:{}", entity_type)
    }

    /// Per-type last local write marker.
    pub fn last_write(entity_type: EntityType) -> String {
        format!("last_write:{}", entity_type)
    }
}

/// Configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Display name registered for this device.
    pub device_name: String,
    /// Platform string registered for this device.
    pub platform: String,
    /// Connectivity assumption before the first observed transition.
    pub assume_online: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_name: "unnamed-device".to_string(),
            platform: std::env::consts::OS.to_string(),
            assume_online: true,
        }
    }
}

/// Aggregate sync status for consumers.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    /// Number of unacknowledged queued mutations.
    pub pending: usize,
    /// Time of the last completed drain pass, if any.
    pub last_sync: Option<DateTime<Utc>>,
    /// Current connectivity flag.
    pub is_online: bool,
}

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct DrainReport {
    /// Items attempted in this pass.
    pub attempted: usize,
    /// Items acknowledged and removed.
    pub acked: usize,
    /// Items that failed and remain queued.
    pub failed: usize,
}

/// Client-resident offline-sync engine.
///
/// Owns the durable cache, the mutation queue, and the event bus; both the
/// local store and the remote service are injected so they can be replaced
/// with test doubles. Consumers read and write through this facade only.
pub struct SyncEngine {
    pub(crate) store: Arc<dyn LocalStore>,
    pub(crate) remote: Arc<dyn RemoteService>,
    pub(crate) queue: SyncQueue,
    pub(crate) bus: EventBus,
    identity: DeviceIdentity,
    pub(crate) online: Arc<AtomicBool>,
    draining: AtomicBool,
    last_sync: Mutex<Option<DateTime<Utc>>>,
    monitor: Option<NetworkMonitor>,
}

impl SyncEngine {
    /// Create a new engine and hydrate the queue mirror from storage.
    pub async fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteService>,
        config: SyncConfig,
    ) -> Result<Self> {
        let queue = SyncQueue::new(store.clone());
        queue.load().await?;

        let last_sync = match store.get_meta(meta::LAST_SYNC).await {
            Ok(Some(value)) => DateTime::parse_from_rfc3339(&value)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            Ok(None) => None,
            Err(err) => {
                warn!("Reading last sync time failed: {}", err);
                None
            }
        };

        let identity = DeviceIdentity::new(
            store.clone(),
            remote.clone(),
            config.device_name,
            config.platform,
        );

        Ok(Self {
            store,
            remote,
            queue,
            bus: EventBus::new(),
            identity,
            online: Arc::new(AtomicBool::new(config.assume_online)),
            draining: AtomicBool::new(false),
            last_sync: Mutex::new(last_sync),
            monitor: None,
        })
    }

    /// Initialize the connectivity watcher and return the handle to run.
    pub fn init_monitor(&mut self) -> NetworkMonitorHandle {
        let (monitor, handle) = NetworkMonitor::new(self.online.clone());
        self.monitor = Some(monitor);
        handle
    }

    /// Get the connectivity monitor for reporting transitions.
    pub fn monitor(&self) -> Option<&NetworkMonitor> {
        self.monitor.as_ref()
    }

    /// Get the event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Subscribe to a bus event (`"<entity>:updated"`, `"sync:completed"`).
    pub fn subscribe(
        &self,
        event: &str,
        callback: impl Fn(&serde_json::Value) + Send + Sync + 'static,
    ) -> Subscription {
        self.bus.subscribe(event, callback)
    }

    /// Current connectivity flag.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Flip the connectivity flag directly (tests and simple embedders).
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Get the stable device id, creating it on first use.
    pub async fn device_id(&self) -> String {
        self.identity.device_id().await
    }

    /// Best-effort device registration, typically called once at startup.
    pub async fn register_device(&self) {
        self.identity.register().await;
    }

    /// Snapshot of the unacknowledged mutations, in FIFO order.
    pub fn pending_operations(&self) -> Vec<QueueItem> {
        self.queue.snapshot()
    }

    /// Aggregate status: pending count, last drain time, connectivity.
    pub fn sync_status(&self) -> SyncStatus {
        SyncStatus {
            pending: self.queue.len(),
            last_sync: *self.last_sync.lock().unwrap(),
            is_online: self.is_online(),
        }
    }

    /// Save a record into the cache and notify subscribers.
    ///
    /// Storage failures are logged and swallowed; the write loses
    /// durability but consumers are still notified.
    pub async fn save_to_cache(&self, record: CacheRecord) {
        let entity_type = record.entity_type;
        let record_id = record.id.clone();
        if let Err(err) = self.store.put_record(&record).await {
            warn!("Cache write for {} {} failed: {}", entity_type, record_id, err);
        }
        self.touch_last_write(entity_type).await;
        self.bus
            .publish(&events::entity_updated(entity_type), &json!({ "id": record_id }));
    }

    /// Save a batch of records of one entity type, notifying once.
    pub async fn save_batch_to_cache(&self, entity_type: EntityType, records: Vec<CacheRecord>) {
        if records.is_empty() {
            return;
        }
        if let Err(err) = self.store.put_records(&records).await {
            warn!("Cache batch write for {} failed: {}", entity_type, err);
        }
        self.touch_last_write(entity_type).await;
        self.bus.publish(
            &events::entity_updated(entity_type),
            &json!({ "count": records.len() }),
        );
    }

    /// Get a cached record by id. Storage failures degrade to a miss.
    pub async fn get_from_cache(&self, entity_type: EntityType, id: &str) -> Option<CacheRecord> {
        match self.store.get_record(entity_type, id).await {
            Ok(record) => record,
            Err(err) => {
                warn!("Cache read for {} {} failed: {}", entity_type, id, err);
                None
            }
        }
    }

    /// Get all cached records of one entity type.
    pub async fn get_all_from_cache(&self, entity_type: EntityType) -> Vec<CacheRecord> {
        match self.store.all_records(entity_type).await {
            Ok(records) => records,
            Err(err) => {
                warn!("Cache read for {} failed: {}", entity_type, err);
                Vec::new()
            }
        }
    }

    /// Client-side filter over `get_all_from_cache`; no secondary indexes.
    pub async fn query_cache<F>(&self, entity_type: EntityType, predicate: F) -> Vec<CacheRecord>
    where
        F: Fn(&CacheRecord) -> bool,
    {
        self.get_all_from_cache(entity_type)
            .await
            .into_iter()
            .filter(|record| predicate(record))
            .collect()
    }

    /// Drop all cached records, queued mutations, and metadata.
    pub async fn clear_cache(&self) {
        if let Err(err) = self.store.clear().await {
            warn!("Clearing local store failed: {}", err);
            return;
        }
        self.queue.clear_mirror();
        *self.last_sync.lock().unwrap() = None;
        for entity_type in EntityType::ALL {
            self.bus
                .publish(&events::entity_updated(entity_type), &json!({ "cleared": true }));
        }
    }

    /// Queue a local mutation and apply it optimistically to the cache.
    ///
    /// Create payloads get a client-generated `id` when absent and are
    /// validated against the entity's typed shape; update patches merge
    /// onto the cached payload; deleted records stay cached (pending)
    /// until the delete is acknowledged. When online, a drain is
    /// triggered immediately.
    ///
    /// # Errors
    /// - Payload fails validation for the entity type
    /// - Update or delete without a record id
    pub async fn queue_operation(
        &self,
        operation: Operation,
        entity_type: EntityType,
        payload: serde_json::Value,
        record_id: Option<&str>,
    ) -> Result<QueueItem> {
        let item = match operation {
            Operation::Create => {
                let mut payload = payload;
                if payload.get("id").and_then(|id| id.as_str()).is_none() {
                    if let Some(object) = payload.as_object_mut() {
                        object.insert("id".to_string(), json!(Uuid::new_v4().to_string()));
                    }
                }
                let decoded = EntityPayload::decode(entity_type, &payload)?;
                let record = CacheRecord::new_pending(entity_type, decoded.id(), payload.clone());

                let item = QueueItem::new(operation, entity_type, payload, None);
                let item = self.queue.enqueue(item).await;
                self.save_to_cache(record).await;
                item
            }
            Operation::Update => {
                let id = record_id.ok_or_else(|| {
                    Error::InvalidInput("Update requires a record id".to_string())
                })?;
                EntityPayload::validate_patch(entity_type, &payload)?;

                let record = match self.get_from_cache(entity_type, id).await {
                    Some(mut record) => {
                        if let (Some(target), Some(patch)) =
                            (record.payload.as_object_mut(), payload.as_object())
                        {
                            for (key, value) in patch {
                                target.insert(key.clone(), value.clone());
                            }
                        }
                        record.state = RecordState::Pending;
                        record.updated_at = Utc::now();
                        record
                    }
                    None => {
                        // Update for a record we never cached; keep what we know.
                        let mut orphan = payload.clone();
                        if let Some(object) = orphan.as_object_mut() {
                            object.insert("id".to_string(), json!(id));
                        }
                        CacheRecord::new_pending(entity_type, id, orphan)
                    }
                };

                let item = QueueItem::new(operation, entity_type, payload, Some(id.to_string()));
                let item = self.queue.enqueue(item).await;
                self.save_to_cache(record).await;
                item
            }
            Operation::Delete => {
                let id = record_id.ok_or_else(|| {
                    Error::InvalidInput("Delete requires a record id".to_string())
                })?;

                let item = QueueItem::new(operation, entity_type, payload, Some(id.to_string()));
                let item = self.queue.enqueue(item).await;
                // The record stays cached until the delete is acknowledged.
                if let Some(mut record) = self.get_from_cache(entity_type, id).await {
                    record.state = RecordState::Pending;
                    record.updated_at = Utc::now();
                    self.save_to_cache(record).await;
                }
                item
            }
        };

        if self.is_online() {
            self.process_sync_queue().await;
        }

        Ok(item)
    }

    /// Drain the sync queue against the backend.
    ///
    /// At most one drain runs at a time; overlapping triggers return an
    /// empty report. Items are attempted in FIFO order and one item's
    /// failure never blocks the rest of the pass. Items enqueued while a
    /// drain runs are picked up by a later trigger.
    pub async fn process_sync_queue(&self) -> DrainReport {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Drain already in progress");
            return DrainReport::default();
        }

        let snapshot = self.queue.snapshot();
        let device_id = self.identity.device_id().await;
        let mut report = DrainReport {
            attempted: snapshot.len(),
            ..DrainReport::default()
        };

        if !snapshot.is_empty() {
            info!("Draining {} queued operations", snapshot.len());
        }

        for item in snapshot {
            self.audit(&item, AuditStatus::Processing, None, &device_id)
                .await;

            match self.dispatch(&item).await {
                Ok(()) => {
                    self.queue.ack(&item.id).await;
                    self.finish_acknowledged(&item).await;
                    report.acked += 1;
                }
                Err(err) => {
                    let retry_count = self.queue.record_failure(&item.id, &err).await;
                    warn!(
                        "Queued {} on {} failed (attempt {}): {}",
                        item.operation, item.entity_type, retry_count, err
                    );
                    let failed = QueueItem {
                        retry_count,
                        ..item.clone()
                    };
                    self.audit(&failed, AuditStatus::Failed, Some(err.to_string()), &device_id)
                        .await;
                    self.mark_record_failed(&item).await;
                    report.failed += 1;
                }
            }
        }

        let completed_at = Utc::now();
        *self.last_sync.lock().unwrap() = Some(completed_at);
        if let Err(err) = self
            .store
            .set_meta(meta::LAST_SYNC, &completed_at.to_rfc3339())
            .await
        {
            debug!("Persisting last sync time failed: {}", err);
        }

        self.bus.publish(
            events::SYNC_COMPLETED,
            &json!({
                "attempted": report.attempted,
                "acked": report.acked,
                "failed": report.failed,
                "pending": self.queue.len(),
            }),
        );

        self.draining.store(false, Ordering::SeqCst);
        report
    }

    /// Send one queued mutation to the backend.
    async fn dispatch(&self, item: &QueueItem) -> Result<()> {
        match item.operation {
            Operation::Create => {
                self.remote.insert(item.entity_type, &item.payload).await?;
            }
            Operation::Update => {
                let id = item.record_id.as_deref().ok_or_else(|| {
                    Error::InvalidInput("Queued update without record id".to_string())
                })?;
                self.remote.update(item.entity_type, id, &item.payload).await?;
            }
            Operation::Delete => {
                let id = item.record_id.as_deref().ok_or_else(|| {
                    Error::InvalidInput("Queued delete without record id".to_string())
                })?;
                self.remote.delete(item.entity_type, id).await?;
            }
        }
        Ok(())
    }

    fn target_record_id(item: &QueueItem) -> Option<String> {
        item.record_id.clone().or_else(|| {
            item.payload
                .get("id")
                .and_then(|id| id.as_str())
                .map(str::to_string)
        })
    }

    /// Update the cached record after the backend acknowledged its mutation.
    async fn finish_acknowledged(&self, item: &QueueItem) {
        let Some(record_id) = Self::target_record_id(item) else {
            return;
        };
        match item.operation {
            Operation::Create | Operation::Update => {
                if let Some(mut record) = self.get_from_cache(item.entity_type, &record_id).await {
                    record.state = RecordState::Synced;
                    self.save_to_cache(record).await;
                }
            }
            Operation::Delete => {
                if let Err(err) = self.store.delete_record(item.entity_type, &record_id).await {
                    warn!(
                        "Removing cached {} {} after synced delete failed: {}",
                        item.entity_type, record_id, err
                    );
                }
                self.bus.publish(
                    &events::entity_updated(item.entity_type),
                    &json!({ "id": record_id, "deleted": true }),
                );
            }
        }
    }

    /// Flag the cached record after a failed drain attempt.
    async fn mark_record_failed(&self, item: &QueueItem) {
        let Some(record_id) = Self::target_record_id(item) else {
            return;
        };
        if let Some(mut record) = self.get_from_cache(item.entity_type, &record_id).await {
            record.state = RecordState::Failed;
            self.save_to_cache(record).await;
        }
    }

    /// Best-effort audit of a queued-operation attempt.
    async fn audit(
        &self,
        item: &QueueItem,
        status: AuditStatus,
        error: Option<String>,
        device_id: &str,
    ) {
        let entry = AuditEntry {
            id: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            entity_type: item.entity_type,
            operation: item.operation,
            record_id: Self::target_record_id(item),
            payload: item.payload.clone(),
            status,
            error,
            retry_count: item.retry_count,
            recorded_at: Utc::now(),
        };
        if let Err(err) = self.remote.append_audit(&entry).await {
            debug!("Audit append failed (ignored): {}", err);
        }
    }

    pub(crate) async fn touch_last_write(&self, entity_type: EntityType) {
        if let Err(err) = self
            .store
            .set_meta(&meta::last_write(entity_type), &Utc::now().to_rfc3339())
            .await
        {
            debug!("Updating last-write marker for {} failed: {}", entity_type, err);
        }
    }
}
