//! In-memory remote service for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use uuid::Uuid;

use tether_common::{DeviceRecord, EntityType, Error, Result};

use crate::service::{AuditEntry, RemoteService};

#[derive(Debug, Clone)]
struct StoredRow {
    payload: serde_json::Value,
    modified: DateTime<Utc>,
}

/// In-memory remote service.
///
/// Behaves like a tiny backend: per-entity tables with server-side
/// modification timestamps, a captured audit log, registered devices and
/// reported cache stats. Transport failures, backend rejections and latency
/// can be injected for tests.
#[derive(Default)]
pub struct MemoryRemote {
    tables: RwLock<HashMap<EntityType, HashMap<String, StoredRow>>>,
    audit: RwLock<Vec<AuditEntry>>,
    devices: RwLock<HashMap<String, DeviceRecord>>,
    stats: RwLock<HashMap<EntityType, (u64, DateTime<Utc>)>>,
    dispatch_log: RwLock<Vec<String>>,
    fail_next: AtomicU32,
    reject_next: AtomicU32,
    fail_audit: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl MemoryRemote {
    /// Create a new empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` data operations with a network error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Reject the next `n` data operations as a backend validation error.
    pub fn reject_next(&self, n: u32) {
        self.reject_next.store(n, Ordering::SeqCst);
    }

    /// Make audit appends fail (they should be best-effort for callers).
    pub fn set_fail_audit(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    /// Add artificial latency to every data operation.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// Plant a server-side record with a given modification time.
    pub fn seed(
        &self,
        entity_type: EntityType,
        payload: serde_json::Value,
        modified: DateTime<Utc>,
    ) {
        let id = payload["id"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut payload = payload;
        Self::stamp(&mut payload, &id, modified);
        self.tables
            .write()
            .unwrap()
            .entry(entity_type)
            .or_default()
            .insert(id, StoredRow { payload, modified });
    }

    /// Get a stored record by id.
    pub fn record(&self, entity_type: EntityType, id: &str) -> Option<serde_json::Value> {
        self.tables
            .read()
            .unwrap()
            .get(&entity_type)
            .and_then(|t| t.get(id))
            .map(|row| row.payload.clone())
    }

    /// Number of stored records for one entity type.
    pub fn record_count(&self, entity_type: EntityType) -> usize {
        self.tables
            .read()
            .unwrap()
            .get(&entity_type)
            .map(|t| t.len())
            .unwrap_or(0)
    }

    /// Captured audit entries, in append order.
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.read().unwrap().clone()
    }

    /// Dispatched data operations, in call order, as "op:entity:id".
    pub fn dispatch_log(&self) -> Vec<String> {
        self.dispatch_log.read().unwrap().clone()
    }

    /// Registered devices by device id.
    pub fn registered_devices(&self) -> Vec<DeviceRecord> {
        self.devices.read().unwrap().values().cloned().collect()
    }

    /// Last reported cache stats for one entity type.
    pub fn stats_for(&self, entity_type: EntityType) -> Option<(u64, DateTime<Utc>)> {
        self.stats.read().unwrap().get(&entity_type).copied()
    }

    fn stamp(payload: &mut serde_json::Value, id: &str, modified: DateTime<Utc>) {
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("id".to_string(), serde_json::Value::String(id.to_string()));
            obj.insert(
                "updated_at".to_string(),
                serde_json::Value::String(modified.to_rfc3339()),
            );
        }
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn gate(&self) -> Result<()> {
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if Self::take(&self.fail_next) {
            return Err(Error::Network("injected network failure".to_string()));
        }
        if Self::take(&self.reject_next) {
            return Err(Error::Rejected("injected backend rejection".to_string()));
        }
        Ok(())
    }

    fn log_dispatch(&self, op: &str, entity_type: EntityType, id: &str) {
        self.dispatch_log
            .write()
            .unwrap()
            .push(format!("{}:{}:{}", op, entity_type, id));
    }
}

#[async_trait]
impl RemoteService for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    async fn insert(
        &self,
        entity_type: EntityType,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.gate().await?;

        let id = payload["id"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let modified = Utc::now();
        let mut stored = payload.clone();
        Self::stamp(&mut stored, &id, modified);

        self.tables
            .write()
            .unwrap()
            .entry(entity_type)
            .or_default()
            .insert(
                id.clone(),
                StoredRow {
                    payload: stored.clone(),
                    modified,
                },
            );
        self.log_dispatch("create", entity_type, &id);
        Ok(stored)
    }

    async fn update(
        &self,
        entity_type: EntityType,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.gate().await?;

        let mut tables = self.tables.write().unwrap();
        let row = tables
            .entry(entity_type)
            .or_default()
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("{} record {}", entity_type, id)))?;

        // Shallow field merge, like a PATCH.
        match (row.payload.as_object_mut(), payload.as_object()) {
            (Some(target), Some(patch)) => {
                for (key, value) in patch {
                    target.insert(key.clone(), value.clone());
                }
            }
            _ => row.payload = payload.clone(),
        }
        row.modified = Utc::now();
        let modified = row.modified;
        Self::stamp(&mut row.payload, id, modified);
        let stored = row.payload.clone();
        drop(tables);

        self.log_dispatch("update", entity_type, id);
        Ok(stored)
    }

    async fn delete(&self, entity_type: EntityType, id: &str) -> Result<()> {
        self.gate().await?;
        self.tables
            .write()
            .unwrap()
            .entry(entity_type)
            .or_default()
            .remove(id);
        self.log_dispatch("delete", entity_type, id);
        Ok(())
    }

    async fn select_since(
        &self,
        entity_type: EntityType,
        since: DateTime<Utc>,
    ) -> Result<Vec<serde_json::Value>> {
        self.gate().await?;

        let tables = self.tables.read().unwrap();
        let mut rows: Vec<&StoredRow> = tables
            .get(&entity_type)
            .map(|t| t.values().filter(|row| row.modified >= since).collect())
            .unwrap_or_default();
        rows.sort_by_key(|row| row.modified);
        Ok(rows.into_iter().map(|row| row.payload.clone()).collect())
    }

    async fn register_device(&self, device: &DeviceRecord) -> Result<()> {
        self.gate().await?;
        self.devices
            .write()
            .unwrap()
            .insert(device.device_id.clone(), device.clone());
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(Error::Network("injected audit failure".to_string()));
        }
        self.audit.write().unwrap().push(entry.clone());
        Ok(())
    }

    async fn report_cache_stats(
        &self,
        entity_type: EntityType,
        record_count: u64,
        pulled_at: DateTime<Utc>,
    ) -> Result<()> {
        self.stats
            .write()
            .unwrap()
            .insert(entity_type, (record_count, pulled_at));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_assigns_id_and_timestamp() {
        let remote = MemoryRemote::new();
        let stored = remote
            .insert(EntityType::Messages, &json!({"body": "hello"}))
            .await
            .unwrap();

        assert!(stored["id"].is_string());
        assert!(stored["updated_at"].is_string());
        assert_eq!(remote.record_count(EntityType::Messages), 1);
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let remote = MemoryRemote::new();
        remote.seed(
            EntityType::Tasks,
            json!({"id": "t1", "title": "ship", "status": "open"}),
            Utc::now(),
        );

        let stored = remote
            .update(EntityType::Tasks, "t1", &json!({"status": "completed"}))
            .await
            .unwrap();

        assert_eq!(stored["title"], "ship");
        assert_eq!(stored["status"], "completed");
    }

    #[tokio::test]
    async fn test_select_since_filters_by_modification_time() {
        let remote = MemoryRemote::new();
        let old = Utc::now() - chrono::Duration::hours(2);
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        remote.seed(EntityType::Messages, json!({"id": "m1"}), old);
        remote.seed(EntityType::Messages, json!({"id": "m2"}), Utc::now());

        let rows = remote
            .select_since(EntityType::Messages, cutoff)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "m2");
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let remote = MemoryRemote::new();
        remote.fail_next(1);

        let err = remote
            .insert(EntityType::Messages, &json!({"body": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));

        // Next call succeeds.
        assert!(remote
            .insert(EntityType::Messages, &json!({"body": "x"}))
            .await
            .is_ok());

        remote.reject_next(1);
        let err = remote
            .insert(EntityType::Messages, &json!({"body": "y"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(_)));
    }
}
