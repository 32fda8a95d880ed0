//! In-memory local store for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tether_common::{CacheRecord, EntityType, Error, QueueItem, Result};

use crate::store::LocalStore;

/// In-memory local store.
///
/// Useful for testing and development. All data is lost on drop. Writes can
/// be made to fail on demand to exercise degraded-durability paths.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<(EntityType, String), CacheRecord>>,
    queue: RwLock<Vec<QueueItem>>,
    meta: RwLock<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a storage error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(Error::Storage("memory store write disabled".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put_record(&self, record: &CacheRecord) -> Result<()> {
        self.check_writable()?;
        self.records
            .write()
            .unwrap()
            .insert((record.entity_type, record.id.clone()), record.clone());
        Ok(())
    }

    async fn put_records(&self, records: &[CacheRecord]) -> Result<()> {
        self.check_writable()?;
        let mut map = self.records.write().unwrap();
        for record in records {
            map.insert((record.entity_type, record.id.clone()), record.clone());
        }
        Ok(())
    }

    async fn get_record(&self, entity_type: EntityType, id: &str) -> Result<Option<CacheRecord>> {
        Ok(self
            .records
            .read()
            .unwrap()
            .get(&(entity_type, id.to_string()))
            .cloned())
    }

    async fn all_records(&self, entity_type: EntityType) -> Result<Vec<CacheRecord>> {
        let mut records: Vec<CacheRecord> = self
            .records
            .read()
            .unwrap()
            .values()
            .filter(|r| r.entity_type == entity_type)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn count_records(&self, entity_type: EntityType) -> Result<u64> {
        Ok(self
            .records
            .read()
            .unwrap()
            .keys()
            .filter(|(entity, _)| *entity == entity_type)
            .count() as u64)
    }

    async fn delete_record(&self, entity_type: EntityType, id: &str) -> Result<()> {
        self.check_writable()?;
        self.records
            .write()
            .unwrap()
            .remove(&(entity_type, id.to_string()));
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.check_writable()?;
        self.records.write().unwrap().clear();
        self.queue.write().unwrap().clear();
        self.meta.write().unwrap().clear();
        Ok(())
    }

    async fn append_queue(&self, item: &QueueItem) -> Result<()> {
        self.check_writable()?;
        self.queue.write().unwrap().push(item.clone());
        Ok(())
    }

    async fn update_queue_item(&self, item: &QueueItem) -> Result<()> {
        self.check_writable()?;
        let mut queue = self.queue.write().unwrap();
        if let Some(existing) = queue.iter_mut().find(|i| i.id == item.id) {
            existing.retry_count = item.retry_count;
            existing.last_error = item.last_error.clone();
        }
        Ok(())
    }

    async fn remove_queue_item(&self, id: &str) -> Result<()> {
        self.check_writable()?;
        self.queue.write().unwrap().retain(|i| i.id != id);
        Ok(())
    }

    async fn load_queue(&self) -> Result<Vec<QueueItem>> {
        Ok(self.queue.read().unwrap().clone())
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self.meta.read().unwrap().get(key).cloned())
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        self.meta
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
