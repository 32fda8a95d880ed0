//! Local store trait definition.

use async_trait::async_trait;

use tether_common::{CacheRecord, EntityType, QueueItem, Result};

/// Durable local storage for cached records, the sync queue, and metadata.
///
/// All operations are async and survive process restarts in real
/// implementations. Writes touch at most a single row; there is no
/// multi-table transaction across entity types.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Get the store name (e.g. "sqlite", "memory").
    fn name(&self) -> &str;

    /// Insert or replace a cached record.
    ///
    /// # Postconditions
    /// - `get_record` for the same `(entity_type, id)` returns this record
    async fn put_record(&self, record: &CacheRecord) -> Result<()>;

    /// Insert or replace a batch of cached records.
    async fn put_records(&self, records: &[CacheRecord]) -> Result<()>;

    /// Get a cached record by id.
    async fn get_record(&self, entity_type: EntityType, id: &str) -> Result<Option<CacheRecord>>;

    /// Get all cached records of one entity type.
    async fn all_records(&self, entity_type: EntityType) -> Result<Vec<CacheRecord>>;

    /// Count cached records of one entity type.
    async fn count_records(&self, entity_type: EntityType) -> Result<u64>;

    /// Delete a cached record by id. Deleting a missing record is a no-op.
    async fn delete_record(&self, entity_type: EntityType, id: &str) -> Result<()>;

    /// Remove all cached records, queue items, and metadata.
    async fn clear(&self) -> Result<()>;

    /// Append a queue item behind all existing items.
    ///
    /// # Postconditions
    /// - `load_queue` returns the item after every previously appended item
    async fn append_queue(&self, item: &QueueItem) -> Result<()>;

    /// Persist retry bookkeeping for a queue item in place.
    ///
    /// Only `retry_count` and `last_error` change; the item keeps its
    /// position in the queue.
    async fn update_queue_item(&self, item: &QueueItem) -> Result<()>;

    /// Remove a queue item on acknowledgement.
    async fn remove_queue_item(&self, id: &str) -> Result<()>;

    /// Load all unacknowledged queue items in original enqueue order.
    async fn load_queue(&self) -> Result<Vec<QueueItem>>;

    /// Get a metadata value.
    async fn get_meta(&self, key: &str) -> Result<Option<String>>;

    /// Set a metadata value.
    async fn set_meta(&self, key: &str, value: &str) -> Result<()>;
}
