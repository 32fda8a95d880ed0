//! Durable queue of unacknowledged local mutations.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use tether_common::{Error, QueueItem, Result};
use tether_store::LocalStore;

/// Ordered set of not-yet-acknowledged local mutations.
///
/// The durable table is the source of truth across restarts; the in-memory
/// mirror serves reads and preserves FIFO enqueue order. Both are mutated
/// only here and by the queue processor.
pub struct SyncQueue {
    store: Arc<dyn LocalStore>,
    items: Mutex<Vec<QueueItem>>,
}

impl SyncQueue {
    /// Create an empty queue over the given store.
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self {
            store,
            items: Mutex::new(Vec::new()),
        }
    }

    /// Hydrate the in-memory mirror from durable storage, preserving the
    /// original enqueue order.
    pub async fn load(&self) -> Result<()> {
        let loaded = self.store.load_queue().await?;
        debug!("Hydrated {} queued operations", loaded.len());
        *self.items.lock().unwrap() = loaded;
        Ok(())
    }

    /// Durably persist a queue item and add it to the mirror.
    ///
    /// A durable-append failure degrades the item to memory-only for the
    /// process lifetime; it is logged and swallowed.
    pub async fn enqueue(&self, item: QueueItem) -> QueueItem {
        if let Err(err) = self.store.append_queue(&item).await {
            warn!(
                "Durable enqueue of {} failed; item is memory-only: {}",
                item.id, err
            );
        }
        self.items.lock().unwrap().push(item.clone());
        item
    }

    /// Acknowledge an item: remove it from the mirror and durable storage.
    pub async fn ack(&self, id: &str) {
        if let Err(err) = self.store.remove_queue_item(id).await {
            warn!("Durable removal of acked item {} failed: {}", id, err);
        }
        self.items.lock().unwrap().retain(|item| item.id != id);
    }

    /// Record a failed drain attempt: increment `retry_count`, keep the
    /// item in place, persist the bookkeeping. Returns the new count.
    pub async fn record_failure(&self, id: &str, error: &Error) -> u32 {
        let updated = {
            let mut items = self.items.lock().unwrap();
            items.iter_mut().find(|item| item.id == id).map(|item| {
                item.retry_count += 1;
                item.last_error = Some(error.to_string());
                item.clone()
            })
        };

        match updated {
            Some(item) => {
                if let Err(err) = self.store.update_queue_item(&item).await {
                    warn!("Persisting retry count for {} failed: {}", id, err);
                }
                item.retry_count
            }
            None => 0,
        }
    }

    /// Clone the current contents in FIFO order for a drain pass.
    pub fn snapshot(&self) -> Vec<QueueItem> {
        self.items.lock().unwrap().clone()
    }

    /// Get a queued item by id.
    pub fn get(&self, id: &str) -> Option<QueueItem> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .find(|item| item.id == id)
            .cloned()
    }

    /// Number of unacknowledged items.
    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }

    /// Drop the in-memory mirror (after the durable table was cleared).
    pub(crate) fn clear_mirror(&self) {
        self.items.lock().unwrap().clear();
    }
}
