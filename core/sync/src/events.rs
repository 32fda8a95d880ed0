//! In-process publish/subscribe for cache change notifications.
//!
//! Dispatch is synchronous, in subscription order, within the publishing
//! call's execution context. Consumers react to cache changes without
//! re-querying the network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tether_common::EntityType;

/// Event published after a drain pass completes.
pub const SYNC_COMPLETED: &str = "sync:completed";

/// Event name for cache changes to one entity type.
pub fn entity_updated(entity_type: EntityType) -> String {
    format!("{}:updated", entity_type)
}

type Callback = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<String, Vec<(u64, Callback)>>,
}

/// In-process event bus.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    /// Create a new event bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a callback to an event.
    ///
    /// The returned handle unsubscribes on request; dropping it keeps the
    /// subscription alive.
    pub fn subscribe(
        &self,
        event: &str,
        callback: impl Fn(&serde_json::Value) + Send + Sync + 'static,
    ) -> Subscription {
        let mut registry = self.registry.lock().unwrap();
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .subscribers
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(callback)));

        Subscription {
            registry: Arc::downgrade(&self.registry),
            event: event.to_string(),
            id,
        }
    }

    /// Publish an event to all current subscribers, in subscription order.
    pub fn publish(&self, event: &str, payload: &serde_json::Value) {
        let callbacks: Vec<Callback> = {
            let registry = self.registry.lock().unwrap();
            registry
                .subscribers
                .get(event)
                .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };

        for callback in callbacks {
            callback(payload);
        }
    }

    /// Number of live subscriptions for an event.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.registry
            .lock()
            .unwrap()
            .subscribers
            .get(event)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}

/// Handle for one subscription.
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    event: String,
    id: u64,
}

impl Subscription {
    /// Remove this subscription from the bus.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap();
            if let Some(subs) = registry.subscribers.get_mut(&self.event) {
                subs.retain(|(id, _)| *id != self.id);
            }
        }
    }
}
