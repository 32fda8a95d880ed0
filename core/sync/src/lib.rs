//! Tether Sync Engine
//!
//! This module provides the client-resident offline-sync core, including:
//! - Optimistic cache writes over a durable local store
//! - A durable FIFO queue of unacknowledged local mutations
//! - A single-flight queue drain with per-item failure isolation
//! - Checkpointed incremental pull of backend-side changes
//! - Connectivity watching as explicit message passing
//! - An in-process event bus for cache change notifications

pub mod device;
pub mod engine;
pub mod events;
pub mod monitor;
pub mod pull;
pub mod queue;

// Re-export main types
pub use device::DeviceIdentity;
pub use engine::{DrainReport, SyncConfig, SyncEngine, SyncStatus};
pub use events::{entity_updated, EventBus, Subscription, SYNC_COMPLETED};
pub use monitor::{ConnectivityEvent, NetworkMonitor, NetworkMonitorHandle};
pub use pull::PullReport;
pub use queue::SyncQueue;
