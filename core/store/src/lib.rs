//! Durable local store for the offline-sync core.
//!
//! This module provides a trait-based interface over the client-resident
//! persistence layer: one record table per tracked entity type, the pending
//! mutation queue, and a small metadata table (checkpoints, device id,
//! last-write markers).
//!
//! # Design Principles
//! - Store isolation: no sync or network logic below this seam
//! - Async operations: all calls are non-blocking at the API
//! - Substitutable backends: SQLite for production, memory for tests

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::LocalStore;
