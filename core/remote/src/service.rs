//! Remote service trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tether_common::{DeviceRecord, EntityType, Operation, Result};

/// Status of an audited queue operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    /// The drain is about to dispatch this operation.
    Processing,
    /// The dispatch failed; the item stays queued.
    Failed,
}

/// One entry in the backend's append-only queued-operation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Client-generated entry id.
    pub id: String,
    /// Device that attempted the operation.
    pub device_id: String,
    /// Entity type of the queued mutation.
    pub entity_type: EntityType,
    /// Kind of mutation.
    pub operation: Operation,
    /// Target record id, if known.
    pub record_id: Option<String>,
    /// Mutation payload as dispatched.
    pub payload: serde_json::Value,
    /// Outcome being recorded.
    pub status: AuditStatus,
    /// Error text for failed attempts.
    pub error: Option<String>,
    /// Retry count at the time of recording.
    pub retry_count: u32,
    /// When the entry was recorded (client clock).
    pub recorded_at: DateTime<Utc>,
}

/// Remote data service used by the queue processor and pull synchronizer.
///
/// Payloads are opaque JSON; the backend owns validation and authoritative
/// timestamps. Implementations handle their own authentication.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Get the service name (e.g. "rest", "memory").
    fn name(&self) -> &str;

    /// Insert a new record.
    ///
    /// # Postconditions
    /// - Returns the stored record as the backend sees it
    ///
    /// # Errors
    /// - Transport failure (`Network`)
    /// - Validation or permission rejection (`Rejected`)
    async fn insert(
        &self,
        entity_type: EntityType,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value>;

    /// Update an existing record by id.
    async fn update(
        &self,
        entity_type: EntityType,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value>;

    /// Delete a record by id.
    async fn delete(&self, entity_type: EntityType, id: &str) -> Result<()>;

    /// Fetch records modified at or after `since`.
    async fn select_since(
        &self,
        entity_type: EntityType,
        since: DateTime<Utc>,
    ) -> Result<Vec<serde_json::Value>>;

    /// Upsert this device's registration record.
    async fn register_device(&self, device: &DeviceRecord) -> Result<()>;

    /// Append an entry to the queued-operation audit log.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<()>;

    /// Report local cache size for one entity type (diagnostics only).
    async fn report_cache_stats(
        &self,
        entity_type: EntityType,
        record_count: u64,
        pulled_at: DateTime<Utc>,
    ) -> Result<()>;
}
