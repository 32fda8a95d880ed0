//! Core data model for the offline-sync engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Entity types tracked by the offline cache.
///
/// Each variant corresponds to one durable local table and one backend
/// collection. The wire and storage name is the lowercase plural form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Messages,
    Tasks,
    Files,
    Approvals,
}

impl EntityType {
    /// All tracked entity types, in schema order.
    pub const ALL: [EntityType; 4] = [
        EntityType::Messages,
        EntityType::Tasks,
        EntityType::Files,
        EntityType::Approvals,
    ];

    /// Get the wire/storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Messages => "messages",
            EntityType::Tasks => "tasks",
            EntityType::Files => "files",
            EntityType::Approvals => "approvals",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "messages" => Ok(EntityType::Messages),
            "tasks" => Ok(EntityType::Tasks),
            "files" => Ok(EntityType::Files),
            "approvals" => Ok(EntityType::Approvals),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown entity type: {}",
                other
            ))),
        }
    }
}

/// Kind of local mutation queued for the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// New record to insert.
    Create,
    /// Existing record to update by id.
    Update,
    /// Record to delete by id.
    Delete,
}

impl Operation {
    /// Get the wire/storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown operation: {}",
                other
            ))),
        }
    }
}

/// Sync state of a cached record, as surfaced to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    /// Record matches the last known server state.
    Synced,
    /// A local mutation for this record is queued and unacknowledged.
    Pending,
    /// The last drain attempt for this record's mutation failed.
    Failed,
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::Synced => "synced",
            RecordState::Pending => "pending",
            RecordState::Failed => "failed",
        }
    }
}

impl FromStr for RecordState {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "synced" => Ok(RecordState::Synced),
            "pending" => Ok(RecordState::Pending),
            "failed" => Ok(RecordState::Failed),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown record state: {}",
                other
            ))),
        }
    }
}

/// A locally cached copy of one backend record.
///
/// `updated_at` is the modification marker used for incremental pull;
/// server-written records carry the server's timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Entity type this record belongs to.
    pub entity_type: EntityType,
    /// Record id (shared with the backend).
    pub id: String,
    /// Opaque JSON payload.
    pub payload: serde_json::Value,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Sync state shown to consumers.
    pub state: RecordState,
}

impl CacheRecord {
    /// Create a record for an optimistic local write.
    pub fn new_pending(
        entity_type: EntityType,
        id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            entity_type,
            id: id.into(),
            payload,
            updated_at: Utc::now(),
            state: RecordState::Pending,
        }
    }

    /// Create a record from server truth.
    pub fn new_synced(
        entity_type: EntityType,
        id: impl Into<String>,
        payload: serde_json::Value,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_type,
            id: id.into(),
            payload,
            updated_at,
            state: RecordState::Synced,
        }
    }
}

/// One unacknowledged local mutation.
///
/// Persists until the backend acknowledges the operation; a failed attempt
/// leaves the item in place with `retry_count` incremented.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Client-generated unique id.
    pub id: String,
    /// Kind of mutation.
    pub operation: Operation,
    /// Entity type the mutation applies to.
    pub entity_type: EntityType,
    /// Target record id; `None` for create.
    pub record_id: Option<String>,
    /// Mutation payload.
    pub payload: serde_json::Value,
    /// When the mutation was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Number of failed drain attempts. Unbounded.
    pub retry_count: u32,
    /// Error from the most recent failed attempt.
    pub last_error: Option<String>,
}

impl QueueItem {
    /// Construct a fresh queue item for a local mutation.
    pub fn new(
        operation: Operation,
        entity_type: EntityType,
        payload: serde_json::Value,
        record_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation,
            entity_type,
            record_id,
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
            last_error: None,
        }
    }
}

/// Device metadata registered with the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Stable client-generated device id.
    pub device_id: String,
    /// Display name.
    pub name: String,
    /// Platform string (e.g. "linux", "macos", "web").
    pub platform: String,
    /// Last time this device checked in.
    pub last_active: DateTime<Utc>,
}
