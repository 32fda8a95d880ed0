//! Typed payloads and the deserialization validation boundary.
//!
//! Cache and queue rows carry opaque JSON, but a full record payload must
//! decode as the typed shape for its entity type before it crosses into the
//! cache: locally queued creates are validated on enqueue, and every row
//! fetched by the pull synchronizer is validated before merge. Unknown extra
//! fields are tolerated; missing required fields are not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::EntityType;
use crate::{Error, Result};

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub sender_id: String,
    pub body: String,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}

/// A task item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default = "Task::default_status")]
    pub status: String,
    #[serde(default)]
    pub assignee_id: Option<String>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
}

impl Task {
    fn default_status() -> String {
        "open".to_string()
    }
}

/// A file reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size_bytes: u64,
}

/// An approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: String,
    pub requester_id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default = "Approval::default_status")]
    pub status: String,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
}

impl Approval {
    fn default_status() -> String {
        "pending".to_string()
    }
}

/// A payload decoded as the typed shape for its entity type.
#[derive(Debug, Clone)]
pub enum EntityPayload {
    Message(Message),
    Task(Task),
    File(FileEntry),
    Approval(Approval),
}

impl EntityPayload {
    /// Decode a full record payload for the given entity type.
    ///
    /// # Errors
    /// - Payload is not an object or is missing required fields
    pub fn decode(entity_type: EntityType, value: &serde_json::Value) -> Result<Self> {
        let decoded = match entity_type {
            EntityType::Messages => {
                EntityPayload::Message(Self::decode_as(entity_type, value)?)
            }
            EntityType::Tasks => EntityPayload::Task(Self::decode_as(entity_type, value)?),
            EntityType::Files => EntityPayload::File(Self::decode_as(entity_type, value)?),
            EntityType::Approvals => {
                EntityPayload::Approval(Self::decode_as(entity_type, value)?)
            }
        };
        Ok(decoded)
    }

    /// Validate an update patch: a non-empty JSON object of field changes.
    ///
    /// Patches are partial by nature, so required-field checks do not apply.
    pub fn validate_patch(entity_type: EntityType, value: &serde_json::Value) -> Result<()> {
        match value.as_object() {
            Some(map) if !map.is_empty() => Ok(()),
            Some(_) => Err(Error::InvalidInput(format!(
                "Empty {} update patch",
                entity_type
            ))),
            None => Err(Error::InvalidInput(format!(
                "{} update patch must be a JSON object",
                entity_type
            ))),
        }
    }

    /// Record id carried by the payload.
    pub fn id(&self) -> &str {
        match self {
            EntityPayload::Message(m) => &m.id,
            EntityPayload::Task(t) => &t.id,
            EntityPayload::File(f) => &f.id,
            EntityPayload::Approval(a) => &a.id,
        }
    }

    fn decode_as<T: serde::de::DeserializeOwned>(
        entity_type: EntityType,
        value: &serde_json::Value,
    ) -> Result<T> {
        serde_json::from_value(value.clone()).map_err(|e| {
            Error::InvalidInput(format!("Invalid {} payload: {}", entity_type, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_message() {
        let value = json!({
            "id": "m1",
            "channel_id": "c1",
            "sender_id": "u1",
            "body": "hello",
        });
        let payload = EntityPayload::decode(EntityType::Messages, &value).unwrap();
        assert_eq!(payload.id(), "m1");
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let value = json!({"id": "m1", "body": "hello"});
        assert!(EntityPayload::decode(EntityType::Messages, &value).is_err());
    }

    #[test]
    fn test_decode_tolerates_extra_fields() {
        let value = json!({
            "id": "t1",
            "title": "ship it",
            "priority": 3,
            "labels": ["a", "b"],
        });
        let payload = EntityPayload::decode(EntityType::Tasks, &value).unwrap();
        match payload {
            EntityPayload::Task(task) => {
                assert_eq!(task.status, "open");
                assert!(task.assignee_id.is_none());
            }
            other => panic!("expected task, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_wrong_entity_type() {
        let value = json!({
            "id": "m1",
            "channel_id": "c1",
            "sender_id": "u1",
            "body": "hello",
        });
        // A message body is not a valid file payload.
        assert!(EntityPayload::decode(EntityType::Files, &value).is_err());
    }

    #[test]
    fn test_validate_patch() {
        assert!(EntityPayload::validate_patch(
            EntityType::Tasks,
            &json!({"status": "completed"})
        )
        .is_ok());
        assert!(EntityPayload::validate_patch(EntityType::Tasks, &json!({})).is_err());
        assert!(EntityPayload::validate_patch(EntityType::Tasks, &json!("done")).is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use serde_json::Value;

        fn arb_json() -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i64>().prop_map(|n| serde_json::json!(n)),
                "[a-z0-9]{0,8}".prop_map(Value::String),
            ];
            leaf.prop_recursive(3, 24, 4, |inner| {
                prop_oneof![
                    proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                    proptest::collection::hash_map("[a-z_]{1,8}", inner, 0..4)
                        .prop_map(|m| Value::Object(m.into_iter().collect())),
                ]
            })
        }

        proptest! {
            #[test]
            fn decode_never_panics(value in arb_json()) {
                for entity in EntityType::ALL {
                    let _ = EntityPayload::decode(entity, &value);
                    let _ = EntityPayload::validate_patch(entity, &value);
                }
            }
        }
    }
}
