//! SQLite-backed local store.
//!
//! Persists cached records, the pending mutation queue, and sync metadata
//! so they survive restarts.

use rusqlite::{params, Connection};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::DateTime;
use tracing::{debug, info};

use tether_common::{CacheRecord, EntityType, Error, Operation, QueueItem, RecordState, Result};

use crate::store::LocalStore;

fn db_err(err: rusqlite::Error) -> Error {
    Error::Storage(err.to_string())
}

/// Record table name for an entity type. Entity names come from a closed
/// enum, so interpolating them into SQL is safe.
fn records_table(entity_type: EntityType) -> String {
    format!("records_{}", entity_type.as_str())
}

/// Local store backed by a SQLite database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open the local store database.
    ///
    /// # Errors
    /// - Database creation or schema migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(db_err)?;

        let mut schema = String::new();
        for entity_type in EntityType::ALL {
            schema.push_str(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    payload TEXT NOT NULL,
                    updated_at INTEGER NOT NULL,
                    state TEXT NOT NULL
                );
                "#,
                records_table(entity_type)
            ));
        }
        schema.push_str(
            r#"
            CREATE TABLE IF NOT EXISTS sync_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                operation TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                record_id TEXT,
                payload TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            );

            CREATE TABLE IF NOT EXISTS sync_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        );
        conn.execute_batch(&schema).map_err(db_err)?;

        info!("Local store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }
}

type RecordRow = (String, String, i64, String);
type QueueRow = (String, String, String, Option<String>, String, i64, u32, Option<String>);

fn record_from_row(entity_type: EntityType, row: RecordRow) -> Result<CacheRecord> {
    let (id, payload, updated_at, state) = row;
    Ok(CacheRecord {
        entity_type,
        id,
        payload: serde_json::from_str(&payload)?,
        updated_at: DateTime::from_timestamp_millis(updated_at).unwrap_or(DateTime::UNIX_EPOCH),
        state: RecordState::from_str(&state)?,
    })
}

fn queue_item_from_row(row: QueueRow) -> Result<QueueItem> {
    let (id, operation, entity_type, record_id, payload, enqueued_at, retry_count, last_error) =
        row;
    Ok(QueueItem {
        id,
        operation: Operation::from_str(&operation)?,
        entity_type: EntityType::from_str(&entity_type)?,
        record_id,
        payload: serde_json::from_str(&payload)?,
        enqueued_at: DateTime::from_timestamp_millis(enqueued_at).unwrap_or(DateTime::UNIX_EPOCH),
        retry_count,
        last_error,
    })
}

#[async_trait]
impl LocalStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn put_record(&self, record: &CacheRecord) -> Result<()> {
        debug!("Upserting {} record {}", record.entity_type, record.id);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (id, payload, updated_at, state) VALUES (?1, ?2, ?3, ?4)",
                records_table(record.entity_type)
            ),
            params![
                record.id,
                serde_json::to_string(&record.payload)?,
                record.updated_at.timestamp_millis(),
                record.state.as_str(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn put_records(&self, records: &[CacheRecord]) -> Result<()> {
        for record in records {
            self.put_record(record).await?;
        }
        Ok(())
    }

    async fn get_record(&self, entity_type: EntityType, id: &str) -> Result<Option<CacheRecord>> {
        let row: Option<RecordRow> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT id, payload, updated_at, state FROM {} WHERE id = ?1",
                    records_table(entity_type)
                ))
                .map_err(db_err)?;

            match stmt.query_row([id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            }) {
                Ok(raw) => Some(raw),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(db_err(e)),
            }
        };

        row.map(|raw| record_from_row(entity_type, raw)).transpose()
    }

    async fn all_records(&self, entity_type: EntityType) -> Result<Vec<CacheRecord>> {
        let rows: Vec<RecordRow> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT id, payload, updated_at, state FROM {} ORDER BY id",
                    records_table(entity_type)
                ))
                .map_err(db_err)?;

            let mapped = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })
                .map_err(db_err)?;

            mapped
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?
        };

        rows.into_iter()
            .map(|raw| record_from_row(entity_type, raw))
            .collect()
    }

    async fn count_records(&self, entity_type: EntityType) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", records_table(entity_type)),
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count as u64)
    }

    async fn delete_record(&self, entity_type: EntityType, id: &str) -> Result<()> {
        debug!("Deleting {} record {}", entity_type, id);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", records_table(entity_type)),
            params![id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        info!("Clearing local store");
        let conn = self.conn.lock().unwrap();
        for entity_type in EntityType::ALL {
            conn.execute(&format!("DELETE FROM {}", records_table(entity_type)), [])
                .map_err(db_err)?;
        }
        conn.execute("DELETE FROM sync_queue", []).map_err(db_err)?;
        conn.execute("DELETE FROM sync_meta", []).map_err(db_err)?;
        Ok(())
    }

    async fn append_queue(&self, item: &QueueItem) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO sync_queue
            (id, operation, entity_type, record_id, payload, enqueued_at, retry_count, last_error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                item.id,
                item.operation.as_str(),
                item.entity_type.as_str(),
                item.record_id,
                serde_json::to_string(&item.payload)?,
                item.enqueued_at.timestamp_millis(),
                item.retry_count,
                item.last_error,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_queue_item(&self, item: &QueueItem) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sync_queue SET retry_count = ?1, last_error = ?2 WHERE id = ?3",
            params![item.retry_count, item.last_error, item.id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn remove_queue_item(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM sync_queue WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(())
    }

    async fn load_queue(&self) -> Result<Vec<QueueItem>> {
        let rows: Vec<QueueRow> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, operation, entity_type, record_id, payload,
                           enqueued_at, retry_count, last_error
                    FROM sync_queue ORDER BY seq
                    "#,
                )
                .map_err(db_err)?;

            let mapped = stmt
                .query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                })
                .map_err(db_err)?;

            mapped
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?
        };

        rows.into_iter().map(queue_item_from_row).collect()
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT value FROM sync_meta WHERE key = ?1")
            .map_err(db_err)?;

        match stmt.query_row([key], |row| row.get(0)) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tether_common::Operation;

    fn message_record(id: &str) -> CacheRecord {
        CacheRecord::new_synced(
            EntityType::Messages,
            id,
            json!({"id": id, "channel_id": "c1", "sender_id": "u1", "body": "hello"}),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_record_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let record = message_record("m1");

        store.put_record(&record).await.unwrap();
        let loaded = store
            .get_record(EntityType::Messages, "m1")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(loaded.id, record.id);
        assert_eq!(loaded.payload, record.payload);
        assert_eq!(loaded.state, RecordState::Synced);
    }

    #[tokio::test]
    async fn test_record_tables_are_per_entity_type() {
        let store = SqliteStore::in_memory().unwrap();
        store.put_record(&message_record("m1")).await.unwrap();

        assert!(store
            .get_record(EntityType::Tasks, "m1")
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.count_records(EntityType::Messages).await.unwrap(), 1);
        assert_eq!(store.count_records(EntityType::Tasks).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queue_preserves_enqueue_order() {
        let store = SqliteStore::in_memory().unwrap();

        let mut ids = Vec::new();
        for i in 0..5 {
            let item = QueueItem::new(
                Operation::Create,
                EntityType::Messages,
                json!({"body": format!("msg {i}")}),
                None,
            );
            ids.push(item.id.clone());
            store.append_queue(&item).await.unwrap();
        }

        let loaded = store.load_queue().await.unwrap();
        let loaded_ids: Vec<String> = loaded.into_iter().map(|i| i.id).collect();
        assert_eq!(loaded_ids, ids);
    }

    #[tokio::test]
    async fn test_queue_retry_bookkeeping_in_place() {
        let store = SqliteStore::in_memory().unwrap();

        let first = QueueItem::new(Operation::Create, EntityType::Tasks, json!({}), None);
        let mut second = QueueItem::new(Operation::Create, EntityType::Tasks, json!({}), None);
        store.append_queue(&first).await.unwrap();
        store.append_queue(&second).await.unwrap();

        second.retry_count = 3;
        second.last_error = Some("connection refused".to_string());
        store.update_queue_item(&second).await.unwrap();

        let loaded = store.load_queue().await.unwrap();
        // Position unchanged, bookkeeping updated.
        assert_eq!(loaded[1].id, second.id);
        assert_eq!(loaded[1].retry_count, 3);
        assert_eq!(loaded[1].last_error.as_deref(), Some("connection refused"));
        assert_eq!(loaded[0].retry_count, 0);
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("tether.db");

        let item = QueueItem::new(
            Operation::Update,
            EntityType::Tasks,
            json!({"status": "completed"}),
            Some("t1".to_string()),
        );

        {
            let store = SqliteStore::open(&db_path).unwrap();
            store.append_queue(&item).await.unwrap();
        }

        let store = SqliteStore::open(&db_path).unwrap();
        let loaded = store.load_queue().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, item.id);
        assert_eq!(loaded[0].record_id.as_deref(), Some("t1"));
        assert_eq!(loaded[0].payload, item.payload);
    }

    #[tokio::test]
    async fn test_meta() {
        let store = SqliteStore::in_memory().unwrap();

        assert!(store.get_meta("device_id").await.unwrap().is_none());
        store.set_meta("device_id", "d-123").await.unwrap();
        assert_eq!(
            store.get_meta("device_id").await.unwrap().as_deref(),
            Some("d-123")
        );

        store.set_meta("device_id", "d-456").await.unwrap();
        assert_eq!(
            store.get_meta("device_id").await.unwrap().as_deref(),
            Some("d-456")
        );
    }

    #[tokio::test]
    async fn test_clear_empties_everything() {
        let store = SqliteStore::in_memory().unwrap();
        store.put_record(&message_record("m1")).await.unwrap();
        store
            .append_queue(&QueueItem::new(
                Operation::Create,
                EntityType::Messages,
                json!({}),
                None,
            ))
            .await
            .unwrap();
        store.set_meta("checkpoint:messages", "x").await.unwrap();

        store.clear().await.unwrap();

        assert_eq!(store.count_records(EntityType::Messages).await.unwrap(), 0);
        assert!(store.load_queue().await.unwrap().is_empty());
        assert!(store.get_meta("checkpoint:messages").await.unwrap().is_none());
    }
}
