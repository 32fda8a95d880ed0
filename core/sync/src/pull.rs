//! Checkpointed incremental pull of backend-side changes.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, warn};

use tether_common::{CacheRecord, EntityPayload, EntityType, Result};
use tether_remote::RemoteService;
use tether_store::LocalStore;

use crate::engine::{meta, SyncEngine};
use crate::events;

/// Result of one pull for one entity type.
#[derive(Debug, Clone)]
pub struct PullReport {
    /// Entity type that was pulled.
    pub entity_type: EntityType,
    /// Records fetched and merged into the cache.
    pub fetched: usize,
    /// Backend rows skipped because they failed payload validation.
    pub invalid: usize,
    /// New checkpoint, if the pull completed.
    pub checkpoint: Option<DateTime<Utc>>,
}

impl PullReport {
    fn empty(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            fetched: 0,
            invalid: 0,
            checkpoint: None,
        }
    }
}

impl SyncEngine {
    /// Fetch backend records modified since the local checkpoint and merge
    /// them into the cache. The server payload wins per record id.
    ///
    /// A no-op while offline. Failures are caught here and reported as an
    /// empty pull; they never propagate to the caller. Consumers call this
    /// opportunistically; it is not auto-triggered by reconnect.
    pub async fn sync_from_server(&self, entity_type: EntityType) -> PullReport {
        if !self.is_online() {
            debug!("Offline; skipping pull for {}", entity_type);
            return PullReport::empty(entity_type);
        }

        match self.pull(entity_type).await {
            Ok(report) => report,
            Err(err) => {
                warn!("Pull for {} failed: {}", entity_type, err);
                PullReport::empty(entity_type)
            }
        }
    }

    /// Read the per-type pull checkpoint, defaulting to the epoch.
    pub async fn checkpoint(&self, entity_type: EntityType) -> DateTime<Utc> {
        match self.store.get_meta(&meta::checkpoint(entity_type)).await {
            Ok(Some(value)) => DateTime::parse_from_rfc3339(&value)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or(DateTime::UNIX_EPOCH),
            Ok(None) => DateTime::UNIX_EPOCH,
            Err(err) => {
                warn!("Reading checkpoint for {} failed: {}", entity_type, err);
                DateTime::UNIX_EPOCH
            }
        }
    }

    async fn pull(&self, entity_type: EntityType) -> Result<PullReport> {
        let since = self.checkpoint(entity_type).await;
        let rows = self.remote.select_since(entity_type, since).await?;

        let mut records = Vec::new();
        let mut invalid = 0;
        for row in &rows {
            match EntityPayload::decode(entity_type, row) {
                Ok(decoded) => {
                    let updated_at = row
                        .get("updated_at")
                        .and_then(|value| value.as_str())
                        .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
                        .map(|t| t.with_timezone(&Utc))
                        .unwrap_or_else(Utc::now);
                    records.push(CacheRecord::new_synced(
                        entity_type,
                        decoded.id(),
                        row.clone(),
                        updated_at,
                    ));
                }
                Err(err) => {
                    warn!("Skipping invalid {} row from backend: {}", entity_type, err);
                    invalid += 1;
                }
            }
        }

        let fetched = records.len();
        if fetched > 0 {
            self.store.put_records(&records).await?;
            self.touch_last_write(entity_type).await;
            self.bus
                .publish(&events::entity_updated(entity_type), &json!({ "count": fetched }));
        }

        let pulled_at = Utc::now();
        self.store
            .set_meta(&meta::checkpoint(entity_type), &pulled_at.to_rfc3339())
            .await?;

        let total = self
            .store
            .count_records(entity_type)
            .await
            .unwrap_or(fetched as u64);
        if let Err(err) = self
            .remote
            .report_cache_stats(entity_type, total, pulled_at)
            .await
        {
            debug!("Cache stats report for {} failed (ignored): {}", entity_type, err);
        }

        debug!("Pulled {} {} records ({} invalid)", fetched, entity_type, invalid);
        Ok(PullReport {
            entity_type,
            fetched,
            invalid,
            checkpoint: Some(pulled_at),
        })
    }
}
