//! Stable device identity and best-effort registration.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use tether_common::DeviceRecord;
use tether_remote::RemoteService;
use tether_store::LocalStore;

/// Metadata key holding the persisted device id.
pub(crate) const DEVICE_ID_KEY: &str = "device_id";

/// Stable, lazily created client identity.
///
/// The id is created once on first use and persists for the life of the
/// local profile. Registration is telemetry, not business data: failures
/// are logged and never enqueued for retry.
pub struct DeviceIdentity {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteService>,
    name: String,
    platform: String,
    cached: Mutex<Option<String>>,
}

impl DeviceIdentity {
    /// Create a device identity over the given store and remote.
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteService>,
        name: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            store,
            remote,
            name: name.into(),
            platform: platform.into(),
            cached: Mutex::new(None),
        }
    }

    /// Get the persisted device id, creating it on first use.
    ///
    /// Storage failures degrade to a memory-only id for the process
    /// lifetime (logged, swallowed).
    pub async fn device_id(&self) -> String {
        if let Some(id) = self.cached.lock().unwrap().clone() {
            return id;
        }

        let existing = match self.store.get_meta(DEVICE_ID_KEY).await {
            Ok(value) => value,
            Err(err) => {
                warn!("Reading device id failed: {}", err);
                None
            }
        };

        let id = match existing {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                if let Err(err) = self.store.set_meta(DEVICE_ID_KEY, &id).await {
                    warn!("Persisting device id failed; id is memory-only: {}", err);
                }
                debug!("Created device id {}", id);
                id
            }
        };

        *self.cached.lock().unwrap() = Some(id.clone());
        id
    }

    /// Upsert this device's registration record with the backend.
    ///
    /// Best-effort: failure is logged and ignored, never surfaced.
    pub async fn register(&self) {
        let record = DeviceRecord {
            device_id: self.device_id().await,
            name: self.name.clone(),
            platform: self.platform.clone(),
            last_active: Utc::now(),
        };

        match self.remote.register_device(&record).await {
            Ok(()) => debug!("Device {} registered", record.device_id),
            Err(err) => warn!("Device registration failed (ignored): {}", err),
        }
    }
}
