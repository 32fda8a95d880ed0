//! REST client for the remote data service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response, StatusCode};
use serde::Serialize;
use tracing::warn;
use url::Url;

use tether_common::{DeviceRecord, EntityType, Error, Result};

use crate::service::{AuditEntry, RemoteService};

#[derive(Serialize)]
struct CacheStatsBody {
    entity_type: EntityType,
    record_count: u64,
    pulled_at: DateTime<Utc>,
}

/// Remote data service over HTTP/JSON.
///
/// Talks to `{base}/rest/{entity}` collections plus the `devices`, `audit`
/// and `cache-status` endpoints, authenticating with a bearer key.
pub struct RestRemote {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl RestRemote {
    /// Create a new REST client.
    ///
    /// # Errors
    /// - `base_url` is not a valid absolute URL
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::InvalidInput(format!("Invalid base URL: {}", e)))?;

        let http = Client::builder()
            .user_agent("Tether/0.1")
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.to_string();
        if !url.ends_with('/') {
            url.push('/');
        }
        url.push_str("rest/");
        url.push_str(&segments.join("/"));
        url
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    /// Map an HTTP response onto the error taxonomy and decode the body.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| Error::Serialization(format!("Invalid response body: {}", e)));
        }
        Err(Self::status_error(status, response).await)
    }

    /// Like `handle_response`, for endpoints whose body we discard.
    async fn expect_ok(&self, response: Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(Self::status_error(status, response).await)
    }

    async fn status_error(status: StatusCode, response: Response) -> Error {
        let body = response.text().await.unwrap_or_default();
        warn!("Backend responded {}: {}", status, body);
        match status {
            StatusCode::NOT_FOUND => Error::NotFound(body),
            s if s.is_client_error() => Error::Rejected(format!("{}: {}", s, body)),
            s => Error::Network(format!("Backend returned {}: {}", s, body)),
        }
    }
}

#[async_trait]
impl RemoteService for RestRemote {
    fn name(&self) -> &str {
        "rest"
    }

    async fn insert(
        &self,
        entity_type: EntityType,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = self.endpoint(&[entity_type.as_str()]);
        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, self.auth_header())
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Insert failed: {}", e)))?;

        self.handle_response(response).await
    }

    async fn update(
        &self,
        entity_type: EntityType,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = self.endpoint(&[entity_type.as_str(), id]);
        let response = self
            .http
            .patch(&url)
            .header(header::AUTHORIZATION, self.auth_header())
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Update failed: {}", e)))?;

        self.handle_response(response).await
    }

    async fn delete(&self, entity_type: EntityType, id: &str) -> Result<()> {
        let url = self.endpoint(&[entity_type.as_str(), id]);
        let response = self
            .http
            .delete(&url)
            .header(header::AUTHORIZATION, self.auth_header())
            .send()
            .await
            .map_err(|e| Error::Network(format!("Delete failed: {}", e)))?;

        self.expect_ok(response).await
    }

    async fn select_since(
        &self,
        entity_type: EntityType,
        since: DateTime<Utc>,
    ) -> Result<Vec<serde_json::Value>> {
        let url = self.endpoint(&[entity_type.as_str()]);
        let response = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, self.auth_header())
            .query(&[("modified_since", since.to_rfc3339())])
            .send()
            .await
            .map_err(|e| Error::Network(format!("Select failed: {}", e)))?;

        self.handle_response(response).await
    }

    async fn register_device(&self, device: &DeviceRecord) -> Result<()> {
        let url = self.endpoint(&["devices"]);
        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, self.auth_header())
            .json(device)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Device registration failed: {}", e)))?;

        self.expect_ok(response).await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let url = self.endpoint(&["audit"]);
        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, self.auth_header())
            .json(entry)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Audit append failed: {}", e)))?;

        self.expect_ok(response).await
    }

    async fn report_cache_stats(
        &self,
        entity_type: EntityType,
        record_count: u64,
        pulled_at: DateTime<Utc>,
    ) -> Result<()> {
        let url = self.endpoint(&["cache-status"]);
        let body = CacheStatsBody {
            entity_type,
            record_count,
            pulled_at,
        };
        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, self.auth_header())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Cache stats report failed: {}", e)))?;

        self.expect_ok(response).await
    }
}
