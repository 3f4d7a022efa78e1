//! Zone cache: memoized create-if-missing for remote execution contexts.
//!
//! Every request is billed and routed through a named zone in the remote
//! account. The cache loads the account's zone list once, memoizes it, and
//! answers `ensure_zone` from memory; only a create invalidates it. The
//! cache is owned by the client instance - constructed with it, dropped
//! with it - and `get`/`invalidate` are the only mutators.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::ClientConfig;
use crate::error::{DragnetError, Result};
use crate::http::{ApiRequest, HttpClient, HttpResponse};

/// Zone type for scrape requests routed through the unblocker product.
pub const ZONE_TYPE_UNBLOCKER: &str = "unblocker";

/// Zone type for search-engine result requests.
pub const ZONE_TYPE_SERP: &str = "serp";

/// One zone in the remote account, as returned by the active-zones listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub zone_type: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub ips: Option<serde_json::Value>,
    #[serde(default)]
    pub bandwidth: Option<serde_json::Value>,
}

/// Memoized view of the account's zones with idempotent create-if-missing.
pub struct ZoneCache<H> {
    http: Arc<H>,
    config: Arc<ClientConfig>,
    /// `None` until the first lookup; cleared again whenever a zone is
    /// created so the next lookup observes the new zone. The mutex is held
    /// across the whole check-then-create sequence, so concurrent
    /// `ensure_zone` calls serialize and cannot race each other into
    /// duplicate creates.
    zones: Mutex<Option<HashMap<String, ZoneRecord>>>,
}

impl<H: HttpClient> ZoneCache<H> {
    pub fn new(http: Arc<H>, config: Arc<ClientConfig>) -> Self {
        Self {
            http,
            config,
            zones: Mutex::new(None),
        }
    }

    /// Forget the memoized zone list; the next lookup reloads it.
    pub async fn invalidate(&self) {
        *self.zones.lock().await = None;
    }

    /// Look up a zone by name, loading the list on first use.
    pub async fn get(&self, name: &str) -> Result<Option<ZoneRecord>> {
        let mut zones = self.zones.lock().await;
        if zones.is_none() {
            *zones = Some(self.load_zones().await?);
        }
        Ok(zones.as_ref().and_then(|map| map.get(name)).cloned())
    }

    /// Idempotently guarantee that a zone named `name` with type
    /// `required_type` exists in the remote account.
    ///
    /// If the zone exists with the matching type this is a no-op answered
    /// from the memoized list. If it exists with a different type, that is a
    /// fatal configuration conflict: a [`DragnetError::ZoneConflict`] naming
    /// both types is surfaced and nothing is mutated. If it is absent, a
    /// create call is issued (a benign "already exists" response counts as
    /// success) and the cache is invalidated.
    #[tracing::instrument(skip(self))]
    pub async fn ensure_zone(&self, name: &str, required_type: &str) -> Result<()> {
        let mut zones = self.zones.lock().await;
        if zones.is_none() {
            *zones = Some(self.load_zones().await?);
        }

        if let Some(record) = zones.as_ref().and_then(|map| map.get(name)) {
            if record.zone_type == required_type {
                tracing::debug!(zone = name, "Zone already exists with required type");
                return Ok(());
            }
            tracing::error!(
                zone = name,
                required_type,
                actual_type = %record.zone_type,
                "Zone exists with conflicting type"
            );
            return Err(DragnetError::ZoneConflict {
                zone: name.to_string(),
                required: required_type.to_string(),
                actual: record.zone_type.clone(),
            });
        }

        tracing::info!(zone = name, zone_type = required_type, "Creating missing zone");
        self.create_zone(name, required_type).await?;

        // Invalidate so the next lookup observes the created zone.
        *zones = None;
        Ok(())
    }

    /// Load the full zone list and index it by name.
    async fn load_zones(&self) -> Result<HashMap<String, ZoneRecord>> {
        let request = ApiRequest {
            endpoint: self.config.api_base.clone(),
            method: "GET".to_string(),
            path: "/zone/get_active_zones".to_string(),
            body: String::new(),
        };
        let response = self
            .http
            .execute(&request, &self.config.api_token, self.config.default_timeout_ms)
            .await?;
        let body = expect_success(response, "list zones")?;

        let records: Vec<ZoneRecord> = serde_json::from_str(&body)?;
        tracing::debug!(count = records.len(), "Loaded zone list");
        Ok(records
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect())
    }

    /// Issue the zone-create call.
    async fn create_zone(&self, name: &str, zone_type: &str) -> Result<()> {
        let body = serde_json::json!({
            "zone": { "name": name, "type": zone_type },
            "plan": { "type": zone_type },
        });
        let request = ApiRequest {
            endpoint: self.config.api_base.clone(),
            method: "POST".to_string(),
            path: "/zone".to_string(),
            body: serde_json::to_string(&body)?,
        };
        let response = self
            .http
            .execute(&request, &self.config.api_token, self.config.default_timeout_ms)
            .await?;

        if response.status < 400 {
            return Ok(());
        }
        // The create is idempotent server-side: racing an external creator
        // produces a benign "already exists" rejection.
        if response.body.to_lowercase().contains("already exists") {
            tracing::debug!(zone = name, "Zone already existed remotely, treating as success");
            return Ok(());
        }
        match response.status {
            401 => Err(DragnetError::Authentication {
                status: response.status,
                body: response.body,
            }),
            status => Err(DragnetError::Api {
                status,
                body: response.body,
            }),
        }
    }
}

/// Map a non-2xx response on a management call to the client error taxonomy.
fn expect_success(response: HttpResponse, operation: &str) -> Result<String> {
    match response.status {
        s if s < 400 => Ok(response.body),
        401 => Err(DragnetError::Authentication {
            status: 401,
            body: response.body,
        }),
        status => {
            tracing::warn!(status, operation, "Management call failed");
            Err(DragnetError::Api {
                status,
                body: response.body,
            })
        }
    }
}
