//! The scraper client facade.
//!
//! `ScraperClient` owns everything with a lifetime: the configuration, the
//! transport, the zone cache, the snapshot poller, and the registry of
//! in-progress snapshot waits. All network-touching operations are
//! asynchronous tasks the caller awaits; there is no blocking facade.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::batch::{BatchExecutor, BatchResult};
use crate::config::ClientConfig;
use crate::dispatch::{
    Payload, RequestDispatcher, ResolvedOptions, ResponseFormat, SearchEngine, WorkInput, WorkItem,
};
use crate::error::Result;
use crate::http::{HttpClient, ReqwestHttpClient};
use crate::snapshot::{self, Snapshot, SnapshotPoller, SnapshotStatus};
use crate::validate;
use crate::zone::{ZONE_TYPE_SERP, ZONE_TYPE_UNBLOCKER, ZoneCache};

/// Caller-facing options for scrape requests. Unset fields fall back to the
/// client configuration.
#[derive(Debug, Clone, Default)]
pub struct ScrapeOptions {
    /// Zone to execute through; defaults to `ClientConfig::default_zone`.
    pub zone: Option<String>,
    /// Response format; defaults to raw text.
    pub format: ResponseFormat,
    /// HTTP method the remote service should use against the target.
    pub method: Option<String>,
    /// Two-letter country code for geo-targeted execution.
    pub country: Option<String>,
    /// Additional output transform (e.g. "markdown").
    pub data_format: Option<String>,
    /// Per-item timeout override in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Caller-facing options for search requests.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Zone to execute through; defaults to `ClientConfig::serp_zone`.
    pub zone: Option<String>,
    /// Search engine whose results page is fetched.
    pub engine: SearchEngine,
    /// Response format; defaults to raw text.
    pub format: ResponseFormat,
    /// Two-letter country code for geo-targeted execution.
    pub country: Option<String>,
    /// Per-item timeout override in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Client for the remote scrape/search service.
///
/// Generic over the transport so tests can swap in
/// [`MockHttpClient`](crate::http::MockHttpClient).
pub struct ScraperClient<H: HttpClient = ReqwestHttpClient> {
    config: Arc<ClientConfig>,
    zones: ZoneCache<H>,
    dispatcher: Arc<RequestDispatcher<H>>,
    batch: BatchExecutor<H>,
    poller: SnapshotPoller<H>,
    /// Cancellation tokens for in-progress snapshot waits, keyed by
    /// snapshot id so another task can cut a wait short.
    snapshot_waits: Arc<DashMap<String, CancellationToken>>,
}

impl ScraperClient<ReqwestHttpClient> {
    /// Create a client with the given bearer token and default configuration.
    pub fn new(api_token: impl Into<String>) -> Self {
        Self::with_http_client(ClientConfig::new(api_token), ReqwestHttpClient::new())
    }

    /// Create a client configured from the environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self::with_http_client(
            ClientConfig::from_env()?,
            ReqwestHttpClient::new(),
        ))
    }
}

impl<H: HttpClient + 'static> ScraperClient<H> {
    /// Create a client with an explicit configuration and transport.
    pub fn with_http_client(config: ClientConfig, http: H) -> Self {
        let config = Arc::new(config);
        let http = Arc::new(http);
        let dispatcher = Arc::new(RequestDispatcher::new(http.clone(), config.clone()));
        let batch = BatchExecutor::new(dispatcher.clone(), config.concurrency);
        Self {
            zones: ZoneCache::new(http.clone(), config.clone()),
            poller: SnapshotPoller::new(http, config.clone()),
            dispatcher,
            batch,
            config,
            snapshot_waits: Arc::new(DashMap::new()),
        }
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The zone cache owned by this client.
    pub fn zones(&self) -> &ZoneCache<H> {
        &self.zones
    }

    /// The snapshot poller owned by this client.
    pub fn poller(&self) -> &SnapshotPoller<H> {
        &self.poller
    }

    // ------------------------------------------------------------------
    // Synchronous scrape/search execution (single and batch)
    // ------------------------------------------------------------------

    /// Scrape one URL and return its payload.
    #[tracing::instrument(skip(self, options))]
    pub async fn scrape(&self, url: &str, options: ScrapeOptions) -> Result<Payload> {
        validate::url(url)?;
        let resolved = self.resolve_scrape(&options)?;
        self.zones
            .ensure_zone(&resolved.zone, ZONE_TYPE_UNBLOCKER)
            .await?;
        let item = WorkItem::new(WorkInput::Url(url.to_string()), resolved);
        self.dispatcher.dispatch(&item).await
    }

    /// Scrape many URLs under the configured concurrency cap.
    ///
    /// The result is positional: slot `i` holds the outcome for `urls[i]`.
    /// A failing URL fills its own slot and never aborts the others.
    #[tracing::instrument(skip(self, urls, options), fields(count = urls.len()))]
    pub async fn scrape_batch(&self, urls: &[String], options: ScrapeOptions) -> Result<BatchResult> {
        for url in urls {
            validate::url(url)?;
        }
        let resolved = self.resolve_scrape(&options)?;
        self.zones
            .ensure_zone(&resolved.zone, ZONE_TYPE_UNBLOCKER)
            .await?;
        let items = urls
            .iter()
            .map(|url| WorkItem::new(WorkInput::Url(url.clone()), resolved.clone()))
            .collect();
        Ok(self.batch.execute(items).await)
    }

    /// Run one search query and return the results page payload.
    #[tracing::instrument(skip(self, options))]
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<Payload> {
        validate::query(query)?;
        let resolved = self.resolve_search(&options)?;
        self.zones.ensure_zone(&resolved.zone, ZONE_TYPE_SERP).await?;
        let item = WorkItem::new(
            WorkInput::Query {
                query: query.to_string(),
                engine: options.engine,
            },
            resolved,
        );
        self.dispatcher.dispatch(&item).await
    }

    /// Run many search queries under the configured concurrency cap.
    #[tracing::instrument(skip(self, queries, options), fields(count = queries.len()))]
    pub async fn search_batch(
        &self,
        queries: &[String],
        options: SearchOptions,
    ) -> Result<BatchResult> {
        for query in queries {
            validate::query(query)?;
        }
        let resolved = self.resolve_search(&options)?;
        self.zones.ensure_zone(&resolved.zone, ZONE_TYPE_SERP).await?;
        let items = queries
            .iter()
            .map(|query| {
                WorkItem::new(
                    WorkInput::Query {
                        query: query.clone(),
                        engine: options.engine,
                    },
                    resolved.clone(),
                )
            })
            .collect();
        Ok(self.batch.execute(items).await)
    }

    // ------------------------------------------------------------------
    // Asynchronous dataset jobs
    // ------------------------------------------------------------------

    /// Submit an asynchronous collection job for a dataset.
    pub async fn trigger_dataset(
        &self,
        dataset_id: &str,
        inputs: &[serde_json::Value],
    ) -> Result<Snapshot<snapshot::Running>> {
        self.poller.trigger(dataset_id, inputs).await
    }

    /// Query a snapshot's current status by id.
    pub async fn snapshot_status(&self, snapshot_id: &str) -> Result<SnapshotStatus> {
        self.poller.status(snapshot_id).await
    }

    /// Poll a running snapshot until ready and download its payload.
    ///
    /// The wait is registered under the snapshot id so
    /// [`cancel_snapshot_wait`](Self::cancel_snapshot_wait) can cut it
    /// short from another task.
    pub async fn wait_for_snapshot(
        &self,
        snapshot: Snapshot<snapshot::Running>,
    ) -> Result<Payload> {
        let snapshot_id = snapshot.data.snapshot_id.clone();
        let token = CancellationToken::new();
        self.snapshot_waits.insert(snapshot_id.clone(), token.clone());
        let waits = self.snapshot_waits.clone();
        let _deregister = scopeguard::guard(snapshot_id, move |id| {
            waits.remove(&id);
        });
        self.poller.wait_ready(snapshot, token).await
    }

    /// Download a snapshot payload without polling.
    ///
    /// If the job is not ready yet, surfaces
    /// [`DragnetError::SnapshotNotReady`](crate::error::DragnetError::SnapshotNotReady)
    /// immediately instead of waiting.
    pub async fn download_snapshot(&self, snapshot_id: &str) -> Result<Payload> {
        self.poller.download_now(snapshot_id).await
    }

    /// Cancel an in-progress [`wait_for_snapshot`](Self::wait_for_snapshot)
    /// by snapshot id.
    ///
    /// The waiting task terminates the remote job and returns
    /// `SnapshotCanceled`. Returns false if no wait is registered under the
    /// id.
    pub fn cancel_snapshot_wait(&self, snapshot_id: &str) -> bool {
        match self.snapshot_waits.get(snapshot_id) {
            Some(entry) => {
                entry.value().cancel();
                true
            }
            None => false,
        }
    }

    /// Terminate a running snapshot job remotely.
    pub async fn cancel_snapshot(
        &self,
        snapshot: Snapshot<snapshot::Running>,
    ) -> Result<Snapshot<snapshot::Canceled>> {
        snapshot.cancel(&self.poller).await
    }

    // ------------------------------------------------------------------

    fn resolve_scrape(&self, options: &ScrapeOptions) -> Result<ResolvedOptions> {
        let zone = options
            .zone
            .clone()
            .unwrap_or_else(|| self.config.default_zone.clone());
        validate::zone_name(&zone)?;
        Ok(ResolvedOptions {
            zone,
            format: options.format,
            method: options.method.clone(),
            country: options.country.clone(),
            data_format: options.data_format.clone(),
            timeout_ms: options.timeout_ms,
        })
    }

    fn resolve_search(&self, options: &SearchOptions) -> Result<ResolvedOptions> {
        let zone = options
            .zone
            .clone()
            .unwrap_or_else(|| self.config.serp_zone.clone());
        validate::zone_name(&zone)?;
        Ok(ResolvedOptions {
            zone,
            format: options.format,
            method: None,
            country: options.country.clone(),
            data_format: None,
            timeout_ms: options.timeout_ms,
        })
    }
}
