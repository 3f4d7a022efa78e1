//! Client library for remote scrape/search APIs with retry logic and
//! concurrency control.
//!
//! This crate submits scraping and search jobs to a remote
//! content-retrieval service and returns results reliably despite an
//! unreliable, rate-limited, and sometimes slow-async backend. Batches fan
//! out under a bounded-concurrency admission gate, transient faults are
//! retried with jittered exponential backoff, zones are memoized and
//! created on demand, and asynchronous dataset jobs are polled to
//! completion over a wide randomized interval.

pub mod batch;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod retry;
pub mod snapshot;
pub mod validate;
pub mod zone;

// Re-export commonly used types
pub use batch::{BatchExecutor, BatchResult};
pub use client::{ScrapeOptions, ScraperClient, SearchOptions};
pub use config::{ClientConfig, PollConfig};
pub use dispatch::{
    AttemptFailure, Payload, RequestDispatcher, ResolvedOptions, ResponseFormat, SearchEngine,
    WorkInput, WorkItem, WorkItemId,
};
pub use error::{DragnetError, Result};
pub use http::{ApiRequest, HttpClient, HttpResponse, MockHttpClient, ReqwestHttpClient};
pub use retry::{RetryDecision, RetryPolicy};
pub use snapshot::{
    AnySnapshot, DownloadOutcome, PollOutcome, Snapshot, SnapshotData, SnapshotPoller,
    SnapshotStatus,
};
pub use zone::{ZoneCache, ZoneRecord};
