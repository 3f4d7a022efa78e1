//! Asynchronous snapshot jobs and their lifecycle poller.
//!
//! Dataset-style workloads run asynchronously on the remote service: a
//! trigger call returns a snapshot id, and the job is then queried by id
//! until it reaches a terminal status. This module implements the lifecycle
//! as a typestate machine - a `Snapshot<Running>` can only poll or cancel,
//! and only a `Snapshot<Ready>` can download - plus the poller that drives
//! the loop with a wide randomized interval.
//!
//! ```text
//! trigger() ──> Snapshot<Running> ──poll()──> Snapshot<Running>   (still running)
//!                     │                 ──> Snapshot<Ready> ──download()──> Payload
//!                     │                 ──> Err(SnapshotFailed)             │
//!                     │                                     (HTTP 202) ─────┘
//!                     │                                      demotes back to Running
//!                     └──cancel()──> Snapshot<Canceled>
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::dispatch::Payload;
use crate::error::{DragnetError, Result};
use crate::http::{ApiRequest, HttpClient, HttpResponse};

/// Base path for the dataset snapshot endpoints.
const SNAPSHOT_PATH: &str = "/datasets/v3/snapshot";

/// Path for triggering a dataset collection.
const TRIGGER_PATH: &str = "/datasets/v3/trigger";

/// Marker trait for valid snapshot states.
pub trait SnapshotState: Send + Sync {}

/// A snapshot job on the remote service.
///
/// Uses the typestate pattern to ensure type-safe state transitions. The
/// generic parameter `T` represents the current state of the job. Status is
/// only ever refreshed by re-querying; nothing is pushed to us.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot<T: SnapshotState> {
    /// The current state of the snapshot.
    pub state: T,
    /// The snapshot metadata.
    pub data: SnapshotData,
}

/// Immutable snapshot metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotData {
    /// Identifier assigned by the remote service at trigger time.
    pub snapshot_id: String,
    /// The dataset this job collects for.
    pub dataset_id: String,
    /// When the job was submitted.
    pub triggered_at: DateTime<Utc>,
}

// ============================================================================
// Snapshot States
// ============================================================================

/// Job is still executing remotely.
#[derive(Debug, Clone, Serialize)]
pub struct Running {
    /// Number of status checks performed so far.
    pub polls: u32,
}

impl SnapshotState for Running {}

/// Job finished and its payload can be downloaded.
#[derive(Debug, Clone, Serialize)]
pub struct Ready {
    pub ready_at: DateTime<Utc>,
    /// Number of status checks it took to observe readiness.
    pub polls: u32,
}

impl SnapshotState for Ready {}

/// Caller canceled the job (terminal state).
#[derive(Debug, Clone, Serialize)]
pub struct Canceled {
    pub canceled_at: DateTime<Utc>,
}

impl SnapshotState for Canceled {}

/// Enum that can hold a snapshot in any state.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", content = "snapshot")]
pub enum AnySnapshot {
    Running(Snapshot<Running>),
    Ready(Snapshot<Ready>),
    Canceled(Snapshot<Canceled>),
}

impl AnySnapshot {
    /// Get the snapshot id regardless of state.
    pub fn snapshot_id(&self) -> &str {
        match self {
            AnySnapshot::Running(s) => &s.data.snapshot_id,
            AnySnapshot::Ready(s) => &s.data.snapshot_id,
            AnySnapshot::Canceled(s) => &s.data.snapshot_id,
        }
    }

    /// Check if this snapshot has reached a terminal status (the job is no
    /// longer running remotely).
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnySnapshot::Ready(_) | AnySnapshot::Canceled(_))
    }
}

impl From<Snapshot<Running>> for AnySnapshot {
    fn from(s: Snapshot<Running>) -> Self {
        AnySnapshot::Running(s)
    }
}

impl From<Snapshot<Ready>> for AnySnapshot {
    fn from(s: Snapshot<Ready>) -> Self {
        AnySnapshot::Ready(s)
    }
}

impl From<Snapshot<Canceled>> for AnySnapshot {
    fn from(s: Snapshot<Canceled>) -> Self {
        AnySnapshot::Canceled(s)
    }
}

// ============================================================================
// Wire types
// ============================================================================

/// Status reported by the snapshot status endpoint.
///
/// The service has emitted a few synonyms over time; they are folded into
/// the three-state core here so the state machine stays closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    #[serde(alias = "building", alias = "collecting")]
    Running,
    #[serde(alias = "done")]
    Ready,
    #[serde(alias = "error")]
    Failed,
}

#[derive(Debug, Deserialize)]
struct TriggerResponse {
    snapshot_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: SnapshotStatus,
}

// ============================================================================
// Transitions
// ============================================================================

/// Outcome of one status poll.
#[derive(Debug)]
pub enum PollOutcome {
    /// Job is still running; poll again after a delay.
    StillRunning(Snapshot<Running>),
    /// Job finished; the payload can be downloaded.
    Ready(Snapshot<Ready>),
}

/// Outcome of a download attempt.
#[derive(Debug)]
pub enum DownloadOutcome {
    /// The payload.
    Payload(Payload),
    /// The service answered 202: the job is not actually ready yet.
    /// The snapshot demotes back to `Running` and polling resumes.
    NotReady(Snapshot<Running>),
}

impl Snapshot<Running> {
    /// Re-query the job status once.
    ///
    /// A server-reported failure is terminal: the job itself failed and
    /// re-polling or retrying cannot recover it.
    pub async fn poll<H: HttpClient>(self, poller: &SnapshotPoller<H>) -> Result<PollOutcome> {
        let status = poller.status(&self.data.snapshot_id).await?;
        let polls = self.state.polls + 1;
        match status {
            SnapshotStatus::Running => {
                tracing::debug!(snapshot_id = %self.data.snapshot_id, polls, "Snapshot still running");
                Ok(PollOutcome::StillRunning(Snapshot {
                    state: Running { polls },
                    data: self.data,
                }))
            }
            SnapshotStatus::Ready => {
                tracing::info!(snapshot_id = %self.data.snapshot_id, polls, "Snapshot ready");
                Ok(PollOutcome::Ready(Snapshot {
                    state: Ready {
                        ready_at: Utc::now(),
                        polls,
                    },
                    data: self.data,
                }))
            }
            SnapshotStatus::Failed => {
                tracing::warn!(snapshot_id = %self.data.snapshot_id, polls, "Snapshot failed server-side");
                Err(DragnetError::SnapshotFailed {
                    snapshot_id: self.data.snapshot_id,
                })
            }
        }
    }

    /// Terminate the running job remotely.
    pub async fn cancel<H: HttpClient>(
        self,
        poller: &SnapshotPoller<H>,
    ) -> Result<Snapshot<Canceled>> {
        poller.cancel_remote(&self.data.snapshot_id).await?;
        tracing::info!(snapshot_id = %self.data.snapshot_id, "Snapshot canceled");
        Ok(Snapshot {
            state: Canceled {
                canceled_at: Utc::now(),
            },
            data: self.data,
        })
    }
}

impl Snapshot<Ready> {
    /// Fetch the job payload.
    ///
    /// A 202 response means the readiness report was premature; the snapshot
    /// demotes back to `Running` so the caller can resume polling.
    pub async fn download<H: HttpClient>(
        self,
        poller: &SnapshotPoller<H>,
    ) -> Result<DownloadOutcome> {
        let response = poller.download_raw(&self.data.snapshot_id).await?;
        match response.status {
            202 => {
                tracing::debug!(
                    snapshot_id = %self.data.snapshot_id,
                    "Download answered 202, resuming polling"
                );
                Ok(DownloadOutcome::NotReady(Snapshot {
                    state: Running {
                        polls: self.state.polls,
                    },
                    data: self.data,
                }))
            }
            s if s < 400 => Ok(DownloadOutcome::Payload(parse_payload(response.body))),
            401 => Err(DragnetError::Authentication {
                status: 401,
                body: response.body,
            }),
            status => Err(DragnetError::Api {
                status,
                body: response.body,
            }),
        }
    }
}

/// Snapshot payloads are JSON when the job produced structured data; fall
/// back to raw text otherwise.
fn parse_payload(body: String) -> Payload {
    match serde_json::from_str(&body) {
        Ok(value) => Payload::Json(value),
        Err(_) => Payload::Text(body),
    }
}

// ============================================================================
// Poller
// ============================================================================

/// Drives snapshot jobs: trigger, status, download, cancel, and the
/// poll-until-terminal loop.
pub struct SnapshotPoller<H> {
    http: Arc<H>,
    config: Arc<ClientConfig>,
}

impl<H: HttpClient> SnapshotPoller<H> {
    pub fn new(http: Arc<H>, config: Arc<ClientConfig>) -> Self {
        Self { http, config }
    }

    /// Submit an asynchronous collection job for a dataset.
    ///
    /// The submit response carries only the snapshot id, so the job starts
    /// in the `Running` state.
    #[tracing::instrument(skip(self, inputs), fields(count = inputs.len()))]
    pub async fn trigger(
        &self,
        dataset_id: &str,
        inputs: &[serde_json::Value],
    ) -> Result<Snapshot<Running>> {
        let request = ApiRequest {
            endpoint: self.config.api_base.clone(),
            method: "POST".to_string(),
            path: format!("{}?dataset_id={}", TRIGGER_PATH, dataset_id),
            body: serde_json::to_string(inputs)?,
        };
        let response = self.execute(&request).await?;
        let body = self.expect_success(response, "trigger dataset")?;
        let trigger: TriggerResponse = serde_json::from_str(&body)?;

        tracing::info!(snapshot_id = %trigger.snapshot_id, "Dataset collection triggered");
        Ok(Snapshot {
            state: Running { polls: 0 },
            data: SnapshotData {
                snapshot_id: trigger.snapshot_id,
                dataset_id: dataset_id.to_string(),
                triggered_at: Utc::now(),
            },
        })
    }

    /// Query the current status of a snapshot by id.
    pub async fn status(&self, snapshot_id: &str) -> Result<SnapshotStatus> {
        let request = ApiRequest {
            endpoint: self.config.api_base.clone(),
            method: "GET".to_string(),
            path: format!("{}/{}/status", SNAPSHOT_PATH, snapshot_id),
            body: String::new(),
        };
        let response = self.execute(&request).await?;
        let body = self.expect_success(response, "snapshot status")?;
        let status: StatusResponse = serde_json::from_str(&body)?;
        Ok(status.status)
    }

    /// Download a snapshot payload without polling first.
    ///
    /// For callers that have disabled status-polling: a 202 response is
    /// surfaced as an immediate [`DragnetError::SnapshotNotReady`] instead
    /// of resuming the poll loop.
    pub async fn download_now(&self, snapshot_id: &str) -> Result<Payload> {
        let response = self.download_raw(snapshot_id).await?;
        match response.status {
            202 => Err(DragnetError::SnapshotNotReady {
                snapshot_id: snapshot_id.to_string(),
            }),
            s if s < 400 => Ok(parse_payload(response.body)),
            401 => Err(DragnetError::Authentication {
                status: 401,
                body: response.body,
            }),
            status => Err(DragnetError::Api {
                status,
                body: response.body,
            }),
        }
    }

    /// Poll a running snapshot until it is ready, then download its payload.
    ///
    /// Each cycle sleeps a uniformly random delay in the configured window
    /// before re-querying. A `ready` status transitions immediately to the
    /// download call; a 202 on download resumes polling. The loop ends when
    /// the payload arrives, the server reports failure, the overall wait
    /// bound expires, or `cancel` fires - cancellation also terminates the
    /// job remotely and surfaces [`DragnetError::SnapshotCanceled`].
    #[tracing::instrument(skip(self, snapshot, cancel), fields(snapshot_id = %snapshot.data.snapshot_id))]
    pub async fn wait_ready(
        &self,
        snapshot: Snapshot<Running>,
        cancel: CancellationToken,
    ) -> Result<Payload> {
        let started = tokio::time::Instant::now();
        let mut running = snapshot;

        loop {
            running = match running.poll(self).await? {
                PollOutcome::Ready(ready) => match ready.download(self).await? {
                    DownloadOutcome::Payload(payload) => return Ok(payload),
                    DownloadOutcome::NotReady(running) => running,
                },
                PollOutcome::StillRunning(running) => running,
            };

            if let Some(max_wait_ms) = self.config.poll.max_wait_ms {
                let waited_ms = started.elapsed().as_millis() as u64;
                if waited_ms >= max_wait_ms {
                    tracing::warn!(waited_ms, "Snapshot wait bound exceeded");
                    return Err(DragnetError::SnapshotTimeout {
                        snapshot_id: running.data.snapshot_id,
                        waited_ms,
                    });
                }
            }

            let delay = self.poll_interval();
            tracing::debug!(
                delay_ms = delay.as_millis() as u64,
                polls = running.state.polls,
                "Sleeping before next status check"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    let canceled = running.cancel(self).await?;
                    return Err(DragnetError::SnapshotCanceled {
                        snapshot_id: canceled.data.snapshot_id,
                    });
                }
            }
        }
    }

    /// Uniformly random delay in the configured poll window.
    ///
    /// Wide and randomized deliberately: tight polling against a slow
    /// backend job wastes quota, and a fixed interval synchronizes many
    /// clients into thundering-herd status checks.
    fn poll_interval(&self) -> Duration {
        let min = self.config.poll.min_interval_ms;
        let max = self.config.poll.max_interval_ms.max(min);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    async fn download_raw(&self, snapshot_id: &str) -> Result<HttpResponse> {
        let request = ApiRequest {
            endpoint: self.config.api_base.clone(),
            method: "GET".to_string(),
            path: format!("{}/{}/download", SNAPSHOT_PATH, snapshot_id),
            body: String::new(),
        };
        self.execute(&request).await
    }

    async fn cancel_remote(&self, snapshot_id: &str) -> Result<()> {
        let request = ApiRequest {
            endpoint: self.config.api_base.clone(),
            method: "POST".to_string(),
            path: format!("{}/{}/cancel", SNAPSHOT_PATH, snapshot_id),
            body: String::new(),
        };
        let response = self.execute(&request).await?;
        self.expect_success(response, "cancel snapshot")?;
        Ok(())
    }

    async fn execute(&self, request: &ApiRequest) -> Result<HttpResponse> {
        self.http
            .execute(request, &self.config.api_token, self.config.default_timeout_ms)
            .await
    }

    fn expect_success(&self, response: HttpResponse, operation: &str) -> Result<String> {
        match response.status {
            s if s < 400 => Ok(response.body),
            401 => Err(DragnetError::Authentication {
                status: 401,
                body: response.body,
            }),
            status => {
                tracing::warn!(status, operation, "Snapshot call failed");
                Err(DragnetError::Api {
                    status,
                    body: response.body,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PollConfig;
    use crate::http::MockHttpClient;

    fn poller(mock: &MockHttpClient) -> SnapshotPoller<MockHttpClient> {
        let config = ClientConfig {
            poll: PollConfig {
                min_interval_ms: 1,
                max_interval_ms: 5,
                max_wait_ms: Some(5_000),
            },
            ..ClientConfig::new("test-token")
        };
        SnapshotPoller::new(Arc::new(mock.clone()), Arc::new(config))
    }

    fn add_status(mock: &MockHttpClient, id: &str, status: &str) {
        mock.add_response(
            &format!("GET /datasets/v3/snapshot/{}/status", id),
            Ok(HttpResponse {
                status: 200,
                body: format!(r#"{{"snapshot_id":"{}","dataset_id":"ds1","status":"{}"}}"#, id, status),
            }),
        );
    }

    fn running(id: &str) -> Snapshot<Running> {
        Snapshot {
            state: Running { polls: 0 },
            data: SnapshotData {
                snapshot_id: id.to_string(),
                dataset_id: "ds1".to_string(),
                triggered_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn test_trigger_returns_running_snapshot() {
        let mock = MockHttpClient::new();
        mock.add_response(
            "POST /datasets/v3/trigger?dataset_id=ds1",
            Ok(HttpResponse {
                status: 200,
                body: r#"{"snapshot_id":"snap-1"}"#.to_string(),
            }),
        );

        let snapshot = poller(&mock)
            .trigger("ds1", &[serde_json::json!({"url": "https://example.com"})])
            .await
            .unwrap();
        assert_eq!(snapshot.data.snapshot_id, "snap-1");
        assert_eq!(snapshot.data.dataset_id, "ds1");
        assert_eq!(snapshot.state.polls, 0);
    }

    #[tokio::test]
    async fn test_status_synonyms_fold_into_core_states() {
        let mock = MockHttpClient::new();
        let poller = poller(&mock);
        for (wire, expected) in [
            ("running", SnapshotStatus::Running),
            ("building", SnapshotStatus::Running),
            ("collecting", SnapshotStatus::Running),
            ("ready", SnapshotStatus::Ready),
            ("done", SnapshotStatus::Ready),
            ("failed", SnapshotStatus::Failed),
            ("error", SnapshotStatus::Failed),
        ] {
            add_status(&mock, "snap-1", wire);
            assert_eq!(poller.status("snap-1").await.unwrap(), expected, "wire status {}", wire);
        }
    }

    #[tokio::test]
    async fn test_wait_ready_polls_until_ready_then_downloads_once() {
        let mock = MockHttpClient::new();
        add_status(&mock, "snap-1", "running");
        add_status(&mock, "snap-1", "running");
        add_status(&mock, "snap-1", "ready");
        mock.add_response(
            "GET /datasets/v3/snapshot/snap-1/download",
            Ok(HttpResponse {
                status: 200,
                body: r#"[{"title":"result"}]"#.to_string(),
            }),
        );

        let payload = poller(&mock)
            .wait_ready(running("snap-1"), CancellationToken::new())
            .await
            .unwrap();

        assert!(payload.as_json().is_some());
        assert_eq!(mock.call_count_for("GET /datasets/v3/snapshot/snap-1/status"), 3);
        assert_eq!(mock.call_count_for("GET /datasets/v3/snapshot/snap-1/download"), 1);
    }

    #[tokio::test]
    async fn test_failed_status_stops_polling_without_download() {
        let mock = MockHttpClient::new();
        add_status(&mock, "snap-1", "running");
        add_status(&mock, "snap-1", "failed");

        let err = poller(&mock)
            .wait_ready(running("snap-1"), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DragnetError::SnapshotFailed { .. }));
        assert_eq!(mock.call_count_for("GET /datasets/v3/snapshot/snap-1/download"), 0);
    }

    #[tokio::test]
    async fn test_download_202_resumes_polling() {
        let mock = MockHttpClient::new();
        add_status(&mock, "snap-1", "ready");
        mock.add_response(
            "GET /datasets/v3/snapshot/snap-1/download",
            Ok(HttpResponse {
                status: 202,
                body: String::new(),
            }),
        );
        add_status(&mock, "snap-1", "ready");
        mock.add_response(
            "GET /datasets/v3/snapshot/snap-1/download",
            Ok(HttpResponse {
                status: 200,
                body: "payload".to_string(),
            }),
        );

        let payload = poller(&mock)
            .wait_ready(running("snap-1"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(payload.as_text(), Some("payload"));
        assert_eq!(mock.call_count_for("GET /datasets/v3/snapshot/snap-1/download"), 2);
    }

    #[tokio::test]
    async fn test_download_now_surfaces_202_immediately() {
        let mock = MockHttpClient::new();
        mock.add_response(
            "GET /datasets/v3/snapshot/snap-1/download",
            Ok(HttpResponse {
                status: 202,
                body: String::new(),
            }),
        );

        let err = poller(&mock).download_now("snap-1").await.unwrap_err();
        assert!(matches!(err, DragnetError::SnapshotNotReady { .. }));
    }

    #[tokio::test]
    async fn test_cancel_stops_wait_and_terminates_remote_job() {
        let mock = MockHttpClient::new();
        // Stay running forever; the cancel should cut the loop short.
        for _ in 0..100 {
            add_status(&mock, "snap-1", "running");
        }
        mock.add_response(
            "POST /datasets/v3/snapshot/snap-1/cancel",
            Ok(HttpResponse {
                status: 200,
                body: "{}".to_string(),
            }),
        );

        let poller = poller(&mock);
        let token = CancellationToken::new();
        token.cancel();

        let err = poller
            .wait_ready(running("snap-1"), token)
            .await
            .unwrap_err();

        assert!(matches!(err, DragnetError::SnapshotCanceled { .. }));
        assert_eq!(mock.call_count_for("POST /datasets/v3/snapshot/snap-1/cancel"), 1);
    }
}
