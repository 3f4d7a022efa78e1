//! Bounded-concurrency batch execution.
//!
//! Fans a collection of work items out to the dispatcher under a
//! concurrency cap. Admission is a counting semaphore: an item starts only
//! while fewer than the cap are in flight, and permits are granted in
//! FIFO-ish order. Results are positional - slot `i` always corresponds to
//! input `i`, regardless of completion order - and a single failing item
//! never aborts the rest of the batch.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::dispatch::{Payload, RequestDispatcher, WorkItem};
use crate::error::DragnetError;
use crate::http::HttpClient;

/// Ordered batch outcome: one slot per input item, positionally aligned.
///
/// Each slot holds either the item's payload or the structured error that
/// ended it. The vector length always equals the input length.
pub type BatchResult = Vec<Result<Payload, DragnetError>>;

/// Executes batches of work items with a concurrency cap.
pub struct BatchExecutor<H> {
    dispatcher: Arc<RequestDispatcher<H>>,
    concurrency: usize,
    in_flight: Arc<AtomicUsize>,
}

impl<H: HttpClient + 'static> BatchExecutor<H> {
    /// Create an executor dispatching at most `concurrency` items at once.
    pub fn new(dispatcher: Arc<RequestDispatcher<H>>, concurrency: usize) -> Self {
        Self {
            dispatcher,
            concurrency: concurrency.max(1),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of items currently being dispatched.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Dispatch every item and return their outcomes in input order.
    ///
    /// Per-item failures are captured into the corresponding result slot;
    /// the batch itself always resolves. If a worker dies without reporting
    /// (panic, runtime teardown), its slot - and only its slot - is filled
    /// with an infrastructure error.
    #[tracing::instrument(skip(self, items), fields(count = items.len(), concurrency = self.concurrency))]
    pub async fn execute(&self, items: Vec<WorkItem>) -> BatchResult {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        tracing::info!(total, "Starting batch dispatch");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set: JoinSet<(usize, Result<Payload, DragnetError>)> = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let dispatcher = self.dispatcher.clone();
            let in_flight = self.in_flight.clone();

            join_set.spawn(async move {
                // Admission gate: waiters queue in FIFO order.
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        // The gate can only close if the semaphore was
                        // dropped out from under us; nothing item-specific
                        // went wrong, so report it as infrastructure.
                        return (
                            index,
                            Err(DragnetError::Other(anyhow::anyhow!(
                                "admission gate closed before dispatch"
                            ))),
                        );
                    }
                };

                in_flight.fetch_add(1, Ordering::SeqCst);
                let _guard = scopeguard::guard((), move |_| {
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                });

                tracing::debug!(item_id = %item.id, index, "Dispatching batch item");
                let result = dispatcher.dispatch(&item).await;
                if let Err(e) = &result {
                    tracing::warn!(item_id = %item.id, index, error = %e, "Batch item failed");
                }
                (index, result)
            });
        }

        let mut slots: Vec<Option<Result<Payload, DragnetError>>> =
            (0..total).map(|_| None).collect();

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    slots[index] = Some(result);
                }
                Err(join_error) => {
                    // The slot stays empty and is filled below; we cannot
                    // know which index died from the JoinError alone.
                    tracing::error!(error = %join_error, "Batch worker terminated abnormally");
                }
            }
        }

        let failed = slots
            .iter()
            .filter(|slot| matches!(slot, Some(Err(_)) | None))
            .count();
        tracing::info!(total, failed, "Batch dispatch finished");

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(DragnetError::Other(anyhow::anyhow!(
                        "batch worker terminated before reporting a result"
                    )))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::dispatch::{ResolvedOptions, ResponseFormat, WorkInput};
    use crate::http::{HttpResponse, MockHttpClient};

    fn options() -> ResolvedOptions {
        ResolvedOptions {
            zone: "web_unlocker1".to_string(),
            format: ResponseFormat::Raw,
            method: None,
            country: None,
            data_format: None,
            timeout_ms: None,
        }
    }

    fn item(url: &str) -> WorkItem {
        WorkItem::new(WorkInput::Url(url.to_string()), options())
    }

    fn executor(mock: &MockHttpClient, concurrency: usize) -> BatchExecutor<MockHttpClient> {
        let config = Arc::new(ClientConfig {
            backoff_ms: 5,
            max_backoff_ms: 20,
            ..ClientConfig::new("test-token")
        });
        let dispatcher = Arc::new(RequestDispatcher::new(Arc::new(mock.clone()), config));
        BatchExecutor::new(dispatcher, concurrency)
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let mock = MockHttpClient::new();
        let results = executor(&mock, 4).execute(Vec::new()).await;
        assert!(results.is_empty());
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_results_are_positional() {
        let mock = MockHttpClient::new();
        for i in 0..5 {
            mock.add_response(
                "POST /request",
                Ok(HttpResponse {
                    status: 200,
                    body: format!("page-{}", i),
                }),
            );
        }

        // Concurrency 1 forces the FIFO admission order, so response i pairs
        // with item i and we can assert positional alignment exactly.
        let items: Vec<WorkItem> = (0..5).map(|i| item(&format!("https://example.com/{}", i))).collect();
        let results = executor(&mock, 1).execute(items).await;

        assert_eq!(results.len(), 5);
        for (i, result) in results.iter().enumerate() {
            let payload = result.as_ref().expect("item should succeed");
            assert_eq!(payload.as_text(), Some(format!("page-{}", i).as_str()));
        }
    }

    #[tokio::test]
    async fn test_single_failure_does_not_abort_batch() {
        let mock = MockHttpClient::new();
        mock.add_response(
            "POST /request",
            Ok(HttpResponse {
                status: 200,
                body: "first".to_string(),
            }),
        );
        mock.add_response(
            "POST /request",
            Ok(HttpResponse {
                status: 400,
                body: "zone is required".to_string(),
            }),
        );
        mock.add_response(
            "POST /request",
            Ok(HttpResponse {
                status: 200,
                body: "third".to_string(),
            }),
        );

        let items = vec![
            item("https://example.com/a"),
            item("https://example.com/b"),
            item("https://example.com/c"),
        ];
        let results = executor(&mock, 1).execute(items).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(DragnetError::Validation { .. })
        ));
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn test_batch_length_always_matches_input() {
        let mock = MockHttpClient::new();
        // No responses configured at all: every dispatch errors, but every
        // slot must still be filled.
        let items: Vec<WorkItem> = (0..4).map(|i| item(&format!("https://example.com/{}", i))).collect();
        let results = executor(&mock, 2).execute(items).await;
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.is_err()));
    }
}
