//! Error types for the dragnet client.

use thiserror::Error;

use crate::dispatch::AttemptFailure;

/// Result type alias using the dragnet error type.
pub type Result<T> = std::result::Result<T, DragnetError>;

/// Main error type for the dragnet client.
///
/// This is a closed set of failure kinds. Every handling site matches it
/// exhaustively; recoverability is decided by the variant, not by
/// downcasting.
#[derive(Error, Debug)]
pub enum DragnetError {
    /// Input rejected before any remote call was made.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// The remote service rejected the bearer token (HTTP 401). Never retried.
    #[error("authentication failed ({status}): {body}")]
    Authentication { status: u16, body: String },

    /// A zone with the requested name exists but has an incompatible type.
    /// Surfaced without mutating anything remote.
    #[error("zone '{zone}' exists with type '{actual}', but type '{required}' is required")]
    ZoneConflict {
        zone: String,
        required: String,
        actual: String,
    },

    /// A transient fault persisted across every allowed attempt.
    #[error("request failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: AttemptFailure },

    /// Any other non-2xx response whose recoverability is unknown.
    #[error("api error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The remote service reported the snapshot job itself failed.
    #[error("snapshot {snapshot_id} failed server-side")]
    SnapshotFailed { snapshot_id: String },

    /// Download was attempted with status-polling disabled and the snapshot
    /// is not ready yet (HTTP 202).
    #[error("snapshot {snapshot_id} is not ready yet")]
    SnapshotNotReady { snapshot_id: String },

    /// The snapshot wait was canceled before the job reached a terminal state.
    #[error("snapshot {snapshot_id} was canceled")]
    SnapshotCanceled { snapshot_id: String },

    /// The snapshot did not become ready within the configured overall wait.
    #[error("timed out waiting for snapshot {snapshot_id} after {waited_ms}ms")]
    SnapshotTimeout { snapshot_id: String, waited_ms: u64 },

    /// HTTP client error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<AttemptFailure> for DragnetError {
    /// Surface a terminal attempt classification as a client error.
    ///
    /// Retryable kinds never arrive here directly; the dispatcher wraps them
    /// in [`DragnetError::RetriesExhausted`] once the policy gives up.
    fn from(failure: AttemptFailure) -> Self {
        match failure {
            AttemptFailure::Auth { status, body } => DragnetError::Authentication { status, body },
            AttemptFailure::Validation { message } => DragnetError::Validation { message },
            AttemptFailure::Api { status, body } => DragnetError::Api { status, body },
            AttemptFailure::MalformedJson { status, error } => DragnetError::Api {
                status,
                body: format!("malformed JSON payload: {}", error),
            },
            retryable @ (AttemptFailure::RetryableStatus { .. } | AttemptFailure::Network { .. }) => {
                DragnetError::RetriesExhausted {
                    attempts: 1,
                    last: retryable,
                }
            }
        }
    }
}
