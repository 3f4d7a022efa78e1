//! Single-item dispatch against the remote scrape endpoint.
//!
//! This module defines the work-item model (one URL or query plus its
//! resolved execution options) and the `RequestDispatcher`, which executes
//! one item: it builds the minimal request body, classifies the response,
//! and drives the attempt loop under the retry policy. Callers see only the
//! final outcome; transient faults are absorbed here.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{DragnetError, Result};
use crate::http::{ApiRequest, HttpClient, HttpResponse};
use crate::retry::{RetryDecision, RetryPolicy};

/// How many bytes of a failure response body are kept for error reporting.
const BODY_SNIPPET_LEN: usize = 256;

/// Unique identifier for a work item, used for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct WorkItemId(pub Uuid);

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl From<Uuid> for WorkItemId {
    fn from(uuid: Uuid) -> Self {
        WorkItemId(uuid)
    }
}

impl std::ops::Deref for WorkItemId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Search engine whose results page a query is resolved against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchEngine {
    #[default]
    Google,
    Bing,
    Duckduckgo,
}

impl SearchEngine {
    /// Build the results-page URL for a query on this engine.
    pub fn results_url(&self, query: &str) -> String {
        let encoded = urlencoding::encode(query);
        match self {
            SearchEngine::Google => format!("https://www.google.com/search?q={}", encoded),
            SearchEngine::Bing => format!("https://www.bing.com/search?q={}", encoded),
            SearchEngine::Duckduckgo => format!("https://duckduckgo.com/?q={}", encoded),
        }
    }
}

/// One input unit: a URL to scrape, or a query to run through a search engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum WorkInput {
    Url(String),
    Query { query: String, engine: SearchEngine },
}

/// Response format requested from the remote service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Raw page text (HTML or whatever the target served).
    #[default]
    Raw,
    /// Structured JSON parsed by the remote service.
    Json,
}

impl ResponseFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseFormat::Raw => "raw",
            ResponseFormat::Json => "json",
        }
    }
}

/// Execution options for one work item, with all defaults already filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedOptions {
    /// Zone the request is billed and routed through.
    pub zone: String,
    /// Response format the remote service should produce.
    pub format: ResponseFormat,
    /// HTTP method the remote service should use against the target.
    /// Omitted from the wire body when `None` (the service defaults to GET).
    pub method: Option<String>,
    /// Two-letter country code for geo-targeted execution.
    pub country: Option<String>,
    /// Additional output transform (e.g. "markdown", "screenshot").
    pub data_format: Option<String>,
    /// Per-item timeout override in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// One unit of work: input plus resolved options. Immutable once dispatched.
#[derive(Debug, Clone, Serialize)]
pub struct WorkItem {
    /// The ID assigned to this item at construction.
    pub id: WorkItemId,
    /// The URL or query to execute.
    pub input: WorkInput,
    /// Fully resolved execution options.
    pub options: ResolvedOptions,
}

impl WorkItem {
    pub fn new(input: WorkInput, options: ResolvedOptions) -> Self {
        Self {
            id: WorkItemId::from(Uuid::new_v4()),
            input,
            options,
        }
    }

    /// The concrete URL sent to the remote service.
    pub fn target_url(&self) -> String {
        match &self.input {
            WorkInput::Url(url) => url.clone(),
            WorkInput::Query { query, engine } => engine.results_url(query),
        }
    }
}

/// Successful payload from one work item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Json(serde_json::Value),
}

impl Payload {
    /// Borrow the payload as raw text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Json(_) => None,
        }
    }

    /// Borrow the payload as parsed JSON, if it is JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Text(_) => None,
            Payload::Json(value) => Some(value),
        }
    }
}

/// Classified failure of one transport attempt.
///
/// This enum distinguishes between different types of failures to determine
/// whether an attempt should be retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum AttemptFailure {
    /// HTTP status that may succeed on retry (429, 500, 502, 503, 504).
    RetryableStatus { status: u16, body: String },

    /// The remote service rejected the bearer token (401).
    /// A configuration error - retrying wastes quota.
    Auth { status: u16, body: String },

    /// The remote service rejected the request itself (400).
    /// The message echoes the remote's explanation.
    Validation { message: String },

    /// Any other non-2xx status. Terminal by default, since its
    /// recoverability is unknown.
    Api { status: u16, body: String },

    /// Network error, timeout, or other transport-level failure.
    /// These are transient infrastructure issues that should be retried.
    Network { error: String },

    /// A successful response whose body failed to parse as the requested
    /// JSON format. Retrying would return the same malformed body.
    MalformedJson { status: u16, error: String },
}

impl AttemptFailure {
    /// Returns true if this failure indicates the attempt should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            AttemptFailure::RetryableStatus { .. } => true,
            AttemptFailure::Network { .. } => true,
            AttemptFailure::Auth { .. } => false,
            AttemptFailure::Validation { .. } => false,
            AttemptFailure::Api { .. } => false,
            AttemptFailure::MalformedJson { .. } => false,
        }
    }

    /// Low-cardinality label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AttemptFailure::RetryableStatus { .. } => "retryable_status",
            AttemptFailure::Auth { .. } => "auth",
            AttemptFailure::Validation { .. } => "validation",
            AttemptFailure::Api { .. } => "api",
            AttemptFailure::Network { .. } => "network",
            AttemptFailure::MalformedJson { .. } => "malformed_json",
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::RetryableStatus { status, body } => {
                write!(f, "retryable status {}: {}", status, body)
            }
            AttemptFailure::Auth { status, body } => {
                write!(f, "authentication rejected ({}): {}", status, body)
            }
            AttemptFailure::Validation { message } => {
                write!(f, "request rejected: {}", message)
            }
            AttemptFailure::Api { status, body } => {
                write!(f, "api status {}: {}", status, body)
            }
            AttemptFailure::Network { error } => write!(f, "network error: {}", error),
            AttemptFailure::MalformedJson { status, error } => {
                write!(f, "malformed JSON in {} response: {}", status, error)
            }
        }
    }
}

/// Truncate a response body to a loggable snippet.
fn snippet(body: &str) -> String {
    if body.len() <= BODY_SNIPPET_LEN {
        return body.to_string();
    }
    let mut end = BODY_SNIPPET_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Executes one work item against the remote endpoint, applying the retry
/// policy so the caller sees only the final outcome.
pub struct RequestDispatcher<H> {
    http: Arc<H>,
    config: Arc<ClientConfig>,
    policy: RetryPolicy,
}

impl<H: HttpClient> RequestDispatcher<H> {
    pub fn new(http: Arc<H>, config: Arc<ClientConfig>) -> Self {
        let policy = RetryPolicy::from(config.as_ref());
        Self {
            http,
            config,
            policy,
        }
    }

    /// Execute one work item and return its final outcome.
    ///
    /// Transient faults (retryable statuses, network errors) are retried
    /// under the policy; everything else surfaces immediately. Exhausting
    /// the retry budget surfaces the last failure wrapped in
    /// [`DragnetError::RetriesExhausted`] with the total attempt count.
    #[tracing::instrument(skip(self, item), fields(item_id = %item.id, zone = %item.options.zone))]
    pub async fn dispatch(&self, item: &WorkItem) -> Result<Payload> {
        let request = self.build_request(item)?;
        let timeout_ms = item
            .options
            .timeout_ms
            .unwrap_or(self.config.default_timeout_ms);

        // The attempt loop owns its retry state exclusively; nothing here is
        // shared across items.
        let mut attempt: u32 = 0;
        loop {
            let failure = match self.attempt(&request, item.options.format, timeout_ms).await {
                Ok(payload) => {
                    tracing::debug!(attempt, "Dispatch succeeded");
                    return Ok(payload);
                }
                Err(failure) => failure,
            };

            match self.policy.decide(&failure, attempt) {
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        failure = %failure,
                        "Attempt failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::Stop => {
                    if failure.is_retryable() {
                        let attempts = attempt + 1;
                        tracing::warn!(
                            attempts,
                            failure = %failure,
                            "Retries exhausted, surfacing last failure"
                        );
                        return Err(DragnetError::RetriesExhausted {
                            attempts,
                            last: failure,
                        });
                    }
                    tracing::warn!(failure = %failure, "Non-retryable failure, surfacing");
                    return Err(failure.into());
                }
            }
        }
    }

    /// Build the `/request` body from the item's resolved fields.
    ///
    /// Empty and unset fields are omitted; the remote API rejects certain
    /// empty strings.
    fn build_request(&self, item: &WorkItem) -> Result<ApiRequest> {
        let mut body = serde_json::Map::new();
        body.insert("url".to_string(), item.target_url().into());
        body.insert("zone".to_string(), item.options.zone.clone().into());
        body.insert(
            "format".to_string(),
            item.options.format.as_str().to_string().into(),
        );
        if let Some(method) = &item.options.method
            && !method.is_empty()
        {
            body.insert("method".to_string(), method.clone().into());
        }
        if let Some(country) = &item.options.country
            && !country.is_empty()
        {
            body.insert("country".to_string(), country.clone().into());
        }
        if let Some(data_format) = &item.options.data_format
            && !data_format.is_empty()
        {
            body.insert("data_format".to_string(), data_format.clone().into());
        }

        Ok(ApiRequest {
            endpoint: self.config.api_base.clone(),
            method: "POST".to_string(),
            path: "/request".to_string(),
            body: serde_json::to_string(&serde_json::Value::Object(body))?,
        })
    }

    /// Execute one transport call and classify its outcome.
    async fn attempt(
        &self,
        request: &ApiRequest,
        format: ResponseFormat,
        timeout_ms: u64,
    ) -> std::result::Result<Payload, AttemptFailure> {
        let response = match self
            .http
            .execute(request, &self.config.api_token, timeout_ms)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return Err(AttemptFailure::Network {
                    error: e.to_string(),
                });
            }
        };

        classify(response, format)
    }
}

/// Classify one HTTP response into a payload or a failure.
///
/// Status < 400 is success; 401 is a non-retryable authentication failure;
/// 400 is a non-retryable validation failure echoing the remote's message;
/// 429/5xx are retryable; anything else is a generic API failure.
fn classify(
    response: HttpResponse,
    format: ResponseFormat,
) -> std::result::Result<Payload, AttemptFailure> {
    let HttpResponse { status, body } = response;
    match status {
        s if s < 400 => match format {
            ResponseFormat::Raw => Ok(Payload::Text(body)),
            ResponseFormat::Json => match serde_json::from_str(&body) {
                Ok(value) => Ok(Payload::Json(value)),
                // A parse failure on a successful call is terminal: the
                // server said 2xx, retrying returns the same body.
                Err(e) => Err(AttemptFailure::MalformedJson {
                    status: s,
                    error: e.to_string(),
                }),
            },
        },
        401 => Err(AttemptFailure::Auth {
            status,
            body: snippet(&body),
        }),
        400 => Err(AttemptFailure::Validation {
            message: snippet(&body),
        }),
        429 | 500 | 502 | 503 | 504 => Err(AttemptFailure::RetryableStatus {
            status,
            body: snippet(&body),
        }),
        _ => Err(AttemptFailure::Api {
            status,
            body: snippet(&body),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_classify_success_raw() {
        let payload = classify(response(200, "<html></html>"), ResponseFormat::Raw).unwrap();
        assert_eq!(payload.as_text(), Some("<html></html>"));
    }

    #[test]
    fn test_classify_success_json() {
        let payload = classify(response(200, r#"{"ok":true}"#), ResponseFormat::Json).unwrap();
        assert_eq!(payload.as_json().unwrap()["ok"], true);
    }

    #[test]
    fn test_classify_malformed_json_is_terminal() {
        let failure = classify(response(200, "not json"), ResponseFormat::Json).unwrap_err();
        assert!(matches!(failure, AttemptFailure::MalformedJson { .. }));
        assert!(!failure.is_retryable());
    }

    #[test]
    fn test_classify_statuses() {
        assert!(matches!(
            classify(response(401, "denied"), ResponseFormat::Raw).unwrap_err(),
            AttemptFailure::Auth { status: 401, .. }
        ));
        assert!(matches!(
            classify(response(400, "bad zone"), ResponseFormat::Raw).unwrap_err(),
            AttemptFailure::Validation { .. }
        ));
        for status in [429, 500, 502, 503, 504] {
            let failure = classify(response(status, "busy"), ResponseFormat::Raw).unwrap_err();
            assert!(failure.is_retryable(), "status {} should retry", status);
        }
        let failure = classify(response(418, "teapot"), ResponseFormat::Raw).unwrap_err();
        assert!(matches!(failure, AttemptFailure::Api { status: 418, .. }));
        assert!(!failure.is_retryable());
    }

    #[test]
    fn test_snippet_truncates_long_bodies() {
        let long = "x".repeat(1000);
        let cut = snippet(&long);
        assert!(cut.len() <= BODY_SNIPPET_LEN + 3);
        assert!(cut.ends_with("..."));
        assert_eq!(snippet("short"), "short");
    }

    #[test]
    fn test_search_engine_urls() {
        assert_eq!(
            SearchEngine::Google.results_url("rust async"),
            "https://www.google.com/search?q=rust%20async"
        );
        assert!(
            SearchEngine::Duckduckgo
                .results_url("a&b")
                .contains("q=a%26b")
        );
    }

    #[test]
    fn test_work_item_target_url() {
        let options = ResolvedOptions {
            zone: "serp_api1".to_string(),
            format: ResponseFormat::Raw,
            method: None,
            country: None,
            data_format: None,
            timeout_ms: None,
        };
        let item = WorkItem::new(
            WorkInput::Query {
                query: "weather".to_string(),
                engine: SearchEngine::Bing,
            },
            options,
        );
        assert_eq!(
            item.target_url(),
            "https://www.bing.com/search?q=weather"
        );
    }
}
