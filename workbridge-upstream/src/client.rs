// workbridge-upstream/src/client.rs
// ============================================================================
// Module: Upstream HTTP Client
// Description: Authenticated REST access with retry and classification.
// Purpose: Map heterogeneous upstream failures to a stable taxonomy.
// Dependencies: workbridge-core, reqwest, tokio
// ============================================================================

//! ## Overview
//! The client wraps both upstream APIs behind [`UpstreamGateway`]. Transient
//! failures (network, 5xx, 429) retry up to three attempts with jittered
//! exponential backoff; a 401 forces exactly one credential refresh and one
//! replay; everything else is classified once and returned. Handlers never
//! retry and never reinterpret the classification.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;

use crate::token::TokenError;
use crate::token::TokenManager;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum attempts for transiently failing calls.
const MAX_ATTEMPTS: u32 = 3;
/// Backoff schedule for transient retries, jittered ±20 %.
const RETRY_DELAYS: [Duration; 3] =
    [Duration::from_millis(500), Duration::from_secs(1), Duration::from_secs(2)];
/// Cap applied to upstream Retry-After hints.
const RETRY_AFTER_CAP: Duration = Duration::from_secs(4);
/// User agent for outbound requests.
const USER_AGENT: &str = "workbridge/0.1";

// ============================================================================
// SECTION: Request Model
// ============================================================================

/// Upstream API selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiTarget {
    /// Project-management API.
    Projects,
    /// File-storage API.
    Files,
}

/// HTTP method for upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET request.
    Get,
    /// POST request.
    Post,
    /// PUT request.
    Put,
    /// DELETE request.
    Delete,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Multipart upload payload.
#[derive(Debug, Clone)]
pub struct MultipartUpload {
    /// File name presented upstream.
    pub file_name: String,
    /// Media type for the file part.
    pub content_type: String,
    /// File bytes (cheaply cloneable for retries).
    pub data: Bytes,
    /// Additional form fields.
    pub fields: Vec<(String, String)>,
}

/// Request body variants.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// JSON payload.
    Json(Value),
    /// Multipart form payload.
    Multipart(MultipartUpload),
}

/// A single upstream call.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// API selection.
    pub target: ApiTarget,
    /// Path below the API base URL.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Optional request body.
    pub body: Option<RequestBody>,
}

impl UpstreamRequest {
    /// Builds a GET request.
    #[must_use]
    pub fn get(target: ApiTarget, path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            target,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// Builds a POST request with a JSON body.
    #[must_use]
    pub fn post_json(target: ApiTarget, path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            target,
            path: path.into(),
            query: Vec::new(),
            body: Some(RequestBody::Json(body)),
        }
    }

    /// Builds a PUT request with a JSON body.
    #[must_use]
    pub fn put_json(target: ApiTarget, path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Put,
            target,
            path: path.into(),
            query: Vec::new(),
            body: Some(RequestBody::Json(body)),
        }
    }

    /// Builds a POST request with a multipart body.
    #[must_use]
    pub fn post_multipart(
        target: ApiTarget,
        path: impl Into<String>,
        upload: MultipartUpload,
    ) -> Self {
        Self {
            method: HttpMethod::Post,
            target,
            path: path.into(),
            query: Vec::new(),
            body: Some(RequestBody::Multipart(upload)),
        }
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Classified upstream failures.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Upstream returned 404.
    #[error("upstream resource not found: {0}")]
    NotFound(String),
    /// Upstream returned 409.
    #[error("upstream conflict: {0}")]
    Conflict(String),
    /// Upstream returned another 4xx.
    #[error("upstream rejected request ({status}): {message}")]
    Rejected {
        /// Upstream HTTP status.
        status: u16,
        /// Upstream error message, raw body when unparsable.
        message: String,
    },
    /// Upstream 5xx or network failure after retries.
    #[error("upstream unavailable: {message}")]
    Unavailable {
        /// Upstream HTTP status when one was received.
        status: Option<u16>,
        /// Failure description.
        message: String,
    },
    /// The per-call deadline elapsed after retries.
    #[error("upstream call timed out")]
    Timeout,
    /// No usable access credential.
    #[error(transparent)]
    Credential(#[from] TokenError),
}

// ============================================================================
// SECTION: Gateway Trait
// ============================================================================

/// Seam over the upstream APIs used by tool handlers.
#[async_trait]
pub trait UpstreamGateway: Send + Sync {
    /// Performs an authenticated upstream call and returns the JSON body.
    async fn request(&self, request: UpstreamRequest) -> Result<Value, UpstreamError>;
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Client configuration.
#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    /// Projects API base URL.
    pub projects_base_url: String,
    /// Files API base URL.
    pub files_base_url: String,
    /// Per-call timeout.
    pub request_timeout: Duration,
    /// Connection pool size per host.
    pub pool_max_idle_per_host: usize,
}

/// Authenticated upstream HTTP client.
#[derive(Clone)]
pub struct UpstreamClient {
    /// Pooled HTTP client.
    http: reqwest::Client,
    /// Token manager for bearer injection.
    tokens: TokenManager,
    /// Client configuration.
    config: Arc<UpstreamClientConfig>,
    /// Last-known reachability, fed into the health endpoint.
    healthy: Arc<AtomicBool>,
}

impl UpstreamClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Unavailable`] when the HTTP client cannot be
    /// built.
    pub fn new(tokens: TokenManager, config: UpstreamClientConfig) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|err| UpstreamError::Unavailable {
                status: None,
                message: format!("http client build failed: {err}"),
            })?;
        Ok(Self {
            http,
            tokens,
            config: Arc::new(config),
            healthy: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Returns the shared reachability flag.
    #[must_use]
    pub fn health_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.healthy)
    }

    fn url_for(&self, request: &UpstreamRequest) -> String {
        let base = match request.target {
            ApiTarget::Projects => &self.config.projects_base_url,
            ApiTarget::Files => &self.config.files_base_url,
        };
        format!("{}/{}", base.trim_end_matches('/'), request.path.trim_start_matches('/'))
    }

    async fn send_once(
        &self,
        request: &UpstreamRequest,
        token: &str,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut builder = self
            .http
            .request(request.method.as_reqwest(), self.url_for(request))
            .header("Authorization", format!("Zoho-oauthtoken {token}"))
            .query(&request.query);
        match &request.body {
            Some(RequestBody::Json(body)) => {
                builder = builder.json(body);
            }
            Some(RequestBody::Multipart(upload)) => {
                let part = reqwest::multipart::Part::stream(reqwest::Body::from(
                    upload.data.clone(),
                ))
                .file_name(upload.file_name.clone())
                .mime_str(&upload.content_type)
                .unwrap_or_else(|_| {
                    reqwest::multipart::Part::stream(reqwest::Body::from(upload.data.clone()))
                        .file_name(upload.file_name.clone())
                });
                let mut form = reqwest::multipart::Form::new().part("content", part);
                for (key, value) in &upload.fields {
                    form = form.text(key.clone(), value.clone());
                }
                builder = builder.multipart(form);
            }
            None => {}
        }
        builder.send().await
    }

    fn mark(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

#[async_trait]
impl UpstreamGateway for UpstreamClient {
    async fn request(&self, request: UpstreamRequest) -> Result<Value, UpstreamError> {
        let mut token = self.tokens.current().await?;
        let mut refreshed = false;
        let mut attempt: u32 = 0;
        loop {
            let outcome = self.send_once(&request, &token).await;
            match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        self.mark(true);
                        let body = response.bytes().await.map_err(|err| {
                            UpstreamError::Unavailable {
                                status: None,
                                message: format!("body read failed: {err}"),
                            }
                        })?;
                        return Ok(parse_body(&body));
                    }
                    if status == StatusCode::UNAUTHORIZED && !refreshed {
                        token = self.tokens.refresh_after_rejection(&token).await?;
                        refreshed = true;
                        continue;
                    }
                    let retry_hint = retry_after_hint(response.headers());
                    let body = response.bytes().await.unwrap_or_default();
                    let transient =
                        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    if transient && attempt + 1 < MAX_ATTEMPTS {
                        sleep(retry_hint.unwrap_or_else(|| retry_delay(attempt))).await;
                        attempt += 1;
                        continue;
                    }
                    if transient {
                        self.mark(false);
                    }
                    return Err(classify_failure(status, &body));
                }
                Err(err) => {
                    if attempt + 1 < MAX_ATTEMPTS {
                        sleep(retry_delay(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    self.mark(false);
                    if err.is_timeout() {
                        return Err(UpstreamError::Timeout);
                    }
                    return Err(UpstreamError::Unavailable {
                        status: None,
                        message: format!("network error: {err}"),
                    });
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Classification Helpers
// ============================================================================

/// Parses a response body, tolerating empty bodies as `{}`.
fn parse_body(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_slice(body).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

/// Extracts the human message from an upstream error body.
fn error_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        if let Some(message) = value.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
        if let Some(message) = value
            .get("error")
            .and_then(|error| error.get("message"))
            .and_then(Value::as_str)
        {
            return message.to_string();
        }
    }
    String::from_utf8_lossy(body).into_owned()
}

/// Classifies a non-success, non-retried response.
fn classify_failure(status: StatusCode, body: &[u8]) -> UpstreamError {
    let message = error_message(body);
    match status {
        StatusCode::NOT_FOUND => UpstreamError::NotFound(message),
        StatusCode::CONFLICT => UpstreamError::Conflict(message),
        status if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() => {
            UpstreamError::Unavailable {
                status: Some(status.as_u16()),
                message,
            }
        }
        status => UpstreamError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

/// Returns the jittered backoff delay for a retry attempt.
fn retry_delay(attempt: u32) -> Duration {
    let index = usize::try_from(attempt).unwrap_or(0).min(RETRY_DELAYS.len() - 1);
    jitter(RETRY_DELAYS[index])
}

/// Applies ±20 % jitter to a delay.
fn jitter(delay: Duration) -> Duration {
    let millis = delay.as_millis().max(1);
    let low = millis * 80 / 100;
    let high = millis * 120 / 100;
    let jittered = rand::thread_rng().gen_range(low..=high);
    Duration::from_millis(u64::try_from(jittered).unwrap_or(u64::MAX))
}

/// Reads a Retry-After hint in seconds, capped.
fn retry_after_hint(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let seconds: u64 = value.trim().parse().ok()?;
    Some(Duration::from_secs(seconds).min(RETRY_AFTER_CAP))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::StatusCode;
    use reqwest::header::HeaderMap;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    use super::UpstreamError;
    use super::classify_failure;
    use super::error_message;
    use super::parse_body;
    use super::retry_after_hint;
    use super::retry_delay;

    #[test]
    fn empty_and_malformed_bodies_parse_as_empty_objects() {
        assert_eq!(parse_body(b""), json!({}));
        assert_eq!(parse_body(b"not json"), json!({}));
        assert_eq!(parse_body(br#"{"tasks":[]}"#), json!({"tasks": []}));
    }

    #[test]
    fn error_message_prefers_structured_fields() {
        assert_eq!(error_message(br#"{"message":"missing project"}"#), "missing project");
        assert_eq!(
            error_message(br#"{"error":{"message":"bad folder"}}"#),
            "bad folder"
        );
        assert_eq!(error_message(b"plain text"), "plain text");
    }

    #[test]
    fn failures_classify_by_status_family() {
        assert!(matches!(
            classify_failure(StatusCode::NOT_FOUND, b"{}"),
            UpstreamError::NotFound(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::CONFLICT, b"{}"),
            UpstreamError::Conflict(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::UNPROCESSABLE_ENTITY, b"{}"),
            UpstreamError::Rejected {
                status: 422,
                ..
            }
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_GATEWAY, b"{}"),
            UpstreamError::Unavailable {
                status: Some(502),
                ..
            }
        ));
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, b"{}"),
            UpstreamError::Unavailable {
                status: Some(429),
                ..
            }
        ));
    }

    #[test]
    fn retry_delays_follow_the_schedule_with_jitter() {
        let bounds = [(400u64, 600u64), (800, 1200), (1600, 2400)];
        for (attempt, (low, high)) in bounds.iter().enumerate() {
            let delay = retry_delay(u32::try_from(attempt).expect("attempt"));
            let millis = u64::try_from(delay.as_millis()).expect("millis");
            assert!(millis >= *low, "attempt {attempt}: {millis} < {low}");
            assert!(millis <= *high, "attempt {attempt}: {millis} > {high}");
        }
    }

    #[test]
    fn retry_after_hint_is_parsed_and_capped() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("2"));
        assert_eq!(retry_after_hint(&headers), Some(Duration::from_secs(2)));

        headers.insert("retry-after", HeaderValue::from_static("60"));
        assert_eq!(retry_after_hint(&headers), Some(Duration::from_secs(4)));

        headers.insert("retry-after", HeaderValue::from_static("soon"));
        assert_eq!(retry_after_hint(&headers), None);

        assert_eq!(retry_after_hint(&HeaderMap::new()), None);
    }
}
