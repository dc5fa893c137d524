// workbridge-upstream/src/token.rs
// ============================================================================
// Module: OAuth Token Manager
// Description: Access-credential lifecycle with single-flight refresh.
// Purpose: Exchange the long-lived refresh credential for short-lived tokens.
// Dependencies: workbridge-core, reqwest, tokio
// ============================================================================

//! ## Overview
//! The token manager holds the immutable refresh credential and produces
//! short-lived access credentials on demand. The current credential lives in
//! KV under a fixed key whose TTL already encodes the safety margin, so a
//! readable entry is always usable. Refreshes are single-flight: the KV
//! refresh lock (atomic create-if-absent) elects one refresher; everyone else
//! backs off with jitter and re-reads until a fresh credential appears or the
//! refresh timeout elapses.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;
use workbridge_core::kv::KvError;
use workbridge_core::kv::SharedKvStore;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Floor for the stored credential TTL.
const MIN_CREDENTIAL_TTL: Duration = Duration::from_secs(60);
/// Initial lock-wait backoff delay.
const LOCK_BACKOFF_BASE: Duration = Duration::from_millis(50);
/// Cap on the lock-wait backoff delay.
const LOCK_BACKOFF_CAP: Duration = Duration::from_millis(500);
/// Maximum refresh POST attempts for transient failures.
const MAX_REFRESH_ATTEMPTS: u32 = 3;
/// Base delay for refresh POST retries.
const REFRESH_RETRY_BASE: Duration = Duration::from_secs(1);
/// Cap on refresh retry delays, including Retry-After hints.
const REFRESH_RETRY_CAP: Duration = Duration::from_secs(60);

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Token manager errors.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The identity provider rejected the refresh credential (4xx, terminal).
    #[error("token refresh rejected: {0}")]
    RefreshRejected(String),
    /// The refresh attempt failed transiently (5xx or network).
    #[error("token refresh failed: {0}")]
    RefreshTransient(String),
    /// No credential became available within the refresh timeout.
    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),
    /// The KV store was unreachable.
    #[error(transparent)]
    Kv(#[from] KvError),
}

// ============================================================================
// SECTION: Refresh Endpoint
// ============================================================================

/// A freshly issued access credential.
#[derive(Debug, Clone)]
pub struct RefreshedCredential {
    /// Opaque access token value.
    pub access_token: String,
    /// Lifetime reported by the identity provider.
    pub expires_in: Duration,
}

/// Exchange seam for the identity provider's token endpoint.
#[async_trait]
pub trait RefreshEndpoint: Send + Sync {
    /// Exchanges the refresh credential for a new access credential.
    async fn refresh(&self) -> Result<RefreshedCredential, TokenError>;
}

/// Wire shape of the token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    /// Issued access token.
    access_token: String,
    /// Lifetime in seconds.
    expires_in: u64,
}

/// Wire shape of a token endpoint error payload.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    /// Machine error code.
    error: Option<String>,
    /// Human error description.
    error_description: Option<String>,
}

/// HTTP implementation over the identity provider.
pub struct HttpRefreshEndpoint {
    /// HTTP client for token exchanges.
    client: reqwest::Client,
    /// Token endpoint URL.
    token_url: String,
    /// OAuth client identifier.
    client_id: String,
    /// OAuth client secret.
    client_secret: String,
    /// Long-lived refresh credential.
    refresh_token: String,
}

impl HttpRefreshEndpoint {
    /// Creates an HTTP refresh endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::RefreshTransient`] when the client cannot be built.
    pub fn new(
        token_url: String,
        client_id: String,
        client_secret: String,
        refresh_token: String,
    ) -> Result<Self, TokenError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| TokenError::RefreshTransient(format!("client build failed: {err}")))?;
        Ok(Self {
            client,
            token_url,
            client_id,
            client_secret,
            refresh_token,
        })
    }

    async fn attempt(&self) -> Result<RefreshedCredential, TokenError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|err| TokenError::RefreshTransient(format!("network error: {err}")))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| TokenError::RefreshTransient(format!("body read failed: {err}")))?;
        classify_refresh_response(status, &body)
    }
}

#[async_trait]
impl RefreshEndpoint for HttpRefreshEndpoint {
    async fn refresh(&self) -> Result<RefreshedCredential, TokenError> {
        let mut last_transient = None;
        for attempt in 0..MAX_REFRESH_ATTEMPTS {
            match self.attempt().await {
                Ok(credential) => return Ok(credential),
                Err(TokenError::RefreshRejected(message)) => {
                    return Err(TokenError::RefreshRejected(message));
                }
                Err(err) => {
                    last_transient = Some(err);
                    if attempt + 1 < MAX_REFRESH_ATTEMPTS {
                        sleep(refresh_retry_delay(attempt)).await;
                    }
                }
            }
        }
        Err(last_transient
            .unwrap_or_else(|| TokenError::RefreshTransient("no attempts made".to_string())))
    }
}

/// Classifies a token endpoint response into a credential or error.
fn classify_refresh_response(
    status: StatusCode,
    body: &[u8],
) -> Result<RefreshedCredential, TokenError> {
    if status.is_success() {
        // The identity provider reports some rejections with a 200 body.
        if let Ok(error) = serde_json::from_slice::<TokenErrorResponse>(body) {
            if let Some(code) = error.error {
                let description = error.error_description.unwrap_or_default();
                return Err(TokenError::RefreshRejected(format!("{code}: {description}")));
            }
        }
        let parsed: TokenResponse = serde_json::from_slice(body).map_err(|err| {
            TokenError::RefreshTransient(format!("token response malformed: {err}"))
        })?;
        return Ok(RefreshedCredential {
            access_token: parsed.access_token,
            expires_in: Duration::from_secs(parsed.expires_in),
        });
    }
    let description = serde_json::from_slice::<TokenErrorResponse>(body)
        .ok()
        .and_then(|error| error.error)
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(TokenError::RefreshTransient(format!("{status}: {description}")));
    }
    Err(TokenError::RefreshRejected(format!("{status}: {description}")))
}

/// Returns the exponential retry delay for a refresh attempt.
fn refresh_retry_delay(attempt: u32) -> Duration {
    let delay = REFRESH_RETRY_BASE.saturating_mul(1 << attempt.min(6));
    delay.min(REFRESH_RETRY_CAP)
}

// ============================================================================
// SECTION: Token Manager
// ============================================================================

/// Token manager configuration.
#[derive(Debug, Clone)]
pub struct TokenManagerConfig {
    /// Remaining lifetime below which a credential counts as expired.
    pub safety_margin: Duration,
    /// Ceiling on the stored credential TTL.
    pub ttl_ceiling: Duration,
    /// Refresh lock TTL and waiter deadline.
    pub refresh_timeout: Duration,
    /// KV key namespace prefix.
    pub namespace: String,
}

/// Access-credential manager with single-flight refresh.
#[derive(Clone)]
pub struct TokenManager {
    /// Shared KV store holding the credential and refresh lock.
    kv: SharedKvStore,
    /// Token endpoint implementation.
    endpoint: Arc<dyn RefreshEndpoint>,
    /// Manager configuration.
    config: Arc<TokenManagerConfig>,
    /// KV key for the current access credential.
    token_key: Arc<str>,
    /// KV key for the refresh lock.
    lock_key: Arc<str>,
    /// Lease holder label written into the lock.
    holder: Arc<str>,
}

impl TokenManager {
    /// Creates a token manager.
    #[must_use]
    pub fn new(
        kv: SharedKvStore,
        endpoint: Arc<dyn RefreshEndpoint>,
        config: TokenManagerConfig,
    ) -> Self {
        let token_key = format!("{}:upstream:access_token", config.namespace);
        let lock_key = format!("{}:upstream:refresh_lock", config.namespace);
        let holder = format!("pid-{}", std::process::id());
        Self {
            kv,
            endpoint,
            config: Arc::new(config),
            token_key: token_key.into(),
            lock_key: lock_key.into(),
            holder: holder.into(),
        }
    }

    /// Returns the current access credential, refreshing when needed.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] when no credential can be produced.
    pub async fn current(&self) -> Result<String, TokenError> {
        if let Some(token) = self.kv.get(&self.token_key).await? {
            return Ok(token);
        }
        self.single_flight_refresh().await
    }

    /// Replaces a credential the upstream rejected and returns a new one.
    ///
    /// When another task already installed a different credential, that one is
    /// returned without a refresh.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] when no credential can be produced.
    pub async fn refresh_after_rejection(&self, stale: &str) -> Result<String, TokenError> {
        if let Some(current) = self.kv.get(&self.token_key).await? {
            if current != stale {
                return Ok(current);
            }
            self.kv.delete(&self.token_key).await?;
        }
        self.single_flight_refresh().await
    }

    /// Reads the stored credential without triggering a refresh.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Kv`] when the store is unreachable.
    pub async fn peek(&self) -> Result<Option<String>, TokenError> {
        Ok(self.kv.get(&self.token_key).await?)
    }

    /// Runs the single-flight refresh protocol.
    async fn single_flight_refresh(&self) -> Result<String, TokenError> {
        let deadline = Instant::now() + self.config.refresh_timeout;
        let mut attempt: u32 = 0;
        loop {
            // A refresher that just finished may have installed a credential
            // between our miss and this iteration.
            if let Some(token) = self.kv.get(&self.token_key).await? {
                return Ok(token);
            }
            let acquired = self
                .kv
                .create_if_absent(&self.lock_key, &self.holder, self.config.refresh_timeout)
                .await?;
            if acquired {
                let outcome = self.refresh_locked().await;
                let _ = self.kv.delete(&self.lock_key).await;
                return outcome;
            }

            if Instant::now() >= deadline {
                return Err(TokenError::CredentialUnavailable(
                    "refresh lock contention exceeded timeout".to_string(),
                ));
            }
            sleep(lock_backoff_delay(attempt)).await;
            attempt = attempt.saturating_add(1);
        }
    }

    /// Performs the refresh while holding the lock and stores the result.
    async fn refresh_locked(&self) -> Result<String, TokenError> {
        // Double-check under the lock: a competing refresher may have won
        // between our read and the lock acquisition.
        if let Some(token) = self.kv.get(&self.token_key).await? {
            return Ok(token);
        }
        let credential = self.endpoint.refresh().await?;
        let ttl = credential_ttl(
            credential.expires_in,
            self.config.safety_margin,
            self.config.ttl_ceiling,
        );
        self.kv.set(&self.token_key, &credential.access_token, ttl).await?;
        Ok(credential.access_token)
    }
}

/// Computes the stored TTL: expiry minus margin, floored and capped.
fn credential_ttl(expires_in: Duration, margin: Duration, ceiling: Duration) -> Duration {
    expires_in.saturating_sub(margin).clamp(MIN_CREDENTIAL_TTL, ceiling.max(MIN_CREDENTIAL_TTL))
}

/// Returns the jittered lock-wait delay for an attempt.
fn lock_backoff_delay(attempt: u32) -> Duration {
    let base = LOCK_BACKOFF_BASE.saturating_mul(1 << attempt.min(4)).min(LOCK_BACKOFF_CAP);
    let millis = base.as_millis().max(1);
    let jittered = rand::thread_rng().gen_range((millis / 2)..=millis);
    Duration::from_millis(u64::try_from(jittered).unwrap_or(500))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::StatusCode;
    use workbridge_core::kv::MemoryKvStore;
    use workbridge_core::kv::SharedKvStore;

    use super::RefreshEndpoint;
    use super::RefreshedCredential;
    use super::TokenError;
    use super::TokenManager;
    use super::TokenManagerConfig;
    use super::classify_refresh_response;
    use super::credential_ttl;
    use super::lock_backoff_delay;

    struct CountingEndpoint {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingEndpoint {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl RefreshEndpoint for CountingEndpoint {
        async fn refresh(&self) -> Result<RefreshedCredential, TokenError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TokenError::RefreshRejected("invalid_grant".to_string()));
            }
            Ok(RefreshedCredential {
                access_token: format!("token-{call}"),
                expires_in: Duration::from_secs(3600),
            })
        }
    }

    fn manager(endpoint: Arc<CountingEndpoint>) -> TokenManager {
        TokenManager::new(
            SharedKvStore::from_store(MemoryKvStore::new()),
            endpoint,
            TokenManagerConfig {
                safety_margin: Duration::from_secs(300),
                ttl_ceiling: Duration::from_secs(3300),
                refresh_timeout: Duration::from_secs(5),
                namespace: "test".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn first_call_refreshes_and_caches() {
        let endpoint = Arc::new(CountingEndpoint::new(false));
        let manager = manager(endpoint.clone());
        let first = manager.current().await.expect("token");
        let second = manager.current().await.expect("token");
        assert_eq!(first, "token-0");
        assert_eq!(second, "token-0");
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_refresh_once() {
        let endpoint = Arc::new(CountingEndpoint::new(false));
        let manager = manager(endpoint.clone());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move { manager.current().await }));
        }
        for handle in handles {
            let token = handle.await.expect("join").expect("token");
            assert_eq!(token, "token-0");
        }
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejection_surfaces_and_releases_lock() {
        let endpoint = Arc::new(CountingEndpoint::new(true));
        let manager = manager(endpoint.clone());
        let err = manager.current().await.expect_err("must fail");
        assert!(matches!(err, TokenError::RefreshRejected(_)));
        // A subsequent caller is not deadlocked on a stale lock.
        let err = manager.current().await.expect_err("must fail");
        assert!(matches!(err, TokenError::RefreshRejected(_)));
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejection_refresh_skips_when_replaced() {
        let endpoint = Arc::new(CountingEndpoint::new(false));
        let manager = manager(endpoint.clone());
        let first = manager.current().await.expect("token");
        let replacement = manager
            .refresh_after_rejection("some-older-token")
            .await
            .expect("token");
        assert_eq!(replacement, first);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);

        let renewed = manager.refresh_after_rejection(&first).await.expect("token");
        assert_eq!(renewed, "token-1");
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn credential_ttl_applies_margin_floor_and_ceiling() {
        let margin = Duration::from_secs(300);
        let ceiling = Duration::from_secs(3300);
        assert_eq!(
            credential_ttl(Duration::from_secs(3600), margin, ceiling),
            Duration::from_secs(3300)
        );
        assert_eq!(
            credential_ttl(Duration::from_secs(600), margin, ceiling),
            Duration::from_secs(300)
        );
        assert_eq!(
            credential_ttl(Duration::from_secs(200), margin, ceiling),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn lock_backoff_stays_within_cap() {
        for attempt in 0..10 {
            let delay = lock_backoff_delay(attempt);
            assert!(delay >= Duration::from_millis(25));
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[test]
    fn refresh_classification_matches_status_families() {
        let ok = classify_refresh_response(
            StatusCode::OK,
            br#"{"access_token":"abc","expires_in":3600}"#,
        );
        assert_eq!(ok.expect("credential").access_token, "abc");

        let embedded = classify_refresh_response(
            StatusCode::OK,
            br#"{"error":"invalid_client","error_description":"bad secret"}"#,
        );
        assert!(matches!(embedded, Err(TokenError::RefreshRejected(_))));

        let rejected = classify_refresh_response(
            StatusCode::BAD_REQUEST,
            br#"{"error":"invalid_grant"}"#,
        );
        assert!(matches!(rejected, Err(TokenError::RefreshRejected(_))));

        let transient =
            classify_refresh_response(StatusCode::INTERNAL_SERVER_ERROR, b"upstream down");
        assert!(matches!(transient, Err(TokenError::RefreshTransient(_))));

        let throttled = classify_refresh_response(StatusCode::TOO_MANY_REQUESTS, b"slow down");
        assert!(matches!(throttled, Err(TokenError::RefreshTransient(_))));
    }
}
