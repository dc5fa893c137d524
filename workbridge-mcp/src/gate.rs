// workbridge-mcp/src/gate.rs
// ============================================================================
// Module: Admission Gate
// Description: Bearer verification, allow-listing, and rate limiting.
// Purpose: Reject unauthenticated or abusive calls before any handler runs.
// Dependencies: workbridge-core, jsonwebtoken
// ============================================================================

//! ## Overview
//! Three checks run in order, each terminal on failure: bearer verification
//! (HMAC-SHA-256 signed tokens with strict expiry), the source-address
//! allow-list, and the fixed-window rate limit. Authentication runs first so
//! the rate-limit principal is the stable token subject whenever possible;
//! callers behind shared NAT then cannot consume each other's quota. The
//! stdio transport never passes through the gate.
//!
//! Rate-limit counters live in KV; a KV outage fails open (the request is
//! admitted) because throttling is a load shield, not an authentication
//! control.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::net::IpAddr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::Validation;
use serde::Deserialize;
use thiserror::Error;
use workbridge_config::ServerTransport;
use workbridge_core::kv::SharedKvStore;
use workbridge_core::net::AllowedNet;
use workbridge_core::unix_now_secs;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Upper bound on accepted Authorization header length.
const MAX_AUTH_HEADER_BYTES: usize = 8 * 1024;

// ============================================================================
// SECTION: Request Context
// ============================================================================

/// Per-request context used for admission decisions.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Transport the request arrived on.
    pub transport: ServerTransport,
    /// Peer IP address when available.
    pub peer_ip: Option<IpAddr>,
    /// Raw Authorization header value.
    pub auth_header: Option<String>,
    /// Request identifier for audit correlation.
    pub request_id: Option<String>,
}

impl RequestContext {
    /// Builds a stdio request context.
    #[must_use]
    pub fn stdio() -> Self {
        Self {
            transport: ServerTransport::Stdio,
            peer_ip: None,
            auth_header: None,
            request_id: None,
        }
    }

    /// Builds an HTTP request context.
    #[must_use]
    pub fn http(peer_ip: Option<IpAddr>, auth_header: Option<String>) -> Self {
        Self {
            transport: ServerTransport::Http,
            peer_ip,
            auth_header,
            request_id: None,
        }
    }

    /// Returns a copy with the request identifier set.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Admitted caller identity.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Verified token subject; `None` on the gate-free stdio transport.
    pub subject: Option<String>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Admission failures.
#[derive(Debug, Error)]
pub enum GateError {
    /// Bearer missing, malformed, badly signed, expired, or not yet valid.
    #[error("unauthorised: {0}")]
    Unauthorised(String),
    /// Peer address is not allow-listed.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Rate-limit ceiling reached for the principal.
    #[error("rate limit exceeded")]
    RateLimited {
        /// Remainder of the current window.
        retry_after: Duration,
    },
}

// ============================================================================
// SECTION: Bearer Claims
// ============================================================================

/// Claims carried by inbound bearer tokens.
#[derive(Debug, Deserialize)]
struct BearerClaims {
    /// Caller subject.
    sub: String,
    /// Expiry instant (Unix seconds).
    exp: u64,
    /// Issue instant (Unix seconds).
    iat: u64,
    /// Not-before instant (Unix seconds).
    nbf: Option<u64>,
}

// ============================================================================
// SECTION: Gate
// ============================================================================

/// Gate configuration.
#[derive(Debug, Clone)]
pub struct AdmissionGateConfig {
    /// HMAC-SHA-256 signing key for bearer verification.
    pub signing_key: Vec<u8>,
    /// Allowed source networks.
    pub allowed_ips: Vec<String>,
    /// Ceiling on accepted token lifetimes.
    pub max_token_lifetime: Duration,
    /// Accept requests without a resolvable peer (test profile only).
    pub test_profile: bool,
    /// Requests allowed per window.
    pub rate_limit_max_requests: u32,
    /// Rate-limit window length.
    pub rate_limit_window: Duration,
    /// KV key namespace prefix.
    pub namespace: String,
}

/// Admission gate applied to every HTTP-transport call.
pub struct AdmissionGate {
    /// Decoding key for bearer verification.
    decoding_key: DecodingKey,
    /// Parsed allow-list networks.
    networks: Vec<AllowedNet>,
    /// Ceiling on accepted token lifetimes in seconds.
    max_token_lifetime_secs: u64,
    /// Test-profile sentinel acceptance.
    test_profile: bool,
    /// Requests allowed per window.
    max_requests: u32,
    /// Window length.
    window: Duration,
    /// KV store holding rate-limit counters.
    kv: SharedKvStore,
    /// Key namespace prefix.
    namespace: String,
}

impl AdmissionGate {
    /// Builds a gate from configuration.
    ///
    /// # Errors
    ///
    /// Returns a message when an allow-list entry cannot be parsed.
    pub fn new(config: AdmissionGateConfig, kv: SharedKvStore) -> Result<Self, String> {
        let mut networks = Vec::with_capacity(config.allowed_ips.len());
        for entry in &config.allowed_ips {
            let network = AllowedNet::parse(entry)
                .map_err(|err| format!("allow-list entry invalid: {err}"))?;
            networks.push(network);
        }
        Ok(Self {
            decoding_key: DecodingKey::from_secret(&config.signing_key),
            networks,
            max_token_lifetime_secs: config.max_token_lifetime.as_secs(),
            test_profile: config.test_profile,
            max_requests: config.rate_limit_max_requests,
            window: config.rate_limit_window,
            kv,
            namespace: config.namespace,
        })
    }

    /// Runs the three admission checks in order.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] from the first failing check.
    pub async fn admit(&self, context: &RequestContext) -> Result<Principal, GateError> {
        let subject = self.verify_bearer(context.auth_header.as_deref())?;
        self.check_allow_list(context.peer_ip)?;
        self.check_rate_limit(&subject, context.peer_ip).await?;
        Ok(Principal {
            subject: Some(subject),
        })
    }

    /// Verifies the bearer token and returns its subject.
    fn verify_bearer(&self, auth_header: Option<&str>) -> Result<String, GateError> {
        let token = parse_bearer_token(auth_header)?;
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        let data = jsonwebtoken::decode::<BearerClaims>(&token, &self.decoding_key, &validation)
            .map_err(|_| GateError::Unauthorised("invalid bearer token".to_string()))?;
        let claims = data.claims;
        let now = unix_now_secs();
        // An exp equal to the current second is already expired.
        if claims.exp <= now {
            return Err(GateError::Unauthorised("bearer token expired".to_string()));
        }
        if let Some(nbf) = claims.nbf {
            if nbf > now {
                return Err(GateError::Unauthorised("bearer token not yet valid".to_string()));
            }
        }
        if claims.exp < claims.iat
            || claims.exp - claims.iat > self.max_token_lifetime_secs
        {
            return Err(GateError::Unauthorised(
                "bearer token lifetime exceeds ceiling".to_string(),
            ));
        }
        if claims.sub.trim().is_empty() {
            return Err(GateError::Unauthorised("bearer token missing subject".to_string()));
        }
        Ok(claims.sub)
    }

    /// Checks the peer address against the allow-list.
    fn check_allow_list(&self, peer_ip: Option<IpAddr>) -> Result<(), GateError> {
        let Some(peer) = peer_ip else {
            if self.test_profile {
                return Ok(());
            }
            return Err(GateError::Forbidden("peer address unavailable".to_string()));
        };
        if self.networks.iter().any(|network| network.contains(peer)) {
            return Ok(());
        }
        Err(GateError::Forbidden(format!("address {peer} not in allow-list")))
    }

    /// Applies the fixed-window rate limit for the principal.
    async fn check_rate_limit(
        &self,
        subject: &str,
        peer_ip: Option<IpAddr>,
    ) -> Result<(), GateError> {
        let principal = if subject.is_empty() {
            peer_ip.map_or_else(|| "anonymous".to_string(), |ip| format!("ip:{ip}"))
        } else {
            format!("sub:{subject}")
        };
        let key = format!("{}:rate:{principal}", self.namespace);
        match self.kv.incr(&key, self.window).await {
            Ok(counter) => {
                if counter.value > u64::from(self.max_requests) {
                    return Err(GateError::RateLimited {
                        retry_after: counter.window_remaining,
                    });
                }
                Ok(())
            }
            Err(err) => {
                // Fail open: throttling is a load shield, not authentication.
                let _ = writeln!(
                    std::io::stderr(),
                    "workbridge: rate limit check degraded, admitting request: {err}"
                );
                Ok(())
            }
        }
    }
}

/// Extracts the token from a `Bearer` Authorization header.
fn parse_bearer_token(auth_header: Option<&str>) -> Result<String, GateError> {
    let header = auth_header
        .ok_or_else(|| GateError::Unauthorised("missing authorization".to_string()))?;
    if header.len() > MAX_AUTH_HEADER_BYTES {
        return Err(GateError::Unauthorised("authorization header too large".to_string()));
    }
    let mut parts = header.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(GateError::Unauthorised("invalid authorization header".to_string()));
    }
    Ok(token.to_string())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
