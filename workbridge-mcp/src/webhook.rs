// workbridge-mcp/src/webhook.rs
// ============================================================================
// Module: Webhook Router
// Description: Signature-verified ingestion of upstream event deliveries.
// Purpose: Verify, dedup, and fan out webhook events to handlers.
// Dependencies: workbridge-core, hmac, sha2
// ============================================================================

//! ## Overview
//! Deliveries are verified with HMAC-SHA-256 over the raw body using the
//! shared secret (constant-time comparison, `sha256=` prefix tolerated).
//! Deliveries with a timestamp outside the tolerance window or a delivery id
//! seen within the dedup window are not processed. Downstream handler
//! failures are logged and still acknowledged with success so the upstream
//! does not enter a redelivery storm; programming errors inside a handler
//! surface as [`WebhookError::HandlerInternal`] and invite redelivery.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::Hmac;
use hmac::Mac;
use serde_json::Value;
use serde_json::json;
use sha2::Sha256;
use thiserror::Error;
use workbridge_core::kv::SharedKvStore;
use workbridge_core::unix_now_secs;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Replay-suppression window for delivery ids.
const DEDUP_WINDOW: Duration = Duration::from_secs(300);
/// Signature header prefix some senders attach.
const SIGNATURE_PREFIX: &str = "sha256=";

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Webhook rejections that must not be acknowledged as processed.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Signature header missing.
    #[error("missing webhook signature")]
    MissingSignature,
    /// Signature did not verify.
    #[error("invalid webhook signature")]
    InvalidSignature,
    /// Delivery timestamp outside the tolerance window.
    #[error("webhook timestamp outside tolerance")]
    StaleTimestamp,
    /// Body is not valid JSON.
    #[error("webhook payload is not valid json")]
    MalformedPayload,
    /// A handler hit a programming error; redelivery is invited.
    #[error("webhook handler internal error: {0}")]
    HandlerInternal(String),
}

/// Failures raised by accepted-event handlers.
#[derive(Debug, Error)]
pub enum WebhookHandlerError {
    /// Expected downstream failure; the delivery is still acknowledged.
    #[error("{0}")]
    Downstream(String),
    /// Programming error; the delivery should be redelivered.
    #[error("{0}")]
    Internal(String),
}

// ============================================================================
// SECTION: Handler Trait
// ============================================================================

/// Downstream effect applied to an accepted event.
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    /// Handles an accepted event payload.
    async fn handle(&self, payload: &Value) -> Result<Value, WebhookHandlerError>;
}

/// Default handler for task-update events.
pub struct TaskUpdatedHandler;

#[async_trait]
impl WebhookHandler for TaskUpdatedHandler {
    async fn handle(&self, payload: &Value) -> Result<Value, WebhookHandlerError> {
        let task_id = payload.get("task_id").and_then(Value::as_str);
        let project_id = payload.get("project_id").and_then(Value::as_str);
        let changes: Vec<String> = payload
            .get("changes")
            .and_then(Value::as_object)
            .map(|changes| changes.keys().cloned().collect())
            .unwrap_or_default();
        Ok(json!({
            "status": "processed",
            "task_id": task_id,
            "project_id": project_id,
            "changes_processed": changes,
        }))
    }
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Delivery metadata extracted from transport headers.
#[derive(Debug, Default)]
pub struct DeliveryHeaders {
    /// Raw signature header value.
    pub signature: Option<String>,
    /// Delivery timestamp (Unix seconds) when supplied.
    pub timestamp: Option<String>,
    /// Delivery identifier for replay suppression.
    pub delivery_id: Option<String>,
}

/// Signature-verifying webhook router.
pub struct WebhookRouter {
    /// Shared HMAC secret.
    secret: Vec<u8>,
    /// Accepted clock skew for delivery timestamps.
    tolerance: Duration,
    /// KV store for replay suppression.
    kv: SharedKvStore,
    /// Key namespace prefix.
    namespace: String,
    /// Handlers keyed by event type.
    handlers: BTreeMap<String, Arc<dyn WebhookHandler>>,
}

impl WebhookRouter {
    /// Creates a router with the default task-update handler registered.
    #[must_use]
    pub fn new(
        secret: impl Into<Vec<u8>>,
        tolerance: Duration,
        kv: SharedKvStore,
        namespace: impl Into<String>,
    ) -> Self {
        let mut handlers: BTreeMap<String, Arc<dyn WebhookHandler>> = BTreeMap::new();
        handlers.insert("task.updated".to_string(), Arc::new(TaskUpdatedHandler));
        Self {
            secret: secret.into(),
            tolerance,
            kv,
            namespace: namespace.into(),
            handlers,
        }
    }

    /// Registers a handler for an event type.
    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn WebhookHandler>) {
        self.handlers.insert(event_type.into(), handler);
    }

    /// Verifies and processes a delivery.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError`] for verification failures and for handler
    /// programming errors; ordinary downstream handler failures are
    /// acknowledged in the returned payload instead.
    pub async fn process(
        &self,
        headers: &DeliveryHeaders,
        body: &[u8],
    ) -> Result<Value, WebhookError> {
        self.verify_signature(headers.signature.as_deref(), body)?;
        self.verify_timestamp(headers.timestamp.as_deref())?;

        if let Some(delivery_id) = headers.delivery_id.as_deref() {
            if self.is_replay(delivery_id).await {
                return Ok(json!({"status": "ignored", "reason": "duplicate_delivery"}));
            }
        }

        let payload: Value =
            serde_json::from_slice(body).map_err(|_| WebhookError::MalformedPayload)?;
        let event_type = payload
            .get("event_type")
            .and_then(Value::as_str)
            .unwrap_or("task.updated")
            .to_string();

        let Some(handler) = self.handlers.get(&event_type) else {
            return Ok(json!({"status": "ignored", "reason": "unknown_event_type"}));
        };
        match handler.handle(&payload).await {
            Ok(result) => Ok(result),
            Err(WebhookHandlerError::Downstream(reason)) => {
                // Acknowledge anyway so the upstream does not redeliver.
                let _ = writeln!(
                    std::io::stderr(),
                    "workbridge: webhook handler for {event_type} failed: {reason}"
                );
                Ok(json!({"status": "accepted", "handler_failed": true}))
            }
            Err(WebhookHandlerError::Internal(reason)) => {
                Err(WebhookError::HandlerInternal(reason))
            }
        }
    }

    /// Verifies the HMAC signature over the raw body.
    fn verify_signature(&self, signature: Option<&str>, body: &[u8]) -> Result<(), WebhookError> {
        let signature = signature.ok_or(WebhookError::MissingSignature)?;
        let trimmed = signature.trim();
        let hex = trimmed.strip_prefix(SIGNATURE_PREFIX).unwrap_or(trimmed);
        let provided = decode_hex(hex).ok_or(WebhookError::InvalidSignature)?;
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| WebhookError::InvalidSignature)?;
        mac.update(body);
        mac.verify_slice(&provided).map_err(|_| WebhookError::InvalidSignature)
    }

    /// Verifies the delivery timestamp when one is supplied.
    fn verify_timestamp(&self, timestamp: Option<&str>) -> Result<(), WebhookError> {
        let Some(timestamp) = timestamp else {
            return Ok(());
        };
        let supplied: u64 = timestamp.trim().parse().map_err(|_| WebhookError::StaleTimestamp)?;
        let now = unix_now_secs();
        let skew = now.abs_diff(supplied);
        if skew > self.tolerance.as_secs() {
            return Err(WebhookError::StaleTimestamp);
        }
        Ok(())
    }

    /// Records the delivery id and reports whether it was already seen.
    async fn is_replay(&self, delivery_id: &str) -> bool {
        let key = format!("{}:webhook:{delivery_id}", self.namespace);
        match self.kv.create_if_absent(&key, "seen", DEDUP_WINDOW).await {
            Ok(created) => !created,
            // A KV outage drops replay suppression, not the delivery.
            Err(_) => false,
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Decodes a lowercase or uppercase hex string.
fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(text.len() / 2);
    let bytes = text.as_bytes();
    for pair in bytes.chunks_exact(2) {
        let hi = hex_value(pair[0])?;
        let lo = hex_value(pair[1])?;
        out.push((hi << 4) | lo);
    }
    Some(out)
}

const fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use hmac::Hmac;
    use hmac::Mac;
    use serde_json::Value;
    use serde_json::json;
    use sha2::Sha256;
    use workbridge_core::kv::MemoryKvStore;
    use workbridge_core::kv::SharedKvStore;
    use workbridge_core::unix_now_secs;

    use super::DeliveryHeaders;
    use super::WebhookError;
    use super::WebhookHandler;
    use super::WebhookHandlerError;
    use super::WebhookRouter;

    const SECRET: &[u8] = b"webhook-shared-secret";

    fn sign(body: &[u8]) -> String {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(SECRET).expect("mac");
        mac.update(body);
        let digest = mac.finalize().into_bytes();
        digest.iter().map(|byte| format!("{byte:02x}")).collect()
    }

    fn router() -> WebhookRouter {
        WebhookRouter::new(
            SECRET,
            Duration::from_secs(300),
            SharedKvStore::from_store(MemoryKvStore::new()),
            "test",
        )
    }

    fn headers(body: &[u8]) -> DeliveryHeaders {
        DeliveryHeaders {
            signature: Some(sign(body)),
            timestamp: None,
            delivery_id: None,
        }
    }

    #[tokio::test]
    async fn valid_delivery_is_processed() {
        let router = router();
        let body = json!({
            "event_type": "task.updated",
            "task_id": "T1",
            "project_id": "P1",
            "changes": {"status": "closed"},
        });
        let bytes = serde_json::to_vec(&body).expect("body");
        let result = router.process(&headers(&bytes), &bytes).await.expect("processed");
        assert_eq!(result["status"], "processed");
        assert_eq!(result["task_id"], "T1");
        assert_eq!(result["changes_processed"], json!(["status"]));
    }

    #[tokio::test]
    async fn prefixed_signatures_are_accepted() {
        let router = router();
        let bytes = br#"{"task_id":"T1"}"#.to_vec();
        let delivery = DeliveryHeaders {
            signature: Some(format!("sha256={}", sign(&bytes))),
            timestamp: None,
            delivery_id: None,
        };
        router.process(&delivery, &bytes).await.expect("processed");
    }

    #[tokio::test]
    async fn missing_signature_is_rejected() {
        let router = router();
        let bytes = b"{}".to_vec();
        let err = router
            .process(&DeliveryHeaders::default(), &bytes)
            .await
            .expect_err("rejected");
        assert!(matches!(err, WebhookError::MissingSignature));
    }

    #[tokio::test]
    async fn tampered_body_is_rejected() {
        let router = router();
        let bytes = br#"{"task_id":"T1"}"#.to_vec();
        let delivery = headers(&bytes);
        let tampered = br#"{"task_id":"T2"}"#.to_vec();
        let err = router.process(&delivery, &tampered).await.expect_err("rejected");
        assert!(matches!(err, WebhookError::InvalidSignature));
    }

    #[tokio::test]
    async fn stale_timestamp_is_rejected() {
        let router = router();
        let bytes = b"{}".to_vec();
        let mut delivery = headers(&bytes);
        delivery.timestamp = Some((unix_now_secs() - 3600).to_string());
        let err = router.process(&delivery, &bytes).await.expect_err("rejected");
        assert!(matches!(err, WebhookError::StaleTimestamp));
    }

    #[tokio::test]
    async fn timestamp_within_tolerance_is_accepted() {
        let router = router();
        let bytes = b"{}".to_vec();
        let mut delivery = headers(&bytes);
        delivery.timestamp = Some((unix_now_secs() - 60).to_string());
        router.process(&delivery, &bytes).await.expect("processed");
    }

    #[tokio::test]
    async fn replayed_delivery_id_is_suppressed() {
        let router = router();
        let bytes = br#"{"task_id":"T1"}"#.to_vec();
        let mut delivery = headers(&bytes);
        delivery.delivery_id = Some("dlv-1".to_string());

        let first = router.process(&delivery, &bytes).await.expect("first");
        assert_eq!(first["status"], "processed");

        let second = router.process(&delivery, &bytes).await.expect("second");
        assert_eq!(second["status"], "ignored");
        assert_eq!(second["reason"], "duplicate_delivery");
    }

    #[tokio::test]
    async fn unknown_event_type_is_ignored() {
        let router = router();
        let body = json!({"event_type": "billing.changed"});
        let bytes = serde_json::to_vec(&body).expect("body");
        let result = router.process(&headers(&bytes), &bytes).await.expect("processed");
        assert_eq!(result["status"], "ignored");
        assert_eq!(result["reason"], "unknown_event_type");
    }

    #[tokio::test]
    async fn downstream_handler_failure_is_acknowledged() {
        struct FailingHandler;

        #[async_trait]
        impl WebhookHandler for FailingHandler {
            async fn handle(&self, _payload: &Value) -> Result<Value, WebhookHandlerError> {
                Err(WebhookHandlerError::Downstream("downstream sync broke".to_string()))
            }
        }

        let mut router = router();
        router.register("task.updated", Arc::new(FailingHandler));
        let body = json!({"event_type": "task.updated", "task_id": "T1"});
        let bytes = serde_json::to_vec(&body).expect("body");
        let result = router.process(&headers(&bytes), &bytes).await.expect("acknowledged");
        assert_eq!(result["status"], "accepted");
        assert_eq!(result["handler_failed"], true);
    }

    #[tokio::test]
    async fn internal_handler_fault_invites_redelivery() {
        struct BrokenHandler;

        #[async_trait]
        impl WebhookHandler for BrokenHandler {
            async fn handle(&self, _payload: &Value) -> Result<Value, WebhookHandlerError> {
                Err(WebhookHandlerError::Internal("unexpected state".to_string()))
            }
        }

        let mut router = router();
        router.register("task.updated", Arc::new(BrokenHandler));
        let body = json!({"event_type": "task.updated", "task_id": "T1"});
        let bytes = serde_json::to_vec(&body).expect("body");
        let err = router.process(&headers(&bytes), &bytes).await.expect_err("surfaced");
        assert!(matches!(err, WebhookError::HandlerInternal(_)));
    }

    #[tokio::test]
    async fn malformed_payload_is_a_framework_fault() {
        let router = router();
        let bytes = b"not json".to_vec();
        let err = router.process(&headers(&bytes), &bytes).await.expect_err("rejected");
        assert!(matches!(err, WebhookError::MalformedPayload));
    }
}
