// workbridge-mcp/src/telemetry.rs
// ============================================================================
// Module: Telemetry
// Description: Observability hooks for transports and tool routing.
// Purpose: Provide metric events and latency hooks without hard deps.
// Dependencies: workbridge-contract, workbridge-config
// ============================================================================

//! ## Overview
//! A thin metrics interface for request counters and latency observations,
//! intentionally dependency-light so deployments can plug in Prometheus or
//! OpenTelemetry without redesign. Labels never carry argument payloads or
//! secrets.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use workbridge_config::ServerTransport;
use workbridge_contract::ToolName;

// ============================================================================
// SECTION: Metric Labels
// ============================================================================

/// JSON-RPC request method classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum RpcMethod {
    /// Handshake request.
    Initialize,
    /// Tool listing request.
    ListTools,
    /// Tool invocation request.
    CallTool,
    /// Liveness ping.
    Ping,
    /// Webhook delivery (not JSON-RPC, shares the label space).
    Webhook,
    /// Invalid or malformed request.
    Invalid,
    /// Unsupported method.
    Other,
}

impl RpcMethod {
    /// Returns a stable label for the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::ListTools => "listTools",
            Self::CallTool => "callTool",
            Self::Ping => "ping",
            Self::Webhook => "webhook",
            Self::Invalid => "invalid",
            Self::Other => "other",
        }
    }
}

/// Request outcome classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum RpcOutcome {
    /// Successful request.
    Ok,
    /// Failed request.
    Error,
}

impl RpcOutcome {
    /// Returns a stable label for the outcome.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// Request metric event payload.
#[derive(Debug, Clone)]
pub struct RpcMetricEvent {
    /// Transport used for the request.
    pub transport: ServerTransport,
    /// Method classification.
    pub method: RpcMethod,
    /// Tool name when available.
    pub tool: Option<ToolName>,
    /// Request outcome.
    pub outcome: RpcOutcome,
    /// JSON-RPC error code when present.
    pub error_code: Option<i64>,
    /// Request body size in bytes.
    pub request_bytes: usize,
    /// Response body size in bytes.
    pub response_bytes: usize,
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Metrics sink for request telemetry.
pub trait Metrics: Send + Sync {
    /// Records a request counter event.
    fn record_request(&self, event: RpcMetricEvent);

    /// Records request latency.
    fn record_latency(&self, event: RpcMetricEvent, latency: Duration);
}

/// Metrics sink that discards all events.
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn record_request(&self, _event: RpcMetricEvent) {}

    fn record_latency(&self, _event: RpcMetricEvent, _latency: Duration) {}
}
