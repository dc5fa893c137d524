// workbridge-mcp/src/lib.rs
// ============================================================================
// Module: Workbridge Server
// Description: JSON-RPC tool server for assistant-driven upstream access.
// Purpose: Admission, dispatch, handlers, webhooks, and transports.
// Dependencies: workbridge-core, workbridge-upstream, axum, tokio
// ============================================================================

//! ## Overview
//! The server crate assembles the request pipeline: transports accept
//! JSON-RPC envelopes over HTTP or stdio, the admission gate verifies bearers
//! and enforces the allow-list and rate limit, the dispatcher routes to the
//! validated tool handlers, and results or classified errors flow back in the
//! envelope. The webhook router is an independent inbound path with HMAC
//! verification and replay suppression. All inputs are untrusted and are
//! validated before any upstream call.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod error;
pub mod files;
pub mod gate;
pub mod rpc;
pub mod server;
pub mod tasks;
pub mod telemetry;
pub mod tools;
pub mod validate;
pub mod webhook;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditEvent;
pub use audit::AuditSink;
pub use audit::FileAuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use error::ToolError;
pub use gate::AdmissionGate;
pub use gate::GateError;
pub use gate::Principal;
pub use gate::RequestContext;
pub use rpc::JsonRpcResponse;
pub use server::McpServer;
pub use server::McpServerError;
pub use telemetry::Metrics;
pub use telemetry::NoopMetrics;
pub use telemetry::RpcMetricEvent;
pub use telemetry::RpcMethod;
pub use telemetry::RpcOutcome;
pub use tools::ToolRouter;
pub use webhook::WebhookHandler;
pub use webhook::WebhookHandlerError;
pub use webhook::WebhookRouter;
