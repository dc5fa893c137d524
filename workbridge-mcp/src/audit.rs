// workbridge-mcp/src/audit.rs
// ============================================================================
// Module: Audit Logging
// Description: Structured audit events for request handling.
// Purpose: Emit redacted JSON-line audit logs without hard dependencies.
// Dependencies: workbridge-config, serde
// ============================================================================

//! ## Overview
//! Audit events capture the outcome of every inbound request: transport,
//! peer, method, tool, error kind, and payload sizes. Argument values and
//! bearer material never appear in events. Sinks are intentionally simple so
//! deployments can route events into their preferred pipeline.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;
use workbridge_config::ServerTransport;
use workbridge_core::unix_now_millis;
use workbridge_contract::ToolName;

use crate::telemetry::RpcMethod;
use crate::telemetry::RpcOutcome;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Audit event payload for a single request.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Request identifier when provided.
    pub request_id: Option<String>,
    /// Transport used for the request.
    pub transport: ServerTransport,
    /// Peer IP address when available.
    pub peer_ip: Option<String>,
    /// Method classification.
    pub method: RpcMethod,
    /// Tool name when available.
    pub tool: Option<ToolName>,
    /// Authenticated subject when available.
    pub subject: Option<String>,
    /// Request outcome.
    pub outcome: RpcOutcome,
    /// JSON-RPC error code when present.
    pub error_code: Option<i64>,
    /// Normalized error kind label.
    pub error_kind: Option<&'static str>,
    /// Request body size in bytes.
    pub request_bytes: usize,
    /// Response body size in bytes.
    pub response_bytes: usize,
}

/// Constructor parameters for [`AuditEvent`].
#[derive(Debug)]
pub struct AuditEventParams {
    /// Request identifier when provided.
    pub request_id: Option<String>,
    /// Transport used for the request.
    pub transport: ServerTransport,
    /// Peer IP address when available.
    pub peer_ip: Option<String>,
    /// Method classification.
    pub method: RpcMethod,
    /// Tool name when available.
    pub tool: Option<ToolName>,
    /// Authenticated subject when available.
    pub subject: Option<String>,
    /// Request outcome.
    pub outcome: RpcOutcome,
    /// JSON-RPC error code when present.
    pub error_code: Option<i64>,
    /// Normalized error kind label.
    pub error_kind: Option<&'static str>,
    /// Request body size in bytes.
    pub request_bytes: usize,
    /// Response body size in bytes.
    pub response_bytes: usize,
}

impl AuditEvent {
    /// Creates a new audit event with a consistent timestamp.
    #[must_use]
    pub fn new(params: AuditEventParams) -> Self {
        Self {
            event: "rpc_request",
            timestamp_ms: unix_now_millis(),
            request_id: params.request_id,
            transport: params.transport,
            peer_ip: params.peer_ip,
            method: params.method,
            tool: params.tool,
            subject: params.subject,
            outcome: params.outcome,
            error_code: params.error_code,
            error_kind: params.error_kind,
            request_bytes: params.request_bytes,
            response_bytes: params.response_bytes,
        }
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink for request events.
pub trait AuditSink: Send + Sync {
    /// Records an audit event.
    fn record(&self, event: &AuditEvent);
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that logs JSON lines to an append-only file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            if let Ok(mut file) = self.file.lock() {
                let _ = writeln!(file, "{payload}");
                let _ = file.flush();
            }
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &AuditEvent) {}
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::io::Read;

    use workbridge_config::ServerTransport;

    use super::AuditEvent;
    use super::AuditEventParams;
    use super::AuditSink;
    use super::FileAuditSink;
    use crate::telemetry::RpcMethod;
    use crate::telemetry::RpcOutcome;

    fn sample_event() -> AuditEvent {
        AuditEvent::new(AuditEventParams {
            request_id: Some("1".to_string()),
            transport: ServerTransport::Http,
            peer_ip: Some("127.0.0.1".to_string()),
            method: RpcMethod::CallTool,
            tool: None,
            subject: Some("assistant".to_string()),
            outcome: RpcOutcome::Error,
            error_code: Some(-32001),
            error_kind: Some("unauthorised"),
            request_bytes: 64,
            response_bytes: 128,
        })
    }

    #[test]
    fn file_sink_appends_json_lines() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let sink = FileAuditSink::new(file.path()).expect("sink");
        sink.record(&sample_event());
        sink.record(&sample_event());

        let mut contents = String::new();
        std::fs::File::open(file.path())
            .expect("open")
            .read_to_string(&mut contents)
            .expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: serde_json::Value = serde_json::from_str(line).expect("json line");
            assert_eq!(parsed["event"], "rpc_request");
            assert_eq!(parsed["error_code"], -32001);
        }
    }
}
