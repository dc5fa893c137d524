// workbridge-mcp/src/rpc.rs
// ============================================================================
// Module: JSON-RPC Dispatcher
// Description: Envelope parsing, method routing, and error mapping.
// Purpose: Speak JSON-RPC 2.0 to assistants over both transports.
// Dependencies: workbridge-contract, serde, serde_json
// ============================================================================

//! ## Overview
//! The dispatcher accepts `{jsonrpc, method, params, id}` envelopes and
//! routes `initialize`, `listTools`/`tools/list`, `callTool`/`tools/call`,
//! and `ping`. Requests without an `id` are notifications: they are handled
//! but produce no response. Every error carries a stable numeric code, a
//! kind label, and a retryability flag; upstream status and message ride in
//! `data` when relevant, never secrets.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use workbridge_contract::ToolName;

use crate::error::ToolError;
use crate::gate::GateError;
use crate::telemetry::RpcMethod;
use crate::tools::ToolRouter;

// ============================================================================
// SECTION: Error Codes
// ============================================================================

/// Malformed envelope or unsupported protocol version.
pub const CODE_INVALID_REQUEST: i64 = -32600;
/// Unknown method or tool.
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
/// Argument validation failure.
pub const CODE_INVALID_PARAMS: i64 = -32602;
/// Bearer missing, invalid, or expired.
pub const CODE_UNAUTHORISED: i64 = -32001;
/// Source address not allow-listed.
pub const CODE_FORBIDDEN: i64 = -32003;
/// Upstream resource not found.
pub const CODE_NOT_FOUND: i64 = -32004;
/// Rate-limit ceiling reached.
pub const CODE_RATE_LIMITED: i64 = -32005;
/// Upstream conflict on a non-idempotent write.
pub const CODE_CONFLICT: i64 = -32009;
/// Upstream unavailable after retries.
pub const CODE_UPSTREAM_UNAVAILABLE: i64 = -32010;
/// Upstream rejected the request.
pub const CODE_UPSTREAM_REJECTED: i64 = -32011;
/// No upstream credential could be produced.
pub const CODE_CREDENTIAL_UNAVAILABLE: i64 = -32012;
/// A deadline elapsed.
pub const CODE_TIMEOUT: i64 = -32013;
/// Programming error or unclassified failure.
pub const CODE_INTERNAL: i64 = -32050;
/// Response encoding failure.
pub const CODE_SERIALIZATION: i64 = -32060;
/// Request body exceeded the configured limit.
pub const CODE_REQUEST_TOO_LARGE: i64 = -32070;

/// Maps a code to its stable kind label.
#[must_use]
pub const fn error_kind_label(code: i64) -> &'static str {
    match code {
        CODE_INVALID_REQUEST => "invalid_request",
        CODE_METHOD_NOT_FOUND => "method_not_found",
        CODE_INVALID_PARAMS => "invalid_params",
        CODE_UNAUTHORISED => "unauthorised",
        CODE_FORBIDDEN => "forbidden",
        CODE_NOT_FOUND => "not_found",
        CODE_RATE_LIMITED => "rate_limited",
        CODE_CONFLICT => "conflict",
        CODE_UPSTREAM_UNAVAILABLE => "upstream_unavailable",
        CODE_UPSTREAM_REJECTED => "upstream_rejected",
        CODE_CREDENTIAL_UNAVAILABLE => "credential_unavailable",
        CODE_TIMEOUT => "timeout",
        CODE_INTERNAL => "internal",
        CODE_SERIALIZATION => "serialization",
        CODE_REQUEST_TOO_LARGE => "request_too_large",
        _ => "unknown",
    }
}

/// Returns true when callers may retry the failed request.
#[must_use]
pub const fn retryable_for_code(code: i64) -> bool {
    matches!(
        code,
        CODE_RATE_LIMITED
            | CODE_UPSTREAM_UNAVAILABLE
            | CODE_CREDENTIAL_UNAVAILABLE
            | CODE_TIMEOUT
    )
}

// ============================================================================
// SECTION: Envelope Types
// ============================================================================

/// Incoming JSON-RPC request payload.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version, must be "2.0".
    pub jsonrpc: String,
    /// Request identifier; absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Optional parameters payload.
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Returns true when the request is a notification.
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC response envelope.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// Protocol version.
    pub jsonrpc: &'static str,
    /// Request identifier.
    pub id: Value,
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload when the request fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error payload.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// Stable numeric code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Structured error metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonRpcErrorData>,
}

/// Structured error metadata.
#[derive(Debug, Serialize)]
pub struct JsonRpcErrorData {
    /// Stable kind label.
    pub kind: &'static str,
    /// Whether the request may be retried safely.
    pub retryable: bool,
    /// Upstream HTTP status when relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
    /// Upstream error message when relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_message: Option<String>,
    /// Request identifier when provided.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Suggested retry delay in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Tool call parameters.
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    /// Tool name.
    name: String,
    /// Named arguments.
    #[serde(default)]
    arguments: Value,
}

/// Dispatch metadata for metrics and audit.
#[derive(Debug, Clone, Copy)]
pub struct DispatchInfo {
    /// Method classification.
    pub method: RpcMethod,
    /// Tool name when available.
    pub tool: Option<ToolName>,
    /// Error code when the dispatch failed.
    pub error_code: Option<i64>,
}

// ============================================================================
// SECTION: Response Builders
// ============================================================================

/// Builds a success response.
#[must_use]
pub fn success_response(id: Value, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        id,
        result: Some(result),
        error: None,
    }
}

/// Builds an error response with standard metadata.
#[must_use]
pub fn error_response(
    id: Value,
    code: i64,
    message: String,
    request_id: Option<String>,
    retry_after_ms: Option<u64>,
) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(JsonRpcError {
            code,
            message,
            data: Some(JsonRpcErrorData {
                kind: error_kind_label(code),
                retryable: retryable_for_code(code),
                upstream_status: None,
                upstream_message: None,
                request_id,
                retry_after_ms,
            }),
        }),
    }
}

/// Builds an error response for a tool failure.
#[must_use]
pub fn tool_error_response(
    id: Value,
    err: &ToolError,
    request_id: Option<String>,
) -> JsonRpcResponse {
    let code = tool_error_code(err);
    let upstream_status = err.upstream_status();
    let upstream_message = match err {
        ToolError::UpstreamRejected {
            message, ..
        }
        | ToolError::UpstreamUnavailable {
            message, ..
        } => Some(message.clone()),
        _ => None,
    };
    JsonRpcResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(JsonRpcError {
            code,
            message: err.to_string(),
            data: Some(JsonRpcErrorData {
                kind: error_kind_label(code),
                retryable: retryable_for_code(code),
                upstream_status,
                upstream_message,
                request_id,
                retry_after_ms: None,
            }),
        }),
    }
}

/// Builds an error response for an admission failure.
#[must_use]
pub fn gate_error_response(err: &GateError, request_id: Option<String>) -> JsonRpcResponse {
    let (code, retry_after_ms) = match err {
        GateError::Unauthorised(_) => (CODE_UNAUTHORISED, None),
        GateError::Forbidden(_) => (CODE_FORBIDDEN, None),
        GateError::RateLimited {
            retry_after,
        } => (
            CODE_RATE_LIMITED,
            Some(u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX)),
        ),
    };
    error_response(Value::Null, code, err.to_string(), request_id, retry_after_ms)
}

/// Maps a tool error to its stable code.
#[must_use]
pub const fn tool_error_code(err: &ToolError) -> i64 {
    match err {
        ToolError::UnknownTool => CODE_METHOD_NOT_FOUND,
        ToolError::InvalidParams(_) => CODE_INVALID_PARAMS,
        ToolError::NotFound(_) => CODE_NOT_FOUND,
        ToolError::Conflict(_) => CODE_CONFLICT,
        ToolError::UpstreamUnavailable {
            ..
        } => CODE_UPSTREAM_UNAVAILABLE,
        ToolError::UpstreamRejected {
            ..
        } => CODE_UPSTREAM_REJECTED,
        ToolError::CredentialUnavailable(_) => CODE_CREDENTIAL_UNAVAILABLE,
        ToolError::Timeout => CODE_TIMEOUT,
        ToolError::Internal(_) => CODE_INTERNAL,
        ToolError::Serialization => CODE_SERIALIZATION,
    }
}

// ============================================================================
// SECTION: Dispatch
// ============================================================================

/// Protocol version advertised by `initialize`.
const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Dispatches a parsed request. Returns `None` for notifications.
pub async fn dispatch_request(
    router: &ToolRouter,
    request: JsonRpcRequest,
) -> (Option<JsonRpcResponse>, DispatchInfo) {
    let notification = request.is_notification();
    let id = request.id.clone().unwrap_or(Value::Null);
    let request_id = request.id.as_ref().map(Value::to_string);

    if request.jsonrpc != "2.0" {
        let info = DispatchInfo {
            method: RpcMethod::Invalid,
            tool: None,
            error_code: Some(CODE_INVALID_REQUEST),
        };
        let response = error_response(
            id,
            CODE_INVALID_REQUEST,
            "invalid json-rpc version".to_string(),
            request_id,
            None,
        );
        return (if notification { None } else { Some(response) }, info);
    }

    let (response, info) = match request.method.as_str() {
        "initialize" => handle_initialize(id, request.params.as_ref()),
        "initialized" | "notifications/initialized" => {
            // Client-ready notifications carry no response payload.
            let info = DispatchInfo {
                method: RpcMethod::Other,
                tool: None,
                error_code: None,
            };
            return (None, info);
        }
        "ping" => (
            success_response(id, json!({"message": "pong"})),
            DispatchInfo {
                method: RpcMethod::Ping,
                tool: None,
                error_code: None,
            },
        ),
        "listTools" | "tools/list" => (
            success_response(id, json!({"tools": router.definitions()})),
            DispatchInfo {
                method: RpcMethod::ListTools,
                tool: None,
                error_code: None,
            },
        ),
        "callTool" | "tools/call" => handle_call_tool(router, id, request.params, request_id).await,
        _ => (
            error_response(
                id,
                CODE_METHOD_NOT_FOUND,
                format!("method '{}' not found", request.method),
                request_id,
                None,
            ),
            DispatchInfo {
                method: RpcMethod::Other,
                tool: None,
                error_code: Some(CODE_METHOD_NOT_FOUND),
            },
        ),
    };

    (if notification { None } else { Some(response) }, info)
}

/// Handles the `initialize` handshake.
fn handle_initialize(id: Value, params: Option<&Value>) -> (JsonRpcResponse, DispatchInfo) {
    let protocol_version = params
        .and_then(|params| params.get("protocolVersion"))
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_PROTOCOL_VERSION);
    let result = json!({
        "protocolVersion": protocol_version,
        "capabilities": {"tools": {}},
        "serverInfo": {
            "name": "workbridge",
            "version": env!("CARGO_PKG_VERSION"),
        },
    });
    (
        success_response(id, result),
        DispatchInfo {
            method: RpcMethod::Initialize,
            tool: None,
            error_code: None,
        },
    )
}

/// Handles `callTool` and its `tools/call` alias.
async fn handle_call_tool(
    router: &ToolRouter,
    id: Value,
    params: Option<Value>,
    request_id: Option<String>,
) -> (JsonRpcResponse, DispatchInfo) {
    let params = params.unwrap_or(Value::Null);
    let call: ToolCallParams = match serde_json::from_value(params) {
        Ok(call) => call,
        Err(_) => {
            return (
                error_response(
                    id,
                    CODE_INVALID_PARAMS,
                    "params must carry a tool name and arguments".to_string(),
                    request_id,
                    None,
                ),
                DispatchInfo {
                    method: RpcMethod::CallTool,
                    tool: None,
                    error_code: Some(CODE_INVALID_PARAMS),
                },
            );
        }
    };
    let tool = ToolName::parse(&call.name);
    match router.call_tool(&call.name, call.arguments).await {
        Ok(result) => (
            success_response(id, result),
            DispatchInfo {
                method: RpcMethod::CallTool,
                tool,
                error_code: None,
            },
        ),
        Err(err) => {
            let code = tool_error_code(&err);
            (
                tool_error_response(id, &err, request_id),
                DispatchInfo {
                    method: RpcMethod::CallTool,
                    tool,
                    error_code: Some(code),
                },
            )
        }
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
    use serde_json::Value;
    use serde_json::json;
    use workbridge_core::kv::MemoryKvStore;
    use workbridge_core::kv::SharedKvStore;
    use workbridge_upstream::cache::ResponseCache;
    use workbridge_upstream::client::UpstreamError;
    use workbridge_upstream::client::UpstreamGateway;
    use workbridge_upstream::client::UpstreamRequest;

    use super::CODE_INVALID_PARAMS;
    use super::CODE_METHOD_NOT_FOUND;
    use super::JsonRpcRequest;
    use super::dispatch_request;
    use crate::telemetry::RpcMethod;
    use crate::tools::ToolRouter;
    use crate::tools::ToolRouterConfig;

    struct FixedGateway {
        response: Value,
    }

    #[async_trait]
    impl UpstreamGateway for FixedGateway {
        async fn request(&self, _request: UpstreamRequest) -> Result<Value, UpstreamError> {
            Ok(self.response.clone())
        }
    }

    fn router(response: Value) -> ToolRouter {
        let kv = SharedKvStore::from_store(MemoryKvStore::new());
        ToolRouter::new(ToolRouterConfig {
            gateway: Arc::new(FixedGateway {
                response,
            }),
            cache: ResponseCache::new(kv.clone(), "test"),
            kv,
            portal_id: "portal-1".to_string(),
            namespace: "test".to_string(),
            handler_timeout: Duration::from_secs(5),
        })
    }

    fn request(raw: Value) -> JsonRpcRequest {
        serde_json::from_value(raw).expect("request")
    }

    #[tokio::test]
    async fn call_tool_returns_normalised_result() {
        let router = router(json!({"tasks": [{"id": "T1", "name": "A", "status": "open"}]}));
        let envelope = request(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "callTool",
            "params": {"name": "listTasks", "arguments": {"project_id": "P1", "status": "open"}},
        }));
        let (response, info) = dispatch_request(&router, envelope).await;
        let response = response.expect("response");
        assert_eq!(info.method, RpcMethod::CallTool);
        let result = response.result.expect("result");
        assert_eq!(result["tasks"][0]["id"], "T1");
        assert_eq!(result["tasks"][0]["status"], "open");
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn tools_call_alias_matches_call_tool() {
        let router = router(json!({"tasks": []}));
        let envelope = request(json!({
            "jsonrpc": "2.0",
            "id": "a",
            "method": "tools/call",
            "params": {"name": "listTasks", "arguments": {"project_id": "P1"}},
        }));
        let (response, _) = dispatch_request(&router, envelope).await;
        assert!(response.expect("response").result.is_some());
    }

    #[tokio::test]
    async fn invalid_params_use_the_standard_code() {
        let router = router(json!({}));
        let envelope = request(json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "callTool",
            "params": {"name": "listTasks", "arguments": {}},
        }));
        let (response, info) = dispatch_request(&router, envelope).await;
        let error = response.expect("response").error.expect("error");
        assert_eq!(error.code, CODE_INVALID_PARAMS);
        assert_eq!(info.error_code, Some(CODE_INVALID_PARAMS));
        let data = error.data.expect("data");
        assert_eq!(data.kind, "invalid_params");
        assert!(!data.retryable);
        assert!(error.message.contains("project_id"));
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let router = router(json!({}));
        let envelope = request(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "shutdownEverything",
        }));
        let (response, _) = dispatch_request(&router, envelope).await;
        let error = response.expect("response").error.expect("error");
        assert_eq!(error.code, CODE_METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn notifications_produce_no_response() {
        let router = router(json!({"tasks": []}));
        let envelope = request(json!({
            "jsonrpc": "2.0",
            "method": "callTool",
            "params": {"name": "listTasks", "arguments": {"project_id": "P1"}},
        }));
        let (response, info) = dispatch_request(&router, envelope).await;
        assert!(response.is_none());
        assert_eq!(info.method, RpcMethod::CallTool);
    }

    #[tokio::test]
    async fn failed_notifications_stay_silent_but_carry_the_code() {
        let router = router(json!({}));
        let envelope = request(json!({
            "jsonrpc": "2.0",
            "method": "callTool",
            "params": {"name": "listTasks", "arguments": {}},
        }));
        let (response, info) = dispatch_request(&router, envelope).await;
        assert!(response.is_none());
        assert_eq!(info.error_code, Some(CODE_INVALID_PARAMS));
    }

    #[tokio::test]
    async fn wrong_version_is_invalid_request() {
        let router = router(json!({}));
        let envelope = request(json!({
            "jsonrpc": "1.0",
            "id": 3,
            "method": "ping",
        }));
        let (response, _) = dispatch_request(&router, envelope).await;
        let error = response.expect("response").error.expect("error");
        assert_eq!(error.code, super::CODE_INVALID_REQUEST);
    }

    #[tokio::test]
    async fn initialize_echoes_the_client_protocol_version() {
        let router = router(json!({}));
        let envelope = request(json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "initialize",
            "params": {"protocolVersion": "2025-06-18"},
        }));
        let (response, info) = dispatch_request(&router, envelope).await;
        let result = response.expect("response").result.expect("result");
        assert_eq!(result["protocolVersion"], "2025-06-18");
        assert_eq!(result["serverInfo"]["name"], "workbridge");
        assert_eq!(info.method, RpcMethod::Initialize);
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let router = router(json!({}));
        let envelope = request(json!({"jsonrpc": "2.0", "id": 5, "method": "ping"}));
        let (response, _) = dispatch_request(&router, envelope).await;
        let result = response.expect("response").result.expect("result");
        assert_eq!(result["message"], "pong");
    }

    #[tokio::test]
    async fn list_tools_advertises_the_closed_registry() {
        let router = router(json!({}));
        let envelope = request(json!({"jsonrpc": "2.0", "id": 6, "method": "listTools"}));
        let (response, _) = dispatch_request(&router, envelope).await;
        let result = response.expect("response").result.expect("result");
        let tools = result["tools"].as_array().expect("tools");
        assert_eq!(tools.len(), 9);
        assert!(tools.iter().any(|tool| tool["name"] == "createTask"));
    }
}
