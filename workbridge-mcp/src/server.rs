// workbridge-mcp/src/server.rs
// ============================================================================
// Module: Server
// Description: HTTP and stdio transports for the JSON-RPC tool server.
// Purpose: Wire admission, dispatch, webhooks, health, and the manifest.
// Dependencies: workbridge-config, workbridge-upstream, axum, tokio
// ============================================================================

//! ## Overview
//! The HTTP transport exposes `/rpc` (admission-gated JSON-RPC), `/webhook`
//! (signature-gated deliveries), and the unauthenticated `/health` and
//! `/manifest` probes. The stdio transport reads newline-delimited envelopes
//! and multiplexes concurrent in-flight requests by `id`; it never passes
//! through the admission gate. Tool errors ride in the envelope with HTTP
//! 200; admission and transport failures keep their natural status codes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::extract::DefaultBodyLimit;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::header::RETRY_AFTER;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use workbridge_config::ServerTransport;
use workbridge_config::WorkbridgeConfig;
use workbridge_core::kv::MemoryKvStore;
use workbridge_core::kv::SharedKvStore;
use workbridge_upstream::cache::ResponseCache;
use workbridge_upstream::client::UpstreamClient;
use workbridge_upstream::client::UpstreamClientConfig;
use workbridge_upstream::client::UpstreamGateway;
use workbridge_upstream::token::HttpRefreshEndpoint;
use workbridge_upstream::token::TokenManager;
use workbridge_upstream::token::TokenManagerConfig;

use crate::audit::AuditEvent;
use crate::audit::AuditEventParams;
use crate::audit::AuditSink;
use crate::audit::FileAuditSink;
use crate::audit::NoopAuditSink;
use crate::audit::StderrAuditSink;
use crate::gate::AdmissionGate;
use crate::gate::AdmissionGateConfig;
use crate::gate::GateError;
use crate::gate::Principal;
use crate::gate::RequestContext;
use crate::rpc::CODE_INVALID_REQUEST;
use crate::rpc::CODE_REQUEST_TOO_LARGE;
use crate::rpc::CODE_TIMEOUT;
use crate::rpc::DispatchInfo;
use crate::rpc::JsonRpcRequest;
use crate::rpc::JsonRpcResponse;
use crate::rpc::dispatch_request;
use crate::rpc::error_kind_label;
use crate::rpc::error_response;
use crate::rpc::gate_error_response;
use crate::telemetry::Metrics;
use crate::telemetry::NoopMetrics;
use crate::telemetry::RpcMetricEvent;
use crate::telemetry::RpcMethod;
use crate::telemetry::RpcOutcome;
use crate::tools::ToolRouter;
use crate::tools::ToolRouterConfig;
use crate::webhook::DeliveryHeaders;
use crate::webhook::WebhookError;
use crate::webhook::WebhookRouter;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Server construction and transport errors.
#[derive(Debug, thiserror::Error)]
pub enum McpServerError {
    /// Configuration errors (exit code 1 territory).
    #[error("config error: {0}")]
    Config(String),
    /// Initialization errors (exit code 2 territory).
    #[error("init error: {0}")]
    Init(String),
    /// Transport errors while serving.
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Optional component overrides, used by embedders and tests.
#[derive(Default)]
pub struct ServerOverrides {
    /// Replacement upstream gateway.
    pub gateway: Option<Arc<dyn UpstreamGateway>>,
    /// Replacement metrics sink.
    pub metrics: Option<Arc<dyn Metrics>>,
    /// Replacement audit sink.
    pub audit: Option<Arc<dyn AuditSink>>,
}

/// Workbridge server instance.
pub struct McpServer {
    /// Bind address for the HTTP transport.
    bind: String,
    /// Selected transport.
    transport: ServerTransport,
    /// Shared request-processing state.
    state: Arc<ServerState>,
}

/// Shared state for transport handlers.
struct ServerState {
    /// Tool router.
    router: ToolRouter,
    /// Admission gate (HTTP transport only).
    gate: Option<AdmissionGate>,
    /// Webhook router when enabled.
    webhook: Option<WebhookRouter>,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
    /// Metrics sink.
    metrics: Arc<dyn Metrics>,
    /// Shared KV store (health probe).
    kv: SharedKvStore,
    /// Token manager (health probe).
    tokens: TokenManager,
    /// Last-known upstream reachability.
    upstream_healthy: Arc<AtomicBool>,
    /// Maximum request body size.
    max_body_bytes: usize,
    /// End-to-end request deadline.
    request_timeout: Duration,
    /// Transport label for events.
    transport: ServerTransport,
}

impl McpServer {
    /// Builds a server from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError`] when construction fails.
    pub fn from_config(config: WorkbridgeConfig) -> Result<Self, McpServerError> {
        Self::from_config_with_overrides(config, ServerOverrides::default())
    }

    /// Builds a server from configuration with component overrides.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError`] when construction fails.
    pub fn from_config_with_overrides(
        config: WorkbridgeConfig,
        overrides: ServerOverrides,
    ) -> Result<Self, McpServerError> {
        config.validate().map_err(|err| McpServerError::Config(err.to_string()))?;

        let kv = SharedKvStore::from_store(MemoryKvStore::new());
        let namespace = config.kv.namespace.clone();

        let endpoint = HttpRefreshEndpoint::new(
            config.upstream.token_url.clone(),
            config.upstream.client_id.clone(),
            config.upstream.client_secret.clone(),
            config.upstream.refresh_token.clone(),
        )
        .map_err(|err| McpServerError::Init(err.to_string()))?;
        let tokens = TokenManager::new(
            kv.clone(),
            Arc::new(endpoint),
            TokenManagerConfig {
                safety_margin: Duration::from_secs(config.upstream.token_safety_margin_secs),
                ttl_ceiling: Duration::from_secs(config.upstream.token_ttl_ceiling_secs),
                refresh_timeout: Duration::from_secs(config.upstream.refresh_timeout_secs),
                namespace: namespace.clone(),
            },
        );

        let (gateway, upstream_healthy): (Arc<dyn UpstreamGateway>, Arc<AtomicBool>) =
            match overrides.gateway {
                Some(gateway) => (gateway, Arc::new(AtomicBool::new(true))),
                None => {
                    let client = UpstreamClient::new(tokens.clone(), UpstreamClientConfig {
                        projects_base_url: config.upstream.projects_base_url.clone(),
                        files_base_url: config.upstream.files_base_url.clone(),
                        request_timeout: Duration::from_millis(
                            config.upstream.request_timeout_ms,
                        ),
                        pool_max_idle_per_host: config.upstream.pool_max_idle_per_host,
                    })
                    .map_err(|err| McpServerError::Init(err.to_string()))?;
                    let flag = client.health_flag();
                    (Arc::new(client), flag)
                }
            };

        let router = ToolRouter::new(ToolRouterConfig {
            gateway,
            cache: ResponseCache::new(kv.clone(), namespace.clone()),
            kv: kv.clone(),
            portal_id: config.upstream.portal_id.clone(),
            namespace: namespace.clone(),
            handler_timeout: Duration::from_millis(config.server.handler_timeout_ms),
        });

        let gate = if config.server.transport == ServerTransport::Http {
            let gate = AdmissionGate::new(
                AdmissionGateConfig {
                    signing_key: config.auth.bearer_signing_key.clone().into_bytes(),
                    allowed_ips: config.auth.allowed_ips.clone(),
                    max_token_lifetime: Duration::from_secs(config.auth.max_token_lifetime_secs),
                    test_profile: config.auth.test_profile,
                    rate_limit_max_requests: config.auth.rate_limit.max_requests,
                    rate_limit_window: Duration::from_secs(config.auth.rate_limit.window_secs),
                    namespace: namespace.clone(),
                },
                kv.clone(),
            )
            .map_err(McpServerError::Config)?;
            Some(gate)
        } else {
            None
        };

        let webhook = if config.webhook.enabled {
            Some(WebhookRouter::new(
                config.webhook.secret.clone().into_bytes(),
                Duration::from_secs(config.webhook.timestamp_tolerance_secs),
                kv.clone(),
                namespace,
            ))
        } else {
            None
        };

        let audit = match overrides.audit {
            Some(audit) => audit,
            None => build_audit_sink(&config)?,
        };
        let metrics = overrides.metrics.unwrap_or_else(|| Arc::new(NoopMetrics));

        let state = ServerState {
            router,
            gate,
            webhook,
            audit,
            metrics,
            kv,
            tokens,
            upstream_healthy,
            max_body_bytes: config.server.max_body_bytes,
            request_timeout: Duration::from_millis(config.server.request_timeout_ms),
            transport: config.server.transport,
        };
        Ok(Self {
            bind: config.server.bind.clone(),
            transport: config.server.transport,
            state: Arc::new(state),
        })
    }

    /// Serves requests on the configured transport until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError`] when the transport fails or the KV store is
    /// unreachable at boot.
    pub async fn serve(self) -> Result<(), McpServerError> {
        self.state
            .kv
            .ping()
            .await
            .map_err(|err| McpServerError::Init(format!("kv unreachable at boot: {err}")))?;
        match self.transport {
            ServerTransport::Http => serve_http(self.bind, self.state).await,
            ServerTransport::Stdio => serve_stdio(self.state).await,
        }
    }
}

/// Builds an audit sink from server configuration.
fn build_audit_sink(config: &WorkbridgeConfig) -> Result<Arc<dyn AuditSink>, McpServerError> {
    if !config.server.audit.enabled {
        return Ok(Arc::new(NoopAuditSink));
    }
    if let Some(path) = &config.server.audit.path {
        let sink = FileAuditSink::new(std::path::Path::new(path))
            .map_err(|err| McpServerError::Config(format!("audit log open failed: {err}")))?;
        return Ok(Arc::new(sink));
    }
    Ok(Arc::new(StderrAuditSink))
}

// ============================================================================
// SECTION: HTTP Transport
// ============================================================================

/// Serves the HTTP transport.
async fn serve_http(bind: String, state: Arc<ServerState>) -> Result<(), McpServerError> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|_| McpServerError::Config(format!("invalid bind address: {bind}")))?;
    let max_body_bytes = state.max_body_bytes;
    let app = Router::new()
        .route("/rpc", post(handle_rpc))
        .route("/webhook", post(handle_webhook))
        .route("/health", get(handle_health))
        .route("/manifest", get(handle_manifest))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| McpServerError::Init(format!("http bind failed: {err}")))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|err| McpServerError::Transport(format!("http server failed: {err}")))
}

/// Handles JSON-RPC posts.
async fn handle_rpc(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    let auth_header =
        headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()).map(str::to_string);
    let context = RequestContext::http(Some(peer.ip()), auth_header);
    let (status, retry_after, response) = process_rpc(&state, context, &bytes).await;
    match response {
        Some(payload) => {
            let mut response = (status, axum::Json(payload)).into_response();
            if let Some(retry_after) = retry_after {
                if let Ok(value) = retry_after.as_secs().to_string().parse() {
                    response.headers_mut().insert(RETRY_AFTER, value);
                }
            }
            response
        }
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Runs the full RPC pipeline for one request body.
async fn process_rpc(
    state: &ServerState,
    context: RequestContext,
    bytes: &[u8],
) -> (StatusCode, Option<Duration>, Option<JsonRpcResponse>) {
    let started_at = Instant::now();
    let request_bytes = bytes.len();

    if request_bytes > state.max_body_bytes {
        let response = error_response(
            Value::Null,
            CODE_REQUEST_TOO_LARGE,
            "request body too large".to_string(),
            None,
            None,
        );
        record(
            state,
            &context,
            None,
            reject_info(CODE_REQUEST_TOO_LARGE),
            Some(&response),
            request_bytes,
            started_at,
        );
        return (StatusCode::PAYLOAD_TOO_LARGE, None, Some(response));
    }

    let principal = match &state.gate {
        Some(gate) => match gate.admit(&context).await {
            Ok(principal) => Some(principal),
            Err(err) => {
                let (status, retry_after) = match &err {
                    GateError::Unauthorised(_) => (StatusCode::UNAUTHORIZED, None),
                    GateError::Forbidden(_) => (StatusCode::FORBIDDEN, None),
                    GateError::RateLimited {
                        retry_after,
                    } => (StatusCode::TOO_MANY_REQUESTS, Some(*retry_after)),
                };
                let response = gate_error_response(&err, context.request_id.clone());
                let code = response.error.as_ref().map_or(0, |error| error.code);
                record(
                    state,
                    &context,
                    None,
                    reject_info(code),
                    Some(&response),
                    request_bytes,
                    started_at,
                );
                return (status, retry_after, Some(response));
            }
        },
        None => None,
    };

    let request: JsonRpcRequest = match serde_json::from_slice(bytes) {
        Ok(request) => request,
        Err(_) => {
            let response = error_response(
                Value::Null,
                CODE_INVALID_REQUEST,
                "invalid json-rpc request".to_string(),
                None,
                None,
            );
            record(
                state,
                &context,
                principal.as_ref(),
                reject_info(CODE_INVALID_REQUEST),
                Some(&response),
                request_bytes,
                started_at,
            );
            return (StatusCode::BAD_REQUEST, None, Some(response));
        }
    };

    let context = match &request.id {
        Some(id) => context.with_request_id(id.to_string()),
        None => context,
    };
    let id = request.id.clone().unwrap_or(Value::Null);
    let notification = request.is_notification();

    let dispatched = dispatch_request(&state.router, request);
    let (response, info) = match tokio::time::timeout(state.request_timeout, dispatched).await {
        Ok(outcome) => outcome,
        Err(_) => {
            let response = error_response(
                id,
                CODE_TIMEOUT,
                "request deadline exceeded".to_string(),
                context.request_id.clone(),
                None,
            );
            let info = reject_info(CODE_TIMEOUT);
            let response = if notification { None } else { Some(response) };
            record(
                state,
                &context,
                principal.as_ref(),
                info,
                response.as_ref(),
                request_bytes,
                started_at,
            );
            return (StatusCode::OK, None, response);
        }
    };

    record(
        state,
        &context,
        principal.as_ref(),
        info,
        response.as_ref(),
        request_bytes,
        started_at,
    );
    (StatusCode::OK, None, response)
}

/// Dispatch info for requests rejected before routing.
const fn reject_info(code: i64) -> DispatchInfo {
    DispatchInfo {
        method: RpcMethod::Invalid,
        tool: None,
        error_code: Some(code),
    }
}

/// Emits metrics and an audit record for one request.
fn record(
    state: &ServerState,
    context: &RequestContext,
    principal: Option<&Principal>,
    info: DispatchInfo,
    response: Option<&JsonRpcResponse>,
    request_bytes: usize,
    started_at: Instant,
) {
    let outcome = if info.error_code.is_some() { RpcOutcome::Error } else { RpcOutcome::Ok };
    let response_bytes = response
        .and_then(|response| serde_json::to_vec(response).ok())
        .map_or(0, |payload| payload.len());
    let event = RpcMetricEvent {
        transport: state.transport,
        method: info.method,
        tool: info.tool,
        outcome,
        error_code: info.error_code,
        request_bytes,
        response_bytes,
    };
    state.metrics.record_request(event.clone());
    state.metrics.record_latency(event, started_at.elapsed());
    state.audit.record(&AuditEvent::new(AuditEventParams {
        request_id: context.request_id.clone(),
        transport: state.transport,
        peer_ip: context.peer_ip.map(|ip| ip.to_string()),
        method: info.method,
        tool: info.tool,
        subject: principal.and_then(|principal| principal.subject.clone()),
        outcome,
        error_code: info.error_code,
        error_kind: info.error_code.map(error_kind_label),
        request_bytes,
        response_bytes,
    }));
}

/// Handles webhook deliveries.
async fn handle_webhook(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    let Some(webhook) = &state.webhook else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let delivery = DeliveryHeaders {
        signature: header_string(&headers, "x-zoho-signature"),
        timestamp: header_string(&headers, "x-zoho-timestamp"),
        delivery_id: header_string(&headers, "x-zoho-delivery-id"),
    };
    webhook_response(webhook.process(&delivery, &bytes).await)
}

/// Maps a webhook outcome to its transport status.
///
/// Downstream handler failures were already acknowledged inside the router
/// and arrive here as `Ok`; a handler programming error answers 500 to
/// invite redelivery, verification failures answer 401, and an unparsable
/// payload answers 400.
fn webhook_response(outcome: Result<Value, WebhookError>) -> Response {
    match outcome {
        Ok(result) => (StatusCode::OK, axum::Json(result)).into_response(),
        Err(WebhookError::MalformedPayload) => (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({"error": WebhookError::MalformedPayload.to_string()})),
        )
            .into_response(),
        Err(WebhookError::HandlerInternal(reason)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(json!({"error": format!("webhook handler internal error: {reason}")})),
        )
            .into_response(),
        Err(err) => {
            (StatusCode::UNAUTHORIZED, axum::Json(json!({"error": err.to_string()})))
                .into_response()
        }
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::to_string)
}

/// Handles the liveness probe.
async fn handle_health(State(state): State<Arc<ServerState>>) -> Response {
    let snapshot = health_snapshot(&state).await;
    (StatusCode::OK, axum::Json(snapshot)).into_response()
}

/// Builds the health report.
async fn health_snapshot(state: &ServerState) -> Value {
    let kv_ok = state.kv.ping().await.is_ok();
    let token_ok = matches!(state.tokens.peek().await, Ok(Some(_)));
    let upstream_ok = state.upstream_healthy.load(Ordering::Relaxed);
    let status = if kv_ok && token_ok && upstream_ok { "ok" } else { "degraded" };
    json!({
        "status": status,
        "checks": {
            "kv": check_label(kv_ok),
            "upstream_token": check_label(token_ok),
            "upstream_api": check_label(upstream_ok),
        },
    })
}

const fn check_label(ok: bool) -> &'static str {
    if ok { "ok" } else { "degraded" }
}

/// Handles the unauthenticated manifest probe.
async fn handle_manifest(State(state): State<Arc<ServerState>>) -> Response {
    let manifest = json!({"tools": state.router.definitions()});
    (StatusCode::OK, axum::Json(manifest)).into_response()
}

// ============================================================================
// SECTION: Stdio Transport
// ============================================================================

/// Serves newline-delimited JSON-RPC on stdin/stdout.
async fn serve_stdio(state: Arc<ServerState>) -> Result<(), McpServerError> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let (tx, mut rx) = mpsc::channel::<String>(64);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(payload) = rx.recv().await {
            if stdout.write_all(payload.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    loop {
        let line = lines
            .next_line()
            .await
            .map_err(|err| McpServerError::Transport(format!("stdio read failed: {err}")))?;
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let state = Arc::clone(&state);
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(payload) = process_stdio_line(&state, &line).await {
                let _ = tx.send(payload).await;
            }
        });
    }

    drop(tx);
    let _ = writer.await;
    Ok(())
}

/// Processes one stdio line; returns the serialized response when one is due.
async fn process_stdio_line(state: &ServerState, line: &str) -> Option<String> {
    let started_at = Instant::now();
    let context = RequestContext::stdio();
    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            // An unparseable line has no id to answer; log and move on.
            let _ = writeln!(std::io::stderr(), "workbridge: invalid stdio envelope: {err}");
            return None;
        }
    };
    let context = match &request.id {
        Some(id) => context.with_request_id(id.to_string()),
        None => context,
    };
    let id = request.id.clone().unwrap_or(Value::Null);
    let notification = request.is_notification();

    let dispatched = dispatch_request(&state.router, request);
    let (response, info) = match tokio::time::timeout(state.request_timeout, dispatched).await {
        Ok(outcome) => outcome,
        Err(_) => {
            let response = if notification {
                None
            } else {
                Some(error_response(
                    id,
                    CODE_TIMEOUT,
                    "request deadline exceeded".to_string(),
                    context.request_id.clone(),
                    None,
                ))
            };
            (response, reject_info(CODE_TIMEOUT))
        }
    };

    record(state, &context, None, info, response.as_ref(), line.len(), started_at);
    let response = response?;
    serde_json::to_string(&response).ok()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
