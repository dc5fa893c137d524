// workbridge-mcp/tests/pipeline.rs
// ============================================================================
// Module: Pipeline Tests
// Description: End-to-end request pipeline scenarios.
// Purpose: Exercise admission, dispatch, validation, and handlers together.
// Dependencies: workbridge-mcp, workbridge-upstream
// ============================================================================

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::Algorithm;
use jsonwebtoken::EncodingKey;
use jsonwebtoken::Header;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use workbridge_core::kv::MemoryKvStore;
use workbridge_core::kv::SharedKvStore;
use workbridge_core::unix_now_secs;
use workbridge_mcp::AdmissionGate;
use workbridge_mcp::GateError;
use workbridge_mcp::RequestContext;
use workbridge_mcp::ToolRouter;
use workbridge_mcp::gate::AdmissionGateConfig;
use workbridge_mcp::rpc::JsonRpcRequest;
use workbridge_mcp::rpc::dispatch_request;
use workbridge_mcp::tools::ToolRouterConfig;
use workbridge_upstream::cache::ResponseCache;
use workbridge_upstream::client::UpstreamError;
use workbridge_upstream::client::UpstreamGateway;
use workbridge_upstream::client::UpstreamRequest;

const SIGNING_KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

/// Gateway that answers task listings and creates from a scripted project.
struct ProjectGateway {
    calls: Mutex<Vec<String>>,
    open: usize,
    closed: usize,
    overdue: usize,
    create_response: Value,
}

impl ProjectGateway {
    fn new(open: usize, closed: usize, overdue: usize) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            open,
            closed,
            overdue,
            create_response: json!({"task": {"id": "T9"}}),
        }
    }

    fn creates(&self) -> usize {
        self.calls.lock().expect("calls").iter().filter(|label| label.starts_with("POST")).count()
    }

    fn tasks(count: usize, status: &str) -> Value {
        let entries: Vec<Value> = (0..count)
            .map(|index| json!({"id": format!("{status}-{index}"), "name": "t", "status": status}))
            .collect();
        json!({"tasks": entries})
    }
}

#[async_trait]
impl UpstreamGateway for ProjectGateway {
    async fn request(&self, request: UpstreamRequest) -> Result<Value, UpstreamError> {
        let method = match request.body {
            Some(_) => "POST",
            None => "GET",
        };
        let status = request
            .query
            .iter()
            .find(|(key, _)| key == "status")
            .map(|(_, value)| value.clone());
        self.calls
            .lock()
            .expect("calls")
            .push(format!("{method} {}{:?}", request.path, status));
        if method == "POST" {
            return Ok(self.create_response.clone());
        }
        Ok(match status.as_deref() {
            Some("open") => Self::tasks(self.open, "open"),
            Some("closed") => Self::tasks(self.closed, "closed"),
            Some("overdue") => Self::tasks(self.overdue, "overdue"),
            _ => Self::tasks(self.open + self.closed + self.overdue, "open"),
        })
    }
}

fn router_over(gateway: Arc<dyn UpstreamGateway>) -> ToolRouter {
    let kv = SharedKvStore::from_store(MemoryKvStore::new());
    ToolRouter::new(ToolRouterConfig {
        gateway,
        cache: ResponseCache::new(kv.clone(), "pipeline"),
        kv,
        portal_id: "portal-1".to_string(),
        namespace: "pipeline".to_string(),
        handler_timeout: Duration::from_secs(10),
    })
}

fn gate_with_limit(max_requests: u32) -> AdmissionGate {
    AdmissionGate::new(
        AdmissionGateConfig {
            signing_key: SIGNING_KEY.to_vec(),
            allowed_ips: vec!["127.0.0.1".to_string(), "::1".to_string()],
            max_token_lifetime: Duration::from_secs(86_400),
            test_profile: false,
            rate_limit_max_requests: max_requests,
            rate_limit_window: Duration::from_secs(60),
            namespace: "pipeline".to_string(),
        },
        SharedKvStore::from_store(MemoryKvStore::new()),
    )
    .expect("gate")
}

#[derive(Serialize)]
struct Claims {
    sub: String,
    exp: u64,
    iat: u64,
}

fn bearer() -> String {
    let now = unix_now_secs();
    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &Claims {
            sub: "assistant".to_string(),
            exp: now + 3600,
            iat: now,
        },
        &EncodingKey::from_secret(SIGNING_KEY),
    )
    .expect("token");
    format!("Bearer {token}")
}

fn call(id: u64, tool: &str, arguments: Value) -> JsonRpcRequest {
    serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "callTool",
        "params": {"name": tool, "arguments": arguments},
    }))
    .expect("request")
}

#[tokio::test]
async fn calls_without_a_bearer_are_rejected_before_dispatch() {
    let gate = gate_with_limit(100);
    let context = RequestContext::http(Some(IpAddr::from([127, 0, 0, 1])), None);
    let err = gate.admit(&context).await.expect_err("rejected");
    assert!(matches!(err, GateError::Unauthorised(_)));
    let response = workbridge_mcp::rpc::gate_error_response(&err, None);
    assert_eq!(response.error.expect("error").code, -32001);
}

#[tokio::test]
async fn list_tasks_round_trips_through_the_dispatcher() {
    let gateway = Arc::new(ProjectGateway::new(1, 0, 0));
    let router = router_over(gateway);
    let (response, _) = dispatch_request(
        &router,
        call(1, "listTasks", json!({"project_id": "P1", "status": "open"})),
    )
    .await;
    let result = response.expect("response").result.expect("result");
    assert_eq!(result["tasks"][0]["status"], "open");
    assert_eq!(result["total_count"], 1);
}

#[tokio::test]
async fn repeated_create_task_calls_issue_one_upstream_create() {
    let gateway = Arc::new(ProjectGateway::new(0, 0, 0));
    let router = router_over(gateway.clone());
    let arguments = json!({"project_id": "P1", "name": "Review"});

    let (first, _) = dispatch_request(&router, call(1, "createTask", arguments.clone())).await;
    let (second, _) = dispatch_request(&router, call(2, "createTask", arguments)).await;

    let first = first.expect("response").result.expect("result");
    let second = second.expect("response").result.expect("result");
    assert_eq!(first["task_id"], "T9");
    assert_eq!(second["task_id"], "T9");
    assert_eq!(gateway.creates(), 1, "upstream create issued exactly once");
}

#[tokio::test]
async fn project_summary_aggregates_the_scripted_counts() {
    let gateway = Arc::new(ProjectGateway::new(4, 6, 2));
    let router = router_over(gateway);
    let (response, _) =
        dispatch_request(&router, call(1, "getProjectSummary", json!({"project_id": "P1"}))).await;
    let result = response.expect("response").result.expect("result");
    assert_eq!(result["project_id"], "P1");
    assert_eq!(result["total_tasks"], 12);
    assert_eq!(result["completion_rate"], 0.5);
    assert_eq!(result["overdue_count"], 2);
}

#[tokio::test]
async fn upload_validation_failures_name_the_field() {
    let gateway = Arc::new(ProjectGateway::new(0, 0, 0));
    let router = router_over(gateway);
    let (response, _) = dispatch_request(
        &router,
        call(
            1,
            "uploadReviewSheet",
            json!({
                "project_id": "P1",
                "folder_id": "F1",
                "name": "review.xlsx",
                "content_base64": "abc",
            }),
        ),
    )
    .await;
    let error = response.expect("response").error.expect("error");
    assert_eq!(error.code, -32602);
    assert!(error.message.contains("content_base64"));
}

#[tokio::test]
async fn requests_over_the_ceiling_are_rate_limited_with_a_hint() {
    let limit = 100u32;
    let gate = gate_with_limit(limit);
    let auth = bearer();
    let context = RequestContext::http(Some(IpAddr::from([127, 0, 0, 1])), Some(auth));

    for _ in 0..limit {
        gate.admit(&context).await.expect("admitted within ceiling");
    }
    let err = gate.admit(&context).await.expect_err("ceiling reached");
    let GateError::RateLimited {
        retry_after,
    } = err
    else {
        panic!("expected rate limit");
    };
    assert!(retry_after <= Duration::from_secs(60));
    let response = workbridge_mcp::rpc::gate_error_response(
        &GateError::RateLimited {
            retry_after,
        },
        None,
    );
    let error = response.error.expect("error");
    assert_eq!(error.code, -32005);
    assert!(error.data.expect("data").retry_after_ms.is_some());
}
